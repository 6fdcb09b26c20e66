/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Trait for pluggable, content-addressed node persistence.

use std::{collections::HashMap, fmt::Display};

use crate::types::data_types::CryptoHash;

/// A content-addressed key value store that SHAMap nodes and ledger headers are persisted into.
///
/// Keys are always the [`CryptoHash`] of the value. Library users provide an implementation of this trait
/// backed by their choice of database; the crate only ever reads and writes through this interface.
///
/// ## Sharing
///
/// `NodeStore` implementations are handles: cloning a `NodeStore` must produce a handle to the **same**
/// underlying store, and every method takes `&self`. This allows the algorithm thread and the node sync
/// server's workers to read and write concurrently.
///
/// ## Bit-exactness
///
/// Callers only ever [`store`](Self::store) values whose digest equals their key. Implementations must
/// return the exact bytes that were stored, or later hash verification will reject them as corrupt.
pub trait NodeStore: Clone + Send + Sync + 'static {
    /// Get the bytes stored under `hash`, or `None` if nothing is stored under `hash`.
    fn fetch(&self, hash: &CryptoHash) -> Result<Option<Vec<u8>>, NodeStoreError>;

    /// Store `bytes` under `hash`. Storing the same value twice is a no-op.
    fn store(&self, hash: &CryptoHash, bytes: Vec<u8>) -> Result<(), NodeStoreError>;

    /// Get the bytes stored under each of `hashes`. Hashes for which nothing is stored are absent from the
    /// returned map.
    ///
    /// The default implementation calls [`fetch`](Self::fetch) once per hash. Backends that support
    /// multi-gets should override it.
    fn fetch_batch(
        &self,
        hashes: &[CryptoHash],
    ) -> Result<HashMap<CryptoHash, Vec<u8>>, NodeStoreError> {
        let mut found = HashMap::with_capacity(hashes.len());
        for hash in hashes {
            if let Some(bytes) = self.fetch(hash)? {
                found.insert(*hash, bytes);
            }
        }
        Ok(found)
    }

    /// Store every `(hash, bytes)` pair in `batch`.
    ///
    /// The default implementation calls [`store`](Self::store) once per pair. Backends that support atomic
    /// write batches should override it.
    fn store_batch(&self, batch: Vec<(CryptoHash, Vec<u8>)>) -> Result<(), NodeStoreError> {
        for (hash, bytes) in batch {
            self.store(&hash, bytes)?;
        }
        Ok(())
    }
}

/// Error when reading from or writing to a [`NodeStore`], or when decoding what was read. The error may
/// arise in the following circumstances:
/// 1. The backend itself failed (I/O, closed handle, etc.).
/// 2. The stored bytes could not be decoded into a node object.
/// 3. The stored bytes do not hash to the key they were stored under.
#[derive(Debug)]
pub enum NodeStoreError {
    Backend {
        reason: String,
    },
    Corrupt {
        hash: CryptoHash,
        reason: &'static str,
    },
    HashMismatch {
        expected: CryptoHash,
        actual: CryptoHash,
    },
}

impl NodeStoreError {
    /// Whether stored bytes did not hash to the key they were stored under.
    pub fn is_hash_mismatch(&self) -> bool {
        matches!(self, NodeStoreError::HashMismatch { .. })
    }
}

impl Display for NodeStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStoreError::Backend { reason } => write!(f, "node store backend error: {}", reason),
            NodeStoreError::Corrupt { hash, reason } => {
                write!(f, "corrupt node object {}: {}", hash, reason)
            }
            NodeStoreError::HashMismatch { expected, actual } => write!(
                f,
                "node object stored under {} hashes to {}",
                expected, actual
            ),
        }
    }
}
