/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Typed, hash-verifying facade over a [`NodeStore`].
//!
//! Values are stored in the backend as a one byte [`NodeObjectType`] tag followed by the object's
//! canonical bytes. The canonical bytes of every object kind already begin with their
//! [`HashPrefix`](crate::types::crypto_primitives::HashPrefix), so the SHA-512Half digest of the
//! canonical bytes is the object's hash. [`Database::fetch`] re-derives that digest and refuses to
//! return data that does not match the key it was stored under.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::types::{crypto_primitives::sha512_half, data_types::CryptoHash};

use super::pluggables::{NodeStore, NodeStoreError};

/// The kind of object a [`NodeObject`] holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeObjectType {
    /// A ledger header.
    Ledger,
    /// A node of an account state SHAMap.
    AccountNode,
    /// A node of a transaction SHAMap.
    TransactionNode,
}

impl NodeObjectType {
    fn tag(&self) -> u8 {
        match self {
            NodeObjectType::Ledger => 1,
            NodeObjectType::AccountNode => 3,
            NodeObjectType::TransactionNode => 4,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(NodeObjectType::Ledger),
            3 => Some(NodeObjectType::AccountNode),
            4 => Some(NodeObjectType::TransactionNode),
            _ => None,
        }
    }
}

/// A typed, content-addressed blob: the unit of storage in a [`Database`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeObject {
    pub obj_type: NodeObjectType,
    pub hash: CryptoHash,
    pub data: Vec<u8>,
}

impl NodeObject {
    pub fn new(obj_type: NodeObjectType, hash: CryptoHash, data: Vec<u8>) -> Self {
        Self {
            obj_type,
            hash,
            data,
        }
    }

    /// Encode into the bytes that are handed to the backend.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.data.len() + 1);
        bytes.push(self.obj_type.tag());
        bytes.extend_from_slice(&self.data);
        bytes
    }

    /// Decode bytes read from the backend under `hash`, verifying that their digest matches `hash`.
    pub fn decode(hash: CryptoHash, bytes: &[u8]) -> Result<Self, NodeStoreError> {
        let (tag, data) = bytes.split_first().ok_or(NodeStoreError::Corrupt {
            hash,
            reason: "empty value",
        })?;
        let obj_type = NodeObjectType::from_tag(*tag).ok_or(NodeStoreError::Corrupt {
            hash,
            reason: "unknown object type",
        })?;
        let actual = sha512_half(&[data]);
        if actual != hash {
            return Err(NodeStoreError::HashMismatch {
                expected: hash,
                actual,
            });
        }
        Ok(NodeObject::new(obj_type, hash, data.to_vec()))
    }
}

/// Counters kept by a [`Database`] for operational monitoring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    pub fetches: u64,
    pub fetch_hits: u64,
    pub stores: u64,
}

/// Typed facade over a [`NodeStore`] backend.
pub struct Database<S: NodeStore> {
    backend: S,
    fetches: AtomicU64,
    fetch_hits: AtomicU64,
    stores: AtomicU64,
}

impl<S: NodeStore> Database<S> {
    pub fn new(backend: S) -> Self {
        Self {
            backend,
            fetches: AtomicU64::new(0),
            fetch_hits: AtomicU64::new(0),
            stores: AtomicU64::new(0),
        }
    }

    /// Get a handle to the underlying backend.
    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Fetch and verify the object stored under `hash`.
    pub fn fetch(&self, hash: &CryptoHash) -> Result<Option<NodeObject>, NodeStoreError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        match self.backend.fetch(hash)? {
            Some(bytes) => {
                self.fetch_hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(NodeObject::decode(*hash, &bytes)?))
            }
            None => Ok(None),
        }
    }

    /// Fetch and verify every object in `hashes` that is present in the backend.
    pub fn fetch_batch(
        &self,
        hashes: &[CryptoHash],
    ) -> Result<HashMap<CryptoHash, NodeObject>, NodeStoreError> {
        self.fetches
            .fetch_add(hashes.len() as u64, Ordering::Relaxed);
        let raw = self.backend.fetch_batch(hashes)?;
        self.fetch_hits
            .fetch_add(raw.len() as u64, Ordering::Relaxed);
        let mut objects = HashMap::with_capacity(raw.len());
        for (hash, bytes) in raw {
            objects.insert(hash, NodeObject::decode(hash, &bytes)?);
        }
        Ok(objects)
    }

    /// Store a single object.
    pub fn store(&self, object: &NodeObject) -> Result<(), NodeStoreError> {
        self.stores.fetch_add(1, Ordering::Relaxed);
        self.backend.store(&object.hash, object.encode())
    }

    /// Store a batch of objects.
    pub fn store_batch(&self, objects: &[NodeObject]) -> Result<(), NodeStoreError> {
        if objects.is_empty() {
            return Ok(());
        }
        self.stores
            .fetch_add(objects.len() as u64, Ordering::Relaxed);
        self.backend
            .store_batch(objects.iter().map(|o| (o.hash, o.encode())).collect())
    }

    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            fetches: self.fetches.load(Ordering::Relaxed),
            fetch_hits: self.fetch_hits.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
        }
    }
}
