/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The ledger header and its canonical serialization.

use crate::types::{
    crypto_primitives::{sha512_half, HashPrefix},
    data_types::{CryptoHash, LedgerSeq, NetTime},
};

use super::implementation::LedgerError;

/// Set in [`LedgerInfo::close_flags`] when the validators could not agree on a close time, and the
/// ledger's close time is therefore just its parent's close time plus one second.
pub const NO_CONSENSUS_TIME: u8 = 0x01;

const CANONICAL_LEN: usize = 4 + 4 + 8 + 32 * 3 + 4 + 4 + 1 + 1;

/// Header of a ledger. The `hash` of a ledger commits to every other field, and through `tx_hash` and
/// `account_hash`, to the full contents of the ledger's two SHAMaps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerInfo {
    pub seq: LedgerSeq,
    pub parent_hash: CryptoHash,
    pub tx_hash: CryptoHash,
    pub account_hash: CryptoHash,
    pub parent_close_time: NetTime,
    pub close_time: NetTime,
    /// Seconds.
    pub close_time_resolution: u8,
    pub close_flags: u8,
    pub total_coins: u64,
    pub hash: CryptoHash,
}

impl LedgerInfo {
    /// The exact bytes hashed to get the ledger hash, which are also the bytes a ledger header is stored
    /// as:
    ///
    /// `LWR\0` ‖ seq (u32 BE) ‖ total_coins (u64 BE) ‖ parent_hash ‖ tx_hash ‖ account_hash ‖
    /// parent_close_time (u32 BE) ‖ close_time (u32 BE) ‖ close_time_resolution (u8) ‖ close_flags (u8)
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(CANONICAL_LEN);
        bytes.extend_from_slice(&HashPrefix::LEDGER_MASTER);
        bytes.extend_from_slice(&self.seq.to_be_bytes());
        bytes.extend_from_slice(&self.total_coins.to_be_bytes());
        bytes.extend_from_slice(self.parent_hash.as_bytes());
        bytes.extend_from_slice(self.tx_hash.as_bytes());
        bytes.extend_from_slice(self.account_hash.as_bytes());
        bytes.extend_from_slice(&self.parent_close_time.to_be_bytes());
        bytes.extend_from_slice(&self.close_time.to_be_bytes());
        bytes.push(self.close_time_resolution);
        bytes.push(self.close_flags);
        bytes
    }

    pub fn compute_hash(&self) -> CryptoHash {
        sha512_half(&[&self.canonical_bytes()])
    }

    /// Recompute `hash` from the other fields.
    pub fn rehash(&mut self) {
        self.hash = self.compute_hash();
    }

    /// Whether the validators agreed on this ledger's close time.
    pub fn close_agree(&self) -> bool {
        self.close_flags & NO_CONSENSUS_TIME == 0
    }

    /// Parse a header from its canonical bytes, checking that they hash to `expected`.
    pub fn from_canonical_bytes(bytes: &[u8], expected: &CryptoHash) -> Result<LedgerInfo, LedgerError> {
        if bytes.len() != CANONICAL_LEN || bytes[..4] != HashPrefix::LEDGER_MASTER {
            return Err(LedgerError::InvalidHeader {
                hash: *expected,
                reason: "bad length or prefix",
            });
        }
        let u32_at = |at: usize| u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let hash_at = |at: usize| CryptoHash::from_slice(&bytes[at..at + 32]).unwrap_or_default();
        let mut total_coins = [0u8; 8];
        total_coins.copy_from_slice(&bytes[8..16]);

        let mut info = LedgerInfo {
            seq: LedgerSeq::new(u32_at(4)),
            total_coins: u64::from_be_bytes(total_coins),
            parent_hash: hash_at(16),
            tx_hash: hash_at(48),
            account_hash: hash_at(80),
            parent_close_time: NetTime::new(u32_at(112)),
            close_time: NetTime::new(u32_at(116)),
            close_time_resolution: bytes[120],
            close_flags: bytes[121],
            hash: CryptoHash::zero(),
        };
        info.rehash();
        if info.hash != *expected {
            return Err(LedgerError::InvalidHeader {
                hash: *expected,
                reason: "header does not hash to its key",
            });
        }
        Ok(info)
    }
}
