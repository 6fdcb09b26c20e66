/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Ledger`] type.

use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
};

use crate::{
    node_store::{NodeObject, NodeObjectType, NodeStore, NodeStoreError},
    shamap::{Family, LeafKind, SHAMap, SHAMapError, SHAMapItem, SHAMapType},
    types::data_types::{CryptoHash, LedgerSeq, NetTime},
};

use super::{
    close_time::{next_resolution, LEDGER_GENESIS_TIME_RESOLUTION},
    info::{LedgerInfo, NO_CONSENSUS_TIME},
    view::Change,
};

/// One generation of the shared state: a header, an account state map, and the map of transactions
/// that produced that state from the parent's.
///
/// ## Lifecycle
///
/// A ledger is created open, either as the [genesis](Self::genesis) ledger or as a
/// [child](Self::new_open) of a closed ledger. While open, its state can be written and transactions
/// can be added to it. [`set_accepted`](Self::set_accepted) closes it: the header hashes are filled in,
/// and both maps become immutable. Closed ledgers are shared as `Arc<Ledger<S>>`.
///
/// A child's state map starts out as a snapshot of its parent's, so the two share every account state
/// node that the child's transactions do not touch.
pub struct Ledger<S: NodeStore> {
    info: LedgerInfo,
    state_map: SHAMap<S>,
    tx_map: SHAMap<S>,
    closed: bool,
}

impl<S: NodeStore> Ledger<S> {
    /// Create the genesis ledger, holding `accounts` in its state map and `total_coins` in existence. The
    /// genesis ledger is returned already closed.
    pub fn genesis(
        family: Arc<Family<S>>,
        total_coins: u64,
        accounts: impl IntoIterator<Item = SHAMapItem>,
    ) -> Result<Ledger<S>, LedgerError> {
        let mut state_map = SHAMap::new(Arc::clone(&family), SHAMapType::State);
        for account in accounts {
            state_map.insert(account, LeafKind::AccountState)?;
        }
        let mut ledger = Ledger {
            info: LedgerInfo {
                seq: LedgerSeq::genesis(),
                parent_hash: CryptoHash::zero(),
                tx_hash: CryptoHash::zero(),
                account_hash: CryptoHash::zero(),
                parent_close_time: NetTime::epoch(),
                close_time: NetTime::epoch(),
                close_time_resolution: LEDGER_GENESIS_TIME_RESOLUTION,
                close_flags: 0,
                total_coins,
                hash: CryptoHash::zero(),
            },
            state_map,
            tx_map: SHAMap::new(family, SHAMapType::Transaction),
            closed: false,
        };
        ledger.set_accepted(NetTime::epoch(), LEDGER_GENESIS_TIME_RESOLUTION, true)?;
        Ok(ledger)
    }

    /// Create an open ledger that follows `parent`.
    pub fn new_open(parent: &Ledger<S>) -> Ledger<S> {
        let seq = parent.info.seq.next();
        let mut state_map = parent.state_map.snapshot(true);
        state_map.set_ledger_seq(seq);
        let mut tx_map = SHAMap::new(Arc::clone(parent.state_map.family()), SHAMapType::Transaction);
        tx_map.set_ledger_seq(seq);
        Ledger {
            info: LedgerInfo {
                seq,
                parent_hash: parent.info.hash,
                tx_hash: CryptoHash::zero(),
                account_hash: CryptoHash::zero(),
                parent_close_time: parent.info.close_time,
                close_time: NetTime::epoch(),
                close_time_resolution: next_resolution(
                    parent.info.close_time_resolution,
                    parent.info.close_agree(),
                    seq,
                ),
                close_flags: 0,
                total_coins: parent.info.total_coins,
                hash: CryptoHash::zero(),
            },
            state_map,
            tx_map,
            closed: false,
        }
    }

    /// Load the closed ledger with `hash` from `family`'s store. The ledger's maps are read lazily.
    pub fn load(family: Arc<Family<S>>, hash: &CryptoHash) -> Result<Ledger<S>, LedgerError> {
        let object = family
            .db()
            .fetch(hash)?
            .ok_or(LedgerError::MissingHeader { hash: *hash })?;
        if object.obj_type != NodeObjectType::Ledger {
            return Err(LedgerError::InvalidHeader {
                hash: *hash,
                reason: "stored object is not a ledger header",
            });
        }
        let info = LedgerInfo::from_canonical_bytes(&object.data, hash)?;
        let mut state_map = SHAMap::from_root_hash(Arc::clone(&family), &info.account_hash, SHAMapType::State)?;
        state_map.set_ledger_seq(info.seq);
        let mut tx_map = SHAMap::from_root_hash(family, &info.tx_hash, SHAMapType::Transaction)?;
        tx_map.set_ledger_seq(info.seq);
        Ok(Ledger {
            info,
            state_map,
            tx_map,
            closed: true,
        })
    }

    /// Assemble a closed ledger from a header and two maps that were acquired from peers. Fails if the maps
    /// do not match the header.
    pub fn from_parts(
        info: LedgerInfo,
        mut state_map: SHAMap<S>,
        mut tx_map: SHAMap<S>,
    ) -> Result<Ledger<S>, LedgerError> {
        if info.compute_hash() != info.hash
            || state_map.hash() != info.account_hash
            || tx_map.hash() != info.tx_hash
        {
            return Err(LedgerError::InvalidHeader {
                hash: info.hash,
                reason: "maps do not match the header",
            });
        }
        state_map.set_immutable();
        state_map.set_ledger_seq(info.seq);
        tx_map.set_immutable();
        tx_map.set_ledger_seq(info.seq);
        Ok(Ledger {
            info,
            state_map,
            tx_map,
            closed: true,
        })
    }

    pub fn info(&self) -> &LedgerInfo {
        &self.info
    }

    pub fn seq(&self) -> LedgerSeq {
        self.info.seq
    }

    /// The ledger hash. Only meaningful once the ledger is closed.
    pub fn hash(&self) -> CryptoHash {
        self.info.hash
    }

    pub fn parent_hash(&self) -> CryptoHash {
        self.info.parent_hash
    }

    pub fn close_time(&self) -> NetTime {
        self.info.close_time
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn state_map(&self) -> &SHAMap<S> {
        &self.state_map
    }

    pub fn tx_map(&self) -> &SHAMap<S> {
        &self.tx_map
    }

    pub fn family(&self) -> &Arc<Family<S>> {
        self.state_map.family()
    }

    /// Read the account state entry with `key`.
    pub fn read(&self, key: &CryptoHash) -> Result<Option<Arc<SHAMapItem>>, LedgerError> {
        Ok(self.state_map.fetch(key)?)
    }

    /// Write the account state entry with `key`, inserting it if it is absent.
    pub fn put(&mut self, key: CryptoHash, data: Vec<u8>) -> Result<(), LedgerError> {
        self.check_open()?;
        let item = SHAMapItem::new(key, data);
        if self.state_map.has_item(&key)? {
            self.state_map.update(item, LeafKind::AccountState)?;
        } else {
            self.state_map.insert(item, LeafKind::AccountState)?;
        }
        Ok(())
    }

    /// Remove the account state entry with `key`. Returns whether it was present.
    pub fn erase(&mut self, key: &CryptoHash) -> Result<bool, LedgerError> {
        self.check_open()?;
        Ok(self.state_map.erase(key)?)
    }

    /// Apply a batch of buffered state changes, in key order.
    pub fn apply_changes(
        &mut self,
        changes: impl IntoIterator<Item = (CryptoHash, Change)>,
    ) -> Result<(), LedgerError> {
        for (key, change) in changes {
            match change {
                Change::Put(data) => self.put(key, data)?,
                Change::Erase => {
                    self.erase(&key)?;
                }
            }
        }
        Ok(())
    }

    /// Record an applied transaction and its metadata in the transaction map. Returns `false` if the
    /// transaction is already recorded.
    pub fn add_transaction(
        &mut self,
        txid: CryptoHash,
        tx: &[u8],
        meta: &[u8],
    ) -> Result<bool, LedgerError> {
        self.check_open()?;
        Ok(self.tx_map.insert(
            SHAMapItem::new(txid, encode_tx_with_meta(tx, meta)),
            LeafKind::TransactionWithMeta,
        )?)
    }

    /// Get an applied transaction and its metadata.
    pub fn transaction(
        &self,
        txid: &CryptoHash,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>, LedgerError> {
        match self.tx_map.fetch(txid)? {
            Some(item) => Ok(Some(decode_tx_with_meta(item.data()).ok_or(
                LedgerError::InvalidTransaction { txid: *txid },
            )?)),
            None => Ok(None),
        }
    }

    /// Close the ledger with `close_time`. If the validators did not agree on a close time, the ledger
    /// closes one second after its parent and is flagged with [`NO_CONSENSUS_TIME`].
    pub fn set_accepted(
        &mut self,
        close_time: NetTime,
        close_time_resolution: u8,
        close_time_correct: bool,
    ) -> Result<(), LedgerError> {
        self.check_open()?;
        self.info.close_time_resolution = close_time_resolution;
        if close_time_correct {
            self.info.close_time = close_time;
            self.info.close_flags = 0;
        } else {
            self.info.close_time = self.info.parent_close_time + std::time::Duration::from_secs(1);
            self.info.close_flags = NO_CONSENSUS_TIME;
        }
        self.info.tx_hash = self.tx_map.hash();
        self.info.account_hash = self.state_map.hash();
        self.info.rehash();
        self.state_map.set_immutable();
        self.tx_map.set_immutable();
        self.closed = true;
        Ok(())
    }

    /// Collect the header and every node created since the last flush, marking the nodes clean. The
    /// returned objects are what has to be written to the store to make this ledger loadable.
    pub fn flush_dirty(&mut self) -> Result<Vec<NodeObject>, LedgerError> {
        if !self.closed {
            return Err(LedgerError::NotClosed);
        }
        let mut objects = self.state_map.flush_dirty();
        objects.extend(self.tx_map.flush_dirty());
        objects.push(NodeObject::new(
            NodeObjectType::Ledger,
            self.info.hash,
            self.info.canonical_bytes(),
        ));
        Ok(objects)
    }

    fn check_open(&self) -> Result<(), LedgerError> {
        if self.closed {
            Err(LedgerError::Immutable)
        } else {
            Ok(())
        }
    }
}

/// `tx len (u32 BE) ‖ tx ‖ meta len (u32 BE) ‖ meta`
fn encode_tx_with_meta(tx: &[u8], meta: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(8 + tx.len() + meta.len());
    bytes.extend_from_slice(&(tx.len() as u32).to_be_bytes());
    bytes.extend_from_slice(tx);
    bytes.extend_from_slice(&(meta.len() as u32).to_be_bytes());
    bytes.extend_from_slice(meta);
    bytes
}

fn decode_tx_with_meta(bytes: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let (tx, rest) = split_length_prefixed(bytes)?;
    let (meta, rest) = split_length_prefixed(rest)?;
    rest.is_empty().then(|| (tx.to_vec(), meta.to_vec()))
}

fn split_length_prefixed(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let len_bytes: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    let body = bytes.get(4..4 + len)?;
    Some((body, &bytes[4 + len..]))
}

/// Error when building, reading, or loading a ledger. The error may arise in the following circumstances:
/// 1. One of the ledger's maps failed.
/// 2. The store failed, or does not have the ledger's header.
/// 3. A stored or received header is malformed or does not hash to its key.
/// 4. A write was attempted on a closed ledger, or a flush on an open one.
#[derive(Debug)]
pub enum LedgerError {
    SHAMapError(SHAMapError),
    NodeStoreError(NodeStoreError),
    MissingHeader {
        hash: CryptoHash,
    },
    InvalidHeader {
        hash: CryptoHash,
        reason: &'static str,
    },
    InvalidTransaction {
        txid: CryptoHash,
    },
    Immutable,
    NotClosed,
}

impl LedgerError {
    pub fn is_hash_mismatch(&self) -> bool {
        match self {
            LedgerError::SHAMapError(err) => err.is_hash_mismatch(),
            LedgerError::NodeStoreError(err) => err.is_hash_mismatch(),
            _ => false,
        }
    }
}

impl From<SHAMapError> for LedgerError {
    fn from(value: SHAMapError) -> Self {
        LedgerError::SHAMapError(value)
    }
}

impl From<NodeStoreError> for LedgerError {
    fn from(value: NodeStoreError) -> Self {
        LedgerError::NodeStoreError(value)
    }
}

impl Display for LedgerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::SHAMapError(err) => Display::fmt(err, f),
            LedgerError::NodeStoreError(err) => Display::fmt(err, f),
            LedgerError::MissingHeader { hash } => write!(f, "ledger header {} not found", hash),
            LedgerError::InvalidHeader { hash, reason } => {
                write!(f, "invalid ledger header {}: {}", hash, reason)
            }
            LedgerError::InvalidTransaction { txid } => {
                write!(f, "malformed transaction entry {}", txid)
            }
            LedgerError::Immutable => write!(f, "ledger is closed"),
            LedgerError::NotClosed => write!(f, "ledger is still open"),
        }
    }
}
