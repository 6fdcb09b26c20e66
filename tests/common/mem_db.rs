//! A simple, volatile, in-memory implementation of [`NodeStore`].

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use shamap_consensus::{
    node_store::{NodeStore, NodeStoreError},
    types::data_types::CryptoHash,
};

/// An in-memory implementation of [`NodeStore`]. Clones share the same map.
#[derive(Clone)]
pub(crate) struct MemDB {
    map: Arc<Mutex<HashMap<CryptoHash, Vec<u8>>>>,
    fetches: Arc<AtomicUsize>,
}

impl MemDB {
    /// Create a new, empty `MemDB`.
    pub(crate) fn new() -> MemDB {
        MemDB {
            map: Arc::new(Mutex::new(HashMap::new())),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    pub(crate) fn contains(&self, hash: &CryptoHash) -> bool {
        self.map.lock().unwrap().contains_key(hash)
    }

    /// Number of calls to `fetch` so far.
    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Overwrite the bytes stored under `hash`, bypassing every check.
    pub(crate) fn corrupt(&self, hash: &CryptoHash, bytes: Vec<u8>) {
        self.map.lock().unwrap().insert(*hash, bytes);
    }
}

impl NodeStore for MemDB {
    fn fetch(&self, hash: &CryptoHash) -> Result<Option<Vec<u8>>, NodeStoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.map.lock().unwrap().get(hash).cloned())
    }

    fn store(&self, hash: &CryptoHash, bytes: Vec<u8>) -> Result<(), NodeStoreError> {
        self.map.lock().unwrap().insert(*hash, bytes);
        Ok(())
    }
}
