/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The shared context that SHAMaps read missing nodes from.
//!
//! Every SHAMap holds an `Arc<Family<S>>`. The family owns the [`Database`] that flushed nodes are written
//! to, a [`TreeNodeCache`] that keeps recently used nodes in memory keyed by hash, and a
//! [`FullBelowCache`] of subtrees that are known to be completely present in the store. Both are trimmed
//! by [`Family::sweep`].

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::{Duration, Instant},
};

use crate::{
    node_store::{Database, NodeObject, NodeObjectType, NodeStore, NodeStoreError},
    types::data_types::CryptoHash,
};

use super::{implementation::SHAMapError, node::TreeNode};

/// Default number of nodes the [`TreeNodeCache`] tries to stay under.
pub const DEFAULT_CACHE_TARGET_SIZE: usize = 65_536;

/// Default age after which unused cached nodes are evicted.
pub const DEFAULT_CACHE_TARGET_AGE: Duration = Duration::from_secs(300);

/// Shared context for a group of SHAMaps backed by the same store.
pub struct Family<S: NodeStore> {
    db: Database<S>,
    cache: TreeNodeCache,
    full_below: FullBelowCache,
}

impl<S: NodeStore> Family<S> {
    pub fn new(backend: S) -> Self {
        Self::with_cache_params(backend, DEFAULT_CACHE_TARGET_SIZE, DEFAULT_CACHE_TARGET_AGE)
    }

    pub fn with_cache_params(backend: S, cache_target_size: usize, cache_target_age: Duration) -> Self {
        Self {
            db: Database::new(backend),
            cache: TreeNodeCache::new(cache_target_size, cache_target_age),
            full_below: FullBelowCache::new(cache_target_age),
        }
    }

    pub fn db(&self) -> &Database<S> {
        &self.db
    }

    pub fn cache(&self) -> &TreeNodeCache {
        &self.cache
    }

    pub fn full_below(&self) -> &FullBelowCache {
        &self.full_below
    }

    /// Trim the node cache and the full below cache. Returns the number of evicted entries.
    pub fn sweep(&self) -> usize {
        self.cache.sweep() + self.full_below.sweep()
    }

    /// Get the node with `hash`, from the cache if possible, otherwise from the store.
    ///
    /// Nodes read from the store are verified against `hash` before being cached and returned.
    pub fn fetch_node(&self, hash: &CryptoHash) -> Result<Arc<TreeNode>, SHAMapError> {
        if let Some(node) = self.cache.fetch(hash) {
            return Ok(node);
        }
        let object = match self.db.fetch(hash) {
            Ok(Some(object)) => object,
            Ok(None) => return Err(SHAMapError::MissingNode { hash: *hash }),
            Err(NodeStoreError::HashMismatch { expected, actual }) => {
                return Err(SHAMapError::HashMismatch { expected, actual })
            }
            Err(err) => return Err(err.into()),
        };
        let node = TreeNode::from_prefix(&object.data, hash)?;
        Ok(self.cache.insert(*hash, Arc::new(node)))
    }

    /// Write `node` to the store and the cache.
    pub(crate) fn store_node(
        &self,
        obj_type: NodeObjectType,
        node: &Arc<TreeNode>,
    ) -> Result<(), SHAMapError> {
        let hash = node.hash();
        self.db.store(&NodeObject::new(
            obj_type,
            hash,
            node.serialize_with_prefix(),
        ))?;
        self.cache.insert(hash, Arc::clone(node));
        Ok(())
    }

    /// Whether the subtree rooted at `hash` was already found to be complete in the store.
    pub(crate) fn is_full_below(&self, hash: &CryptoHash) -> bool {
        self.full_below.contains(hash)
    }

    pub(crate) fn set_full_below(&self, hash: CryptoHash) {
        self.full_below.insert(hash);
    }
}

/// Hashes of inner nodes whose whole subtree is present in the store, so that synching maps can skip
/// walking them again.
///
/// Entries are dropped by [`sweep`](Self::sweep) once they have not been looked at for the target age.
/// [`clear`](Self::clear) forgets every entry, which must happen if nodes may have been removed from the
/// store.
pub struct FullBelowCache {
    entries: Mutex<HashMap<CryptoHash, Instant>>,
    target_age: Duration,
}

impl FullBelowCache {
    pub fn new(target_age: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            target_age,
        }
    }

    pub fn contains(&self, hash: &CryptoHash) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(hash) {
            Some(last_access) => {
                *last_access = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn insert(&self, hash: CryptoHash) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(hash, Instant::now());
    }

    /// Drop entries older than the target age. Returns the number of dropped entries.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, last_access| now.duration_since(*last_access) <= self.target_age);
        let dropped = before - entries.len();
        if dropped > 0 {
            log::debug!("FullBelowCache swept {} of {} entries", dropped, before);
        }
        dropped
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct CacheEntry {
    node: Arc<TreeNode>,
    last_access: Instant,
}

/// Hit and miss counters of a [`TreeNodeCache`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

/// In-memory cache of tree nodes keyed by hash.
///
/// Inserting a node whose hash is already cached returns the cached `Arc`, so that identical subtrees read
/// by different SHAMaps share memory. The cache is trimmed back to its target size and age by
/// [`sweep`](Self::sweep).
pub struct TreeNodeCache {
    entries: Mutex<HashMap<CryptoHash, CacheEntry>>,
    target_size: usize,
    target_age: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TreeNodeCache {
    pub fn new(target_size: usize, target_age: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            target_size,
            target_age,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn fetch(&self, hash: &CryptoHash) -> Option<Arc<TreeNode>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(hash) {
            Some(entry) => {
                entry.last_access = Instant::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(&entry.node))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert `node` under `hash` unless a node is already cached under `hash`. Returns whichever node ends up
    /// cached.
    pub fn insert(&self, hash: CryptoHash, node: Arc<TreeNode>) -> Arc<TreeNode> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(hash).or_insert(CacheEntry {
            node,
            last_access: Instant::now(),
        });
        entry.last_access = Instant::now();
        Arc::clone(&entry.node)
    }

    /// Evict entries older than the target age, then the least recently used entries until the cache is at
    /// its target size. Returns the number of evicted entries.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, entry| now.duration_since(entry.last_access) <= self.target_age);

        if entries.len() > self.target_size {
            let mut by_age: Vec<(CryptoHash, Instant)> = entries
                .iter()
                .map(|(hash, entry)| (*hash, entry.last_access))
                .collect();
            by_age.sort_by_key(|(_, last_access)| *last_access);
            let excess = entries.len() - self.target_size;
            for (hash, _) in by_age.into_iter().take(excess) {
                entries.remove(&hash);
            }
        }

        let evicted = before - entries.len();
        if evicted > 0 {
            log::debug!("TreeNodeCache swept {} of {} entries", evicted, before);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.len(),
        }
    }
}
