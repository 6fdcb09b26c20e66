/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Authenticated, copy-on-write radix trie that holds ledger state and transaction sets.
//!
//! A [`SHAMap`](implementation::SHAMap) maps 256-bit keys to [`SHAMapItem`](item::SHAMapItem)s. Every node
//! is identified by a [`CryptoHash`](crate::types::data_types::CryptoHash) over its contents, so the root
//! hash commits to the entire map, two maps can be compared by walking only the subtrees whose hashes
//! differ, and a map can be reconstructed from untrusted peers one verified node at a time.
//!
//! The submodules divide the functionality as follows:
//! - [`item`]: the items stored in leaves.
//! - [`node`]: tree nodes, their hashes, and their serializations.
//! - [`node_id`]: positions of nodes within a tree.
//! - [`family`]: the store and node cache that maps read missing nodes from.
//! - [`implementation`]: lookups, writes, snapshots, and flushing.
//! - [`delta`]: comparing two maps.
//! - [`sync`]: filling in a map from peers and serving nodes to peers.

pub mod delta;

pub mod family;

pub mod implementation;

pub mod item;

pub mod node;

pub mod node_id;

pub mod sync;

pub use delta::{Delta, DeltaItem};
pub use family::{Family, FullBelowCache, TreeNodeCache};
pub use implementation::{SHAMap, SHAMapError, SHAMapState, SHAMapType};
pub use item::{LeafKind, SHAMapItem};
pub use node_id::SHAMapNodeId;
pub use sync::SHAMapAddNode;
