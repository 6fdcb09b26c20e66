/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable persistence for SHAMap nodes and ledger headers.
//!
//! The [`NodeStore`](pluggables::NodeStore) trait is the contract a persistent backend must satisfy:
//! fetch by hash, store by hash, and batched variants of both. The [`Database`](database::Database)
//! wraps a backend with typed [`NodeObject`](database::NodeObject)s and hash verification on every read.

pub mod database;

pub mod pluggables;

pub use database::{Database, DatabaseStats, NodeObject, NodeObjectType};
pub use pluggables::{NodeStore, NodeStoreError};
