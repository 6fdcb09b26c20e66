/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A ledger-consensus library: replicas that agree, round by round, on a sequence of ledgers whose
//! state is held in authenticated radix trees ([SHAMaps](shamap)).
//!
//! Library users provide the pluggable parts of a replica: peer-to-peer [networking](networking::Network),
//! a persistent [node store](node_store::NodeStore), the [semantics of
//! transactions](ledger::TransactionProcessor), and optionally a [clock](consensus::Clock). Then they
//! build and start a [replica](replica::ReplicaSpec).
//!
//! The components that a replica is made of can also be used on their own, e.g., to drive the
//! [consensus engine](consensus::Consensus) from a simulation.

pub mod types;

pub mod shamap;

pub mod node_store;

pub mod ledger;

pub mod consensus;

pub mod validations;

pub mod networking;

pub mod node_sync;

pub mod events;

pub(crate) mod event_bus;

pub(crate) mod logging;

pub(crate) mod algorithm;

pub mod replica;
