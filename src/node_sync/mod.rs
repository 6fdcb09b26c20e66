/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The node sync protocol, through which a replica acquires closed ledgers it did not build.
//!
//! A replica needs a ledger it does not have when the network turns out to be building on a different
//! last closed ledger, or when a ledger it never built becomes fully validated. The protocol has two
//! sides:
//! 1. The [server](server), run by every replica, answers [`NodeSyncRequest`](crate::networking::NodeSyncRequest)s
//!    from its tree-node cache, its ledger history, and its node store.
//! 2. The [inbound ledgers](inbound), driven by the algorithm thread, fetch a ledger's header first,
//!    then fill in its state and transaction maps from the root down, verifying every node against
//!    the hash its parent expects.
//!
//! Nothing received through this protocol is trusted: a ledger is only ever identified by its hash,
//! and headers and nodes that do not hash to what is expected are dropped.

pub mod inbound;

pub mod server;
