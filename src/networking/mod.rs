/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable peer-to-peer (P2P) networking.
//!
//! The library user provides an implementation of the [`Network`](network::Network) trait. The replica
//! polls it for [messages](messages::Message) on a dedicated thread, which splits them by kind into
//! channels read by the algorithm thread and the node sync server.

pub mod network;

pub mod messages;

pub(crate) mod receiving;

pub(crate) mod sending;

pub use messages::{
    ConsensusMessage, Message, NodeSyncMessage, NodeSyncRequest, NodeSyncResponse, TxSetRequest,
    TxSetResponse,
};
pub use network::Network;
