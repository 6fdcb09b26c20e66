/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Exhaustive enumerations around every message variant replicas exchange.
//!
//! Messages are [borsh](borsh)-encoded by network providers that need bytes on the wire. Everything a
//! receiver has to trust carries its own proof: positions and validations are signed, transaction sets
//! and SHAMap nodes are checked against the hashes that identify them.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    consensus::proposal::SignedProposal,
    shamap::{SHAMapNodeId, SHAMapType},
    types::data_types::CryptoHash,
    validations::types::SignedValidation,
};

/// All message variants.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum Message {
    /// See: [`ConsensusMessage`].
    ConsensusMessage(ConsensusMessage),

    /// See: [`NodeSyncMessage`].
    NodeSyncMessage(NodeSyncMessage),
}

impl From<ConsensusMessage> for Message {
    fn from(value: ConsensusMessage) -> Self {
        Message::ConsensusMessage(value)
    }
}

impl From<SignedProposal> for Message {
    fn from(value: SignedProposal) -> Self {
        Message::ConsensusMessage(ConsensusMessage::Position(value))
    }
}

impl From<SignedValidation> for Message {
    fn from(value: SignedValidation) -> Self {
        Message::ConsensusMessage(ConsensusMessage::Validation(value))
    }
}

impl From<TxSetRequest> for Message {
    fn from(value: TxSetRequest) -> Self {
        Message::ConsensusMessage(ConsensusMessage::TxSetRequest(value))
    }
}

impl From<TxSetResponse> for Message {
    fn from(value: TxSetResponse) -> Self {
        Message::ConsensusMessage(ConsensusMessage::TxSetResponse(value))
    }
}

impl From<NodeSyncRequest> for Message {
    fn from(value: NodeSyncRequest) -> Self {
        Message::NodeSyncMessage(NodeSyncMessage::NodeSyncRequest(value))
    }
}

impl From<NodeSyncResponse> for Message {
    fn from(value: NodeSyncResponse) -> Self {
        Message::NodeSyncMessage(NodeSyncMessage::NodeSyncResponse(value))
    }
}

/// Message variants sent or received by the [algorithm](crate::algorithm) thread.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum ConsensusMessage {
    /// A validator's signed position in the current round.
    Position(SignedProposal),

    /// A validator's signed validation of a ledger it built.
    Validation(SignedValidation),

    /// A serialized transaction, relayed so that peers can include it in their open ledgers.
    Transaction(Vec<u8>),

    TxSetRequest(TxSetRequest),

    TxSetResponse(TxSetResponse),
}

/// Ask peers for the transaction set with id `set_id`, typically one a peer took a position on.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct TxSetRequest {
    pub set_id: CryptoHash,
}

/// The serialized transactions of the set with id `set_id`. The receiver rebuilds the set and checks that
/// its root hash is `set_id`.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct TxSetResponse {
    pub set_id: CryptoHash,
    pub transactions: Vec<Vec<u8>>,
}

/// Messages of the node sync protocol, through which replicas acquire ledgers they do not have.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum NodeSyncMessage {
    NodeSyncRequest(NodeSyncRequest),
    NodeSyncResponse(NodeSyncResponse),
}

/// Requests served by the [node sync server](crate::node_sync::server).
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum NodeSyncRequest {
    /// Get objects by hash: ledger headers or SHAMap nodes.
    GetObjects { hashes: Vec<CryptoHash> },

    /// Get nodes of one of the maps of the closed ledger `ledger` by their position in the map, each
    /// with its descendants down to `depth` levels below it.
    GetLedgerNodes {
        ledger: CryptoHash,
        map_type: SHAMapType,
        node_ids: Vec<SHAMapNodeId>,
        depth: u8,
    },
}

/// Responses to [`NodeSyncRequest`]s. A server leaves out whatever it does not have.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum NodeSyncResponse {
    /// Objects in their canonical (hashed) serialization, keyed by hash.
    Objects { objects: Vec<(CryptoHash, Vec<u8>)> },

    /// SHAMap nodes in wire format, keyed by their position in the map.
    LedgerNodes {
        ledger: CryptoHash,
        map_type: SHAMapType,
        nodes: Vec<(SHAMapNodeId, Vec<u8>)>,
    },
}

impl NodeSyncResponse {
    /// Number of objects or nodes carried by the response.
    pub fn len(&self) -> usize {
        match self {
            NodeSyncResponse::Objects { objects } => objects.len(),
            NodeSyncResponse::LedgerNodes { nodes, .. } => nodes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
