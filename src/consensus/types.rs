/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Enums and small structs that describe where a consensus round is and what it produced.

use std::{fmt, time::Duration};

use crate::{
    node_store::NodeStore,
    types::data_types::{CryptoHash, LedgerSeq, NetTime, ProposeSeq, VerifyingKeyBytes},
};

use super::{proposal::Proposal, tx_set::TxSet};

/// Phase of the current round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConsensusPhase {
    /// The open ledger is accepting transactions. Peers may already have closed.
    Open,

    /// The ledger has closed, and we are exchanging positions with peers.
    Establish,

    /// A transaction set was agreed on (or the round was abandoned), and the next ledger has been handed
    /// to the adaptor to build.
    Accepted,
}

impl fmt::Display for ConsensusPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusPhase::Open => write!(f, "open"),
            ConsensusPhase::Establish => write!(f, "establish"),
            ConsensusPhase::Accepted => write!(f, "accepted"),
        }
    }
}

/// How the local node takes part in the current round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConsensusMode {
    /// We are a trusted validator, and we send proposals.
    Proposing,

    /// We follow the round without sending proposals.
    Observing,

    /// Our last closed ledger is not the one the network is building on. We are acquiring the right one.
    WrongLedger,

    /// We switched to the network's last closed ledger during this round, and will not propose again
    /// until the next round.
    SwitchedLedger,
}

impl fmt::Display for ConsensusMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusMode::Proposing => write!(f, "proposing"),
            ConsensusMode::Observing => write!(f, "observing"),
            ConsensusMode::WrongLedger => write!(f, "wrongLedger"),
            ConsensusMode::SwitchedLedger => write!(f, "switchedLedger"),
        }
    }
}

/// Result of [`check_consensus`](super::timing::check_consensus).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConsensusState {
    /// No consensus yet.
    No,

    /// The network has validated a ledger after our previous ledger without us.
    MovedOn,

    /// Enough of our trusted peers agree with our position.
    Yes,

    /// The round has gone on for too long.
    Expired,
}

/// What the engine does when a round expires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeoutPolicy {
    /// Keep exchanging positions for another deliberation window.
    ExtendDeliberation,

    /// Stop proposing and accept the acquired transaction set with the most trusted support.
    ForceAccept,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        TimeoutPolicy::ExtendDeliberation
    }
}

/// Close time information handed to the adaptor on accept.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CloseTimes {
    /// The close time we and our peers converged on, rounded to the resolution.
    pub close_time: NetTime,

    /// Our own close time when our ledger closed.
    pub self_close_time: NetTime,

    /// Whether enough of our peers agreed on `close_time`.
    pub agreed: bool,

    /// The close time resolution of the round, in seconds.
    pub resolution: u8,
}

/// The agreed outcome of a round, given to [`Adaptor::on_accept`](super::pluggables::Adaptor::on_accept).
pub struct ConsensusResult<S: NodeStore> {
    /// The transaction set to apply to the previous ledger.
    pub tx_set: TxSet<S>,

    /// Our final position.
    pub position: Proposal,

    pub close_times: CloseTimes,

    /// How long the establish phase lasted.
    pub round_time: Duration,

    /// Number of trusted peers that had a position when the round ended.
    pub proposers: usize,

    /// Whether consensus was declared because the network moved on, or the round was forced to accept.
    pub consensus_fail: bool,

    /// Whether the result was produced by [`simulate`](super::implementation::Consensus::simulate).
    pub simulated: bool,
}

/// What happened to a peer's proposal passed to
/// [`receive_peer_position`](super::implementation::Consensus::receive_peer_position).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerPositionOutcome {
    /// The position changed our view of the round and should be relayed.
    Accepted,

    /// The proposal was for another previous ledger, from a node that bowed out, or not newer than the
    /// proposal we already have from that node.
    Ignored,

    /// The signer is not a trusted validator.
    UnknownValidator,

    /// The signature does not verify.
    InvalidSignature,

    /// The proposal was produced for another network.
    WrongNetwork,
}

/// A trusted peer's latest position, as reported by [`ConsensusInfo`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerPositionInfo {
    pub node_id: VerifyingKeyBytes,
    pub position: CryptoHash,
    pub propose_seq: ProposeSeq,
    pub close_time: NetTime,
}

/// Snapshot of the engine's state for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsensusInfo {
    pub phase: ConsensusPhase,
    pub mode: ConsensusMode,
    pub prev_ledger: CryptoHash,
    pub ledger_seq: LedgerSeq,
    pub proposing: bool,
    pub validating: bool,
    pub have_correct_lcl: bool,
    pub our_position: Option<CryptoHash>,
    pub round_time: Duration,
    pub close_percent: u32,
    pub close_resolution: u8,
    pub have_close_time_consensus: bool,
    pub previous_proposers: usize,
    pub previous_round_time: Duration,
    pub peer_positions: Vec<PeerPositionInfo>,
    pub disputes: usize,
    pub acquired: Vec<CryptoHash>,
    pub dead_nodes: usize,
    pub close_times: Vec<(NetTime, usize)>,
}
