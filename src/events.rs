/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events a replica emits, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Events are published by
//! the algorithm thread (and the node sync server) over a channel to the
//! [event bus](crate::event_bus), which passes them to the handlers registered in the
//! [`ReplicaSpec`](crate::replica::ReplicaSpec), and to the default [loggers](crate::logging) if
//! [`log_events`](crate::replica::Configuration::log_events) is set.

use std::{
    sync::mpsc::Sender,
    time::{Duration, SystemTime},
};

use crate::{
    consensus::{
        proposal::Proposal,
        types::{ConsensusMode, TimeoutPolicy},
    },
    types::data_types::{CryptoHash, LedgerSeq, NetTime, VerifyingKeyBytes},
    validations::types::{AddOutcome, Validation},
};

/// Enumerates all events defined for the replica.
pub enum Event {
    // Events that change the ledger history or persistent state.
    AcceptLedger(AcceptLedgerEvent),
    FullyValidated(FullyValidatedEvent),
    PersistLedger(PersistLedgerEvent),

    // Events that involve broadcasting a message.
    Propose(ProposeEvent),
    Validate(ValidateEvent),

    // Events that involve receiving a message.
    ReceivePosition(ReceivePositionEvent),
    ReceiveValidation(ReceiveValidationEvent),
    RejectMessage(RejectMessageEvent),

    // Consensus round events.
    StartRound(StartRoundEvent),
    CloseLedger(CloseLedgerEvent),
    CreateDispute(CreateDisputeEvent),
    ModeChange(ModeChangeEvent),
    ConsensusReached(ConsensusReachedEvent),
    ConsensusTimeout(ConsensusTimeoutEvent),
    SwitchLedger(SwitchLedgerEvent),
    Equivocation(EquivocationEvent),

    // Ledger acquisition and node sync events.
    StartAcquire(StartAcquireEvent),
    EndAcquire(EndAcquireEvent),
    ReceiveNodeRequest(ReceiveNodeRequestEvent),
    SendNodeResponse(SendNodeResponseEvent),
}

impl Event {
    /// Send the event to the event bus, if there is one. Events published after the event bus has shut
    /// down are dropped.
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(self);
        }
    }
}

/// A ledger was built from an agreed transaction set and closed.
pub struct AcceptLedgerEvent {
    pub timestamp: SystemTime,
    pub ledger: CryptoHash,
    pub seq: LedgerSeq,
    pub tx_set: CryptoHash,
    pub close_time: NetTime,
    pub applied: usize,
    pub failed: usize,
}

/// A ledger gathered a quorum of trusted validations.
pub struct FullyValidatedEvent {
    pub timestamp: SystemTime,
    pub ledger: CryptoHash,
    pub seq: LedgerSeq,
}

/// The nodes of a fully validated ledger were written to the node store.
pub struct PersistLedgerEvent {
    pub timestamp: SystemTime,
    pub ledger: CryptoHash,
    pub seq: LedgerSeq,
    pub objects: usize,
}

pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub proposal: Proposal,
}

pub struct ValidateEvent {
    pub timestamp: SystemTime,
    pub validation: Validation,
}

pub struct ReceivePositionEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKeyBytes,
    pub proposal: Proposal,
}

pub struct ReceiveValidationEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKeyBytes,
    pub validation: Validation,
    pub outcome: AddOutcome,
}

/// A message was dropped because its signature or signer could not be accepted.
pub struct RejectMessageEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKeyBytes,
    pub reason: &'static str,
}

pub struct StartRoundEvent {
    pub timestamp: SystemTime,
    pub prev_ledger: CryptoHash,
    pub ledger_seq: LedgerSeq,
    pub mode: ConsensusMode,
}

pub struct CloseLedgerEvent {
    pub timestamp: SystemTime,
    pub prev_ledger: CryptoHash,
    pub close_time: NetTime,
    pub position: CryptoHash,
}

pub struct CreateDisputeEvent {
    pub timestamp: SystemTime,
    pub txid: CryptoHash,
    pub our_vote: bool,
}

pub struct ModeChangeEvent {
    pub timestamp: SystemTime,
    pub before: ConsensusMode,
    pub after: ConsensusMode,
}

pub struct ConsensusReachedEvent {
    pub timestamp: SystemTime,
    pub prev_ledger: CryptoHash,
    pub position: CryptoHash,
    pub consensus_fail: bool,
    pub round_time: Duration,
    pub proposers: usize,
}

pub struct ConsensusTimeoutEvent {
    pub timestamp: SystemTime,
    pub prev_ledger: CryptoHash,
    pub round_time: Duration,
    pub policy: TimeoutPolicy,
}

/// We found out that the network is building on a different last closed ledger than we were.
pub struct SwitchLedgerEvent {
    pub timestamp: SystemTime,
    pub from: CryptoHash,
    pub to: CryptoHash,
}

/// A validator signed validations for two different ledgers with the same sequence number.
pub struct EquivocationEvent {
    pub timestamp: SystemTime,
    pub validator: VerifyingKeyBytes,
    pub seq: LedgerSeq,
    pub first: CryptoHash,
    pub second: CryptoHash,
}

pub struct StartAcquireEvent {
    pub timestamp: SystemTime,
    pub ledger: CryptoHash,
}

pub struct EndAcquireEvent {
    pub timestamp: SystemTime,
    pub ledger: CryptoHash,
    pub seq: LedgerSeq,
}

pub struct ReceiveNodeRequestEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKeyBytes,
    pub requested: usize,
}

pub struct SendNodeResponseEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKeyBytes,
    pub sent: usize,
}
