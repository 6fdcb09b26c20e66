/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via replica's
//! [config](crate::replica::Configuration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how an [AcceptLedger](crate::events::AcceptLedgerEvent) is printed:
//!
//! ```text
//! AcceptLedger, 1701329264, Id5u7f6, 42, fNGCJyk, 3, 0
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the hash of the ledger.
//! - The fourth value is the sequence number of the ledger.
//! - The fifth value is the first seven characters of the Base64 encoding of the id of the transaction
//!   set the ledger was built from.
//! - The sixth and seventh values are the numbers of transactions that were applied and that failed.

use crate::events::*;
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;
use std::time::SystemTime;

// Names of each event in PascalCase for printing:
pub const ACCEPT_LEDGER: &str = "AcceptLedger";
pub const FULLY_VALIDATED: &str = "FullyValidated";
pub const PERSIST_LEDGER: &str = "PersistLedger";

pub const PROPOSE: &str = "Propose";
pub const VALIDATE: &str = "Validate";

pub const RECEIVE_POSITION: &str = "ReceivePosition";
pub const RECEIVE_VALIDATION: &str = "ReceiveValidation";
pub const REJECT_MESSAGE: &str = "RejectMessage";

pub const START_ROUND: &str = "StartRound";
pub const CLOSE_LEDGER: &str = "CloseLedger";
pub const CREATE_DISPUTE: &str = "CreateDispute";
pub const MODE_CHANGE: &str = "ModeChange";
pub const CONSENSUS_REACHED: &str = "ConsensusReached";
pub const CONSENSUS_TIMEOUT: &str = "ConsensusTimeout";
pub const SWITCH_LEDGER: &str = "SwitchLedger";
pub const EQUIVOCATION: &str = "Equivocation";

pub const START_ACQUIRE: &str = "StartAcquire";
pub const END_ACQUIRE: &str = "EndAcquire";
pub const RECEIVE_NODE_REQUEST: &str = "ReceiveNodeRequest";
pub const SEND_NODE_RESPONSE: &str = "SendNodeResponse";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for AcceptLedgerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |accept_ledger_event: &AcceptLedgerEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                ACCEPT_LEDGER,
                secs_since_unix_epoch(accept_ledger_event.timestamp),
                first_seven_base64_chars(accept_ledger_event.ledger.as_bytes()),
                accept_ledger_event.seq,
                first_seven_base64_chars(accept_ledger_event.tx_set.as_bytes()),
                accept_ledger_event.applied,
                accept_ledger_event.failed
            )
        };
        Box::new(logger)
    }
}

impl Logger for FullyValidatedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |fully_validated_event: &FullyValidatedEvent| {
            log::info!(
                "{}, {}, {}, {}",
                FULLY_VALIDATED,
                secs_since_unix_epoch(fully_validated_event.timestamp),
                first_seven_base64_chars(fully_validated_event.ledger.as_bytes()),
                fully_validated_event.seq
            )
        };
        Box::new(logger)
    }
}

impl Logger for PersistLedgerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |persist_ledger_event: &PersistLedgerEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PERSIST_LEDGER,
                secs_since_unix_epoch(persist_ledger_event.timestamp),
                first_seven_base64_chars(persist_ledger_event.ledger.as_bytes()),
                persist_ledger_event.seq,
                persist_ledger_event.objects
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                first_seven_base64_chars(propose_event.proposal.prev_ledger.as_bytes()),
                first_seven_base64_chars(propose_event.proposal.position.as_bytes()),
                propose_event.proposal.propose_seq.int(),
                propose_event.proposal.close_time
            )
        };
        Box::new(logger)
    }
}

impl Logger for ValidateEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |validate_event: &ValidateEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                VALIDATE,
                secs_since_unix_epoch(validate_event.timestamp),
                first_seven_base64_chars(validate_event.validation.ledger_hash.as_bytes()),
                validate_event.validation.ledger_seq,
                validate_event.validation.full
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceivePositionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_position_event: &ReceivePositionEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_POSITION,
                secs_since_unix_epoch(receive_position_event.timestamp),
                first_seven_base64_chars(&receive_position_event.origin),
                first_seven_base64_chars(receive_position_event.proposal.prev_ledger.as_bytes()),
                first_seven_base64_chars(receive_position_event.proposal.position.as_bytes()),
                receive_position_event.proposal.propose_seq.int()
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveValidationEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_validation_event: &ReceiveValidationEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_VALIDATION,
                secs_since_unix_epoch(receive_validation_event.timestamp),
                first_seven_base64_chars(&receive_validation_event.origin),
                first_seven_base64_chars(receive_validation_event.validation.ledger_hash.as_bytes()),
                receive_validation_event.validation.ledger_seq,
                receive_validation_event.outcome
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectMessageEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_message_event: &RejectMessageEvent| {
            log::info!(
                "{}, {}, {}, {}",
                REJECT_MESSAGE,
                secs_since_unix_epoch(reject_message_event.timestamp),
                first_seven_base64_chars(&reject_message_event.origin),
                reject_message_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartRoundEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_round_event: &StartRoundEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                START_ROUND,
                secs_since_unix_epoch(start_round_event.timestamp),
                first_seven_base64_chars(start_round_event.prev_ledger.as_bytes()),
                start_round_event.ledger_seq,
                start_round_event.mode
            )
        };
        Box::new(logger)
    }
}

impl Logger for CloseLedgerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |close_ledger_event: &CloseLedgerEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                CLOSE_LEDGER,
                secs_since_unix_epoch(close_ledger_event.timestamp),
                first_seven_base64_chars(close_ledger_event.prev_ledger.as_bytes()),
                close_ledger_event.close_time,
                first_seven_base64_chars(close_ledger_event.position.as_bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for CreateDisputeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |create_dispute_event: &CreateDisputeEvent| {
            log::info!(
                "{}, {}, {}, {}",
                CREATE_DISPUTE,
                secs_since_unix_epoch(create_dispute_event.timestamp),
                first_seven_base64_chars(create_dispute_event.txid.as_bytes()),
                create_dispute_event.our_vote
            )
        };
        Box::new(logger)
    }
}

impl Logger for ModeChangeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |mode_change_event: &ModeChangeEvent| {
            log::info!(
                "{}, {}, {}, {}",
                MODE_CHANGE,
                secs_since_unix_epoch(mode_change_event.timestamp),
                mode_change_event.before,
                mode_change_event.after
            )
        };
        Box::new(logger)
    }
}

impl Logger for ConsensusReachedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |consensus_reached_event: &ConsensusReachedEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                CONSENSUS_REACHED,
                secs_since_unix_epoch(consensus_reached_event.timestamp),
                first_seven_base64_chars(consensus_reached_event.prev_ledger.as_bytes()),
                first_seven_base64_chars(consensus_reached_event.position.as_bytes()),
                consensus_reached_event.consensus_fail,
                consensus_reached_event.round_time.as_millis(),
                consensus_reached_event.proposers
            )
        };
        Box::new(logger)
    }
}

impl Logger for ConsensusTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |consensus_timeout_event: &ConsensusTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}",
                CONSENSUS_TIMEOUT,
                secs_since_unix_epoch(consensus_timeout_event.timestamp),
                first_seven_base64_chars(consensus_timeout_event.prev_ledger.as_bytes()),
                consensus_timeout_event.round_time.as_millis(),
                consensus_timeout_event.policy
            )
        };
        Box::new(logger)
    }
}

impl Logger for SwitchLedgerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |switch_ledger_event: &SwitchLedgerEvent| {
            log::info!(
                "{}, {}, {}, {}",
                SWITCH_LEDGER,
                secs_since_unix_epoch(switch_ledger_event.timestamp),
                first_seven_base64_chars(switch_ledger_event.from.as_bytes()),
                first_seven_base64_chars(switch_ledger_event.to.as_bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for EquivocationEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |equivocation_event: &EquivocationEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                EQUIVOCATION,
                secs_since_unix_epoch(equivocation_event.timestamp),
                first_seven_base64_chars(&equivocation_event.validator),
                equivocation_event.seq,
                first_seven_base64_chars(equivocation_event.first.as_bytes()),
                first_seven_base64_chars(equivocation_event.second.as_bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartAcquireEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_acquire_event: &StartAcquireEvent| {
            log::info!(
                "{}, {}, {}",
                START_ACQUIRE,
                secs_since_unix_epoch(start_acquire_event.timestamp),
                first_seven_base64_chars(start_acquire_event.ledger.as_bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for EndAcquireEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |end_acquire_event: &EndAcquireEvent| {
            log::info!(
                "{}, {}, {}, {}",
                END_ACQUIRE,
                secs_since_unix_epoch(end_acquire_event.timestamp),
                first_seven_base64_chars(end_acquire_event.ledger.as_bytes()),
                end_acquire_event.seq
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveNodeRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_node_request_event: &ReceiveNodeRequestEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RECEIVE_NODE_REQUEST,
                secs_since_unix_epoch(receive_node_request_event.timestamp),
                first_seven_base64_chars(&receive_node_request_event.peer),
                receive_node_request_event.requested
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendNodeResponseEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |send_node_response_event: &SendNodeResponseEvent| {
            log::info!(
                "{}, {}, {}, {}",
                SEND_NODE_RESPONSE,
                secs_since_unix_epoch(send_node_response_event.timestamp),
                first_seven_base64_chars(&send_node_response_event.peer),
                send_node_response_event.sent
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

// Events timestamped before the Unix Epoch (a badly set system clock) are logged with time 0.
fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
