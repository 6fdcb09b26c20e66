/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Validations, their parameters, and the outcomes of adding them to the tracker.

use std::{
    fmt::{self, Display, Formatter},
    time::Duration,
};

use borsh::{BorshDeserialize, BorshSerialize};
use typed_builder::TypedBuilder;

use crate::types::{
    crypto_primitives::{HashPrefix, Keypair},
    data_types::{CryptoHash, LedgerSeq, NetTime, NetworkID, SignatureBytes, VerifyingKeyBytes},
    signed_messages::SignedMessage,
};

/// A validator's statement that it built, or accepts, the ledger with `ledger_hash`.
///
/// A `full` validation is issued by a validator that took part in the round as a proposer. Partial
/// validations are issued by validators that followed the round as observers.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Validation {
    pub validator: VerifyingKeyBytes,
    pub network_id: NetworkID,
    pub ledger_hash: CryptoHash,
    pub ledger_seq: LedgerSeq,
    pub sign_time: NetTime,
    pub full: bool,

    /// When we received the validation. Assigned locally, never sent.
    #[borsh_skip]
    pub seen_time: NetTime,

    /// Whether the validator is in our validator set. Assigned locally, never sent.
    #[borsh_skip]
    pub trusted: bool,
}

impl Validation {
    pub fn new(
        validator: VerifyingKeyBytes,
        network_id: NetworkID,
        ledger_hash: CryptoHash,
        ledger_seq: LedgerSeq,
        sign_time: NetTime,
        full: bool,
    ) -> Validation {
        Validation {
            validator,
            network_id,
            ledger_hash,
            ledger_seq,
            sign_time,
            full,
            seen_time: NetTime::epoch(),
            trusted: false,
        }
    }

    /// `VAL\0 ‖ network id ‖ ledger_seq ‖ sign_time ‖ full ‖ ledger_hash ‖ validator`, with every integer
    /// big-endian.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + 4 + 4 + 4 + 1 + 32 + 32);
        bytes.extend_from_slice(&HashPrefix::VALIDATION);
        bytes.extend_from_slice(&self.network_id.int().to_be_bytes());
        bytes.extend_from_slice(&self.ledger_seq.to_be_bytes());
        bytes.extend_from_slice(&self.sign_time.to_be_bytes());
        bytes.push(self.full as u8);
        bytes.extend_from_slice(self.ledger_hash.as_bytes());
        bytes.extend_from_slice(&self.validator);
        bytes
    }

    pub fn sign(&self, keypair: &Keypair) -> SignedValidation {
        SignedValidation {
            signature: keypair.sign(&self.signing_bytes()),
            validation: self.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignedValidation {
    pub validation: Validation,
    pub signature: SignatureBytes,
}

impl SignedMessage for SignedValidation {
    fn message_bytes(&self) -> Vec<u8> {
        self.validation.signing_bytes()
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}

/// Timing parameters that decide which validations are current, and how long validations are kept.
#[derive(Clone, Debug, TypedBuilder)]
pub struct ValidationParams {
    /// A validation signed more than this far in the future is not current.
    #[builder(default = Duration::from_secs(5 * 60))]
    pub current_wall: Duration,

    /// A validation we received more than this long after `now` is not current. Guards against
    /// validations whose `seen_time` was set by a clock that is ahead of ours.
    #[builder(default = Duration::from_secs(3 * 60))]
    pub current_local: Duration,

    /// A validation signed more than this long ago is not current.
    #[builder(default = Duration::from_secs(3 * 60))]
    pub current_early: Duration,

    /// The validations of a ledger are dropped when no validation for it has arrived for this long.
    #[builder(default = Duration::from_secs(10 * 60))]
    pub set_expires: Duration,

    /// Number of ledgers behind the current one whose validations are kept.
    #[builder(default = 256)]
    pub retention_window: u32,

    /// Percentage of the validator set whose validations make a ledger fully validated.
    #[builder(default = 80)]
    pub quorum_pct: u32,
}

impl Default for ValidationParams {
    fn default() -> Self {
        ValidationParams::builder().build()
    }
}

/// Whether a validation signed at `sign_time` and received at `seen_time` is current at `now`.
/// A `seen_time` at the epoch means the validation is our own and has not been received.
pub fn is_current(
    params: &ValidationParams,
    now: NetTime,
    sign_time: NetTime,
    seen_time: NetTime,
) -> bool {
    sign_time > now - params.current_early
        && sign_time < now + params.current_wall
        && (seen_time.is_epoch() || seen_time < now + params.current_local)
}

/// The result of adding a correctly signed validation to the tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddOutcome {
    /// A new validation that is now the validator's current one.
    Current,

    /// We already had this validation.
    Repeat,

    /// The validation is not current, or we already have a newer one from the validator.
    Stale,

    /// The validator already validated a different ledger with the same sequence number. The first
    /// validation is kept.
    Conflicting,

    /// The validation is for an earlier sequence number than one the validator already validated.
    BadSequence,
}

impl Display for AddOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AddOutcome::Current => write!(f, "current"),
            AddOutcome::Repeat => write!(f, "repeat"),
            AddOutcome::Stale => write!(f, "stale"),
            AddOutcome::Conflicting => write!(f, "conflicting"),
            AddOutcome::BadSequence => write!(f, "bad sequence"),
        }
    }
}

/// A validator that signed validations for two different ledgers with the same sequence number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Equivocation {
    pub validator: VerifyingKeyBytes,
    pub seq: LedgerSeq,
    pub first: CryptoHash,
    pub second: CryptoHash,
}

/// Reasons a validation is rejected before it reaches the tracker. None of them is fatal: the
/// validation is dropped and the caller moves on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationError {
    InvalidSignature,
    UnknownValidator,
    WrongNetwork,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidSignature => write!(f, "invalid signature"),
            ValidationError::UnknownValidator => write!(f, "unknown validator"),
            ValidationError::WrongNetwork => write!(f, "wrong network"),
        }
    }
}
