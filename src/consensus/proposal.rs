/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Positions that validators take, and announce to each other, during a round.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    crypto_primitives::{HashPrefix, Keypair},
    data_types::{
        CryptoHash, LedgerSeq, NetTime, NetworkID, ProposeSeq, SignatureBytes, VerifyingKeyBytes,
    },
    signed_messages::SignedMessage,
};

/// A validator's position in one round: the transaction set and close time it believes the ledger
/// after `prev_ledger` should have.
///
/// A validator's first position in a round has [`ProposeSeq::INITIAL`]. Each change of position
/// increments `propose_seq`, so that receivers can discard positions that arrive out of order. A
/// position with [`ProposeSeq::BOW_OUT`] announces that the validator will not propose again in the
/// round.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Proposal {
    pub node_id: VerifyingKeyBytes,
    pub network_id: NetworkID,
    pub prev_ledger: CryptoHash,
    pub ledger_seq: LedgerSeq,
    pub propose_seq: ProposeSeq,

    /// Hash of the proposed transaction set.
    pub position: CryptoHash,
    pub close_time: NetTime,

    /// When the position was last taken or received. Not covered by the signature and not sent.
    #[borsh_skip]
    pub time: NetTime,
}

impl Proposal {
    /// Create an initial position.
    pub fn new(
        node_id: VerifyingKeyBytes,
        network_id: NetworkID,
        prev_ledger: CryptoHash,
        ledger_seq: LedgerSeq,
        position: CryptoHash,
        close_time: NetTime,
        now: NetTime,
    ) -> Proposal {
        Proposal {
            node_id,
            network_id,
            prev_ledger,
            ledger_seq,
            propose_seq: ProposeSeq::INITIAL,
            position,
            close_time,
            time: now,
        }
    }

    pub fn is_initial(&self) -> bool {
        self.propose_seq == ProposeSeq::INITIAL
    }

    pub fn is_bow_out(&self) -> bool {
        self.propose_seq == ProposeSeq::BOW_OUT
    }

    /// Whether the position was last taken at or before `cutoff`.
    pub fn is_stale(&self, cutoff: NetTime) -> bool {
        self.time <= cutoff
    }

    /// Take a new position. Returns `false`, leaving the position unchanged, if the validator has bowed
    /// out.
    pub fn change_position(
        &mut self,
        new_position: CryptoHash,
        new_close_time: NetTime,
        now: NetTime,
    ) -> bool {
        if self.is_bow_out() {
            return false;
        }
        self.position = new_position;
        self.close_time = new_close_time;
        self.time = now;
        self.propose_seq += 1;
        true
    }

    /// Mark the position as a bow-out.
    pub fn bow_out(&mut self, now: NetTime) {
        self.time = now;
        self.propose_seq = ProposeSeq::BOW_OUT;
    }

    /// `PRP\0 ‖ network id ‖ propose_seq ‖ close_time ‖ prev_ledger ‖ ledger_seq ‖ position`, with every
    /// integer big-endian.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + 4 + 4 + 4 + 32 + 4 + 32);
        bytes.extend_from_slice(&HashPrefix::PROPOSAL);
        bytes.extend_from_slice(&self.network_id.int().to_be_bytes());
        bytes.extend_from_slice(&self.propose_seq.int().to_be_bytes());
        bytes.extend_from_slice(&self.close_time.to_be_bytes());
        bytes.extend_from_slice(self.prev_ledger.as_bytes());
        bytes.extend_from_slice(&self.ledger_seq.to_be_bytes());
        bytes.extend_from_slice(self.position.as_bytes());
        bytes
    }

    /// Sign the position with `keypair`, which should be the keypair of `node_id`.
    pub fn sign(&self, keypair: &Keypair) -> SignedProposal {
        SignedProposal {
            signature: keypair.sign(&self.signing_bytes()),
            proposal: self.clone(),
        }
    }
}

/// A [`Proposal`] and its signer's signature over its [`signing_bytes`](Proposal::signing_bytes).
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignedProposal {
    pub proposal: Proposal,
    pub signature: SignatureBytes,
}

impl SignedMessage for SignedProposal {
    fn message_bytes(&self) -> Vec<u8> {
        self.proposal.signing_bytes()
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}
