/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Transactions that some, but not all, of the positions we have seen include.

use std::collections::BTreeMap;

use crate::types::data_types::{CryptoHash, VerifyingKeyBytes};

use super::params::ConsensusParams;

/// A transaction that is in some positions' sets and not in others, and the votes on whether it should
/// be in the agreed set.
///
/// Votes are kept in a `BTreeMap` keyed by node id so that every node that sees the same votes tallies
/// them the same way.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisputedTx {
    txid: CryptoHash,
    tx: Vec<u8>,
    our_vote: bool,
    yays: usize,
    nays: usize,
    votes: BTreeMap<VerifyingKeyBytes, bool>,
}

impl DisputedTx {
    pub fn new(txid: CryptoHash, tx: Vec<u8>, our_vote: bool) -> DisputedTx {
        DisputedTx {
            txid,
            tx,
            our_vote,
            yays: 0,
            nays: 0,
            votes: BTreeMap::new(),
        }
    }

    pub fn txid(&self) -> &CryptoHash {
        &self.txid
    }

    pub fn tx(&self) -> &[u8] {
        &self.tx
    }

    /// Whether we currently want the transaction in the agreed set.
    pub fn our_vote(&self) -> bool {
        self.our_vote
    }

    pub fn set_our_vote(&mut self, our_vote: bool) {
        self.our_vote = our_vote;
    }

    pub fn yays(&self) -> usize {
        self.yays
    }

    pub fn nays(&self) -> usize {
        self.nays
    }

    pub fn votes(&self) -> &BTreeMap<VerifyingKeyBytes, bool> {
        &self.votes
    }

    /// Record or change `peer`'s vote.
    pub fn set_vote(&mut self, peer: VerifyingKeyBytes, votes_yes: bool) {
        match self.votes.insert(peer, votes_yes) {
            None => {
                if votes_yes {
                    self.yays += 1;
                } else {
                    self.nays += 1;
                }
            }
            Some(previous) if previous != votes_yes => {
                if votes_yes {
                    self.nays -= 1;
                    self.yays += 1;
                } else {
                    self.yays -= 1;
                    self.nays += 1;
                }
            }
            Some(_) => (),
        }
    }

    /// Remove `peer`'s vote, if it has one.
    pub fn un_vote(&mut self, peer: &VerifyingKeyBytes) {
        if let Some(voted_yes) = self.votes.remove(peer) {
            if voted_yes {
                self.yays -= 1;
            } else {
                self.nays -= 1;
            }
        }
    }

    /// Reconsider our vote given how far into the round we are (`close_percent`). Returns whether our
    /// vote changed.
    ///
    /// When proposing, we move towards the majority, demanding a larger majority the longer the round
    /// goes on so that stragglers eventually give in. When only observing, we simply follow the majority.
    pub fn update_vote(
        &mut self,
        close_percent: u32,
        proposing: bool,
        params: &ConsensusParams,
    ) -> bool {
        if self.our_vote && self.nays == 0 {
            return false;
        }
        if !self.our_vote && self.yays == 0 {
            return false;
        }

        let new_vote = if proposing {
            let our_weight = if self.our_vote { 100 } else { 0 };
            let weight = (self.yays * 100 + our_weight) / (self.nays + self.yays + 1);
            weight > params.needed_weight(close_percent) as usize
        } else {
            self.yays > self.nays
        };

        if new_vote == self.our_vote {
            return false;
        }

        log::debug!(
            "Vote on disputed transaction {} changes to {} (yays: {}, nays: {})",
            self.txid,
            new_vote,
            self.yays,
            self.nays
        );
        self.our_vote = new_vote;
        true
    }
}
