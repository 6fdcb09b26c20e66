/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits through which the consensus engine reaches the rest of the node.

use std::{
    sync::Arc,
    time::{Instant, SystemTime},
};

use crate::{
    ledger::Ledger,
    node_store::NodeStore,
    types::data_types::{CryptoHash, NetTime, TotalPower},
};

use super::{
    disputed_tx::DisputedTx,
    implementation::ConsensusError,
    proposal::SignedProposal,
    tx_set::TxSet,
    types::{ConsensusMode, ConsensusResult},
};

/// Methods the [engine](super::implementation::Consensus) calls to acquire data, to announce its
/// decisions, and to hand over the result of a round.
///
/// The engine never talks to the network or the ledger history directly. Methods that acquire data
/// (`acquire_ledger`, `acquire_tx_set`) return immediately: if the data is not available yet, they
/// should start fetching it and return `None`, and later hand it to the engine through
/// [`got_tx_set`](super::implementation::Consensus::got_tx_set) or a new round.
pub trait Adaptor<S: NodeStore> {
    /// Get the closed ledger with `hash`.
    fn acquire_ledger(&mut self, hash: &CryptoHash) -> Option<Arc<Ledger<S>>>;

    /// Get the transaction set with id `set_id`.
    fn acquire_tx_set(&mut self, set_id: &CryptoHash) -> Option<TxSet<S>>;

    /// Whether the open ledger has any transactions.
    fn has_open_transactions(&self) -> bool;

    /// Number of trusted validators that have validated a ledger whose parent is `prev_ledger`.
    fn proposers_validated(&self, prev_ledger: &CryptoHash) -> usize;

    /// Trust weight of the validators that have validated a ledger whose parent is `prev_ledger`.
    fn proposers_finished(&self, prev_ledger: &CryptoHash) -> TotalPower;

    /// Get the id of the last closed ledger that the network prefers, given that we are building on
    /// `prev_ledger_id` (whose ledger, if we have it, is `prev_ledger`).
    fn get_prev_ledger(
        &mut self,
        prev_ledger_id: &CryptoHash,
        prev_ledger: &Arc<Ledger<S>>,
        mode: ConsensusMode,
    ) -> CryptoHash;

    /// Close the open ledger, returning the transaction set to take our initial position on.
    fn on_close(
        &mut self,
        prev_ledger: &Arc<Ledger<S>>,
        close_time: NetTime,
        mode: ConsensusMode,
    ) -> Result<TxSet<S>, ConsensusError>;

    /// Build the next ledger from the result of the round.
    fn on_accept(
        &mut self,
        result: ConsensusResult<S>,
        prev_ledger: &Arc<Ledger<S>>,
        mode: ConsensusMode,
    ) -> Result<(), ConsensusError>;

    /// Broadcast our (signed) position.
    fn propose(&mut self, proposal: &SignedProposal);

    /// Make a transaction set we created available to peers.
    fn share_tx_set(&mut self, tx_set: &TxSet<S>);

    /// Make sure peers have a transaction that is in dispute.
    fn share_dispute(&mut self, dispute: &DisputedTx);

    /// Called whenever the engine's mode changes.
    fn on_mode_change(&mut self, before: ConsensusMode, after: ConsensusMode);
}

/// Source of time for the engine.
///
/// `now` measures the progress of a round and must be monotonic. `net_now` is the network-adjusted wall
/// clock that close times and proposal times are expressed in. Clones must read the same clocks.
pub trait Clock: Clone + Send {
    fn now(&self) -> Instant;

    fn net_now(&self) -> NetTime;
}

/// A [`Clock`] that reads the system's clocks.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn net_now(&self) -> NetTime {
        NetTime::from_system_time(SystemTime::now())
    }
}
