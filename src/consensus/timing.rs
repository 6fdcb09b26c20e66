/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pure rules that decide when to close the open ledger and when a round has reached consensus.
//!
//! These functions hold no state. The [engine](super::implementation::Consensus) gathers the counts
//! and durations they need and acts on their answers, which keeps the rules themselves easy to test in
//! isolation.

use std::time::Duration;

use crate::types::data_types::{Power, TotalPower};

use super::{params::ConsensusParams, types::ConsensusState};

/// A round or an open ledger that has apparently lasted longer than this is assumed to be the result of
/// a clock jump.
const CLOCK_JUMP_LIMIT: Duration = Duration::from_secs(10 * 60);

/// Decide whether to close the open ledger.
///
/// # Arguments
///
/// - `any_tx`: whether the open ledger has transactions.
/// - `prev_proposers`: number of proposers in the previous round.
/// - `proposers_closed`: number of proposers that have already closed in this round.
/// - `proposers_validated`: number of validators that have already validated a ledger after our previous
///   ledger.
/// - `prev_round_time`: how long the previous round took to converge.
/// - `since_close_ms`: milliseconds since the previous ledger closed. Negative if our clock is behind.
/// - `open_time`: how long the ledger has been open.
/// - `idle_interval`: how long a ledger with no transactions stays open.
#[allow(clippy::too_many_arguments)]
pub fn should_close_ledger(
    any_tx: bool,
    prev_proposers: usize,
    proposers_closed: usize,
    proposers_validated: usize,
    prev_round_time: Duration,
    since_close_ms: i64,
    open_time: Duration,
    idle_interval: Duration,
    params: &ConsensusParams,
) -> bool {
    if prev_round_time > CLOCK_JUMP_LIMIT
        || since_close_ms > CLOCK_JUMP_LIMIT.as_millis() as i64
    {
        log::warn!(
            "Closing ledger after an implausible interval: previous round {:?}, since close {}ms",
            prev_round_time,
            since_close_ms
        );
        return true;
    }

    // More than half of the previous round's proposers have already moved on.
    if proposers_closed + proposers_validated > prev_proposers / 2 {
        log::debug!("Closing ledger because others have closed");
        return true;
    }

    if !any_tx {
        return since_close_ms >= idle_interval.as_millis() as i64;
    }

    if open_time < params.ledger_min_close {
        return false;
    }

    // Do not close much faster than the network converged last time.
    if open_time < prev_round_time / 2 {
        return false;
    }

    true
}

/// Compute how many of `participants` make up `percent` percent of them, rounding to the nearest whole
/// participant and never returning less than one.
pub fn participants_needed(participants: usize, percent: u32) -> usize {
    let percent = percent as usize;
    let needed = (participants * percent + percent / 2) / 100;
    needed.max(1)
}

/// Whether `agreeing` out of `total` trust weight is strictly more than `min_consensus_pct` percent.
///
/// `our_power` is added to both sides when we are proposing. If nobody but us takes part, agreement is
/// only declared once `reached_max` says we have waited for peers long enough.
pub fn consensus_reached(
    agreeing: TotalPower,
    total: TotalPower,
    our_power: Option<Power>,
    reached_max: bool,
    min_consensus_pct: u32,
) -> bool {
    if total == TotalPower::new(0) {
        return reached_max;
    }

    let (mut agreeing, mut total) = (agreeing, total);
    if let Some(power) = our_power {
        agreeing += power;
        total += power;
    }

    agreeing.int() * 100 > total.int() * min_consensus_pct as u128
}

/// Decide whether the round has reached consensus.
///
/// # Arguments
///
/// - `prev_proposers`: number of proposers in the previous round.
/// - `cur_proposers`: number of trusted peers with a position in this round.
/// - `cur_agree`: trust weight of the peers whose position is the same as ours.
/// - `cur_finished`: trust weight of the validators that have validated a ledger after our previous
///   ledger.
/// - `cur_total`: trust weight of the peers with a position in this round.
/// - `prev_agree_time`: how long the previous round took to converge.
/// - `cur_agree_time`: how long this round has been in the establish phase.
/// - `our_power`: our own trust weight if we are proposing, `None` otherwise.
#[allow(clippy::too_many_arguments)]
pub fn check_consensus(
    prev_proposers: usize,
    cur_proposers: usize,
    cur_agree: TotalPower,
    cur_finished: TotalPower,
    cur_total: TotalPower,
    prev_agree_time: Duration,
    cur_agree_time: Duration,
    our_power: Option<Power>,
    params: &ConsensusParams,
) -> ConsensusState {
    log::trace!(
        "check_consensus: prop={}/{} agree={} finished={} total={} time={:?}/{:?}",
        cur_proposers,
        prev_proposers,
        cur_agree.int(),
        cur_finished.int(),
        cur_total.int(),
        cur_agree_time,
        prev_agree_time
    );

    if cur_agree_time <= params.ledger_min_consensus {
        return ConsensusState::No;
    }

    // Fewer than three quarters of the last round's proposers are here. Give the rest more time.
    if cur_proposers < prev_proposers * 3 / 4
        && cur_agree_time < prev_agree_time + params.ledger_min_consensus
    {
        return ConsensusState::No;
    }

    let reached_max = cur_agree_time >= params.ledger_max_consensus;

    if consensus_reached(
        cur_agree,
        cur_total,
        our_power,
        reached_max,
        params.min_consensus_pct,
    ) {
        log::debug!("Normal consensus");
        return ConsensusState::Yes;
    }

    if consensus_reached(
        cur_finished,
        cur_total,
        None,
        false,
        params.min_consensus_pct,
    ) {
        log::warn!("We see no consensus, but enough validators have moved on");
        return ConsensusState::MovedOn;
    }

    if cur_agree_time > params.abandon_deadline(prev_agree_time) {
        log::warn!("Consensus round has taken too long and expired");
        return ConsensusState::Expired;
    }

    ConsensusState::No
}
