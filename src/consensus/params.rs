/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Timing and threshold parameters of the consensus engine.

use std::time::Duration;

use typed_builder::TypedBuilder;

/// Tunable constants that control when the engine closes its ledger, how eagerly it changes its votes,
/// and when it declares consensus.
///
/// Every validator on a network should use the same parameters. The defaults are suitable for a
/// network whose validators see each other's proposals within about a second.
///
/// Percent-of-round parameters (`av_*_consensus_time`) are expressed relative to how long the previous
/// round took to converge, or [`av_min_consensus_time`](Self::av_min_consensus_time) if that was shorter.
#[derive(Clone, Debug, TypedBuilder)]
pub struct ConsensusParams {
    /// How long a ledger with no transactions stays open.
    #[builder(default = Duration::from_secs(15))]
    pub ledger_idle_interval: Duration,

    /// Minimum time to spend in the establish phase before consensus can be declared.
    #[builder(default = Duration::from_millis(1950))]
    pub ledger_min_consensus: Duration,

    /// Time after which a node with no peers declares consensus with itself.
    #[builder(default = Duration::from_secs(10))]
    pub ledger_max_consensus: Duration,

    /// Upper bound on how long a round may go without consensus before it expires.
    #[builder(default = Duration::from_secs(120))]
    pub ledger_abandon_consensus: Duration,

    /// A round expires after this many times the previous round's duration, clamped between
    /// `ledger_max_consensus` and `ledger_abandon_consensus`.
    #[builder(default = 10)]
    pub ledger_abandon_consensus_factor: u32,

    /// Minimum time a ledger with transactions stays open.
    #[builder(default = Duration::from_secs(2))]
    pub ledger_min_close: Duration,

    /// Peer proposals older than this are ignored.
    #[builder(default = Duration::from_secs(20))]
    pub propose_freshness: Duration,

    /// Our proposal is re-sent if it is older than this.
    #[builder(default = Duration::from_secs(12))]
    pub propose_interval: Duration,

    /// Percentage of trust weight that must agree with our position to declare consensus. Agreement
    /// exactly at this percentage is not enough.
    #[builder(default = 80)]
    pub min_consensus_pct: u32,

    /// Lower bound on the previous round's duration when computing the round's progress.
    #[builder(default = Duration::from_secs(5))]
    pub av_min_consensus_time: Duration,

    #[builder(default = 50)]
    pub av_init_consensus_pct: u32,

    #[builder(default = 50)]
    pub av_mid_consensus_time: u32,

    #[builder(default = 65)]
    pub av_mid_consensus_pct: u32,

    #[builder(default = 85)]
    pub av_late_consensus_time: u32,

    #[builder(default = 70)]
    pub av_late_consensus_pct: u32,

    #[builder(default = 200)]
    pub av_stuck_consensus_time: u32,

    #[builder(default = 95)]
    pub av_stuck_consensus_pct: u32,

    /// Percentage of participants that must agree on a close time.
    #[builder(default = 75)]
    pub av_ct_consensus_pct: u32,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        ConsensusParams::builder().build()
    }
}

impl ConsensusParams {
    /// The percentage of agreement our vote on a disputed transaction needs, given how far into the round
    /// we are (`close_percent`).
    pub fn needed_weight(&self, close_percent: u32) -> u32 {
        if close_percent < self.av_mid_consensus_time {
            self.av_init_consensus_pct
        } else if close_percent < self.av_late_consensus_time {
            self.av_mid_consensus_pct
        } else if close_percent < self.av_stuck_consensus_time {
            self.av_late_consensus_pct
        } else {
            self.av_stuck_consensus_pct
        }
    }

    /// How long a round whose predecessor took `previous_round_time` may run before it expires.
    pub fn abandon_deadline(&self, previous_round_time: Duration) -> Duration {
        (previous_round_time * self.ledger_abandon_consensus_factor)
            .clamp(self.ledger_max_consensus, self.ledger_abandon_consensus)
    }
}
