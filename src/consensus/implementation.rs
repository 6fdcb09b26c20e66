/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Event-driven implementation of the consensus state machine.
//!
//! Main type: [`Consensus`].

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    fmt::{self, Display, Formatter},
    sync::{mpsc::Sender, Arc},
    time::{Duration, Instant, SystemTime},
};

use crate::{
    events::{
        CloseLedgerEvent, ConsensusReachedEvent, ConsensusTimeoutEvent, CreateDisputeEvent, Event,
        ModeChangeEvent, ProposeEvent, ReceivePositionEvent, RejectMessageEvent, StartRoundEvent,
        SwitchLedgerEvent,
    },
    ledger::{
        close_time::{effective_close_time, next_resolution},
        Ledger, LedgerError,
    },
    node_store::NodeStore,
    shamap::SHAMapError,
    types::{
        crypto_primitives::{Keypair, VerifyingKey},
        data_types::{CryptoHash, NetTime, NetworkID, Power, TotalPower, VerifyingKeyBytes},
        signed_messages::SignedMessage,
        validator_set::ValidatorSet,
    },
};

use super::{
    disputed_tx::DisputedTx,
    params::ConsensusParams,
    pluggables::{Adaptor, Clock},
    proposal::{Proposal, SignedProposal},
    timing::{check_consensus, participants_needed, should_close_ledger},
    tx_set::TxSet,
    types::{
        CloseTimes, ConsensusInfo, ConsensusMode, ConsensusPhase, ConsensusResult,
        ConsensusState, PeerPositionInfo, PeerPositionOutcome, TimeoutPolicy,
    },
};

/// Number of recent proposals kept per peer, to be played back when we switch to the ledger they build
/// on.
const RECENT_POSITIONS_PER_PEER: usize = 10;

/// Round duration assumed for the round that preceded the first round we take part in.
const SIMULATED_ROUND_TIME: Duration = Duration::from_millis(100);

/// Configuration variables for the [`Consensus`] engine.
#[derive(Clone)]
pub struct ConsensusConfiguration {
    /// The keypair our proposals are signed with.
    pub keypair: Keypair,

    /// The network our proposals are for. Proposals for other networks are rejected.
    pub network_id: NetworkID,

    /// The validators whose proposals count, and their trust weights.
    pub validator_set: ValidatorSet,

    pub params: ConsensusParams,

    /// What to do when a round expires.
    pub timeout_policy: TimeoutPolicy,
}

/// A single participant in the consensus protocol.
///
/// # Usage
///
/// After creating an instance using [`new`](Self::new), the caller interacts with it by calling:
/// 1. [`start_round`](Self::start_round) to begin a round on top of a last closed ledger. This must be
///    called once initially, and again whenever the phase becomes [`Accepted`](ConsensusPhase::Accepted)
///    and the adaptor has built the next ledger.
/// 2. [`timer_entry`](Self::timer_entry) regularly (about once a second) to drive the round forward.
/// 3. [`receive_peer_position`](Self::receive_peer_position) for every proposal received from a peer.
/// 4. [`got_tx_set`](Self::got_tx_set) whenever a transaction set requested through
///    [`Adaptor::acquire_tx_set`] arrives.
///
/// The engine reaches the rest of the node only through its [`Adaptor`], and reads time only through
/// its [`Clock`], so that rounds can be driven deterministically in tests.
pub struct Consensus<S: NodeStore, A: Adaptor<S>, C: Clock> {
    config: ConsensusConfiguration,
    adaptor: A,
    clock: C,
    event_publisher: Option<Sender<Event>>,

    phase: ConsensusPhase,
    mode: ConsensusMode,
    proposing: bool,
    validating: bool,
    have_correct_lcl: bool,
    consensus_fail: bool,
    have_close_time_consensus: bool,
    first_round: bool,

    // Progress of the round, measured with the monotonic clock.
    round_time: Duration,
    close_percent: u32,
    close_resolution: u8,
    consensus_start_time: Instant,
    previous_round_time: Duration,
    round_deadline: Duration,

    // Progress of the round in network time.
    now: NetTime,
    close_time: NetTime,
    close_times: BTreeMap<NetTime, usize>,

    prev_ledger_id: CryptoHash,
    previous_ledger: Arc<Ledger<S>>,
    acquired: HashMap<CryptoHash, TxSet<S>>,
    our_position: Option<Proposal>,
    our_set: Option<TxSet<S>>,

    peer_positions: BTreeMap<VerifyingKeyBytes, Proposal>,
    recent_positions: BTreeMap<VerifyingKeyBytes, VecDeque<Proposal>>,
    previous_proposers: usize,
    disputes: BTreeMap<CryptoHash, DisputedTx>,
    compares: HashSet<CryptoHash>,
    dead_nodes: HashSet<VerifyingKeyBytes>,
}

impl<S: NodeStore, A: Adaptor<S>, C: Clock> Consensus<S, A, C> {
    /// Create an engine whose last closed ledger is `last_closed`. The engine starts out in the
    /// [`Accepted`](ConsensusPhase::Accepted) phase, waiting for [`start_round`](Self::start_round).
    pub fn new(
        config: ConsensusConfiguration,
        adaptor: A,
        clock: C,
        last_closed: Arc<Ledger<S>>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        let validating = config.validator_set.contains(&config.keypair.public());
        let consensus_start_time = clock.now();
        let now = clock.net_now();
        let previous_round_time = config.params.ledger_idle_interval;
        Self {
            adaptor,
            clock,
            event_publisher,
            phase: ConsensusPhase::Accepted,
            mode: ConsensusMode::Observing,
            proposing: false,
            validating,
            have_correct_lcl: true,
            consensus_fail: false,
            have_close_time_consensus: false,
            first_round: true,
            round_time: Duration::ZERO,
            close_percent: 0,
            close_resolution: last_closed.info().close_time_resolution,
            consensus_start_time,
            previous_round_time,
            round_deadline: config.params.abandon_deadline(previous_round_time),
            now,
            close_time: now,
            close_times: BTreeMap::new(),
            prev_ledger_id: last_closed.hash(),
            previous_ledger: last_closed,
            acquired: HashMap::new(),
            our_position: None,
            our_set: None,
            peer_positions: BTreeMap::new(),
            recent_positions: BTreeMap::new(),
            previous_proposers: 0,
            disputes: BTreeMap::new(),
            compares: HashSet::new(),
            dead_nodes: HashSet::new(),
            config,
        }
    }

    /// Begin a round to agree on the ledger after `prev_ledger_id`.
    ///
    /// `prev_ledger` is our best guess of that ledger. If it is not the ledger with `prev_ledger_id`, the
    /// round starts in [`WrongLedger`](ConsensusMode::WrongLedger) mode and the right ledger is acquired
    /// through the adaptor. `mode` should be [`Proposing`](ConsensusMode::Proposing) if we want to
    /// propose, which we only do if we are in the validator set.
    pub fn start_round(
        &mut self,
        now: NetTime,
        prev_ledger_id: CryptoHash,
        prev_ledger: Arc<Ledger<S>>,
        mode: ConsensusMode,
    ) -> Result<(), ConsensusError> {
        if self.first_round {
            // We did not see the previous ledger close, so we have no measured round time for it.
            self.previous_round_time = self.config.params.ledger_idle_interval;
            self.first_round = false;
        }

        let mode = if mode == ConsensusMode::Proposing && !self.validating {
            ConsensusMode::Observing
        } else {
            mode
        };
        self.start_round_internal(now, prev_ledger_id, prev_ledger, mode)
    }

    fn start_round_internal(
        &mut self,
        now: NetTime,
        prev_ledger_id: CryptoHash,
        prev_ledger: Arc<Ledger<S>>,
        mode: ConsensusMode,
    ) -> Result<(), ConsensusError> {
        // 1. Reset the state of the round.
        self.phase = ConsensusPhase::Open;
        self.now = now;
        self.prev_ledger_id = prev_ledger_id;
        self.previous_ledger = prev_ledger;
        self.our_position = None;
        self.our_set = None;
        self.consensus_fail = false;
        self.round_time = Duration::ZERO;
        self.close_percent = 0;
        self.have_close_time_consensus = false;
        self.consensus_start_time = self.clock.now();
        self.round_deadline = self.config.params.abandon_deadline(self.previous_round_time);
        self.have_correct_lcl = self.previous_ledger.hash() == self.prev_ledger_id;

        self.peer_positions.clear();
        self.acquired.clear();
        self.disputes.clear();
        self.compares.clear();
        self.close_times.clear();
        self.dead_nodes.clear();

        // 2. Compute the close time resolution of the ledger under consensus.
        let info = self.previous_ledger.info();
        self.close_resolution = next_resolution(
            info.close_time_resolution,
            info.close_agree(),
            info.seq.next(),
        );

        let mode = if self.have_correct_lcl {
            mode
        } else {
            ConsensusMode::WrongLedger
        };
        self.set_mode(mode);

        Event::StartRound(StartRoundEvent {
            timestamp: SystemTime::now(),
            prev_ledger: self.prev_ledger_id,
            ledger_seq: self.previous_ledger.seq().next(),
            mode: self.mode,
        })
        .publish(&self.event_publisher);

        // 3. If we do not have the ledger the round builds on, try to get it. A successful switch starts
        //    the round over on the right ledger.
        if !self.have_correct_lcl {
            self.handle_wrong_ledger(prev_ledger_id)?;
            if self.have_correct_lcl {
                return Ok(());
            }
        }

        // 4. Process the proposals that arrived before the round started.
        self.playback_proposals()?;

        // 5. If more than half of last round's proposers are already here, do not wait for the timer.
        if self.peer_positions.len() > self.previous_proposers / 2 {
            self.timer_entry(now)?;
        }

        Ok(())
    }

    /// Process a signed proposal received from a peer.
    ///
    /// Proposals from keys outside the validator set, with bad signatures, or for another network are
    /// rejected. Proposals that are not newer than what we already have from the peer are ignored.
    pub fn receive_peer_position(
        &mut self,
        now: NetTime,
        signed: SignedProposal,
    ) -> Result<PeerPositionOutcome, ConsensusError> {
        let origin = signed.proposal.node_id;

        // 1. Check that the proposal is for our network, and signed by a trusted validator.
        if signed.proposal.network_id != self.config.network_id {
            self.reject(origin, "wrong network");
            return Ok(PeerPositionOutcome::WrongNetwork);
        }
        let verifying_key = match VerifyingKey::from_bytes(&origin) {
            Ok(key) if self.config.validator_set.contains(&key) => key,
            _ => {
                self.reject(origin, "unknown validator");
                return Ok(PeerPositionOutcome::UnknownValidator);
            }
        };
        if !signed.is_correct(&verifying_key) {
            self.reject(origin, "invalid signature");
            return Ok(PeerPositionOutcome::InvalidSignature);
        }
        if origin == self.node_id() {
            return Ok(PeerPositionOutcome::Ignored);
        }

        let mut proposal = signed.proposal;
        proposal.time = now;

        Event::ReceivePosition(ReceivePositionEvent {
            timestamp: SystemTime::now(),
            origin,
            proposal: proposal.clone(),
        })
        .publish(&self.event_publisher);

        // 2. Remember the proposal in case we later switch to the ledger it builds on.
        let recent = self.recent_positions.entry(origin).or_default();
        recent.push_back(proposal.clone());
        while recent.len() > RECENT_POSITIONS_PER_PEER {
            recent.pop_front();
        }

        // 3. Update our view of the round.
        if self.peer_proposal(now, proposal)? {
            Ok(PeerPositionOutcome::Accepted)
        } else {
            Ok(PeerPositionOutcome::Ignored)
        }
    }

    /// Drive the round forward. Should be called regularly.
    pub fn timer_entry(&mut self, now: NetTime) -> Result<(), ConsensusError> {
        self.now = now;
        let result = self.timer_entry_inner();
        if let Err(err) = &result {
            log::error!("Error while driving consensus round: {}", err);
            self.leave_consensus();
        }
        result
    }

    fn timer_entry_inner(&mut self) -> Result<(), ConsensusError> {
        if self.phase != ConsensusPhase::Accepted {
            self.check_ledger()?;
        }

        self.update_round_time();

        match self.phase {
            ConsensusPhase::Open => {
                self.state_pre_close()?;
                if self.phase != ConsensusPhase::Establish {
                    return Ok(());
                }
                self.state_establish()
            }
            ConsensusPhase::Establish => self.state_establish(),

            // The caller starts the next round once the adaptor has built the ledger.
            ConsensusPhase::Accepted => Ok(()),
        }
    }

    /// Process a transaction set, typically one requested from peers.
    pub fn got_tx_set(&mut self, now: NetTime, tx_set: TxSet<S>) -> Result<(), ConsensusError> {
        self.now = now;
        let result = self.got_tx_set_internal(tx_set, true);
        if let Err(err) = &result {
            log::error!("Error while processing acquired transaction set: {}", err);
            self.leave_consensus();
        }
        result
    }

    /// Close the open ledger and accept our own initial position without waiting for peers. For
    /// standalone operation only.
    pub fn simulate(
        &mut self,
        now: NetTime,
        consensus_delay: Option<Duration>,
    ) -> Result<(), ConsensusError> {
        log::info!("Simulating consensus");
        self.now = now;
        self.close_ledger()?;
        self.round_time = consensus_delay.unwrap_or(SIMULATED_ROUND_TIME);
        self.have_close_time_consensus = true;
        self.begin_accept(true)
    }

    /// Accept our current position, marking the round as failed if `consensus_fail`.
    pub fn accept(&mut self, now: NetTime, consensus_fail: bool) -> Result<(), ConsensusError> {
        self.now = now;
        self.consensus_fail = consensus_fail;
        self.begin_accept(false)
    }

    /// Tally the current positions of our trusted peers against ours.
    pub fn check_consensus_reached(&mut self) -> Result<ConsensusState, ConsensusError> {
        let our_position = match &self.our_position {
            Some(position) => position.position,
            None => return Ok(ConsensusState::No),
        };

        // 1. Add up the trust weight agreeing and disagreeing with our position.
        let mut agree = TotalPower::new(0);
        let mut total = TotalPower::new(0);
        let mut proposers = 0;
        let mut uncompared = Vec::new();
        for proposal in self.peer_positions.values() {
            if proposal.is_bow_out() {
                continue;
            }
            let power = self.config.validator_set.power_of_bytes(&proposal.node_id);
            proposers += 1;
            total += power;
            if proposal.position == our_position {
                agree += power;
            } else if !self.compares.contains(&proposal.position) {
                uncompared.push(proposal.position);
            }
        }

        // 2. Make sure we have created disputes for every position we disagree with.
        for position in uncompared {
            let sets = (
                self.acquired.get(&our_position).cloned(),
                self.acquired.get(&position).cloned(),
            );
            if let (Some(ours), Some(theirs)) = sets {
                self.compares.insert(position);
                self.create_disputes(&ours, &theirs)?;
            }
        }

        // 3. Apply the consensus rule.
        let finished = self.adaptor.proposers_finished(&self.prev_ledger_id);
        let our_power = if self.proposing {
            Some(self.our_power())
        } else {
            None
        };
        let state = check_consensus(
            self.previous_proposers,
            proposers,
            agree,
            finished,
            total,
            self.previous_round_time,
            self.round_time,
            our_power,
            &self.config.params,
        );

        // The deadline may have been extended past the point where the rule considers the round expired.
        if state == ConsensusState::Expired && self.round_time <= self.round_deadline {
            return Ok(ConsensusState::No);
        }
        Ok(state)
    }

    /// Check whether the network is building on the same last closed ledger as we are, and switch to
    /// the network's ledger if not.
    pub fn check_ledger(&mut self) -> Result<(), ConsensusError> {
        let net_ledger =
            self.adaptor
                .get_prev_ledger(&self.prev_ledger_id, &self.previous_ledger, self.mode);

        if net_ledger != self.prev_ledger_id {
            log::warn!(
                "View of consensus changed during {} ({}): {} to {}",
                self.phase,
                if self.have_correct_lcl {
                    "correct ledger"
                } else {
                    "incorrect ledger"
                },
                self.prev_ledger_id,
                net_ledger
            );
            Event::SwitchLedger(SwitchLedgerEvent {
                timestamp: SystemTime::now(),
                from: self.prev_ledger_id,
                to: net_ledger,
            })
            .publish(&self.event_publisher);
            self.handle_wrong_ledger(net_ledger)
        } else if self.previous_ledger.hash() != self.prev_ledger_id {
            self.handle_wrong_ledger(net_ledger)
        } else {
            Ok(())
        }
    }

    /// Stop proposing for the rest of the round, announcing a bow-out if we had a position.
    pub fn leave_consensus(&mut self) {
        if self.mode == ConsensusMode::Proposing {
            let now = self.now;
            let bowed_out = match self.our_position.as_mut() {
                Some(position) if !position.is_bow_out() => {
                    position.bow_out(now);
                    true
                }
                _ => false,
            };
            if bowed_out {
                log::info!("Bowing out of consensus on {}", self.prev_ledger_id);
                self.propose();
            }
            self.set_mode(ConsensusMode::Observing);
        }
        self.proposing = false;
    }

    /// Get a snapshot of the state of the engine.
    pub fn info(&self) -> ConsensusInfo {
        ConsensusInfo {
            phase: self.phase,
            mode: self.mode,
            prev_ledger: self.prev_ledger_id,
            ledger_seq: self.previous_ledger.seq().next(),
            proposing: self.proposing,
            validating: self.validating,
            have_correct_lcl: self.have_correct_lcl,
            our_position: self.our_position.as_ref().map(|position| position.position),
            round_time: self.round_time,
            close_percent: self.close_percent,
            close_resolution: self.close_resolution,
            have_close_time_consensus: self.have_close_time_consensus,
            previous_proposers: self.previous_proposers,
            previous_round_time: self.previous_round_time,
            peer_positions: self
                .peer_positions
                .values()
                .map(|proposal| PeerPositionInfo {
                    node_id: proposal.node_id,
                    position: proposal.position,
                    propose_seq: proposal.propose_seq,
                    close_time: proposal.close_time,
                })
                .collect(),
            disputes: self.disputes.len(),
            acquired: {
                let mut acquired: Vec<CryptoHash> = self.acquired.keys().copied().collect();
                acquired.sort();
                acquired
            },
            dead_nodes: self.dead_nodes.len(),
            close_times: self
                .close_times
                .iter()
                .map(|(time, count)| (*time, *count))
                .collect(),
        }
    }

    pub fn phase(&self) -> ConsensusPhase {
        self.phase
    }

    pub fn mode(&self) -> ConsensusMode {
        self.mode
    }

    pub fn is_proposing(&self) -> bool {
        self.proposing
    }

    pub fn is_validating(&self) -> bool {
        self.validating
    }

    pub fn have_correct_lcl(&self) -> bool {
        self.have_correct_lcl
    }

    /// Id of the ledger the current round builds on.
    pub fn prev_ledger_id(&self) -> CryptoHash {
        self.prev_ledger_id
    }

    pub fn previous_ledger(&self) -> &Arc<Ledger<S>> {
        &self.previous_ledger
    }

    pub fn our_position(&self) -> Option<&Proposal> {
        self.our_position.as_ref()
    }

    pub fn our_set(&self) -> Option<&TxSet<S>> {
        self.our_set.as_ref()
    }

    pub fn peer_positions(&self) -> &BTreeMap<VerifyingKeyBytes, Proposal> {
        &self.peer_positions
    }

    pub fn disputes(&self) -> &BTreeMap<CryptoHash, DisputedTx> {
        &self.disputes
    }

    pub fn previous_proposers(&self) -> usize {
        self.previous_proposers
    }

    pub fn previous_round_time(&self) -> Duration {
        self.previous_round_time
    }

    pub fn close_resolution(&self) -> u8 {
        self.close_resolution
    }

    pub fn have_close_time_consensus(&self) -> bool {
        self.have_close_time_consensus
    }

    /// Whether the round was accepted without agreement.
    pub fn consensus_fail(&self) -> bool {
        self.consensus_fail
    }

    pub fn adaptor(&self) -> &A {
        &self.adaptor
    }

    pub fn adaptor_mut(&mut self) -> &mut A {
        &mut self.adaptor
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn node_id(&self) -> VerifyingKeyBytes {
        self.config.keypair.public().to_bytes()
    }

    fn our_power(&self) -> Power {
        self.config
            .validator_set
            .power(&self.config.keypair.public())
            .copied()
            .unwrap_or(Power::new(0))
    }

    fn set_mode(&mut self, mode: ConsensusMode) {
        if mode != self.mode {
            Event::ModeChange(ModeChangeEvent {
                timestamp: SystemTime::now(),
                before: self.mode,
                after: mode,
            })
            .publish(&self.event_publisher);
            self.adaptor.on_mode_change(self.mode, mode);
            self.mode = mode;
        }
        self.proposing = mode == ConsensusMode::Proposing;
    }

    fn reject(&self, origin: VerifyingKeyBytes, reason: &'static str) {
        log::debug!("Rejected proposal: {}", reason);
        Event::RejectMessage(RejectMessageEvent {
            timestamp: SystemTime::now(),
            origin,
            reason,
        })
        .publish(&self.event_publisher);
    }

    fn update_round_time(&mut self) {
        self.round_time = self
            .clock
            .now()
            .saturating_duration_since(self.consensus_start_time);
        let expected = self
            .previous_round_time
            .max(self.config.params.av_min_consensus_time);
        let percent = self.round_time.as_millis() * 100 / expected.as_millis().max(1);
        self.close_percent = percent.min(u32::MAX as u128) as u32;
    }

    /// Apply a verified peer proposal. Returns whether it changed our view of the round.
    fn peer_proposal(&mut self, now: NetTime, proposal: Proposal) -> Result<bool, ConsensusError> {
        self.now = now;
        let peer = proposal.node_id;

        if proposal.prev_ledger != self.prev_ledger_id {
            log::debug!(
                "Got proposal for {} but we are on {}",
                proposal.prev_ledger,
                self.prev_ledger_id
            );
            return Ok(false);
        }

        if self.dead_nodes.contains(&peer) {
            log::info!("Position from dead node");
            return Ok(false);
        }

        if let Some(current) = self.peer_positions.get(&peer) {
            if proposal.propose_seq <= current.propose_seq {
                return Ok(false);
            }
        }

        if proposal.is_bow_out() {
            log::info!("Peer bows out of round on {}", self.prev_ledger_id);
            for dispute in self.disputes.values_mut() {
                dispute.un_vote(&peer);
            }
            self.peer_positions.remove(&peer);
            self.dead_nodes.insert(peer);
            return Ok(true);
        }

        if proposal.is_initial() {
            *self.close_times.entry(proposal.close_time).or_insert(0) += 1;
        }

        let position = proposal.position;
        self.peer_positions.insert(peer, proposal);

        if let Some(tx_set) = self.acquired.get(&position) {
            for dispute in self.disputes.values_mut() {
                dispute.set_vote(peer, tx_set.exists(dispute.txid())?);
            }
        } else if let Some(tx_set) = self.adaptor.acquire_tx_set(&position) {
            self.got_tx_set_internal(tx_set, true)?;
        } else {
            log::debug!("Don't have transaction set {} of peer", position);
        }

        Ok(true)
    }

    fn playback_proposals(&mut self) -> Result<(), ConsensusError> {
        let proposals: Vec<Proposal> = self
            .recent_positions
            .values()
            .flatten()
            .filter(|proposal| proposal.prev_ledger == self.prev_ledger_id)
            .cloned()
            .collect();
        for proposal in proposals {
            self.peer_proposal(self.now, proposal)?;
        }
        Ok(())
    }

    fn state_pre_close(&mut self) -> Result<(), ConsensusError> {
        let any_tx = self.adaptor.has_open_transactions();
        let proposers_closed = self.peer_positions.len();
        let proposers_validated = self.adaptor.proposers_validated(&self.prev_ledger_id);

        // Time since the last ledger closed, by the network's close time if it was agreed, and by our own
        // clock otherwise.
        let info = self.previous_ledger.info();
        let previous_close_correct = self.have_correct_lcl
            && info.close_agree()
            && info.close_time != info.parent_close_time + Duration::from_secs(1);
        let last_close_time = if previous_close_correct {
            info.close_time
        } else {
            self.close_time
        };
        let since_close_ms = self.now.millis_since(last_close_time);

        let idle_interval = self
            .config
            .params
            .ledger_idle_interval
            .max(Duration::from_secs(2 * info.close_time_resolution as u64));

        if should_close_ledger(
            any_tx,
            self.previous_proposers,
            proposers_closed,
            proposers_validated,
            self.previous_round_time,
            since_close_ms,
            self.round_time,
            idle_interval,
            &self.config.params,
        ) {
            self.close_ledger()?;
        }
        Ok(())
    }

    fn state_establish(&mut self) -> Result<(), ConsensusError> {
        self.update_round_time();

        // Give everyone a chance to take an initial position.
        if self.round_time < self.config.params.ledger_min_consensus {
            return Ok(());
        }

        self.update_our_positions()?;

        match self.check_consensus_reached()? {
            ConsensusState::No => Ok(()),
            ConsensusState::Expired => self.on_round_expired(),
            state @ (ConsensusState::Yes | ConsensusState::MovedOn) => {
                self.consensus_fail = state == ConsensusState::MovedOn;
                if self.consensus_fail {
                    log::error!("Unable to reach consensus on {}", self.prev_ledger_id);
                }
                if !self.have_close_time_consensus {
                    log::info!("We have transaction consensus but not close time consensus");
                    return Ok(());
                }
                log::info!(
                    "Converge cutoff ({} participants)",
                    self.peer_positions.len()
                );
                self.begin_accept(false)
            }
        }
    }

    fn on_round_expired(&mut self) -> Result<(), ConsensusError> {
        let policy = self.config.timeout_policy;
        Event::ConsensusTimeout(ConsensusTimeoutEvent {
            timestamp: SystemTime::now(),
            prev_ledger: self.prev_ledger_id,
            round_time: self.round_time,
            policy,
        })
        .publish(&self.event_publisher);

        match policy {
            TimeoutPolicy::ExtendDeliberation => {
                log::warn!(
                    "Consensus round on {} expired after {:?}, extending",
                    self.prev_ledger_id,
                    self.round_time
                );
                self.round_deadline = self.round_time
                    + self
                        .config
                        .params
                        .abandon_deadline(self.previous_round_time);
                Ok(())
            }
            TimeoutPolicy::ForceAccept => {
                log::warn!(
                    "Consensus round on {} expired after {:?}, forcing accept",
                    self.prev_ledger_id,
                    self.round_time
                );
                self.leave_consensus();
                if let Some(best) = self.best_supported_set() {
                    self.our_set = Some(best);
                }
                self.consensus_fail = true;
                self.begin_accept(false)
            }
        }
    }

    /// The acquired transaction set with the most trusted support among our peers. Ties go to the set
    /// with the lower id.
    fn best_supported_set(&self) -> Option<TxSet<S>> {
        let mut support: BTreeMap<CryptoHash, TotalPower> = BTreeMap::new();
        for proposal in self.peer_positions.values() {
            if self.acquired.contains_key(&proposal.position) {
                *support.entry(proposal.position).or_default() +=
                    self.config.validator_set.power_of_bytes(&proposal.node_id);
            }
        }

        let mut best: Option<(CryptoHash, TotalPower)> = None;
        for (position, power) in support {
            match best {
                Some((_, best_power)) if power <= best_power => (),
                _ => best = Some((position, power)),
            }
        }
        best.and_then(|(position, _)| self.acquired.get(&position).cloned())
    }

    fn close_ledger(&mut self) -> Result<(), ConsensusError> {
        self.phase = ConsensusPhase::Establish;
        self.consensus_start_time = self.clock.now();
        self.close_time = self.now;

        let initial_set = self
            .adaptor
            .on_close(&self.previous_ledger, self.close_time, self.mode)?;
        self.take_initial_position(initial_set)
    }

    fn take_initial_position(&mut self, mut initial_set: TxSet<S>) -> Result<(), ConsensusError> {
        initial_set.freeze();
        let set_id = initial_set.id();
        let position = Proposal::new(
            self.node_id(),
            self.config.network_id,
            self.prev_ledger_id,
            self.previous_ledger.seq().next(),
            set_id,
            self.close_time,
            self.now,
        );

        for dispute in self.disputes.values_mut() {
            dispute.set_our_vote(initial_set.exists(dispute.txid())?);
        }

        self.our_position = Some(position);
        self.our_set = Some(initial_set.clone());

        Event::CloseLedger(CloseLedgerEvent {
            timestamp: SystemTime::now(),
            prev_ledger: self.prev_ledger_id,
            close_time: self.close_time,
            position: set_id,
        })
        .publish(&self.event_publisher);

        // Create the disputes required by our position against the peers who have already taken theirs.
        self.compares.insert(set_id);
        let peer_sets: Vec<TxSet<S>> = self
            .peer_positions
            .values()
            .filter_map(|proposal| self.acquired.get(&proposal.position).cloned())
            .collect();
        for peer_set in peer_sets {
            if self.compares.insert(peer_set.id()) {
                self.create_disputes(&initial_set, &peer_set)?;
            }
        }

        self.got_tx_set_internal(initial_set, false)?;

        if self.proposing {
            self.propose();
        }
        Ok(())
    }

    fn got_tx_set_internal(&mut self, tx_set: TxSet<S>, acquired: bool) -> Result<(), ConsensusError> {
        let set_id = tx_set.id();
        if self.acquired.contains_key(&set_id) {
            return Ok(());
        }

        // Sets we acquired from peers are already available to others.
        if !acquired {
            self.adaptor.share_tx_set(&tx_set);
        }

        let compare_with_ours = match &self.our_position {
            None => {
                log::debug!("Not creating disputes: no position yet");
                false
            }
            Some(position) if position.is_bow_out() => {
                log::debug!("Not creating disputes: not participating");
                false
            }
            Some(position) if position.position == set_id => false,
            Some(_) => true,
        };
        if compare_with_ours {
            if let Some(our_set) = self.our_set.clone() {
                self.create_disputes(&our_set, &tx_set)?;
            }
            self.compares.insert(set_id);
        }

        let peers: Vec<VerifyingKeyBytes> = self
            .peer_positions
            .values()
            .filter(|proposal| proposal.position == set_id)
            .map(|proposal| proposal.node_id)
            .collect();
        if !peers.is_empty() {
            self.adjust_count(&tx_set, &peers)?;
        } else if acquired {
            log::debug!("By the time we got set {} no peers were proposing it", set_id);
        }

        self.acquired.insert(set_id, tx_set);
        Ok(())
    }

    fn create_disputes(&mut self, first: &TxSet<S>, second: &TxSet<S>) -> Result<(), ConsensusError> {
        if first.id() == second.id() {
            return Ok(());
        }

        let differences = first.compare(second)?;
        log::debug!(
            "{} differences between {} and {}",
            differences.len(),
            first.id(),
            second.id()
        );
        for (txid, (_, tx)) in differences {
            self.add_disputed_transaction(txid, tx)?;
        }
        Ok(())
    }

    fn add_disputed_transaction(&mut self, txid: CryptoHash, tx: Vec<u8>) -> Result<(), ConsensusError> {
        if self.disputes.contains_key(&txid) {
            return Ok(());
        }

        let our_vote = match &self.our_set {
            Some(our_set) => our_set.exists(&txid)?,
            None => false,
        };
        let mut dispute = DisputedTx::new(txid, tx, our_vote);

        for (peer, proposal) in &self.peer_positions {
            if let Some(peer_set) = self.acquired.get(&proposal.position) {
                dispute.set_vote(*peer, peer_set.exists(&txid)?);
            }
        }

        self.adaptor.share_dispute(&dispute);
        Event::CreateDispute(CreateDisputeEvent {
            timestamp: SystemTime::now(),
            txid,
            our_vote,
        })
        .publish(&self.event_publisher);

        self.disputes.insert(txid, dispute);
        Ok(())
    }

    /// Record that every peer in `peers` proposes `tx_set`.
    fn adjust_count(
        &mut self,
        tx_set: &TxSet<S>,
        peers: &[VerifyingKeyBytes],
    ) -> Result<(), ConsensusError> {
        for dispute in self.disputes.values_mut() {
            let set_has = tx_set.exists(dispute.txid())?;
            for peer in peers {
                dispute.set_vote(*peer, set_has);
            }
        }
        Ok(())
    }

    /// Adjust our position to try to agree with our peers.
    pub fn update_our_positions(&mut self) -> Result<(), ConsensusError> {
        let (our_position, our_set) = match (&self.our_position, &self.our_set) {
            (Some(position), Some(set)) => (position.clone(), set.clone()),
            _ => return Ok(()),
        };
        let peer_cutoff = self.now - self.config.params.propose_freshness;
        let our_cutoff = self.now - self.config.params.propose_interval;
        let prior_close_time = self.previous_ledger.close_time();

        // 1. Drop stale peer positions, and tally the close times of the fresh ones.
        let stale: Vec<VerifyingKeyBytes> = self
            .peer_positions
            .values()
            .filter(|proposal| proposal.is_stale(peer_cutoff))
            .map(|proposal| proposal.node_id)
            .collect();
        for peer in stale {
            log::warn!("Removing stale proposal from peer");
            for dispute in self.disputes.values_mut() {
                dispute.un_vote(&peer);
            }
            self.peer_positions.remove(&peer);
        }

        let mut close_time_votes: BTreeMap<NetTime, usize> = BTreeMap::new();
        for proposal in self.peer_positions.values() {
            *close_time_votes
                .entry(effective_close_time(
                    proposal.close_time,
                    self.close_resolution,
                    prior_close_time,
                ))
                .or_insert(0) += 1;
        }

        // 2. Update our votes on disputed transactions. The threshold rises as the round goes on, so
        //    time alone can change our vote.
        let mut changed_set: Option<TxSet<S>> = None;
        for dispute in self.disputes.values_mut() {
            if dispute.update_vote(self.close_percent, self.proposing, &self.config.params) {
                let set = changed_set.get_or_insert_with(|| our_set.to_mutable());
                if dispute.our_vote() {
                    set.insert(dispute.tx().to_vec())?;
                } else {
                    set.erase(dispute.txid())?;
                }
            }
        }

        // 3. Find the close time enough of us agree on.
        let needed_weight = self.config.params.needed_weight(self.close_percent);
        let mut close_time = NetTime::epoch();
        self.have_close_time_consensus = false;

        if self.peer_positions.is_empty() {
            self.have_close_time_consensus = true;
            close_time = effective_close_time(
                our_position.close_time,
                self.close_resolution,
                prior_close_time,
            );
        } else {
            let mut participants = self.peer_positions.len();
            if self.proposing {
                *close_time_votes
                    .entry(effective_close_time(
                        our_position.close_time,
                        self.close_resolution,
                        prior_close_time,
                    ))
                    .or_insert(0) += 1;
                participants += 1;
            }

            let mut thresh_vote = participants_needed(participants, needed_weight);
            let thresh_consensus =
                participants_needed(participants, self.config.params.av_ct_consensus_pct);

            for (time, votes) in &close_time_votes {
                if *votes >= thresh_vote {
                    close_time = *time;
                    thresh_vote = *votes;
                    if thresh_vote >= thresh_consensus {
                        self.have_close_time_consensus = true;
                    }
                }
            }

            if !self.have_close_time_consensus {
                log::debug!(
                    "No close time consensus: proposers {}, proposing {}, threshold {}, position {}",
                    self.peer_positions.len(),
                    self.proposing,
                    thresh_consensus,
                    close_time
                );
            }
        }

        // 4. Take a new position if our set or close time changed, or our position is getting stale.
        let new_set = match changed_set {
            Some(set) => Some(set),
            None if close_time != our_position.close_time
                || our_position.is_stale(our_cutoff) =>
            {
                Some(our_set)
            }
            None => None,
        };

        if let Some(mut new_set) = new_set {
            new_set.freeze();
            let new_id = new_set.id();
            self.our_set = Some(new_set.clone());
            log::info!("Position change: close time {}, tx set {}", close_time, new_id);

            let now = self.now;
            let changed = self
                .our_position
                .as_mut()
                .map_or(false, |position| position.change_position(new_id, close_time, now));
            if changed {
                if self.proposing {
                    self.propose();
                }
                self.got_tx_set_internal(new_set, false)?;
            }
        }

        Ok(())
    }

    fn propose(&mut self) {
        if let Some(position) = &self.our_position {
            let signed = position.sign(&self.config.keypair);
            self.adaptor.propose(&signed);
            Event::Propose(ProposeEvent {
                timestamp: SystemTime::now(),
                proposal: position.clone(),
            })
            .publish(&self.event_publisher);
        }
    }

    fn begin_accept(&mut self, simulated: bool) -> Result<(), ConsensusError> {
        let tx_set = self.our_set.clone().ok_or(ConsensusError::NoPosition)?;
        let mut position = self.our_position.clone().ok_or(ConsensusError::NoPosition)?;
        position.position = tx_set.id();

        let prior_close_time = self.previous_ledger.close_time();
        let agreed = !position.close_time.is_epoch() && self.have_close_time_consensus;
        let close_times = CloseTimes {
            close_time: if agreed {
                effective_close_time(position.close_time, self.close_resolution, prior_close_time)
            } else {
                prior_close_time + Duration::from_secs(1)
            },
            self_close_time: self.close_time,
            agreed,
            resolution: self.close_resolution,
        };

        self.phase = ConsensusPhase::Accepted;
        let proposers = self.peer_positions.len();
        self.previous_proposers = proposers;
        self.previous_round_time = self.round_time;

        Event::ConsensusReached(ConsensusReachedEvent {
            timestamp: SystemTime::now(),
            prev_ledger: self.prev_ledger_id,
            position: position.position,
            consensus_fail: self.consensus_fail,
            round_time: self.round_time,
            proposers,
        })
        .publish(&self.event_publisher);

        let result = ConsensusResult {
            tx_set,
            position,
            close_times,
            round_time: self.round_time,
            proposers,
            consensus_fail: self.consensus_fail,
            simulated,
        };
        self.adaptor
            .on_accept(result, &self.previous_ledger, self.mode)
    }

    /// Switch the round to the ledger with `ledger_id`, which the network is building on.
    fn handle_wrong_ledger(&mut self, ledger_id: CryptoHash) -> Result<(), ConsensusError> {
        if self.prev_ledger_id != ledger_id {
            self.prev_ledger_id = ledger_id;

            if self.have_correct_lcl && self.proposing && self.our_position.is_some() {
                self.leave_consensus();
            }

            // Stop proposing because we are out of sync.
            self.set_mode(ConsensusMode::WrongLedger);
            self.peer_positions.clear();
            self.disputes.clear();
            self.compares.clear();
            self.close_times.clear();
            self.dead_nodes.clear();

            self.playback_proposals()?;
        }

        if self.previous_ledger.hash() == self.prev_ledger_id {
            return Ok(());
        }

        match self.adaptor.acquire_ledger(&ledger_id) {
            Some(ledger) if ledger.hash() == ledger_id => {
                log::info!("Have the consensus ledger {}", ledger_id);
                self.start_round_internal(self.now, ledger_id, ledger, ConsensusMode::SwitchedLedger)
            }
            Some(ledger) => {
                log::warn!(
                    "Asked for ledger {} but was given {}",
                    ledger_id,
                    ledger.hash()
                );
                self.have_correct_lcl = false;
                Ok(())
            }
            None => {
                self.have_correct_lcl = false;
                self.set_mode(ConsensusMode::WrongLedger);
                Ok(())
            }
        }
    }
}

/// Enumerates the different ways a call to any of [`Consensus`]'s methods can fail. The error may arise
/// in the following circumstances:
/// 1. A transaction set or ledger map could not be read, typically because one of its nodes is
///    missing.
/// 2. The adaptor failed to close or build a ledger.
/// 3. The engine was asked to accept without having taken a position.
#[derive(Debug)]
pub enum ConsensusError {
    SHAMapError(SHAMapError),
    LedgerError(LedgerError),
    NoPosition,
}

impl ConsensusError {
    /// Whether the error was caused by data that does not hash to its expected hash, wherever it was
    /// wrapped.
    pub fn is_hash_mismatch(&self) -> bool {
        match self {
            ConsensusError::SHAMapError(err) => err.is_hash_mismatch(),
            ConsensusError::LedgerError(err) => err.is_hash_mismatch(),
            ConsensusError::NoPosition => false,
        }
    }
}

impl From<SHAMapError> for ConsensusError {
    fn from(value: SHAMapError) -> Self {
        ConsensusError::SHAMapError(value)
    }
}

impl From<LedgerError> for ConsensusError {
    fn from(value: LedgerError) -> Self {
        ConsensusError::LedgerError(value)
    }
}

impl Display for ConsensusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusError::SHAMapError(err) => write!(f, "transaction set error: {}", err),
            ConsensusError::LedgerError(err) => write!(f, "ledger error: {}", err),
            ConsensusError::NoPosition => write!(f, "no position to accept"),
        }
    }
}
