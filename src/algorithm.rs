/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The algorithm thread, and the [`LedgerAdaptor`] through which the consensus engine reaches the rest
//! of the replica.
//!
//! The algorithm thread is the driving force of a replica. It owns the [consensus engine](Consensus),
//! and through the engine's adaptor, the open ledger, the validations tracker, the inbound ledger
//! acquisitions, and the write side of the ledger history. It is therefore the only thread that ever
//! builds a ledger or modifies a SHAMap that other threads can see.
//!
//! The thread is a loop that:
//! 1. Takes in transactions submitted through the [`Replica`](crate::replica::Replica).
//! 2. Processes [consensus messages](ConsensusMessage) from peers:
//!     * Positions are passed to the engine.
//!     * Validations are added to the validations tracker, which may fully validate a ledger.
//!     * Transactions are added to the open ledger.
//!     * Transaction set requests are answered, and transaction set responses are checked and passed to
//!       the engine.
//! 3. Passes node sync responses to the inbound ledger acquisitions.
//! 4. Once every timer interval, retries stalled acquisitions and drives the round forward with
//!    [`timer_entry`](Consensus::timer_entry).
//! 5. Once the engine has accepted a ledger, starts the next round on top of it.
//!
//! A ledger is validated by this replica as soon as it is built (if the replica is a validator), and
//! written to the node store when it becomes fully validated.

use std::{
    cmp::min,
    collections::HashMap,
    sync::{
        mpsc::{Receiver, Sender, TryRecvError},
        Arc, PoisonError, RwLock,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use ed25519_dalek::VerifyingKey;

use crate::{
    consensus::{
        disputed_tx::DisputedTx, types::PeerPositionOutcome, Adaptor, Clock, Consensus,
        ConsensusError, ConsensusMode, ConsensusPhase, ConsensusResult, SignedProposal, TxSet,
    },
    events::{
        AcceptLedgerEvent, Event, FullyValidatedEvent, PersistLedgerEvent, ReceiveValidationEvent,
        ValidateEvent,
    },
    ledger::{build_ledger, Ledger, LedgerHistory, OpenView, TransactionProcessor},
    networking::{
        receiving::{
            ConsensusMessageReceiveError, ConsensusMessageStub, NodeSyncClientStub,
            NodeSyncResponseReceiveError,
        },
        sending::SenderHandle,
        ConsensusMessage, Network, NodeSyncResponse, TxSetRequest, TxSetResponse,
    },
    node_sync::inbound::InboundLedgers,
    node_store::{NodeObject, NodeStore},
    shamap::Family,
    types::{
        crypto_primitives::Keypair,
        data_types::{CryptoHash, LedgerSeq, NetTime, NetworkID, TotalPower, VerifyingKeyBytes},
    },
    validations::{
        types::{SignedValidation, Validation},
        Validations,
    },
};

/// How long the algorithm thread waits for a consensus message before looking at its other inputs.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Parameters of the [`LedgerAdaptor`].
#[derive(Clone)]
pub(crate) struct AdaptorConfiguration {
    pub(crate) keypair: Keypair,
    pub(crate) network_id: NetworkID,

    /// Number of ledgers before the newest validated ledger that are kept in the ledger history.
    pub(crate) history_keep: u32,

    /// Minimum time between two requests for the same transaction set.
    pub(crate) tx_set_request_interval: Duration,

    /// How long a peer's reported last closed ledger counts towards choosing the network's ledger.
    pub(crate) peer_ledger_freshness: Duration,
}

/// Implements the consensus engine's [`Adaptor`] on top of the replica's ledgers, stores, and network.
pub(crate) struct LedgerAdaptor<N: Network + 'static, S: NodeStore, P: TransactionProcessor, C: Clock> {
    config: AdaptorConfiguration,
    family: Arc<Family<S>>,
    history: Arc<RwLock<LedgerHistory<S>>>,
    open_view: OpenView<S>,
    validations: Validations,
    inbound: InboundLedgers<N, S>,
    processor: P,
    sender: SenderHandle<N>,
    clock: C,
    event_publisher: Option<Sender<Event>>,

    /// Nodes of ledgers we built, written to the node store once the ledger is fully validated.
    pending_persist: HashMap<CryptoHash, (LedgerSeq, Vec<NodeObject>)>,

    /// The ledger built by the last call to `on_accept`, which the next round builds on.
    accepted: Option<Arc<Ledger<S>>>,
    last_validation_time: NetTime,

    tx_sets: HashMap<CryptoHash, TxSet<S>>,
    requested_tx_sets: HashMap<CryptoHash, Instant>,

    /// The last closed ledger each peer's latest position builds on, and when we received it.
    peer_prev_ledgers: HashMap<VerifyingKeyBytes, (CryptoHash, Instant)>,
}

impl<N: Network + 'static, S: NodeStore, P: TransactionProcessor, C: Clock> LedgerAdaptor<N, S, P, C> {
    pub(crate) fn new(
        config: AdaptorConfiguration,
        family: Arc<Family<S>>,
        history: Arc<RwLock<LedgerHistory<S>>>,
        last_closed: Arc<Ledger<S>>,
        validations: Validations,
        inbound: InboundLedgers<N, S>,
        processor: P,
        network: N,
        clock: C,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            config,
            family,
            history,
            open_view: OpenView::new(last_closed),
            validations,
            inbound,
            processor,
            sender: SenderHandle::new(network),
            clock,
            event_publisher,
            pending_persist: HashMap::new(),
            accepted: None,
            last_validation_time: NetTime::epoch(),
            tx_sets: HashMap::new(),
            requested_tx_sets: HashMap::new(),
            peer_prev_ledgers: HashMap::new(),
        }
    }

    /// Take the ledger built by the last round, if it has not been taken yet.
    pub(crate) fn take_accepted(&mut self) -> Option<Arc<Ledger<S>>> {
        self.accepted.take()
    }

    /// Add a transaction submitted to this replica to the open ledger, and relay it to peers.
    pub(crate) fn submit(&mut self, tx: Vec<u8>) {
        if let Some(txid) = self.open_view.submit(tx.clone()) {
            log::debug!("Submitted transaction {}", txid);
            self.sender.broadcast(ConsensusMessage::Transaction(tx));
        }
    }

    /// Add a transaction relayed by a peer to the open ledger.
    pub(crate) fn receive_transaction(&mut self, tx: Vec<u8>) {
        self.open_view.submit(tx);
    }

    /// Remember the last closed ledger a peer's position builds on.
    pub(crate) fn note_peer_ledger(&mut self, node_id: VerifyingKeyBytes, prev_ledger: CryptoHash) {
        self.peer_prev_ledgers
            .insert(node_id, (prev_ledger, self.clock.now()));
    }

    pub(crate) fn on_receive_validation(&mut self, origin: VerifyingKey, signed: SignedValidation) {
        let validation = signed.validation.clone();
        match self.validations.add(self.clock.net_now(), signed) {
            Ok(outcome) => {
                Event::ReceiveValidation(ReceiveValidationEvent {
                    timestamp: SystemTime::now(),
                    origin: origin.to_bytes(),
                    validation,
                    outcome,
                })
                .publish(&self.event_publisher);
                self.check_validated();
            }
            Err(err) => log::debug!(
                "Rejected validation of ledger {} from {:?}: {}",
                validation.ledger_hash,
                origin.to_bytes(),
                err
            ),
        }
    }

    pub(crate) fn on_tx_set_request(&mut self, origin: VerifyingKey, request: TxSetRequest) {
        let set = match self.tx_sets.get(&request.set_id) {
            Some(set) => set,
            None => return,
        };
        match set.transactions() {
            Ok(transactions) => self.sender.send(
                origin,
                TxSetResponse {
                    set_id: request.set_id,
                    transactions: transactions.into_iter().map(|(_, tx)| tx).collect(),
                },
            ),
            Err(err) => log::error!("Cannot read transaction set {}: {}", request.set_id, err),
        }
    }

    /// Rebuild a transaction set sent by a peer. Returns the set if it is one we asked for and its
    /// contents hash to its id.
    pub(crate) fn on_tx_set_response(&mut self, response: TxSetResponse) -> Option<TxSet<S>> {
        if self.requested_tx_sets.remove(&response.set_id).is_none() {
            return None;
        }
        let mut set = match TxSet::from_transactions(Arc::clone(&self.family), response.transactions) {
            Ok(set) => set,
            Err(err) => {
                log::debug!("Cannot rebuild transaction set {}: {}", response.set_id, err);
                return None;
            }
        };
        if set.id() != response.set_id {
            log::warn!(
                "Peer sent transaction set {} for {}",
                set.id(),
                response.set_id
            );
            return None;
        }
        set.freeze();
        self.tx_sets.insert(set.id(), set.clone());
        Some(set)
    }

    pub(crate) fn on_node_sync_response(&mut self, origin: VerifyingKey, response: NodeSyncResponse) {
        let acquired = self
            .inbound
            .on_response(origin, response, self.clock.now());
        if acquired.is_empty() {
            return;
        }
        {
            let mut history = self.history_mut();
            for ledger in acquired {
                history.insert(ledger);
            }
        }
        self.check_validated();
    }

    /// Retry stalled ledger acquisitions.
    pub(crate) fn tick(&mut self) {
        self.inbound.tick(self.clock.now());
    }

    /// Mark the newest fully validated ledger as validated in the history, along with its ancestors,
    /// and write the nodes of every ledger that became validated to the node store.
    fn check_validated(&mut self) {
        // 1. Find the newest ledger with a quorum of validations.
        let (hash, seq) = match self.validations.newest_fully_validated() {
            Some(newest) => newest,
            None => return,
        };
        if let Some(validated) = self.history().validated() {
            if validated.seq() >= seq {
                return;
            }
        }

        // 2. Get the ledger, if we do not have it.
        if !self.history().contains(&hash) {
            match self.inbound.acquire(hash, self.clock.now()) {
                Some(ledger) => {
                    self.history_mut().insert(ledger);
                }
                None => return,
            }
        }

        // 3. Mark it and its ancestors validated.
        let newly_validated = self.history_mut().set_validated(&hash);

        // 4. Persist the ledgers that became validated.
        for ledger_hash in newly_validated {
            let ledger_seq = match self.history().get(&ledger_hash) {
                Some(ledger) => ledger.seq(),
                None => continue,
            };
            log::debug!("Ledger {} ({}) is fully validated", ledger_hash, ledger_seq);
            Event::FullyValidated(FullyValidatedEvent {
                timestamp: SystemTime::now(),
                ledger: ledger_hash,
                seq: ledger_seq,
            })
            .publish(&self.event_publisher);

            // Ledgers acquired from peers were stored as they arrived.
            if let Some((_, objects)) = self.pending_persist.remove(&ledger_hash) {
                match self.family.db().store_batch(&objects) {
                    Ok(()) => Event::PersistLedger(PersistLedgerEvent {
                        timestamp: SystemTime::now(),
                        ledger: ledger_hash,
                        seq: ledger_seq,
                        objects: objects.len(),
                    })
                    .publish(&self.event_publisher),
                    Err(err) => log::error!("Cannot persist ledger {}: {}", ledger_hash, err),
                }
            }
        }

        // 5. Forget what can no longer matter.
        self.pending_persist
            .retain(|_, (pending_seq, _)| *pending_seq > seq);
        let pruned = self.history_mut().prune(self.config.history_keep);
        if pruned > 0 {
            log::debug!("Pruned {} ledgers from the history", pruned);
        }
        self.validations.prune_before(seq);
        self.validations.expire(self.clock.net_now());
        self.family.sweep();
    }

    /// Sign, record, and broadcast a validation of `ledger`.
    fn validate(&mut self, ledger: &Ledger<S>, full: bool) {
        // Sign times of a validator's validations must increase, and have one second resolution.
        let now = self.clock.net_now();
        let sign_time = if now > self.last_validation_time {
            now
        } else {
            self.last_validation_time + Duration::from_secs(1)
        };
        self.last_validation_time = sign_time;

        let validation = Validation::new(
            self.config.keypair.public().to_bytes(),
            self.config.network_id,
            ledger.hash(),
            ledger.seq(),
            sign_time,
            full,
        );
        let signed = validation.sign(&self.config.keypair);
        if let Err(err) = self.validations.add(now, signed.clone()) {
            log::error!("Own validation of ledger {} rejected: {}", ledger.hash(), err);
        }
        self.sender.broadcast(signed);

        Event::Validate(ValidateEvent {
            timestamp: SystemTime::now(),
            validation,
        })
        .publish(&self.event_publisher);
    }

    fn history(&self) -> std::sync::RwLockReadGuard<'_, LedgerHistory<S>> {
        self.history.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn history_mut(&self) -> std::sync::RwLockWriteGuard<'_, LedgerHistory<S>> {
        self.history.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<N: Network + 'static, S: NodeStore, P: TransactionProcessor, C: Clock> Adaptor<S>
    for LedgerAdaptor<N, S, P, C>
{
    fn acquire_ledger(&mut self, hash: &CryptoHash) -> Option<Arc<Ledger<S>>> {
        if let Some(ledger) = self.history().get(hash) {
            return Some(ledger);
        }
        let ledger = self.inbound.acquire(*hash, self.clock.now())?;
        self.history_mut().insert(Arc::clone(&ledger));
        Some(ledger)
    }

    fn acquire_tx_set(&mut self, set_id: &CryptoHash) -> Option<TxSet<S>> {
        if let Some(set) = self.tx_sets.get(set_id) {
            return Some(set.clone());
        }
        let now = self.clock.now();
        let request_due = self.requested_tx_sets.get(set_id).map_or(true, |requested| {
            now.saturating_duration_since(*requested) >= self.config.tx_set_request_interval
        });
        if request_due {
            log::debug!("Requesting transaction set {}", set_id);
            self.requested_tx_sets.insert(*set_id, now);
            self.sender.broadcast(TxSetRequest { set_id: *set_id });
        }
        None
    }

    fn has_open_transactions(&self) -> bool {
        !self.open_view.is_empty()
    }

    fn proposers_validated(&self, prev_ledger: &CryptoHash) -> usize {
        self.validations.get_nodes_after(prev_ledger)
    }

    fn proposers_finished(&self, prev_ledger: &CryptoHash) -> TotalPower {
        let validator_set = self.validations.validator_set();
        let mut power = TotalPower::new(0);
        for validator in self.validations.validators_after(prev_ledger) {
            power += validator_set.power_of_bytes(&validator);
        }
        power
    }

    fn get_prev_ledger(
        &mut self,
        prev_ledger_id: &CryptoHash,
        prev_ledger: &Arc<Ledger<S>>,
        mode: ConsensusMode,
    ) -> CryptoHash {
        // 1. Count the peers building on each ledger, including ourselves unless we know we are wrong.
        let now = self.clock.now();
        let freshness = self.config.peer_ledger_freshness;
        self.peer_prev_ledgers
            .retain(|_, (_, seen)| now.saturating_duration_since(*seen) < freshness);
        let mut peer_counts: HashMap<CryptoHash, usize> = HashMap::new();
        for (ledger, _) in self.peer_prev_ledgers.values() {
            *peer_counts.entry(*ledger).or_insert(0) += 1;
        }
        if mode != ConsensusMode::WrongLedger {
            *peer_counts.entry(*prev_ledger_id).or_insert(0) += 1;
        }

        // 2. Let the validations decide, allowing one ledger of slip behind the ledger we build on.
        let (prior, cutoff) = if prev_ledger.hash() == *prev_ledger_id {
            (
                prev_ledger.parent_hash(),
                LedgerSeq::new(prev_ledger.seq().int().saturating_sub(1)),
            )
        } else {
            (CryptoHash::zero(), LedgerSeq::genesis())
        };
        self.validations.get_preferred_ledger(
            self.clock.net_now(),
            prev_ledger_id,
            &prior,
            cutoff,
            &peer_counts,
        )
    }

    fn on_close(
        &mut self,
        prev_ledger: &Arc<Ledger<S>>,
        close_time: NetTime,
        mode: ConsensusMode,
    ) -> Result<TxSet<S>, ConsensusError> {
        if self.open_view.parent().hash() != prev_ledger.hash() {
            self.open_view.advance(Arc::clone(prev_ledger))?;
        }
        let set = TxSet::from_transactions(
            Arc::clone(&self.family),
            self.open_view.transactions().map(|(_, tx)| tx.clone()),
        )?;
        log::debug!(
            "Closed ledger {} at {} with {} transactions ({})",
            prev_ledger.seq().next(),
            close_time,
            self.open_view.len(),
            mode
        );
        Ok(set)
    }

    fn on_accept(
        &mut self,
        result: ConsensusResult<S>,
        prev_ledger: &Arc<Ledger<S>>,
        mode: ConsensusMode,
    ) -> Result<(), ConsensusError> {
        // 1. Build the ledger.
        let set_id = result.tx_set.id();
        let transactions = result.tx_set.transactions()?;
        let (mut built, report) = build_ledger(
            prev_ledger,
            transactions,
            &set_id,
            result.close_times.close_time,
            result.close_times.resolution,
            result.close_times.agreed,
            &mut self.processor,
        )?;

        Event::AcceptLedger(AcceptLedgerEvent {
            timestamp: SystemTime::now(),
            ledger: built.hash(),
            seq: built.seq(),
            tx_set: set_id,
            close_time: built.close_time(),
            applied: report.applied.len(),
            failed: report.failed.len(),
        })
        .publish(&self.event_publisher);

        // 2. Keep the new nodes until the ledger is fully validated.
        let objects = built.flush_dirty()?;
        let ledger = Arc::new(built);
        self.pending_persist
            .insert(ledger.hash(), (ledger.seq(), objects));

        // 3. Validate the ledger, if we are a validator and the round reached consensus.
        let validating = self
            .validations
            .validator_set()
            .contains(&self.config.keypair.public());
        if validating && !result.consensus_fail {
            self.validate(&ledger, mode == ConsensusMode::Proposing);
        }

        // 4. Make it the last closed ledger.
        self.history_mut().set_last_closed(Arc::clone(&ledger));

        // 5. Move the open ledger on top of it. Transactions that failed will never apply.
        self.open_view.advance(Arc::clone(&ledger))?;
        for txid in &report.failed {
            self.open_view.remove(txid);
        }

        self.tx_sets.clear();
        self.requested_tx_sets.clear();
        self.accepted = Some(ledger);
        self.check_validated();
        Ok(())
    }

    fn propose(&mut self, proposal: &SignedProposal) {
        self.sender.broadcast(proposal.clone());
    }

    fn share_tx_set(&mut self, tx_set: &TxSet<S>) {
        self.tx_sets.insert(tx_set.id(), tx_set.clone());
    }

    fn share_dispute(&mut self, dispute: &DisputedTx) {
        self.sender
            .broadcast(ConsensusMessage::Transaction(dispute.tx().to_vec()));
    }

    fn on_mode_change(&mut self, before: ConsensusMode, after: ConsensusMode) {
        log::debug!("Consensus mode changed from {} to {}", before, after);
    }
}

/// The algorithm thread's state: the consensus engine (which owns the adaptor), and the receiving
/// ends of its inputs.
pub(crate) struct Algorithm<N: Network + 'static, S: NodeStore, P: TransactionProcessor, C: Clock + 'static> {
    consensus: Consensus<S, LedgerAdaptor<N, S, P, C>, C>,
    consensus_msg_stub: ConsensusMessageStub,
    sync_client_stub: NodeSyncClientStub,
    submissions: Receiver<Vec<u8>>,
    timer_interval: Duration,
    shutdown_signal: Receiver<()>,
}

impl<N: Network + 'static, S: NodeStore, P: TransactionProcessor, C: Clock + 'static>
    Algorithm<N, S, P, C>
{
    pub(crate) fn new(
        consensus: Consensus<S, LedgerAdaptor<N, S, P, C>, C>,
        consensus_msg_stub: ConsensusMessageStub,
        sync_client_stub: NodeSyncClientStub,
        submissions: Receiver<Vec<u8>>,
        timer_interval: Duration,
        shutdown_signal: Receiver<()>,
    ) -> Self {
        Self {
            consensus,
            consensus_msg_stub,
            sync_client_stub,
            submissions,
            timer_interval,
            shutdown_signal,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || {
            let last_closed = Arc::clone(self.consensus.previous_ledger());
            let now = self.consensus.clock().net_now();
            let result =
                self.consensus
                    .start_round(now, last_closed.hash(), last_closed, ConsensusMode::Proposing);
            self.handle_result(result);

            let mut next_tick = Instant::now() + self.timer_interval;
            loop {
                match self.shutdown_signal.try_recv() {
                    Ok(()) => return,
                    Err(TryRecvError::Empty) => (),
                    Err(TryRecvError::Disconnected) => {
                        panic!("Algorithm thread disconnected from main thread")
                    }
                }

                // 1. Take in submitted transactions.
                while let Ok(tx) = self.submissions.try_recv() {
                    self.consensus.adaptor_mut().submit(tx);
                }

                // 2. Process a consensus message, if one arrives soon.
                let deadline = min(next_tick, Instant::now() + POLL_INTERVAL);
                match self.consensus_msg_stub.recv(deadline) {
                    Ok((origin, msg)) => self.on_receive_consensus_message(origin, msg),
                    Err(ConsensusMessageReceiveError::Timeout) => (),
                    Err(ConsensusMessageReceiveError::Disconnected) => {
                        panic!("Algorithm thread disconnected from the poller")
                    }
                }

                // 3. Process node sync responses.
                loop {
                    match self.sync_client_stub.recv_response() {
                        Ok((origin, response)) => self
                            .consensus
                            .adaptor_mut()
                            .on_node_sync_response(origin, response),
                        Err(NodeSyncResponseReceiveError::NotAvailable) => break,
                        Err(NodeSyncResponseReceiveError::Disconnected) => {
                            panic!("Algorithm thread disconnected from the poller")
                        }
                    }
                }

                // 4. Drive the round forward.
                if Instant::now() >= next_tick {
                    next_tick = Instant::now() + self.timer_interval;
                    self.consensus.adaptor_mut().tick();
                    let now = self.consensus.clock().net_now();
                    let result = self.consensus.timer_entry(now);
                    self.handle_result(result);
                }

                // 5. Start the next round once a ledger has been accepted.
                if self.consensus.phase() == ConsensusPhase::Accepted {
                    if let Some(ledger) = self.consensus.adaptor_mut().take_accepted() {
                        let now = self.consensus.clock().net_now();
                        let result = self.consensus.start_round(
                            now,
                            ledger.hash(),
                            ledger,
                            ConsensusMode::Proposing,
                        );
                        self.handle_result(result);
                    }
                }

                thread::yield_now();
            }
        })
    }

    fn on_receive_consensus_message(&mut self, origin: VerifyingKey, msg: ConsensusMessage) {
        let now = self.consensus.clock().net_now();
        match msg {
            ConsensusMessage::Position(signed) => {
                let node_id = signed.proposal.node_id;
                let prev_ledger = signed.proposal.prev_ledger;
                let result = self.consensus.receive_peer_position(now, signed);
                match result {
                    Ok(PeerPositionOutcome::Accepted) | Ok(PeerPositionOutcome::Ignored) => self
                        .consensus
                        .adaptor_mut()
                        .note_peer_ledger(node_id, prev_ledger),
                    Ok(_) => (),
                    Err(err) => self.handle_result(Err(err)),
                }
            }
            ConsensusMessage::Validation(signed) => self
                .consensus
                .adaptor_mut()
                .on_receive_validation(origin, signed),
            ConsensusMessage::Transaction(tx) => {
                self.consensus.adaptor_mut().receive_transaction(tx)
            }
            ConsensusMessage::TxSetRequest(request) => self
                .consensus
                .adaptor_mut()
                .on_tx_set_request(origin, request),
            ConsensusMessage::TxSetResponse(response) => {
                if let Some(set) = self.consensus.adaptor_mut().on_tx_set_response(response) {
                    let result = self.consensus.got_tx_set(now, set);
                    self.handle_result(result);
                }
            }
        }
    }

    /// Errors out of the engine are logged by the engine, which also stops proposing for the round. A
    /// node of our own that no longer hashes to its hash means our memory or our store is corrupt, and
    /// is fatal. If the engine was building a ledger when the error happened, the round is started over.
    fn handle_result(&mut self, result: Result<(), ConsensusError>) {
        let err = match result {
            Ok(()) => return,
            Err(err) => err,
        };
        if err.is_hash_mismatch() {
            log::error!("Local data is corrupt: {}", err);
            panic!("Local data is corrupt: {}", err)
        }

        if self.consensus.phase() == ConsensusPhase::Accepted {
            let previous = Arc::clone(self.consensus.previous_ledger());
            log::warn!("Restarting round on ledger {} after: {}", previous.hash(), err);
            let now = self.consensus.clock().net_now();
            if let Err(err) =
                self.consensus
                    .start_round(now, previous.hash(), previous, ConsensusMode::Proposing)
            {
                log::error!("Cannot restart round: {}", err);
            }
        }
    }
}
