use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use log::LevelFilter;
use shamap_consensus::{
    consensus::{
        disputed_tx::DisputedTx,
        types::{ConsensusResult, PeerPositionOutcome},
        Adaptor, Clock, Consensus, ConsensusConfiguration, ConsensusError, ConsensusMode, ConsensusParams,
        ConsensusPhase, Proposal, SignedProposal, TimeoutPolicy, TxSet,
    },
    ledger::{build_ledger, BuildReport, Ledger},
    shamap::{Family, SHAMapItem},
    types::{
        crypto_primitives::Keypair,
        data_types::{CryptoHash, LedgerSeq, NetTime, NetworkID, TotalPower},
        validator_set::ValidatorSet,
    },
};

mod common;

use crate::common::{
    clock::ManualClock,
    keys::{keypairs, signing_keys, validator_set},
    kv_processor::{key, put_tx, KvProcessor},
    logging::setup_logger,
    mem_db::MemDB,
};

const NETWORK: NetworkID = NetworkID::new(7);

const KEYS_SEED: u64 = 21;

/// Close time of every position in these tests, and the time the rounds start at.
fn start_time() -> NetTime {
    NetTime::new(1_000_000)
}

/// `start_time` rounded to the 30 second resolution of the first ledgers.
fn rounded_start_time() -> NetTime {
    NetTime::new(999_990)
}

/// An adaptor that takes transaction sets from a fixed map, builds ledgers with [`KvProcessor`], and
/// records everything the engine asks it to send.
struct TestAdaptor {
    family: Arc<Family<MemDB>>,
    open_transactions: Vec<Vec<u8>>,
    known_sets: HashMap<CryptoHash, TxSet<MemDB>>,
    proposals: Vec<SignedProposal>,
    shared_sets: Vec<CryptoHash>,
    shared_disputes: Vec<CryptoHash>,
    mode_changes: Vec<(ConsensusMode, ConsensusMode)>,
    accepted: Option<Accepted>,
}

struct Accepted {
    ledger: Ledger<MemDB>,
    report: BuildReport,
    close_time: NetTime,
    close_time_agreed: bool,
    proposers: usize,
    consensus_fail: bool,
    simulated: bool,
}

impl TestAdaptor {
    fn new(
        family: &Arc<Family<MemDB>>,
        open_transactions: Vec<Vec<u8>>,
        known_sets: &[&TxSet<MemDB>],
    ) -> TestAdaptor {
        TestAdaptor {
            family: Arc::clone(family),
            open_transactions,
            known_sets: known_sets
                .iter()
                .map(|set| (set.id(), (*set).clone()))
                .collect(),
            proposals: Vec::new(),
            shared_sets: Vec::new(),
            shared_disputes: Vec::new(),
            mode_changes: Vec::new(),
            accepted: None,
        }
    }
}

impl Adaptor<MemDB> for TestAdaptor {
    fn acquire_ledger(&mut self, _hash: &CryptoHash) -> Option<Arc<Ledger<MemDB>>> {
        None
    }

    fn acquire_tx_set(&mut self, set_id: &CryptoHash) -> Option<TxSet<MemDB>> {
        self.known_sets.get(set_id).cloned()
    }

    fn has_open_transactions(&self) -> bool {
        !self.open_transactions.is_empty()
    }

    fn proposers_validated(&self, _prev_ledger: &CryptoHash) -> usize {
        0
    }

    fn proposers_finished(&self, _prev_ledger: &CryptoHash) -> TotalPower {
        TotalPower::new(0)
    }

    fn get_prev_ledger(
        &mut self,
        prev_ledger_id: &CryptoHash,
        _prev_ledger: &Arc<Ledger<MemDB>>,
        _mode: ConsensusMode,
    ) -> CryptoHash {
        *prev_ledger_id
    }

    fn on_close(
        &mut self,
        _prev_ledger: &Arc<Ledger<MemDB>>,
        _close_time: NetTime,
        _mode: ConsensusMode,
    ) -> Result<TxSet<MemDB>, ConsensusError> {
        Ok(TxSet::from_transactions(
            Arc::clone(&self.family),
            self.open_transactions.clone(),
        )?)
    }

    fn on_accept(
        &mut self,
        result: ConsensusResult<MemDB>,
        prev_ledger: &Arc<Ledger<MemDB>>,
        _mode: ConsensusMode,
    ) -> Result<(), ConsensusError> {
        let (ledger, report) = build_ledger(
            prev_ledger,
            result.tx_set.transactions()?,
            &result.tx_set.id(),
            result.close_times.close_time,
            result.close_times.resolution,
            result.close_times.agreed,
            &mut KvProcessor,
        )?;
        self.accepted = Some(Accepted {
            ledger,
            report,
            close_time: result.close_times.close_time,
            close_time_agreed: result.close_times.agreed,
            proposers: result.proposers,
            consensus_fail: result.consensus_fail,
            simulated: result.simulated,
        });
        Ok(())
    }

    fn propose(&mut self, proposal: &SignedProposal) {
        self.proposals.push(proposal.clone());
    }

    fn share_tx_set(&mut self, tx_set: &TxSet<MemDB>) {
        self.shared_sets.push(tx_set.id());
    }

    fn share_dispute(&mut self, dispute: &DisputedTx) {
        self.shared_disputes.push(*dispute.txid());
    }

    fn on_mode_change(&mut self, before: ConsensusMode, after: ConsensusMode) {
        self.mode_changes.push((before, after));
    }
}

type TestConsensus = Consensus<MemDB, TestAdaptor, ManualClock>;

/// Everything a test needs to run rounds among 3 validators of power 1 on top of a shared genesis ledger.
struct Setup {
    family: Arc<Family<MemDB>>,
    keypairs: Vec<Keypair>,
    validator_set: ValidatorSet,
    genesis: Arc<Ledger<MemDB>>,
    clock: ManualClock,
}

fn setup() -> Setup {
    let family = Arc::new(Family::new(MemDB::new()));
    let genesis = Ledger::genesis(
        Arc::clone(&family),
        1_000_000,
        vec![SHAMapItem::new(key(1), b"one".to_vec())],
    )
    .unwrap();
    Setup {
        keypairs: keypairs(3, KEYS_SEED),
        validator_set: validator_set(&signing_keys(3, KEYS_SEED)),
        genesis: Arc::new(genesis),
        clock: ManualClock::new(start_time()),
        family,
    }
}

impl Setup {
    fn tx_set(&self, transactions: &[Vec<u8>]) -> TxSet<MemDB> {
        TxSet::from_transactions(Arc::clone(&self.family), transactions.to_vec()).unwrap()
    }

    /// An engine for validator `index` whose adaptor closes `open_transactions` and knows `known_sets`.
    fn engine(
        &self,
        index: usize,
        open_transactions: Vec<Vec<u8>>,
        known_sets: &[&TxSet<MemDB>],
    ) -> TestConsensus {
        self.engine_with_policy(
            index,
            open_transactions,
            known_sets,
            TimeoutPolicy::ExtendDeliberation,
        )
    }

    fn engine_with_policy(
        &self,
        index: usize,
        open_transactions: Vec<Vec<u8>>,
        known_sets: &[&TxSet<MemDB>],
        timeout_policy: TimeoutPolicy,
    ) -> TestConsensus {
        let config = ConsensusConfiguration {
            keypair: self.keypairs[index].clone(),
            network_id: NETWORK,
            validator_set: self.validator_set.clone(),
            params: ConsensusParams::default(),
            timeout_policy,
        };
        let adaptor = TestAdaptor::new(&self.family, open_transactions, known_sets);
        Consensus::new(
            config,
            adaptor,
            self.clock.clone(),
            Arc::clone(&self.genesis),
            None,
        )
    }

    fn start(&self, engine: &mut TestConsensus) {
        engine
            .start_round(
                self.clock.net_now(),
                self.genesis.hash(),
                Arc::clone(&self.genesis),
                ConsensusMode::Proposing,
            )
            .unwrap();
    }

    /// The initial position of validator `index` on the ledger after genesis.
    fn proposal(&self, index: usize, position: CryptoHash) -> Proposal {
        Proposal::new(
            self.keypairs[index].public().to_bytes(),
            NETWORK,
            self.genesis.hash(),
            LedgerSeq::genesis().next(),
            position,
            start_time(),
            start_time(),
        )
    }
}

fn drain_proposals(engine: &mut TestConsensus) -> Vec<SignedProposal> {
    engine.adaptor_mut().proposals.drain(..).collect()
}

#[test]
fn three_validators_converge_test() {
    setup_logger(LevelFilter::Info);
    let setup = setup();
    let ours = vec![put_tx(2, b"two"), put_tx(4, b"four")];
    let mut theirs = ours.clone();
    theirs.push(put_tx(5, b"five"));
    let our_set = setup.tx_set(&ours);
    let their_set = setup.tx_set(&theirs);

    // 1. Validator 0 is the engine under test. Validator 1 agrees with it, validator 2 has an extra
    //    transaction.
    let mut engine = setup.engine(0, ours, &[&our_set, &their_set]);
    setup.start(&mut engine);
    assert_eq!(engine.phase(), ConsensusPhase::Open);
    assert_eq!(
        engine.adaptor().mode_changes,
        vec![(ConsensusMode::Observing, ConsensusMode::Proposing)]
    );

    let agreeing = setup.proposal(1, our_set.id()).sign(&setup.keypairs[1]);
    let disagreeing = setup.proposal(2, their_set.id());
    let now = setup.clock.net_now();
    assert_eq!(
        engine.receive_peer_position(now, agreeing).unwrap(),
        PeerPositionOutcome::Accepted
    );
    assert_eq!(
        engine
            .receive_peer_position(now, disagreeing.sign(&setup.keypairs[2]))
            .unwrap(),
        PeerPositionOutcome::Accepted
    );

    // 2. Peers have closed, so we close as well and take our initial position. The extra transaction is
    //    disputed, and we vote against it.
    engine.timer_entry(now).unwrap();
    assert_eq!(engine.phase(), ConsensusPhase::Establish);
    assert_eq!(engine.our_position().unwrap().position, our_set.id());
    assert_eq!(engine.disputes().len(), 1);
    let dispute = engine.disputes().values().next().unwrap();
    assert!(!dispute.our_vote());
    assert_eq!((dispute.yays(), dispute.nays()), (1, 1));
    assert_eq!(engine.adaptor().shared_disputes.len(), 1);
    let proposals = drain_proposals(&mut engine);
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].proposal.position, our_set.id());

    // 3. Nothing happens before the minimum consensus time.
    setup.clock.advance(Duration::from_secs(1));
    engine.timer_entry(setup.clock.net_now()).unwrap();
    assert_eq!(engine.phase(), ConsensusPhase::Establish);
    assert!(engine.adaptor().proposals.is_empty());

    // 4. After it, we agree with everyone on the rounded close time, but only 2 of 3 agree on the set.
    setup.clock.advance(Duration::from_secs(2));
    let now = setup.clock.net_now();
    engine.timer_entry(now).unwrap();
    assert_eq!(engine.phase(), ConsensusPhase::Establish);
    assert!(engine.have_close_time_consensus());
    let position = engine.our_position().unwrap();
    assert_eq!(position.close_time, rounded_start_time());
    assert_eq!(position.propose_seq.int(), 1);
    assert_eq!(drain_proposals(&mut engine).len(), 1);

    // 5. Validator 2 drops the extra transaction. Now everyone agrees.
    let mut changed = disagreeing;
    assert!(changed.change_position(our_set.id(), start_time(), now));
    assert_eq!(
        engine
            .receive_peer_position(now, changed.sign(&setup.keypairs[2]))
            .unwrap(),
        PeerPositionOutcome::Accepted
    );
    let dispute = engine.disputes().values().next().unwrap();
    assert_eq!((dispute.yays(), dispute.nays()), (0, 2));

    engine.timer_entry(now).unwrap();
    assert_eq!(engine.phase(), ConsensusPhase::Accepted);
    assert_eq!(engine.previous_proposers(), 2);
    assert_eq!(engine.previous_round_time(), Duration::from_secs(3));

    // 6. Check the ledger the adaptor built.
    let accepted = engine.adaptor().accepted.as_ref().unwrap();
    assert!(accepted.close_time_agreed);
    assert!(!accepted.consensus_fail);
    assert!(!accepted.simulated);
    assert_eq!(accepted.proposers, 2);
    assert_eq!(accepted.close_time, rounded_start_time());
    assert_eq!(accepted.report.applied.len(), 2);
    assert_eq!(accepted.ledger.seq(), LedgerSeq::genesis().next());
    assert_eq!(accepted.ledger.parent_hash(), setup.genesis.hash());
    assert_eq!(accepted.ledger.close_time(), rounded_start_time());
    assert_eq!(accepted.ledger.info().tx_hash, accepted.ledger.tx_map().hash());

    let delta = setup
        .genesis
        .state_map()
        .compare(accepted.ledger.state_map(), usize::MAX)
        .unwrap();
    let changed_keys: BTreeSet<CryptoHash> = delta.items.keys().copied().collect();
    assert_eq!(changed_keys, BTreeSet::from([key(2), key(4)]));
}

#[test]
fn engines_change_votes_to_converge_test() {
    setup_logger(LevelFilter::Info);
    let setup = setup();
    let short = vec![put_tx(2, b"two")];
    let long = vec![put_tx(2, b"two"), put_tx(4, b"four")];
    let short_set = setup.tx_set(&short);
    let long_set = setup.tx_set(&long);
    let known = [&short_set, &long_set];

    // 1. Two engines start from different sets. A third validator proposes the longer one.
    let mut first = setup.engine(0, short, &known);
    let mut second = setup.engine(1, long, &known);
    setup.start(&mut first);
    setup.start(&mut second);

    let now = setup.clock.net_now();
    let third = setup.proposal(2, long_set.id()).sign(&setup.keypairs[2]);
    first.receive_peer_position(now, third.clone()).unwrap();
    second.receive_peer_position(now, third).unwrap();

    // 2. Both close, and see each other's initial positions.
    first.timer_entry(now).unwrap();
    second.timer_entry(now).unwrap();
    for proposal in drain_proposals(&mut first) {
        second.receive_peer_position(now, proposal).unwrap();
    }
    for proposal in drain_proposals(&mut second) {
        first.receive_peer_position(now, proposal).unwrap();
    }
    assert_eq!(first.disputes().len(), 1);
    assert_eq!(second.disputes().len(), 1);

    // 3. Two peers against one: the first engine starts voting for the transaction, and now agrees with
    //    everyone.
    setup.clock.advance(Duration::from_secs(3));
    let now = setup.clock.net_now();
    first.timer_entry(now).unwrap();
    second.timer_entry(now).unwrap();
    assert_eq!(first.phase(), ConsensusPhase::Accepted);
    assert_eq!(first.our_set().unwrap().id(), long_set.id());
    assert_eq!(second.phase(), ConsensusPhase::Establish);

    // 4. The second engine agrees once it hears of the first's new position.
    for proposal in drain_proposals(&mut first) {
        second.receive_peer_position(now, proposal).unwrap();
    }
    second.timer_entry(now).unwrap();
    assert_eq!(second.phase(), ConsensusPhase::Accepted);

    // 5. Both built the same ledger.
    let first_ledger = &first.adaptor().accepted.as_ref().unwrap().ledger;
    let second_ledger = &second.adaptor().accepted.as_ref().unwrap().ledger;
    assert_eq!(first_ledger.hash(), second_ledger.hash());
    assert_eq!(first_ledger.close_time(), rounded_start_time());
    assert_eq!(first_ledger.read(&key(4)).unwrap().unwrap().data(), b"four");
}

/// Drive validator 0 for up to 200 seconds, in 5 second steps, against two peers that keep proposing a
/// set it cannot acquire. Stops early if the round is accepted.
fn run_against_unacquirable_set(policy: TimeoutPolicy) -> TestConsensus {
    let setup = setup();
    let ours = vec![put_tx(2, b"two")];
    let mut theirs = ours.clone();
    theirs.push(put_tx(5, b"five"));
    let our_set = setup.tx_set(&ours);
    let their_set = setup.tx_set(&theirs);

    let mut engine = setup.engine_with_policy(0, ours, &[&our_set], policy);
    setup.start(&mut engine);

    let mut peers: Vec<Proposal> = (1..3)
        .map(|index| setup.proposal(index, their_set.id()))
        .collect();
    let now = setup.clock.net_now();
    for (offset, peer) in peers.iter().enumerate() {
        let signed = peer.sign(&setup.keypairs[offset + 1]);
        engine.receive_peer_position(now, signed).unwrap();
    }
    engine.timer_entry(now).unwrap();
    assert_eq!(engine.phase(), ConsensusPhase::Establish);

    for _ in 0..40 {
        setup.clock.advance(Duration::from_secs(5));
        let now = setup.clock.net_now();
        // The peers keep their positions fresh.
        for (offset, peer) in peers.iter_mut().enumerate() {
            assert!(peer.change_position(their_set.id(), start_time(), now));
            let signed = peer.sign(&setup.keypairs[offset + 1]);
            engine.receive_peer_position(now, signed).unwrap();
        }
        engine.timer_entry(now).unwrap();
        if engine.phase() == ConsensusPhase::Accepted {
            break;
        }
    }
    engine
}

#[test]
fn expired_round_keeps_deliberating_test() {
    setup_logger(LevelFilter::Info);
    let engine = run_against_unacquirable_set(TimeoutPolicy::ExtendDeliberation);

    // The round outlived every abandon deadline, but nothing was accepted and we still propose.
    assert_eq!(engine.phase(), ConsensusPhase::Establish);
    assert!(engine.adaptor().accepted.is_none());
    assert!(engine.is_proposing());
    assert_eq!(engine.mode(), ConsensusMode::Proposing);
}

#[test]
fn expired_round_force_accepts_test() {
    setup_logger(LevelFilter::Info);
    let mut engine = run_against_unacquirable_set(TimeoutPolicy::ForceAccept);

    // 1. The round was accepted as a failed consensus round.
    assert_eq!(engine.phase(), ConsensusPhase::Accepted);
    let accepted = engine.adaptor().accepted.as_ref().unwrap();
    assert!(accepted.consensus_fail);
    assert!(!accepted.simulated);

    // 2. No peer set could be acquired, so the ledger was built from our own set.
    assert_eq!(accepted.ledger.read(&key(2)).unwrap().unwrap().data(), b"two");
    assert!(accepted.ledger.read(&key(5)).unwrap().is_none());

    // 3. We left consensus on the way out, bowing out of the round.
    assert_eq!(engine.mode(), ConsensusMode::Observing);
    let last = drain_proposals(&mut engine).pop().unwrap();
    assert!(last.proposal.is_bow_out());
}

#[test]
fn receive_peer_position_rejects_test() {
    setup_logger(LevelFilter::Info);
    let setup = setup();
    let set = setup.tx_set(&[put_tx(2, b"two")]);
    let mut engine = setup.engine(0, vec![put_tx(2, b"two")], &[&set]);
    setup.start(&mut engine);
    let now = setup.clock.net_now();

    // 1. Proposals for another network.
    let mut wrong_network = setup.proposal(1, set.id());
    wrong_network.network_id = NetworkID::new(8);
    assert_eq!(
        engine
            .receive_peer_position(now, wrong_network.sign(&setup.keypairs[1]))
            .unwrap(),
        PeerPositionOutcome::WrongNetwork
    );

    // 2. Proposals from outside the validator set.
    let strangers = keypairs(1, 99);
    let mut stranger = setup.proposal(1, set.id());
    stranger.node_id = strangers[0].public().to_bytes();
    assert_eq!(
        engine
            .receive_peer_position(now, stranger.sign(&strangers[0]))
            .unwrap(),
        PeerPositionOutcome::UnknownValidator
    );

    // 3. Proposals whose signature does not match their contents.
    let mut forged = setup.proposal(1, set.id()).sign(&setup.keypairs[1]);
    forged.proposal.position = CryptoHash::new([1; 32]);
    assert_eq!(
        engine.receive_peer_position(now, forged).unwrap(),
        PeerPositionOutcome::InvalidSignature
    );

    // 4. Our own proposals, proposals for another ledger, and proposals that are not newer.
    let own = setup.proposal(0, set.id()).sign(&setup.keypairs[0]);
    assert_eq!(
        engine.receive_peer_position(now, own).unwrap(),
        PeerPositionOutcome::Ignored
    );
    let mut other_ledger = setup.proposal(1, set.id());
    other_ledger.prev_ledger = CryptoHash::new([2; 32]);
    assert_eq!(
        engine
            .receive_peer_position(now, other_ledger.sign(&setup.keypairs[1]))
            .unwrap(),
        PeerPositionOutcome::Ignored
    );

    let initial = setup.proposal(1, set.id()).sign(&setup.keypairs[1]);
    assert_eq!(
        engine.receive_peer_position(now, initial.clone()).unwrap(),
        PeerPositionOutcome::Accepted
    );
    assert_eq!(
        engine.receive_peer_position(now, initial).unwrap(),
        PeerPositionOutcome::Ignored
    );
    assert_eq!(engine.peer_positions().len(), 1);
}

#[test]
fn bow_out_test() {
    setup_logger(LevelFilter::Info);
    let setup = setup();
    let set = setup.tx_set(&[put_tx(2, b"two")]);
    let mut engine = setup.engine(0, vec![put_tx(2, b"two")], &[&set]);
    setup.start(&mut engine);
    let now = setup.clock.net_now();

    // 1. A peer that bows out loses its position, and is ignored for the rest of the round.
    let mut peer = setup.proposal(1, set.id());
    engine
        .receive_peer_position(now, peer.sign(&setup.keypairs[1]))
        .unwrap();
    assert_eq!(engine.peer_positions().len(), 1);

    peer.bow_out(now);
    assert_eq!(
        engine
            .receive_peer_position(now, peer.sign(&setup.keypairs[1]))
            .unwrap(),
        PeerPositionOutcome::Accepted
    );
    assert!(engine.peer_positions().is_empty());

    let mut comeback = setup.proposal(1, set.id());
    comeback.change_position(set.id(), start_time(), now);
    assert_eq!(
        engine
            .receive_peer_position(now, comeback.sign(&setup.keypairs[1]))
            .unwrap(),
        PeerPositionOutcome::Ignored
    );

    // 2. When we leave consensus after taking a position, we announce a bow-out and stop proposing.
    engine.timer_entry(now).unwrap();
    assert_eq!(engine.phase(), ConsensusPhase::Establish);
    drain_proposals(&mut engine);
    engine.leave_consensus();
    assert!(!engine.is_proposing());
    assert_eq!(engine.mode(), ConsensusMode::Observing);
    let proposals = drain_proposals(&mut engine);
    assert_eq!(proposals.len(), 1);
    assert!(proposals[0].proposal.is_bow_out());
}

#[test]
fn simulate_test() {
    setup_logger(LevelFilter::Info);
    let setup = setup();
    let mut engine = setup.engine(0, vec![put_tx(2, b"two")], &[]);
    setup.start(&mut engine);

    // A standalone engine closes and accepts its own position right away.
    engine.simulate(setup.clock.net_now(), None).unwrap();
    assert_eq!(engine.phase(), ConsensusPhase::Accepted);
    assert_eq!(engine.adaptor().shared_sets.len(), 1);

    let accepted = engine.adaptor().accepted.as_ref().unwrap();
    assert!(accepted.simulated);
    assert!(accepted.close_time_agreed);
    assert_eq!(accepted.proposers, 0);
    assert_eq!(accepted.close_time, rounded_start_time());
    assert_eq!(accepted.ledger.read(&key(2)).unwrap().unwrap().data(), b"two");
}

#[test]
fn observer_does_not_propose_test() {
    setup_logger(LevelFilter::Info);
    let setup = setup();
    let set = setup.tx_set(&[put_tx(2, b"two")]);

    // An engine whose key is not in the validator set only observes, even if asked to propose.
    let mut engine = Consensus::new(
        ConsensusConfiguration {
            keypair: keypairs(1, 99).remove(0),
            network_id: NETWORK,
            validator_set: setup.validator_set.clone(),
            params: ConsensusParams::default(),
            timeout_policy: TimeoutPolicy::ExtendDeliberation,
        },
        TestAdaptor::new(&setup.family, vec![put_tx(2, b"two")], &[&set]),
        setup.clock.clone(),
        Arc::clone(&setup.genesis),
        None,
    );
    assert!(!engine.is_validating());
    setup.start(&mut engine);
    assert_eq!(engine.mode(), ConsensusMode::Observing);

    let now = setup.clock.net_now();
    for index in 0..3 {
        engine
            .receive_peer_position(now, setup.proposal(index, set.id()).sign(&setup.keypairs[index]))
            .unwrap();
    }
    engine.timer_entry(now).unwrap();
    setup.clock.advance(Duration::from_secs(3));
    engine.timer_entry(setup.clock.net_now()).unwrap();

    assert_eq!(engine.phase(), ConsensusPhase::Accepted);
    assert!(engine.adaptor().proposals.is_empty());
    assert_eq!(engine.adaptor().accepted.as_ref().unwrap().proposers, 3);
}
