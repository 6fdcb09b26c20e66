use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use ed25519_dalek::SigningKey;
use shamap_consensus::{
    consensus::{ConsensusParams, SystemClock},
    events::{AcceptLedgerEvent, FullyValidatedEvent, PersistLedgerEvent},
    ledger::LedgerError,
    replica::{Configuration, Replica, ReplicaSpec},
    shamap::SHAMapItem,
    types::{
        data_types::{CryptoHash, LedgerSeq, NetworkID, VerifyingKeyBytes},
        validator_set::ValidatorSet,
    },
};

use crate::common::{kv_processor::KvProcessor, mem_db::MemDB, network::NetworkStub};

use super::logging::short_id;

/// Things the Nodes will have in common:
/// - Validator Set.
/// - Configuration.
/// - Genesis ledger.
///
/// Things that they will differ in:
/// - Network instance.
/// - NodeStore.
/// - Keypair.
pub(crate) struct Node {
    node_store: MemDB,
    persisted: Arc<Mutex<Vec<(CryptoHash, LedgerSeq)>>>,
    replica: Replica<MemDB>,
}

impl Node {
    pub(crate) fn new(
        keypair: SigningKey,
        network: NetworkStub,
        validator_set: ValidatorSet,
        genesis_accounts: Vec<SHAMapItem>,
    ) -> Node {
        let node_store = MemDB::new();
        let genesis = Replica::initialize(node_store.clone(), 1_000_000, genesis_accounts).unwrap();
        Node::start(keypair, network, validator_set, node_store, genesis).unwrap()
    }

    /// Start a replica on a store that already holds the `genesis` ledger.
    pub(crate) fn start(
        keypair: SigningKey,
        network: NetworkStub,
        validator_set: ValidatorSet,
        node_store: MemDB,
        genesis: CryptoHash,
    ) -> Result<Node, LedgerError> {
        let verifying_key = keypair.verifying_key().to_bytes();
        let persisted = Arc::new(Mutex::new(Vec::new()));

        let configuration = Configuration::builder()
            .me(keypair)
            .network_id(NetworkID::new(7))
            .validator_set(validator_set)
            .consensus_params(fast_consensus_params())
            .timer_interval(Duration::from_millis(100))
            .acquire_timeout(Duration::from_millis(500))
            .log_events(false)
            .build();

        let replica = ReplicaSpec::builder()
            .network(network)
            .node_store(node_store.clone())
            .processor(KvProcessor)
            .clock(SystemClock)
            .last_closed(genesis)
            .configuration(configuration)
            .on_accept_ledger(accept_ledger_handler(verifying_key))
            .on_fully_validated(fully_validated_handler(verifying_key))
            .on_persist_ledger(persist_ledger_handler(persisted.clone()))
            .build()
            .start()?;

        Ok(Node {
            node_store,
            persisted,
            replica,
        })
    }

    pub(crate) fn submit_transaction(&self, tx: Vec<u8>) {
        self.replica.submit_transaction(tx)
    }

    /// Value under `key` in the newest fully validated ledger.
    pub(crate) fn validated_value(&self, key: &CryptoHash) -> Option<Vec<u8>> {
        let ledger = self.replica.ledger_history_camera().validated()?;
        ledger
            .read(key)
            .unwrap()
            .map(|item| item.data().to_vec())
    }

    pub(crate) fn validated_ledger(&self) -> Option<(CryptoHash, LedgerSeq)> {
        self.replica
            .ledger_history_camera()
            .validated()
            .map(|ledger| (ledger.hash(), ledger.seq()))
    }

    pub(crate) fn persisted(&self) -> Vec<(CryptoHash, LedgerSeq)> {
        self.persisted.lock().unwrap().clone()
    }

    pub(crate) fn node_store(&self) -> &MemDB {
        &self.node_store
    }

    pub(crate) fn is_running(&self) -> bool {
        self.replica.is_running()
    }
}

/// Rounds that last a few hundred milliseconds instead of a few seconds.
pub(crate) fn fast_consensus_params() -> ConsensusParams {
    ConsensusParams::builder()
        .ledger_idle_interval(Duration::from_secs(1))
        .ledger_min_close(Duration::from_millis(200))
        .ledger_min_consensus(Duration::from_millis(300))
        .av_min_consensus_time(Duration::from_millis(500))
        .build()
}

fn accept_ledger_handler(
    verifying_key: VerifyingKeyBytes,
) -> impl Fn(&AcceptLedgerEvent) + Send + 'static {
    move |event| {
        log::debug!(
            "[{}] Accepted ledger {} ({}), applied: {}, failed: {}",
            short_id(&verifying_key),
            event.ledger,
            event.seq,
            event.applied,
            event.failed
        );
    }
}

fn fully_validated_handler(
    verifying_key: VerifyingKeyBytes,
) -> impl Fn(&FullyValidatedEvent) + Send + 'static {
    move |event| {
        log::debug!(
            "[{}] Fully validated ledger {} ({})",
            short_id(&verifying_key),
            event.ledger,
            event.seq
        );
    }
}

fn persist_ledger_handler(
    persisted: Arc<Mutex<Vec<(CryptoHash, LedgerSeq)>>>,
) -> impl Fn(&PersistLedgerEvent) + Send + 'static {
    move |event| {
        persisted.lock().unwrap().push((event.ledger, event.seq));
    }
}
