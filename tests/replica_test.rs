use std::{thread, time::Duration};

use ed25519_dalek::SigningKey;
use log::LevelFilter;
use shamap_consensus::{
    ledger::LedgerError,
    replica::Replica,
    shamap::{node::TreeNode, LeafKind, SHAMapItem},
};

mod common;

use crate::common::{
    keys::{signing_keys, validator_set},
    kv_processor::{key, put_tx},
    logging::setup_logger,
    mem_db::MemDB,
    network::mock_network,
    node::Node,
};

fn genesis_accounts() -> Vec<SHAMapItem> {
    vec![SHAMapItem::new(key(1), b"one".to_vec())]
}

/// Starts three validators, submits transactions to them, and waits until every validator has fully
/// validated a ledger containing them.
#[test]
fn basic_consensus_test() {
    setup_logger(LevelFilter::Info);

    // 1. Initialize test components.

    // 1.1. Create signing keys for 3 replicas.
    let keypairs: Vec<SigningKey> = signing_keys(3, 31);

    // 1.2. Create a mock network connecting the 3 replicas.
    let network_stubs = mock_network(keypairs.iter().map(|kp| kp.verifying_key()));

    // 1.3. Every replica trusts all 3 with equal weight.
    let validators = validator_set(&keypairs);

    // 1.4. Simultaneously start all replicas.
    let nodes: Vec<Node> = keypairs
        .into_iter()
        .zip(network_stubs)
        .map(|(keypair, network)| Node::new(keypair, network, validators.clone(), genesis_accounts()))
        .collect();

    // 2. Submit a transaction to one validator. It is relayed to the others.
    log::debug!("Submitting a transaction to validator 0.");
    nodes[0].submit_transaction(put_tx(2, b"two"));

    // 2.1. Poll every replica until the transaction is in a fully validated ledger.
    log::debug!("Polling every replica until key 2 is validated.");
    while nodes.iter().any(|node| node.validated_value(&key(2)).is_none()) {
        thread::sleep(Duration::from_millis(200));
    }

    // 3. Submit a different transaction to each validator.
    log::debug!("Submitting a transaction to each validator.");
    nodes[0].submit_transaction(put_tx(3, b"three"));
    nodes[1].submit_transaction(put_tx(1, b"uno"));
    nodes[2].submit_transaction(put_tx(2, b""));

    // 3.1. Poll every replica until all of them are validated.
    log::debug!("Polling every replica until the three transactions are validated.");
    let done = |node: &Node| {
        node.validated_value(&key(3)) == Some(b"three".to_vec())
            && node.validated_value(&key(1)) == Some(b"uno".to_vec())
            && node.validated_value(&key(2)).is_none()
    };
    while !nodes.iter().all(done) {
        thread::sleep(Duration::from_millis(200));
    }

    // 4. Validated ledgers were written to each replica's node store.
    for node in &nodes {
        while node.persisted().is_empty() {
            thread::sleep(Duration::from_millis(100));
        }
        for (hash, _) in node.persisted() {
            assert!(node.node_store().contains(&hash));
        }
    }

    // 5. Replicas agree on the ledger at every sequence number they have all validated.
    let (_, lowest_seq) = nodes
        .iter()
        .filter_map(|node| node.validated_ledger())
        .min_by_key(|(_, seq)| *seq)
        .unwrap();
    let persisted_at = |node: &Node| {
        node.persisted()
            .into_iter()
            .find(|(_, seq)| *seq == lowest_seq)
            .map(|(hash, _)| hash)
    };
    let hashes: Vec<_> = nodes.iter().filter_map(persisted_at).collect();
    assert!(hashes.windows(2).all(|pair| pair[0] == pair[1]));
}

/// Starts three validators, makes progress with them, then starts an observer (a "lagging" replica) and
/// confirms that it catches up by acquiring the ledgers the validators have validated.
#[test]
fn lagging_observer_test() {
    setup_logger(LevelFilter::Info);

    // 1. Initialize test components.

    // 1.1. Generate signing keys for 4 replicas.
    let mut keypairs: Vec<SigningKey> = signing_keys(4, 41);

    // 1.2. Create a mock network connecting the 4 replicas.
    let mut network_stubs = mock_network(keypairs.iter().map(|kp| kp.verifying_key()));

    // 1.3. Split off the last keypair and network stub. These are used to create the observer later.
    let observer_keypair = keypairs.split_off(3);
    let observer_network = network_stubs.split_off(3);

    // 1.4. Only the first 3 replicas are validators.
    let validators = validator_set(&keypairs);

    // 1.5. Start the validators.
    let nodes: Vec<Node> = keypairs
        .into_iter()
        .zip(network_stubs)
        .map(|(keypair, network)| Node::new(keypair, network, validators.clone(), genesis_accounts()))
        .collect();

    // 2. Make progress with the validators.
    nodes[0].submit_transaction(put_tx(5, b"five"));
    while nodes.iter().any(|node| node.validated_value(&key(5)).is_none()) {
        thread::sleep(Duration::from_millis(200));
    }

    // 3. Start the observer.
    log::debug!("Starting the observer.");
    let observer = Node::new(
        observer_keypair.into_iter().next().unwrap(),
        observer_network.into_iter().next().unwrap(),
        validators,
        genesis_accounts(),
    );

    // 4. Make more progress, and wait for the observer to see it.
    nodes[1].submit_transaction(put_tx(6, b"six"));
    while observer.validated_value(&key(6)).is_none() {
        thread::sleep(Duration::from_millis(200));
    }
    assert_eq!(observer.validated_value(&key(5)), Some(b"five".to_vec()));
    assert_eq!(observer.validated_value(&key(1)), Some(b"one".to_vec()));
}

/// A replica whose stored genesis header does not hash to its key refuses to start.
#[test]
fn corrupt_ledger_header_test() {
    setup_logger(LevelFilter::Info);
    let keypair = signing_keys(1, 51).remove(0);
    let validators = validator_set(std::slice::from_ref(&keypair));
    let network = mock_network(std::iter::once(keypair.verifying_key())).remove(0);

    let node_store = MemDB::new();
    let genesis = Replica::initialize(node_store.clone(), 1_000_000, genesis_accounts()).unwrap();
    node_store.corrupt(&genesis, vec![1, 0, 0, 0]);

    let err = Node::start(keypair, network, validators, node_store, genesis)
        .err()
        .unwrap();
    assert!(matches!(err, LedgerError::NodeStoreError(_)));
    assert!(err.is_hash_mismatch());
}

/// Starts three validators, one of which has a corrupt account node in its store. The corrupt validator
/// stops for good as soon as building a ledger reads the node, while the others keep going.
#[test]
fn corrupt_state_node_stops_replica_test() {
    setup_logger(LevelFilter::Info);

    // 1. Initialize test components.
    let keypairs: Vec<SigningKey> = signing_keys(3, 61);
    let mut network_stubs = mock_network(keypairs.iter().map(|kp| kp.verifying_key()));
    let validators = validator_set(&keypairs);
    let mut keypairs = keypairs.into_iter();

    // 2. Overwrite the genesis leaf of key 1 in the first validator's store before starting it.
    let corrupt_store = MemDB::new();
    let genesis = Replica::initialize(corrupt_store.clone(), 1_000_000, genesis_accounts()).unwrap();
    let leaf_hash = TreeNode::new_leaf(genesis_accounts().remove(0), LeafKind::AccountState).hash();
    assert!(corrupt_store.contains(&leaf_hash));
    corrupt_store.corrupt(&leaf_hash, vec![3, 1, 2, 3]);

    let corrupt = Node::start(
        keypairs.next().unwrap(),
        network_stubs.remove(0),
        validators.clone(),
        corrupt_store,
        genesis,
    )
    .unwrap();
    let healthy: Vec<Node> = keypairs
        .zip(network_stubs)
        .map(|(keypair, network)| Node::new(keypair, network, validators.clone(), genesis_accounts()))
        .collect();
    assert!(corrupt.is_running());

    // 3. Update key 1. Every validator builds a ledger that reads the corrupt node's hash.
    healthy[0].submit_transaction(put_tx(1, b"uno"));

    // 3.1. Poll until the corrupt validator stops.
    log::debug!("Polling until the corrupt validator stops.");
    while corrupt.is_running() {
        thread::sleep(Duration::from_millis(200));
    }
    assert!(healthy.iter().all(Node::is_running));
}
