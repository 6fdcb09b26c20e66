use std::{collections::BTreeSet, sync::Arc};

use log::LevelFilter;
use shamap_consensus::{
    ledger::{
        build_ledger, Ledger, LedgerError, LedgerHistory, LedgerInfo, OpenView, Sandbox, StateView,
    },
    shamap::{Family, SHAMapItem},
    types::{
        crypto_primitives::transaction_id,
        data_types::{CryptoHash, LedgerSeq, NetTime},
    },
};

mod common;

use crate::common::{
    kv_processor::{key, put_tx, KvProcessor},
    logging::setup_logger,
    mem_db::MemDB,
};

fn accounts() -> Vec<SHAMapItem> {
    vec![
        SHAMapItem::new(key(1), b"one".to_vec()),
        SHAMapItem::new(key(3), b"three".to_vec()),
    ]
}

fn genesis(family: &Arc<Family<MemDB>>) -> Ledger<MemDB> {
    Ledger::genesis(Arc::clone(family), 1_000_000, accounts()).unwrap()
}

/// Build the child of `parent` from `txs`, closing it at `close_time`.
fn build(
    parent: &Ledger<MemDB>,
    txs: &[Vec<u8>],
    close_time: NetTime,
    close_time_correct: bool,
) -> (Ledger<MemDB>, shamap_consensus::ledger::BuildReport) {
    let txs: Vec<(CryptoHash, Vec<u8>)> = txs
        .iter()
        .map(|tx| (transaction_id(tx), tx.clone()))
        .collect();
    build_ledger(
        parent,
        txs,
        &CryptoHash::new([9; 32]),
        close_time,
        30,
        close_time_correct,
        &mut KvProcessor,
    )
    .unwrap()
}

#[test]
fn genesis_ledger_test() {
    setup_logger(LevelFilter::Info);
    let family = Arc::new(Family::new(MemDB::new()));

    // 1. Genesis is closed, deterministic, and holds the accounts it was given.
    let mut first = genesis(&family);
    let second = genesis(&Arc::new(Family::new(MemDB::new())));
    assert_eq!(first.hash(), second.hash());
    assert!(first.is_closed());
    assert_eq!(first.seq(), LedgerSeq::genesis());
    assert!(first.parent_hash().is_zero());
    assert!(first.close_time().is_epoch());
    assert_eq!(first.info().total_coins, 1_000_000);
    assert_eq!(first.read(&key(1)).unwrap().unwrap().data(), b"one");
    assert!(first.read(&key(2)).unwrap().is_none());

    // 2. The header commits to the maps.
    assert_eq!(first.info().account_hash, first.state_map().hash());
    assert!(first.info().tx_hash.is_zero());
    assert_eq!(first.info().compute_hash(), first.hash());

    // 3. Closed ledgers reject writes.
    assert!(matches!(
        first.put(key(2), b"two".to_vec()),
        Err(LedgerError::Immutable)
    ));
}

#[test]
fn build_ledger_applies_set_test() {
    setup_logger(LevelFilter::Info);
    let family = Arc::new(Family::new(MemDB::new()));
    let parent = genesis(&family);

    // 1. Write a new key, change one, erase one, and include a malformed transaction.
    let txs = vec![
        put_tx(2, b"two"),
        put_tx(1, b"uno"),
        put_tx(3, b""),
        b"too short".to_vec(),
    ];
    let (child, report) = build(&parent, &txs, NetTime::new(1000), true);

    // 2. Check the report.
    assert_eq!(report.applied.len(), 3);
    assert_eq!(report.failed, vec![transaction_id(b"too short")]);
    assert!(report.retriable.is_empty());

    // 3. Check the header.
    assert!(child.is_closed());
    assert_eq!(child.seq(), parent.seq().next());
    assert_eq!(child.parent_hash(), parent.hash());
    assert_eq!(child.info().parent_close_time, parent.close_time());
    assert_eq!(child.close_time(), NetTime::new(1000));
    assert!(child.info().close_agree());
    assert_eq!(child.info().total_coins, parent.info().total_coins);

    // 4. The state differs from the parent's in exactly the touched keys.
    let delta = parent
        .state_map()
        .compare(child.state_map(), usize::MAX)
        .unwrap();
    let changed: BTreeSet<CryptoHash> = delta.items.keys().copied().collect();
    assert_eq!(changed, BTreeSet::from([key(1), key(2), key(3)]));
    assert_eq!(child.read(&key(1)).unwrap().unwrap().data(), b"uno");
    assert_eq!(child.read(&key(2)).unwrap().unwrap().data(), b"two");
    assert!(child.read(&key(3)).unwrap().is_none());

    // 5. Applied transactions are recorded with their metadata. Failed ones are not.
    let (tx, meta) = child
        .transaction(&transaction_id(&put_tx(2, b"two")))
        .unwrap()
        .unwrap();
    assert_eq!(tx, put_tx(2, b"two"));
    assert!(meta.is_empty());
    assert!(child
        .transaction(&transaction_id(b"too short"))
        .unwrap()
        .is_none());
    assert_eq!(child.tx_map().len().unwrap(), 3);

    // 6. Building the same set again gives the same ledger, whatever the order of the input.
    let mut reversed = txs.clone();
    reversed.reverse();
    let (again, _) = build(&parent, &reversed, NetTime::new(1000), true);
    assert_eq!(again.hash(), child.hash());

    // 7. The parent is unchanged.
    assert_eq!(parent.read(&key(1)).unwrap().unwrap().data(), b"one");
}

#[test]
fn close_time_disagreement_test() {
    let family = Arc::new(Family::new(MemDB::new()));
    let parent = genesis(&family);
    let (child, _) = build(&parent, &[put_tx(2, b"two")], NetTime::new(1000), false);

    assert!(!child.info().close_agree());
    assert_eq!(child.close_time(), NetTime::new(1));
}

#[test]
fn header_round_trip_test() {
    let family = Arc::new(Family::new(MemDB::new()));
    let parent = genesis(&family);
    let (child, _) = build(&parent, &[put_tx(2, b"two")], NetTime::new(1000), true);

    let info = child.info();
    let bytes = info.canonical_bytes();
    assert_eq!(
        &LedgerInfo::from_canonical_bytes(&bytes, &child.hash()).unwrap(),
        info
    );

    // Bytes that do not hash to the expected ledger hash are rejected.
    assert!(LedgerInfo::from_canonical_bytes(&bytes, &parent.hash()).is_err());
    assert!(LedgerInfo::from_canonical_bytes(&bytes[1..], &child.hash()).is_err());
}

#[test]
fn flush_and_load_test() {
    setup_logger(LevelFilter::Info);
    let store = MemDB::new();
    let family = Arc::new(Family::new(store.clone()));

    // 1. Flush genesis and a child into the store.
    let mut parent = genesis(&family);
    family.db().store_batch(&parent.flush_dirty().unwrap()).unwrap();
    let (mut child, _) = build(&parent, &[put_tx(2, b"two")], NetTime::new(1000), true);
    let objects = child.flush_dirty().unwrap();
    family.db().store_batch(&objects).unwrap();

    // Only the nodes the child changed are written, plus its header.
    assert!(objects.len() < store.len());
    assert!(store.contains(&child.hash()));

    // 2. Load the child through a cold cache.
    let loaded = Ledger::load(Arc::new(Family::new(store.clone())), &child.hash()).unwrap();
    assert_eq!(loaded.info(), child.info());
    assert!(loaded.is_closed());
    assert_eq!(loaded.read(&key(1)).unwrap().unwrap().data(), b"one");
    assert_eq!(loaded.read(&key(2)).unwrap().unwrap().data(), b"two");
    assert!(loaded
        .transaction(&transaction_id(&put_tx(2, b"two")))
        .unwrap()
        .is_some());

    // 3. Open ledgers cannot be flushed, and unknown ledgers cannot be loaded.
    let mut open = Ledger::new_open(&child);
    assert!(matches!(open.flush_dirty(), Err(LedgerError::NotClosed)));
    assert!(matches!(
        Ledger::load(Arc::new(Family::new(store)), &key(77)),
        Err(LedgerError::MissingHeader { .. })
    ));
}

#[test]
fn sandbox_buffers_changes_test() {
    let family = Arc::new(Family::new(MemDB::new()));
    let ledger = genesis(&family);

    let mut sandbox = Sandbox::new(&ledger);
    assert!(sandbox.is_empty());
    assert_eq!(sandbox.read(&key(1)).unwrap(), Some(b"one".to_vec()));

    sandbox.put(key(1), b"uno".to_vec());
    sandbox.erase(key(3));
    assert_eq!(sandbox.read(&key(1)).unwrap(), Some(b"uno".to_vec()));
    assert_eq!(sandbox.read(&key(3)).unwrap(), None);

    // The ledger itself is untouched.
    assert_eq!(ledger.read(&key(1)).unwrap().unwrap().data(), b"one");
    assert_eq!(sandbox.into_changes().len(), 2);
}

#[test]
fn open_view_advances_past_included_transactions_test() {
    let family = Arc::new(Family::new(MemDB::new()));
    let parent = Arc::new(genesis(&family));

    let mut open_view = OpenView::new(Arc::clone(&parent));
    let included = put_tx(2, b"two");
    let left_out = put_tx(4, b"four");
    assert!(open_view.submit(included.clone()).is_some());
    assert!(open_view.submit(included.clone()).is_none());
    assert!(open_view.submit(left_out.clone()).is_some());
    assert_eq!(open_view.len(), 2);

    let (child, _) = build(&parent, &[included], NetTime::new(1000), true);
    open_view.advance(Arc::new(child)).unwrap();
    assert_eq!(open_view.len(), 1);
    assert!(open_view.contains(&transaction_id(&left_out)));
    assert_eq!(open_view.parent().seq(), LedgerSeq::genesis().next());
}

#[test]
fn ledger_history_test() {
    let family = Arc::new(Family::new(MemDB::new()));

    // 1. Build a chain of 5 ledgers.
    let mut chain = vec![Arc::new(genesis(&family))];
    for i in 0..4u8 {
        let parent = Arc::clone(chain.last().unwrap());
        let (child, _) = build(
            &parent,
            &[put_tx(10 + i, b"x")],
            NetTime::new(1000 + 30 * i as u32),
            true,
        );
        chain.push(Arc::new(child));
    }

    let mut history = LedgerHistory::new();
    for ledger in &chain {
        assert!(history.insert(Arc::clone(ledger)));
    }
    assert!(!history.insert(Arc::clone(&chain[0])));
    history.set_last_closed(Arc::clone(&chain[4]));
    assert_eq!(history.last_closed().unwrap().hash(), chain[4].hash());

    // 2. Validating a ledger validates its ancestors, oldest first.
    let newly = history.set_validated(&chain[2].hash());
    assert_eq!(newly, vec![chain[0].hash(), chain[1].hash(), chain[2].hash()]);
    assert_eq!(
        history.get_validated_by_seq(chain[1].seq()).unwrap().hash(),
        chain[1].hash()
    );
    let newly = history.set_validated(&chain[4].hash());
    assert_eq!(newly, vec![chain[3].hash(), chain[4].hash()]);

    // 3. Validating an older ledger again changes nothing.
    assert!(history.set_validated(&chain[3].hash()).is_empty());
    assert_eq!(history.validated().unwrap().hash(), chain[4].hash());

    // 4. Ancestry.
    assert!(history.is_ancestor(&chain[1].hash(), &chain[4].hash()));
    assert!(!history.is_ancestor(&chain[4].hash(), &chain[1].hash()));

    // 5. Pruning keeps the newest validated ledgers.
    assert_eq!(history.prune(2), 2);
    assert_eq!(history.len(), 3);
    assert!(history.get(&chain[1].hash()).is_none());
    assert!(history.get(&chain[2].hash()).is_some());
}
