use std::{sync::Arc, thread, time::Duration};

use log::LevelFilter;
use shamap_consensus::{
    shamap::{
        node::TreeNode, Family, LeafKind, SHAMap, SHAMapAddNode, SHAMapError, SHAMapItem,
        SHAMapNodeId, SHAMapType,
    },
    types::{
        crypto_primitives::{sha512_half, transaction_id},
        data_types::CryptoHash,
    },
};

mod common;

use crate::common::{logging::setup_logger, mem_db::MemDB};

fn key(i: u32) -> CryptoHash {
    sha512_half(&[&i.to_be_bytes()])
}

fn item(i: u32, value: &str) -> SHAMapItem {
    SHAMapItem::new(key(i), value.as_bytes().to_vec())
}

fn state_map(family: &Arc<Family<MemDB>>, items: impl IntoIterator<Item = u32>) -> SHAMap<MemDB> {
    let mut map = SHAMap::new(Arc::clone(family), SHAMapType::State);
    for i in items {
        assert!(map.insert(item(i, "value"), LeafKind::AccountState).unwrap());
    }
    map
}

/// Write every dirty node of `map` to its family's store.
fn flush(map: &mut SHAMap<MemDB>) {
    let objects = map.flush_dirty();
    map.family().db().store_batch(&objects).unwrap();
}

#[test]
fn insert_fetch_and_erase_test() {
    setup_logger(LevelFilter::Info);
    let family = Arc::new(Family::new(MemDB::new()));

    // 1. An empty map has the zero hash.
    let mut map = SHAMap::new(Arc::clone(&family), SHAMapType::State);
    assert!(map.hash().is_zero());
    assert!(map.is_empty());

    // 2. Insert items and read them back.
    for i in 0..200 {
        assert!(map.insert(item(i, "first"), LeafKind::AccountState).unwrap());
    }
    assert_eq!(map.len().unwrap(), 200);
    for i in 0..200 {
        let fetched = map.fetch(&key(i)).unwrap().unwrap();
        assert_eq!(fetched.data(), b"first");
    }
    assert!(map.fetch(&key(1000)).unwrap().is_none());

    // 3. Inserting an existing key is a no-op.
    let hash = map.hash();
    assert!(!map.insert(item(7, "second"), LeafKind::AccountState).unwrap());
    assert_eq!(map.hash(), hash);
    assert_eq!(map.fetch(&key(7)).unwrap().unwrap().data(), b"first");

    // 4. Updating with identical data is a no-op, updating with new data changes the hash.
    assert!(!map.update(item(7, "first"), LeafKind::AccountState).unwrap());
    assert_eq!(map.hash(), hash);
    assert!(map.update(item(7, "second"), LeafKind::AccountState).unwrap());
    assert_ne!(map.hash(), hash);
    assert!(map.update(item(7, "first"), LeafKind::AccountState).unwrap());
    assert_eq!(map.hash(), hash);

    // 5. Erasing every item gets us back to the empty map.
    assert!(!map.erase(&key(1000)).unwrap());
    for i in 0..200 {
        assert!(map.erase(&key(i)).unwrap());
    }
    assert!(map.hash().is_zero());
    assert_eq!(map.len().unwrap(), 0);
}

#[test]
fn hash_depends_only_on_contents_test() {
    let family = Arc::new(Family::new(MemDB::new()));

    // Insertion order does not matter.
    let forwards = state_map(&family, 0..100);
    let backwards = state_map(&family, (0..100).rev());
    assert_eq!(forwards.hash(), backwards.hash());

    // Neither does inserting and then erasing an extra item.
    let mut with_detour = state_map(&family, 0..101);
    assert_ne!(with_detour.hash(), forwards.hash());
    with_detour.erase(&key(100)).unwrap();
    assert_eq!(with_detour.hash(), forwards.hash());

    // The leaf kind is part of the hash.
    let mut as_transactions = SHAMap::new(Arc::clone(&family), SHAMapType::Transaction);
    as_transactions
        .insert(item(1, "value"), LeafKind::TransactionWithMeta)
        .unwrap();
    let as_state = state_map(&family, [1]);
    assert_ne!(as_transactions.hash(), as_state.hash());
}

#[test]
fn upper_bound_and_items_are_in_key_order_test() {
    let family = Arc::new(Family::new(MemDB::new()));
    let map = state_map(&family, 0..50);

    let items = map.items().unwrap();
    assert_eq!(items.len(), 50);
    assert!(items.windows(2).all(|pair| pair[0].key() < pair[1].key()));

    for pair in items.windows(2) {
        let next = map.upper_bound(pair[0].key()).unwrap().unwrap();
        assert_eq!(next.key(), pair[1].key());
    }
    assert!(map.upper_bound(items[49].key()).unwrap().is_none());
    assert_eq!(
        map.upper_bound(&CryptoHash::zero()).unwrap().unwrap().key(),
        items[0].key()
    );
}

#[test]
fn node_serializations_rederive_hash_test() {
    let family = Arc::new(Family::new(MemDB::new()));

    // 1. A leaf.
    let leaf = TreeNode::new_leaf(item(1, "leaf"), LeafKind::AccountState);
    let from_prefix = TreeNode::from_prefix(&leaf.serialize_with_prefix(), &leaf.hash()).unwrap();
    assert_eq!(from_prefix.hash(), leaf.hash());
    let from_wire = TreeNode::from_wire(&leaf.serialize_for_wire()).unwrap();
    assert_eq!(from_wire.hash(), leaf.hash());

    // 2. A sparse root, which travels in the compressed wire format, and a dense one, which does not.
    for map in [state_map(&family, 0..3), state_map(&family, 0..500)] {
        let root = map.root_node();
        let from_wire = TreeNode::from_wire(&root.serialize_for_wire()).unwrap();
        assert_eq!(from_wire.hash(), map.hash());
        let from_prefix = TreeNode::from_prefix(&root.serialize_with_prefix(), &map.hash()).unwrap();
        assert_eq!(from_prefix.hash(), map.hash());
    }

    // 3. Bytes that do not hash to the expected hash are rejected.
    let wrong = TreeNode::from_prefix(&leaf.serialize_with_prefix(), &key(99));
    assert!(matches!(wrong, Err(SHAMapError::HashMismatch { .. })));
}

#[test]
fn snapshots_are_isolated_test() {
    let family = Arc::new(Family::new(MemDB::new()));
    let mut original = state_map(&family, 0..100);
    let original_hash = original.hash();

    // 1. Writes to a mutable snapshot do not show in the original.
    let mut copy = original.snapshot(true);
    copy.update(item(5, "changed"), LeafKind::AccountState).unwrap();
    copy.insert(item(500, "new"), LeafKind::AccountState).unwrap();
    copy.erase(&key(6)).unwrap();
    assert_eq!(original.hash(), original_hash);
    assert_eq!(original.fetch(&key(5)).unwrap().unwrap().data(), b"value");
    assert!(original.fetch(&key(500)).unwrap().is_none());
    assert!(original.has_item(&key(6)).unwrap());

    // 2. Writes to the original do not show in the snapshot.
    let copy_hash = copy.hash();
    original.erase(&key(50)).unwrap();
    assert_eq!(copy.hash(), copy_hash);
    assert!(copy.has_item(&key(50)).unwrap());

    // 3. Immutable snapshots reject writes.
    let mut frozen = copy.snapshot(false);
    assert!(matches!(
        frozen.insert(item(600, "x"), LeafKind::AccountState),
        Err(SHAMapError::Immutable)
    ));
    assert_eq!(frozen.hash(), copy_hash);
}

#[test]
fn compare_finds_exactly_the_differences_test() {
    let family = Arc::new(Family::new(MemDB::new()));
    let base = state_map(&family, 0..1000);

    // 1. Identical maps have no differences and are not walked.
    let delta = base.compare(&base.snapshot(false), usize::MAX).unwrap();
    assert!(delta.items.is_empty());
    assert!(delta.complete);
    assert_eq!(delta.nodes_visited, 0);

    // 2. One changed item: only the path to it is walked.
    let mut changed = base.snapshot(true);
    changed.update(item(123, "changed"), LeafKind::AccountState).unwrap();
    let delta = base.compare(&changed, usize::MAX).unwrap();
    assert_eq!(delta.items.len(), 1);
    let diff = &delta.items[&key(123)];
    assert_eq!(diff.ours.as_ref().unwrap().data(), b"value");
    assert_eq!(diff.theirs.as_ref().unwrap().data(), b"changed");
    assert!(delta.nodes_visited <= 2 * 65);

    // 3. Added and removed items show on the right side.
    let mut other = base.snapshot(true);
    other.erase(&key(1)).unwrap();
    other.insert(item(2000, "added"), LeafKind::AccountState).unwrap();
    let delta = base.compare(&other, usize::MAX).unwrap();
    assert_eq!(delta.items.len(), 2);
    assert!(delta.items[&key(1)].ours.is_some() && delta.items[&key(1)].theirs.is_none());
    assert!(delta.items[&key(2000)].ours.is_none() && delta.items[&key(2000)].theirs.is_some());

    // 4. Comparing against the empty map yields every item, and stops early past the limit.
    let empty = SHAMap::new(Arc::clone(&family), SHAMapType::State);
    let delta = base.compare(&empty, usize::MAX).unwrap();
    assert_eq!(delta.items.len(), 1000);
    let delta = base.compare(&empty, 10).unwrap();
    assert!(!delta.complete);
}

#[test]
fn transactions_are_keyed_by_their_id_test() {
    let store = MemDB::new();
    let family = Arc::new(Family::new(store.clone()));
    let mut map = SHAMap::new(Arc::clone(&family), SHAMapType::Transaction);

    // 1. A transaction keyed by anything other than its id is refused, and the map is unchanged.
    let misfiled = SHAMapItem::new(sha512_half(&[&b"arbitrary key"[..]]), b"tx body".to_vec());
    assert!(matches!(
        map.insert(misfiled, LeafKind::TransactionNoMeta),
        Err(SHAMapError::InvalidNode { .. })
    ));
    assert!(map.is_empty());

    // 2. Keyed by its id, it is accepted.
    let txid = transaction_id(b"tx body");
    let filed = SHAMapItem::new(txid, b"tx body".to_vec());
    assert!(map.insert(filed, LeafKind::TransactionNoMeta).unwrap());

    // 3. Updating it to different data under the same key is refused too.
    let changed = SHAMapItem::new(txid, b"other body".to_vec());
    assert!(matches!(
        map.update(changed, LeafKind::TransactionNoMeta),
        Err(SHAMapError::InvalidNode { .. })
    ));

    // 4. The transaction survives a round trip through the store under the same key.
    flush(&mut map);
    let fresh = Arc::new(Family::new(store));
    let reloaded = SHAMap::from_root_hash(fresh, &map.hash(), SHAMapType::Transaction).unwrap();
    assert_eq!(reloaded.hash(), map.hash());
    assert_eq!(reloaded.fetch(&txid).unwrap().unwrap().data(), b"tx body");
    let keys: Vec<CryptoHash> = reloaded
        .items()
        .unwrap()
        .iter()
        .map(|item| *item.key())
        .collect();
    assert_eq!(keys, vec![txid]);
}

#[test]
fn flushed_map_reloads_lazily_test() {
    let store = MemDB::new();
    let family = Arc::new(Family::new(store.clone()));
    let mut map = state_map(&family, 0..300);
    flush(&mut map);

    // Nothing is dirty after a flush.
    assert!(map.flush_dirty().is_empty());

    // A fresh family has an empty cache, so every node is read from the store.
    let fresh = Arc::new(Family::new(store.clone()));
    let reloaded = SHAMap::from_root_hash(fresh, &map.hash(), SHAMapType::State).unwrap();
    assert!(reloaded.is_immutable());
    let fetches_before = store.fetches();
    assert_eq!(reloaded.fetch(&key(42)).unwrap().unwrap().data(), b"value");
    assert!(store.fetches() > fetches_before);
    assert_eq!(reloaded.len().unwrap(), 300);
    assert_eq!(reloaded.hash(), map.hash());
}

#[test]
fn corrupt_store_is_detected_test() {
    let store = MemDB::new();
    let family = Arc::new(Family::new(store.clone()));
    let mut map = state_map(&family, 0..300);
    flush(&mut map);

    // 1. Overwrite the node that holds one of the leaves with bytes of the right type but wrong contents.
    let leaf_hash = TreeNode::new_leaf(item(42, "value"), LeafKind::AccountState).hash();
    assert!(store.contains(&leaf_hash));
    store.corrupt(&leaf_hash, vec![3, 1, 2, 3]);

    // 2. Reading through a cold cache notices.
    let fresh = Arc::new(Family::new(store.clone()));
    let reloaded = SHAMap::from_root_hash(fresh, &map.hash(), SHAMapType::State).unwrap();
    assert!(matches!(
        reloaded.fetch(&key(42)),
        Err(SHAMapError::HashMismatch { .. })
    ));

    // 3. Other leaves are still readable.
    assert_eq!(reloaded.fetch(&key(43)).unwrap().unwrap().data(), b"value");

    // 4. A root hash that is not in the store at all is reported as missing.
    let fresh = Arc::new(Family::new(store));
    assert!(matches!(
        SHAMap::from_root_hash(fresh, &key(9999), SHAMapType::State),
        Err(SHAMapError::MissingNode { .. })
    ));
}

#[test]
fn sync_from_peer_test() {
    setup_logger(LevelFilter::Info);

    // 1. The "peer" has a complete map in its own store.
    let peer_family = Arc::new(Family::new(MemDB::new()));
    let mut source = state_map(&peer_family, 0..500);
    flush(&mut source);
    let target = source.hash();

    // 2. We start from nothing but the root hash.
    let our_store = MemDB::new();
    let our_family = Arc::new(Family::new(our_store.clone()));
    let mut synching = SHAMap::new_synching(Arc::clone(&our_family), target, SHAMapType::State);
    assert_eq!(
        synching.get_missing_nodes(16).unwrap(),
        vec![(SHAMapNodeId::root(), target)]
    );
    assert!(!synching.finish_sync().unwrap());

    // 3. A node offered before its parent does not fit anywhere.
    let deep_id = SHAMapNodeId::for_key(&key(0), 1);
    let (_, deep_wire) = source.get_node_fat(&deep_id, 0).unwrap().unwrap().remove(0);
    assert_eq!(
        synching.add_known_node(&deep_id, &deep_wire).unwrap(),
        SHAMapAddNode::Invalid
    );

    // 4. Request what is missing, as a peer would, until nothing is.
    let mut rounds = 0;
    loop {
        let missing = synching.get_missing_nodes(64).unwrap();
        if missing.is_empty() {
            break;
        }
        rounds += 1;
        assert!(rounds < 100, "sync is not making progress");
        for (node_id, _) in missing {
            for (id, wire) in source.get_node_fat(&node_id, 1).unwrap().unwrap() {
                let outcome = synching.add_known_node(&id, &wire).unwrap();
                assert_ne!(outcome, SHAMapAddNode::Invalid);
            }
        }
    }

    // 5. The map is now complete, equal to the peer's, and persisted in our store.
    assert!(synching.finish_sync().unwrap());
    assert!(synching.is_immutable());
    assert_eq!(synching.hash(), target);
    assert_eq!(synching.len().unwrap(), 500);
    assert!(our_store.contains(&target));
    let reloaded =
        SHAMap::from_root_hash(Arc::new(Family::new(our_store)), &target, SHAMapType::State).unwrap();
    assert_eq!(reloaded.fetch(&key(77)).unwrap().unwrap().data(), b"value");
}

#[test]
fn full_below_entries_expire_on_sweep_test() {
    let peer_family = Arc::new(Family::new(MemDB::new()));
    let mut source = state_map(&peer_family, 0..200);
    flush(&mut source);
    let target = source.hash();

    // 1. Sync a map into a family whose caches keep nothing that is not in active use.
    let our_family = Arc::new(Family::with_cache_params(MemDB::new(), 1024, Duration::ZERO));
    let mut synching = SHAMap::new_synching(Arc::clone(&our_family), target, SHAMapType::State);
    loop {
        let missing = synching.get_missing_nodes(64).unwrap();
        if missing.is_empty() {
            break;
        }
        for (node_id, _) in missing {
            for (id, wire) in source.get_node_fat(&node_id, 1).unwrap().unwrap() {
                synching.add_known_node(&id, &wire).unwrap();
            }
        }
    }

    // 2. The completed subtrees, the root included, were remembered as full below.
    assert!(our_family.full_below().contains(&target));
    let remembered = our_family.full_below().len();
    assert!(remembered > 1);

    // 3. Once they have aged out, a sweep forgets all of them.
    thread::sleep(Duration::from_millis(5));
    assert!(our_family.sweep() >= remembered);
    assert!(our_family.full_below().is_empty());
    assert!(synching.get_missing_nodes(64).unwrap().is_empty());

    // 4. Clearing forgets entries regardless of age.
    our_family.full_below().insert(target);
    assert!(!our_family.full_below().is_empty());
    our_family.full_below().clear();
    assert!(!our_family.full_below().contains(&target));
}

#[test]
fn sync_rejects_forged_nodes_test() {
    let peer_family = Arc::new(Family::new(MemDB::new()));
    let source = state_map(&peer_family, 0..100);
    let target = source.hash();

    let our_family = Arc::new(Family::new(MemDB::new()));
    let mut synching = SHAMap::new_synching(our_family, target, SHAMapType::State);

    // 1. A root that does not hash to the target is rejected.
    let other = state_map(&peer_family, 0..99);
    let forged_root = other.root_node().serialize_for_wire();
    assert!(synching
        .add_known_node(&SHAMapNodeId::root(), &forged_root)
        .is_err());

    // 2. The real root is useful once, then a duplicate.
    let real_root = source.root_node().serialize_for_wire();
    assert_eq!(
        synching.add_root_node(&target, &real_root).unwrap(),
        SHAMapAddNode::Useful
    );
    assert_eq!(
        synching.add_root_node(&target, &real_root).unwrap(),
        SHAMapAddNode::Duplicate
    );

    // 3. A child whose bytes do not match the hash its parent expects is rejected.
    let (child_id, _) = synching.get_missing_nodes(1).unwrap().remove(0);
    let wrong_leaf = TreeNode::new_leaf(item(12345, "forged"), LeafKind::AccountState);
    assert!(synching
        .add_known_node(&child_id, &wrong_leaf.serialize_for_wire())
        .is_err());
}
