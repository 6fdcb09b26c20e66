use std::{collections::HashMap, time::Duration};

use log::LevelFilter;
use shamap_consensus::{
    types::{
        crypto_primitives::Keypair,
        data_types::{CryptoHash, LedgerSeq, NetTime, NetworkID},
    },
    validations::{
        AddOutcome, SignedValidation, Validation, ValidationError, ValidationParams, Validations,
    },
};

mod common;

use crate::common::{
    keys::{self, signing_keys, validator_set},
    logging::setup_logger,
};

const NETWORK: NetworkID = NetworkID::new(7);

fn now() -> NetTime {
    NetTime::new(100_000)
}

fn ledger(byte: u8) -> CryptoHash {
    CryptoHash::new([byte; 32])
}

fn validation(keypair: &Keypair, hash: CryptoHash, seq: u32, sign_time: NetTime) -> SignedValidation {
    Validation::new(
        keypair.public().to_bytes(),
        NETWORK,
        hash,
        LedgerSeq::new(seq),
        sign_time,
        true,
    )
    .sign(keypair)
}

/// A tracker trusting 5 validators, and their keypairs.
fn setup() -> (Validations, Vec<Keypair>) {
    let validators = validator_set(&signing_keys(5, 11));
    let validations = Validations::new(ValidationParams::default(), NETWORK, validators, None);
    (validations, keys::keypairs(5, 11))
}

#[test]
fn add_checks_origin_and_currentness_test() {
    setup_logger(LevelFilter::Info);
    let (mut validations, keypairs) = setup();

    // 1. A fresh validation is current, and adding it twice is a repeat.
    let fresh = validation(&keypairs[0], ledger(1), 5, now());
    assert_eq!(validations.add(now(), fresh.clone()), Ok(AddOutcome::Current));
    assert_eq!(validations.add(now(), fresh), Ok(AddOutcome::Repeat));

    // 2. Validations signed too long ago, or too far in the future, are stale.
    let old = validation(&keypairs[1], ledger(1), 5, now() - Duration::from_secs(200));
    assert_eq!(validations.add(now(), old), Ok(AddOutcome::Stale));
    let future = validation(&keypairs[1], ledger(1), 5, now() + Duration::from_secs(400));
    assert_eq!(validations.add(now(), future), Ok(AddOutcome::Stale));

    // 3. Validations for other networks, from untrusted keys, or with bad signatures are rejected.
    let mut other_network = Validation::new(
        keypairs[2].public().to_bytes(),
        NetworkID::new(8),
        ledger(1),
        LedgerSeq::new(5),
        now(),
        true,
    )
    .sign(&keypairs[2]);
    assert_eq!(
        validations.add(now(), other_network.clone()),
        Err(ValidationError::WrongNetwork)
    );

    let strangers = keys::keypairs(1, 99);
    assert_eq!(
        validations.add(now(), validation(&strangers[0], ledger(1), 5, now())),
        Err(ValidationError::UnknownValidator)
    );

    other_network.validation.network_id = NETWORK;
    assert_eq!(
        validations.add(now(), other_network),
        Err(ValidationError::InvalidSignature)
    );

    assert_eq!(validations.num_trusted_for_ledger(&ledger(1)), 1);
}

#[test]
fn conflicting_and_out_of_order_validations_test() {
    let (mut validations, keypairs) = setup();
    let t = now();

    // 1. Two different ledgers with the same sequence number: the first one is kept.
    let first = validation(&keypairs[0], ledger(1), 5, t);
    let second = validation(&keypairs[0], ledger(2), 5, t + Duration::from_secs(1));
    assert_eq!(validations.add(t, first), Ok(AddOutcome::Current));
    assert_eq!(
        validations.add(t + Duration::from_secs(1), second),
        Ok(AddOutcome::Conflicting)
    );
    assert_eq!(validations.equivocations().len(), 1);
    assert_eq!(validations.equivocations()[0].first, ledger(1));
    assert_eq!(validations.equivocations()[0].second, ledger(2));
    assert_eq!(validations.num_trusted_for_ledger(&ledger(2)), 0);

    // 2. A validation for an earlier sequence number than one already validated.
    let later = validation(&keypairs[0], ledger(3), 6, t + Duration::from_secs(2));
    let earlier = validation(&keypairs[0], ledger(4), 4, t + Duration::from_secs(3));
    assert_eq!(
        validations.add(t + Duration::from_secs(2), later),
        Ok(AddOutcome::Current)
    );
    assert_eq!(
        validations.add(t + Duration::from_secs(3), earlier),
        Ok(AddOutcome::BadSequence)
    );

    // 3. A validation signed before the validator's current one.
    let newer = validation(&keypairs[1], ledger(1), 5, t + Duration::from_secs(10));
    let older = validation(&keypairs[1], ledger(3), 6, t + Duration::from_secs(5));
    assert_eq!(
        validations.add(t + Duration::from_secs(10), newer),
        Ok(AddOutcome::Current)
    );
    assert_eq!(
        validations.add(t + Duration::from_secs(10), older),
        Ok(AddOutcome::Stale)
    );
}

#[test]
fn quorum_and_full_validation_test() {
    setup_logger(LevelFilter::Info);
    let (mut validations, keypairs) = setup();
    let t = now();

    // 1. 80% of 5 validators is 4.
    assert_eq!(validations.quorum(), 4);

    // 2. Three validations are not enough, four are.
    for keypair in &keypairs[..3] {
        validations
            .add(t, validation(keypair, ledger(1), 5, t))
            .unwrap();
    }
    assert!(!validations.is_fully_validated(&ledger(1)));
    assert_eq!(validations.newest_fully_validated(), None);
    validations
        .add(t, validation(&keypairs[3], ledger(1), 5, t))
        .unwrap();
    assert!(validations.is_fully_validated(&ledger(1)));
    assert_eq!(
        validations.newest_fully_validated(),
        Some((ledger(1), LedgerSeq::new(5)))
    );

    // 3. Four validators move on to the next ledger.
    let t2 = t + Duration::from_secs(5);
    for keypair in &keypairs[..4] {
        validations
            .add(t2, validation(keypair, ledger(2), 6, t2))
            .unwrap();
    }
    assert_eq!(
        validations.newest_fully_validated(),
        Some((ledger(2), LedgerSeq::new(6)))
    );
    assert_eq!(validations.get_nodes_after(&ledger(1)), 4);
    assert_eq!(validations.validators_after(&ledger(1)).len(), 4);

    // 4. Validations of a ledger stay indexed under it after the validators move on.
    assert_eq!(validations.get_trusted_for_ledger(&ledger(1)).len(), 4);
    assert_eq!(validations.current_trusted(t2).len(), 4);
}

#[test]
fn preferred_ledger_test() {
    let t = now();
    let no_peers = HashMap::new();

    // 1. The ledger with the most validations wins.
    let (mut validations, keypairs) = setup();
    for (i, keypair) in keypairs.iter().enumerate() {
        let hash = if i < 2 { ledger(1) } else { ledger(2) };
        validations.add(t, validation(keypair, hash, 5, t)).unwrap();
    }
    assert_eq!(
        validations.get_preferred_ledger(t, &ledger(1), &CryptoHash::zero(), LedgerSeq::new(0), &no_peers),
        ledger(2)
    );

    // 2. Ties are broken by the peers' last closed ledgers, then in favour of our own ledger.
    let (mut validations, keypairs) = setup();
    for (i, keypair) in keypairs[..4].iter().enumerate() {
        let hash = if i < 2 { ledger(1) } else { ledger(2) };
        validations.add(t, validation(keypair, hash, 5, t)).unwrap();
    }
    let peers = HashMap::from([(ledger(2), 3)]);
    assert_eq!(
        validations.get_preferred_ledger(t, &ledger(1), &CryptoHash::zero(), LedgerSeq::new(0), &peers),
        ledger(2)
    );
    assert_eq!(
        validations.get_preferred_ledger(t, &ledger(1), &CryptoHash::zero(), LedgerSeq::new(0), &no_peers),
        ledger(1)
    );

    // 3. Validations for the parent of our ledger count for our ledger.
    let (mut validations, keypairs) = setup();
    for (i, keypair) in keypairs.iter().enumerate() {
        let (hash, seq) = if i < 3 { (ledger(10), 5) } else { (ledger(20), 6) };
        validations.add(t, validation(keypair, hash, seq, t)).unwrap();
    }
    assert_eq!(
        validations.get_preferred_ledger(t, &ledger(11), &ledger(10), LedgerSeq::new(0), &no_peers),
        ledger(11)
    );

    // 4. Validations before the cutoff are ignored.
    assert_eq!(
        validations.get_preferred_ledger(t, &ledger(11), &ledger(10), LedgerSeq::new(6), &no_peers),
        ledger(20)
    );
}

#[test]
fn expire_and_prune_test() {
    let (mut validations, keypairs) = setup();
    let t = now();
    for keypair in &keypairs {
        validations.add(t, validation(keypair, ledger(1), 5, t)).unwrap();
    }

    // 1. Validations stop being current after a while, but stay indexed by ledger.
    assert_eq!(validations.current_trusted(t).len(), 5);
    assert!(validations
        .current_trusted(t + Duration::from_secs(4 * 60))
        .is_empty());
    assert_eq!(validations.num_trusted_for_ledger(&ledger(1)), 5);

    // 2. Ledgers whose validations stopped arriving expire.
    validations.expire(t + Duration::from_secs(9 * 60));
    assert_eq!(validations.num_trusted_for_ledger(&ledger(1)), 5);
    validations.expire(t + Duration::from_secs(11 * 60));
    assert_eq!(validations.num_trusted_for_ledger(&ledger(1)), 0);

    // 3. Ledgers far behind the current one are pruned.
    let (mut validations, keypairs) = setup();
    for keypair in &keypairs {
        validations.add(t, validation(keypair, ledger(1), 5, t)).unwrap();
    }
    validations.prune_before(LedgerSeq::new(5 + 256));
    assert_eq!(validations.num_trusted_for_ledger(&ledger(1)), 5);
    validations.prune_before(LedgerSeq::new(5 + 257));
    assert_eq!(validations.num_trusted_for_ledger(&ledger(1)), 0);
    assert!(validations.flush().is_empty());
}
