/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The validations tracker.

use std::{
    collections::{BTreeMap, HashMap},
    sync::mpsc::Sender,
    time::SystemTime,
};

use crate::{
    events::{EquivocationEvent, Event},
    types::{
        crypto_primitives::VerifyingKey,
        data_types::{CryptoHash, LedgerSeq, NetTime, NetworkID, VerifyingKeyBytes},
        signed_messages::SignedMessage,
        validator_set::ValidatorSet,
    },
};

use super::types::{
    is_current, AddOutcome, Equivocation, SignedValidation, Validation, ValidationError,
    ValidationParams,
};

/// The latest validation from a validator, with the ledger its previous validation was for.
#[derive(Clone, Debug)]
struct CurrentValidation {
    validation: Validation,

    /// Zero if we have not seen an earlier validation from the validator.
    prev_ledger: CryptoHash,
}

/// The validations received for one ledger.
#[derive(Clone, Debug)]
struct LedgerValidations {
    seq: LedgerSeq,
    by_validator: BTreeMap<VerifyingKeyBytes, Validation>,

    /// When a validation for the ledger last arrived.
    touched: NetTime,
}

/// Collects the validations that validators broadcast for the ledgers they build, and answers
/// questions about them: which ledger the network is working on, how many validators have moved past a
/// ledger, and which ledgers are fully validated.
///
/// Validations are indexed two ways: by validator (only the latest validation from each) and by ledger
/// (every validation for the ledger). Only validations from validators in the configured validator set
/// are stored, so every stored validation is trusted.
pub struct Validations {
    params: ValidationParams,
    network_id: NetworkID,
    validator_set: ValidatorSet,
    current: BTreeMap<VerifyingKeyBytes, CurrentValidation>,
    by_ledger: HashMap<CryptoHash, LedgerValidations>,
    highest_seq: HashMap<VerifyingKeyBytes, LedgerSeq>,
    equivocations: Vec<Equivocation>,
    event_publisher: Option<Sender<Event>>,
}

impl Validations {
    pub fn new(
        params: ValidationParams,
        network_id: NetworkID,
        validator_set: ValidatorSet,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            params,
            network_id,
            validator_set,
            current: BTreeMap::new(),
            by_ledger: HashMap::new(),
            highest_seq: HashMap::new(),
            equivocations: Vec::new(),
            event_publisher,
        }
    }

    pub fn params(&self) -> &ValidationParams {
        &self.params
    }

    pub fn validator_set(&self) -> &ValidatorSet {
        &self.validator_set
    }

    /// Check and store a validation received at `now`.
    ///
    /// The validation's `seen_time` is set to `now` unless it was already set (for example, for our own
    /// validations), and its `trusted` flag is set.
    pub fn add(
        &mut self,
        now: NetTime,
        signed: SignedValidation,
    ) -> Result<AddOutcome, ValidationError> {
        // 1. Check that the validation is for our network, and signed by a trusted validator.
        if signed.validation.network_id != self.network_id {
            return Err(ValidationError::WrongNetwork);
        }
        let verifying_key = match VerifyingKey::from_bytes(&signed.validation.validator) {
            Ok(key) if self.validator_set.contains(&key) => key,
            _ => return Err(ValidationError::UnknownValidator),
        };
        if !signed.is_correct(&verifying_key) {
            return Err(ValidationError::InvalidSignature);
        }

        let mut validation = signed.validation;
        if validation.seen_time.is_epoch() {
            validation.seen_time = now;
        }
        validation.trusted = true;

        // 2. Drop validations that are too old, or too far in the future.
        if !is_current(
            &self.params,
            now,
            validation.sign_time,
            validation.seen_time,
        ) {
            return Ok(AddOutcome::Stale);
        }

        let validator = validation.validator;

        // 3. Drop validations we already have.
        if let Some(set) = self.by_ledger.get(&validation.ledger_hash) {
            if set.by_validator.contains_key(&validator) {
                return Ok(AddOutcome::Repeat);
            }
        }

        // 4. Check the validation against the latest one from the same validator.
        let mut prev_ledger = CryptoHash::default();
        if let Some(existing) = self.current.get(&validator) {
            let old = &existing.validation;
            if old.ledger_seq == validation.ledger_seq && old.ledger_hash != validation.ledger_hash {
                let equivocation = Equivocation {
                    validator,
                    seq: validation.ledger_seq,
                    first: old.ledger_hash,
                    second: validation.ledger_hash,
                };
                log::warn!(
                    "Validator signed conflicting validations for ledger {}: {} and {}",
                    equivocation.seq,
                    equivocation.first,
                    equivocation.second
                );
                Event::Equivocation(EquivocationEvent {
                    timestamp: SystemTime::now(),
                    validator,
                    seq: equivocation.seq,
                    first: equivocation.first,
                    second: equivocation.second,
                })
                .publish(&self.event_publisher);
                self.equivocations.push(equivocation);
                return Ok(AddOutcome::Conflicting);
            }

            if validation.sign_time <= old.sign_time {
                return Ok(AddOutcome::Stale);
            }
            prev_ledger = if old.ledger_hash != validation.ledger_hash {
                old.ledger_hash
            } else {
                existing.prev_ledger
            };
        }

        // 5. A validator may only validate ledgers with increasing sequence numbers.
        if let Some(highest) = self.highest_seq.get(&validator) {
            if validation.ledger_seq < *highest {
                log::debug!(
                    "Validation for ledger {} after one for ledger {}",
                    validation.ledger_seq,
                    highest
                );
                return Ok(AddOutcome::BadSequence);
            }
        }
        self.highest_seq.insert(validator, validation.ledger_seq);

        // 6. Store the validation.
        let set = self
            .by_ledger
            .entry(validation.ledger_hash)
            .or_insert_with(|| LedgerValidations {
                seq: validation.ledger_seq,
                by_validator: BTreeMap::new(),
                touched: now,
            });
        set.touched = now;
        set.by_validator.insert(validator, validation.clone());

        self.current.insert(
            validator,
            CurrentValidation {
                validation,
                prev_ledger,
            },
        );

        Ok(AddOutcome::Current)
    }

    /// Every conflicting pair of validations seen so far.
    pub fn equivocations(&self) -> &[Equivocation] {
        &self.equivocations
    }

    /// Number of trusted validators whose current validation replaced one for `ledger_hash`, that is,
    /// who have moved on to a ledger after it. Does not check whether the validations are current.
    pub fn get_nodes_after(&self, ledger_hash: &CryptoHash) -> usize {
        self.current
            .values()
            .filter(|current| current.validation.trusted && current.prev_ledger == *ledger_hash)
            .count()
    }

    /// The validators counted by [`get_nodes_after`](Self::get_nodes_after).
    pub fn validators_after(&self, ledger_hash: &CryptoHash) -> Vec<VerifyingKeyBytes> {
        self.current
            .iter()
            .filter(|(_, current)| {
                current.validation.trusted && current.prev_ledger == *ledger_hash
            })
            .map(|(validator, _)| *validator)
            .collect()
    }

    pub fn num_trusted_for_ledger(&self, ledger_hash: &CryptoHash) -> usize {
        self.by_ledger.get(ledger_hash).map_or(0, |set| {
            set.by_validator
                .values()
                .filter(|validation| validation.trusted)
                .count()
        })
    }

    pub fn get_trusted_for_ledger(&self, ledger_hash: &CryptoHash) -> Vec<Validation> {
        self.by_ledger.get(ledger_hash).map_or(Vec::new(), |set| {
            set.by_validator
                .values()
                .filter(|validation| validation.trusted)
                .cloned()
                .collect()
        })
    }

    /// The current trusted validation of every validator. Validations that are no longer current at
    /// `now` are dropped.
    pub fn current_trusted(&mut self, now: NetTime) -> Vec<Validation> {
        self.remove_stale(now);
        self.current
            .values()
            .filter(|current| current.validation.trusted)
            .map(|current| current.validation.clone())
            .collect()
    }

    /// Count the current trusted validations for each ledger, for ledgers with sequence numbers at or
    /// after `cutoff_before`.
    ///
    /// Validations for the ledger before `current_ledger` (`prior_ledger`), and validations that
    /// replaced one for `current_ledger`, count as validations for `current_ledger`. This allows for one
    /// ledger of slip in either direction. A zero hash for either ledger disables the slip on that side.
    pub fn current_trusted_distribution(
        &mut self,
        now: NetTime,
        current_ledger: &CryptoHash,
        prior_ledger: &CryptoHash,
        cutoff_before: LedgerSeq,
    ) -> HashMap<CryptoHash, usize> {
        self.remove_stale(now);

        let has_current = !current_ledger.is_zero();
        let has_prior = !prior_ledger.is_zero();

        let mut distribution = HashMap::new();
        for current in self.current.values() {
            let validation = &current.validation;
            if !validation.trusted || validation.ledger_seq < cutoff_before {
                continue;
            }

            let count_for_current = (has_current
                && (validation.ledger_hash == *current_ledger
                    || current.prev_ledger == *current_ledger))
                || (has_prior && validation.ledger_hash == *prior_ledger);

            let ledger = if count_for_current {
                *current_ledger
            } else {
                validation.ledger_hash
            };
            *distribution.entry(ledger).or_insert(0) += 1;
        }
        distribution
    }

    /// Decide which ledger the network is working on.
    ///
    /// The ledger with the most current trusted validations wins. Ties are broken by the number of peers
    /// that report the ledger as their last closed ledger (`peer_counts`), and then in favour of
    /// `current_ledger`.
    pub fn get_preferred_ledger(
        &mut self,
        now: NetTime,
        current_ledger: &CryptoHash,
        prior_ledger: &CryptoHash,
        cutoff_before: LedgerSeq,
        peer_counts: &HashMap<CryptoHash, usize>,
    ) -> CryptoHash {
        let distribution =
            self.current_trusted_distribution(now, current_ledger, prior_ledger, cutoff_before);

        let score = |ledger: &CryptoHash| {
            (
                distribution.get(ledger).copied().unwrap_or(0),
                peer_counts.get(ledger).copied().unwrap_or(0),
            )
        };

        let mut preferred = *current_ledger;
        let mut preferred_score = score(current_ledger);
        let mut candidates: Vec<&CryptoHash> =
            distribution.keys().chain(peer_counts.keys()).collect();
        candidates.sort();
        for ledger in candidates {
            let ledger_score = score(ledger);
            if ledger_score > preferred_score {
                preferred = *ledger;
                preferred_score = ledger_score;
            }
        }

        if preferred != *current_ledger {
            log::debug!(
                "Network prefers ledger {} ({} validations) over {}",
                preferred,
                preferred_score.0,
                current_ledger
            );
        }
        preferred
    }

    /// Number of trusted validations a ledger needs to be fully validated: `quorum_pct` percent of the
    /// validator set, rounded up.
    pub fn quorum(&self) -> usize {
        let trusted = self.validator_set.len();
        let pct = self.params.quorum_pct as usize;
        (trusted * pct + 99) / 100
    }

    pub fn is_fully_validated(&self, ledger_hash: &CryptoHash) -> bool {
        let quorum = self.quorum();
        quorum > 0 && self.num_trusted_for_ledger(ledger_hash) >= quorum
    }

    /// The fully validated ledger with the highest sequence number.
    pub fn newest_fully_validated(&self) -> Option<(CryptoHash, LedgerSeq)> {
        self.by_ledger
            .iter()
            .filter(|(hash, _)| self.is_fully_validated(hash))
            .map(|(hash, set)| (*hash, set.seq))
            .max_by_key(|(hash, seq)| (*seq, *hash))
    }

    /// Drop the validations of ledgers for which no validation has arrived for `set_expires`.
    pub fn expire(&mut self, now: NetTime) {
        let cutoff = now - self.params.set_expires;
        let before = self.by_ledger.len();
        self.by_ledger.retain(|_, set| set.touched > cutoff);
        let expired = before - self.by_ledger.len();
        if expired > 0 {
            log::debug!("Expired validations of {} ledgers", expired);
        }
    }

    /// Drop the validations of ledgers more than `retention_window` sequence numbers behind
    /// `current_seq`.
    pub fn prune_before(&mut self, current_seq: LedgerSeq) {
        let window = self.params.retention_window as i64;
        self.by_ledger
            .retain(|_, set| current_seq - set.seq <= window);
        self.current
            .retain(|_, current| current_seq - current.validation.ledger_seq <= window);
    }

    /// Clear the current validations, returning them.
    pub fn flush(&mut self) -> Vec<Validation> {
        log::info!("Flushing validations");
        let flushed = std::mem::take(&mut self.current)
            .into_values()
            .map(|current| current.validation)
            .collect();
        log::debug!("Validations flushed");
        flushed
    }

    fn remove_stale(&mut self, now: NetTime) {
        let params = &self.params;
        self.current.retain(|_, current| {
            is_current(
                params,
                now,
                current.validation.sign_time,
                current.validation.seen_time,
            )
        });
    }
}
