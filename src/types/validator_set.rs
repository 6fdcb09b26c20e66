/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The trusted validator set (unique node list) and its trust weights.

use std::collections::BTreeMap;

use ed25519_dalek::VerifyingKey;

use super::data_types::{Power, TotalPower, VerifyingKeyBytes};

/// The validators a replica trusts, and the weight each one's positions and validations carry.
///
/// Only positions and validations signed by members of the validator set are counted by consensus and
/// by the validations tracker. Messages from any other key are rejected as coming from an unknown
/// validator.
///
/// Validators are kept in ascending order of their verifying key bytes, which is also the order
/// [`validators`](Self::validators) walks them in. Users must make sure that the total power of the
/// set does not exceed `u128::MAX/100`.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ValidatorSet {
    members: BTreeMap<VerifyingKeyBytes, (VerifyingKey, Power)>,
}

impl FromIterator<(VerifyingKey, Power)> for ValidatorSet {
    fn from_iter<T: IntoIterator<Item = (VerifyingKey, Power)>>(iter: T) -> Self {
        let mut validator_set = ValidatorSet::new();
        for (validator, power) in iter {
            validator_set.put(&validator, power);
        }
        validator_set
    }
}

impl ValidatorSet {
    pub fn new() -> ValidatorSet {
        ValidatorSet {
            members: BTreeMap::new(),
        }
    }

    /// Trust `validator` with `power`, replacing its power if it is already trusted.
    pub fn put(&mut self, validator: &VerifyingKey, power: Power) {
        self.members
            .insert(validator.to_bytes(), (*validator, power));
    }

    /// Stop trusting `validator`. Returns the power it had, if it was trusted.
    pub fn remove(&mut self, validator: &VerifyingKey) -> Option<Power> {
        self.members
            .remove(&validator.to_bytes())
            .map(|(_, power)| power)
    }

    pub fn contains(&self, validator: &VerifyingKey) -> bool {
        self.members.contains_key(&validator.to_bytes())
    }

    pub fn contains_bytes(&self, validator: &VerifyingKeyBytes) -> bool {
        self.members.contains_key(validator)
    }

    pub fn power(&self, validator: &VerifyingKey) -> Option<&Power> {
        self.members
            .get(&validator.to_bytes())
            .map(|(_, power)| power)
    }

    /// Get the power of the validator whose verifying key bytes are `validator`. Keys that are not in the
    /// set have zero power.
    pub fn power_of_bytes(&self, validator: &VerifyingKeyBytes) -> Power {
        self.members
            .get(validator)
            .map_or(Power::new(0), |(_, power)| *power)
    }

    pub fn total_power(&self) -> TotalPower {
        let mut total_power = TotalPower::new(0);
        for (_, power) in self.members.values() {
            total_power += *power
        }
        total_power
    }

    /// Walk through the trusted keys in ascending order of their bytes.
    pub fn validators(&self) -> impl Iterator<Item = &VerifyingKey> {
        self.members.values().map(|(validator, _)| validator)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
