use ed25519_dalek::SigningKey;
use rand::{rngs::StdRng, Rng, SeedableRng};
use shamap_consensus::types::{crypto_primitives::Keypair, data_types::Power, validator_set::ValidatorSet};

/// Deterministically generate `n` signing keys from `seed`.
pub(crate) fn signing_keys(n: usize, seed: u64) -> Vec<SigningKey> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| SigningKey::from_bytes(&rng.gen::<[u8; 32]>()))
        .collect()
}

pub(crate) fn keypairs(n: usize, seed: u64) -> Vec<Keypair> {
    signing_keys(n, seed).into_iter().map(Keypair::new).collect()
}

/// A validator set in which every one of `keys` has a power of 1.
pub(crate) fn validator_set(keys: &[SigningKey]) -> ValidatorSet {
    let mut validator_set = ValidatorSet::new();
    for key in keys {
        validator_set.put(&key.verifying_key(), Power::new(1));
    }
    validator_set
}
