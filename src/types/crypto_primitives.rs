/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! The definitions and re-exports in this module provide two categories of cryptographic primitives:
//! 1. **Cryptographic Hashes**: SHA-512Half, built on the [`sha2`] crate.
//! 2. **Digital Signatures**: provided by the [`ed25519_dalek`] crate.
//!
//! ## Domain separation
//!
//! Every hash computed in this crate is computed over a four byte [`HashPrefix`] followed by the
//! canonical serialization of the hashed object. Prefixes keep, for example, a transaction's bytes from
//! ever hashing to the same value as an inner node with the same bytes.

use super::data_types::{CryptoHash, SignatureBytes};

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha512 as CryptoHasher;

pub use ed25519_dalek::{Signature, SignatureError, Signer, SigningKey, Verifier, VerifyingKey};

/// Four byte domain-separation prefixes that are hashed in front of canonical serializations.
pub struct HashPrefix;

impl HashPrefix {
    /// Inner SHAMap node.
    pub const INNER_NODE: [u8; 4] = *b"MIN\0";

    /// Account state leaf.
    pub const LEAF_NODE: [u8; 4] = *b"MLN\0";

    /// Transaction-with-metadata leaf.
    pub const TX_NODE: [u8; 4] = *b"SND\0";

    /// Transaction id, and transaction-without-metadata leaf.
    pub const TRANSACTION_ID: [u8; 4] = *b"TXN\0";

    /// Ledger header.
    pub const LEDGER_MASTER: [u8; 4] = *b"LWR\0";

    /// Signed consensus proposal.
    pub const PROPOSAL: [u8; 4] = *b"PRP\0";

    /// Signed validation.
    pub const VALIDATION: [u8; 4] = *b"VAL\0";
}

/// Compute the SHA-512Half digest (the first 32 bytes of SHA-512) of the concatenation of `parts`.
pub fn sha512_half(parts: &[&[u8]]) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest[..32]);
    CryptoHash::new(bytes)
}

/// Compute the id of a serialized transaction. This is also the hash of the transaction's leaf in a
/// transaction set.
pub fn transaction_id(tx: &[u8]) -> CryptoHash {
    sha512_half(&[&HashPrefix::TRANSACTION_ID[..], tx])
}

/// A facade around [`SigningKey`] that implements method for [`sign`](Self::sign)-ing messages as well
/// as a getter for the [`public`](Self::public) key associated with the signing key.
#[derive(Clone)]
pub struct Keypair(pub(crate) SigningKey);

impl Keypair {
    /// Create a `Keypair` that wraps over `signing_key`.
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Sign an arbitrary `message` with the `Keypair`.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(message).to_bytes())
    }

    /// Get the `VerifyingKey` of this `Keypair`.
    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }
}
