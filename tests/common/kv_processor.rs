//! A toy transaction processor over a key/value state.
//!
//! A transaction is a 32-byte key followed by a value. Applying it writes the value under the key, or
//! erases the key if the value is empty. Transactions shorter than a key fail.

use shamap_consensus::{
    ledger::{ApplyOutcome, LedgerError, StateView, TransactionProcessor},
    types::data_types::CryptoHash,
};

pub(crate) struct KvProcessor;

impl TransactionProcessor for KvProcessor {
    fn apply(
        &mut self,
        _txid: &CryptoHash,
        tx: &[u8],
        view: &mut dyn StateView,
    ) -> Result<ApplyOutcome, LedgerError> {
        if tx.len() < 32 {
            return Ok(ApplyOutcome::Failed);
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&tx[..32]);
        let key = CryptoHash::new(key);
        let value = &tx[32..];
        if value.is_empty() {
            view.erase(key);
        } else {
            view.put(key, value.to_vec());
        }
        Ok(ApplyOutcome::Applied { meta: Vec::new() })
    }
}

/// A key whose bytes are all `byte`.
pub(crate) fn key(byte: u8) -> CryptoHash {
    CryptoHash::new([byte; 32])
}

/// A transaction that writes `value` under `key(byte)`.
pub(crate) fn put_tx(byte: u8, value: &[u8]) -> Vec<u8> {
    let mut tx = vec![byte; 32];
    tx.extend_from_slice(value);
    tx
}
