/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Building the next ledger by applying an agreed transaction set on top of its parent.
//!
//! Every validator that builds on the same parent with the same transaction set and the same
//! [`TransactionProcessor`] must end up with the same ledger, so transactions are applied in a canonical
//! order that every validator can compute from the set alone: ascending by `txid XOR set_hash`. Mixing
//! in the set hash keeps a submitter from choosing a transaction id that always sorts first.
//!
//! A transaction may depend on one that sorts after it. Transactions whose processor returns
//! [`Retry`](ApplyOutcome::Retry) are therefore retried in further passes, up to
//! [`LEDGER_TOTAL_PASSES`].

use crate::{
    node_store::NodeStore,
    types::data_types::{CryptoHash, NetTime},
};

use super::{
    implementation::{Ledger, LedgerError},
    view::{Sandbox, StateView},
};

/// Maximum number of passes over the transactions that still have to be retried.
pub const LEDGER_TOTAL_PASSES: usize = 3;

/// Number of passes that are always made, even if a pass applies nothing.
pub const LEDGER_RETRY_PASSES: usize = 1;

/// Methods that a type needs to implement to serve as the transaction semantics of a ledger network.
///
/// Besides implementing the method, implementors are expected to be *deterministic*: applying the same
/// transaction to the same state must always give the same outcome and the same writes.
pub trait TransactionProcessor: Send + 'static {
    /// Apply the transaction `tx` with id `txid` to `view`. Writes made to `view` are kept only if the
    /// outcome is [`Applied`](ApplyOutcome::Applied).
    fn apply(
        &mut self,
        txid: &CryptoHash,
        tx: &[u8],
        view: &mut dyn StateView,
    ) -> Result<ApplyOutcome, LedgerError>;
}

/// The outcome of applying one transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The transaction was applied, and produced `meta`, which is stored next to it in the ledger.
    Applied { meta: Vec<u8> },

    /// The transaction cannot be applied yet, but may be after other transactions in the set.
    Retry,

    /// The transaction can never be applied on top of this ledger.
    Failed,
}

/// What happened to each transaction given to [`build_ledger`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub applied: Vec<CryptoHash>,
    pub failed: Vec<CryptoHash>,

    /// Transactions that still asked to be retried after the last pass.
    pub retriable: Vec<CryptoHash>,
}

/// Order `transactions` canonically for a set with hash `set_hash`.
pub fn canonical_order(
    transactions: impl IntoIterator<Item = (CryptoHash, Vec<u8>)>,
    set_hash: &CryptoHash,
) -> Vec<(CryptoHash, Vec<u8>)> {
    let salt = set_hash.bytes();
    let mut ordered: Vec<([u8; 32], CryptoHash, Vec<u8>)> = transactions
        .into_iter()
        .map(|(txid, tx)| {
            let mut key = txid.bytes();
            for (byte, salt) in key.iter_mut().zip(salt.iter()) {
                *byte ^= salt;
            }
            (key, txid, tx)
        })
        .collect();
    ordered.sort_by(|a, b| a.0.cmp(&b.0));
    ordered.into_iter().map(|(_, txid, tx)| (txid, tx)).collect()
}

/// Build and close the child of `parent` that results from applying `transactions` (the contents of
/// the agreed set with hash `set_hash`) with `processor`.
pub fn build_ledger<S: NodeStore, P: TransactionProcessor + ?Sized>(
    parent: &Ledger<S>,
    transactions: impl IntoIterator<Item = (CryptoHash, Vec<u8>)>,
    set_hash: &CryptoHash,
    close_time: NetTime,
    close_time_resolution: u8,
    close_time_correct: bool,
    processor: &mut P,
) -> Result<(Ledger<S>, BuildReport), LedgerError> {
    let mut built = Ledger::new_open(parent);
    let mut remaining = canonical_order(transactions, set_hash);
    let mut report = BuildReport::default();
    let mut certain_retry = true;

    for pass in 0..LEDGER_TOTAL_PASSES {
        let mut changes = 0;
        let mut retry = Vec::new();
        for (txid, tx) in remaining {
            let mut sandbox = Sandbox::new(&built);
            match processor.apply(&txid, &tx, &mut sandbox)? {
                ApplyOutcome::Applied { meta } => {
                    let writes = sandbox.into_changes();
                    built.apply_changes(writes)?;
                    built.add_transaction(txid, &tx, &meta)?;
                    report.applied.push(txid);
                    changes += 1;
                }
                ApplyOutcome::Failed => {
                    log::debug!("Transaction {} failed while building ledger {}", txid, built.seq());
                    report.failed.push(txid);
                    changes += 1;
                }
                ApplyOutcome::Retry => retry.push((txid, tx)),
            }
        }
        remaining = retry;

        if remaining.is_empty() || (changes == 0 && !certain_retry) {
            break;
        }
        if changes == 0 || pass >= LEDGER_RETRY_PASSES {
            certain_retry = false;
        }
    }

    report.retriable = remaining.into_iter().map(|(txid, _)| txid).collect();
    built.set_accepted(close_time, close_time_resolution, close_time_correct)?;
    Ok((built, report))
}
