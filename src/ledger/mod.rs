/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Ledgers: the agreed-upon generations of shared state.
//!
//! A [`Ledger`](implementation::Ledger) is a header plus two SHAMaps, one for account state and one for
//! the transactions that were applied to the parent's account state to produce it. This module also
//! contains the machinery to produce ledgers:
//! - [`view`]: sandboxes that transactions are applied in, and the pool of pending transactions.
//! - [`build`]: applying an agreed transaction set on top of a parent ledger.
//! - [`close_time`]: close time resolution and rounding.
//! - [`history`]: an index of recently closed ledgers.

pub mod build;

pub mod close_time;

pub mod history;

pub mod implementation;

pub mod info;

pub mod view;

pub use build::{build_ledger, ApplyOutcome, BuildReport, TransactionProcessor};
pub use history::{LedgerHistory, LedgerHistoryCamera};
pub use implementation::{Ledger, LedgerError};
pub use info::LedgerInfo;
pub use view::{OpenView, Sandbox, StateView};
