/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Validations: validators' signed statements about the ledgers they built.
//!
//! After a round, every validator builds the agreed ledger and broadcasts a validation for its hash.
//! Because validators build ledgers independently, validations are what tell a validator whether the
//! ledger it built is the one the network built. A ledger with a quorum of trusted validations is
//! *fully validated*, and only fully validated ledgers are written to the node store.
//!
//! Validations also help validators that fell behind: [`get_nodes_after`](Validations::get_nodes_after)
//! tells the consensus engine how many validators have already moved past its last closed ledger, and
//! [`get_preferred_ledger`](Validations::get_preferred_ledger) tells it which ledger the network is
//! building on.

pub mod implementation;

pub mod types;

pub use implementation::Validations;
pub use types::{AddOutcome, SignedValidation, Validation, ValidationError, ValidationParams};
