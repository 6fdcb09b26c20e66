/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Federated consensus on the transaction set and close time of the next ledger.
//!
//! # Rounds
//!
//! Each round decides the ledger that follows the last closed ledger (LCL). A round goes through three
//! phases:
//! 1. **Open**: the open ledger collects transactions. The ledger closes when it has been open long
//!    enough, or when more than half of the previous round's proposers have already closed or validated.
//! 2. **Establish**: every proposing validator takes a position (a transaction set and a close time),
//!    signs it, and broadcasts it. Transactions that some positions include and others do not become
//!    disputes. As the round goes on, the share of peers that must include a disputed transaction for us
//!    to keep voting for it rises, so positions converge.
//! 3. **Accepted**: once more than 80% of the trusted weight agrees with our position, and enough of it
//!    agrees on a close time, the agreed set is applied to the LCL to build the next ledger.
//!
//! Validators that find out the network is building on a different LCL bow out of the round and try to
//! acquire the network's LCL. A round that drags on for too long expires, and the configured
//! [`TimeoutPolicy`](types::TimeoutPolicy) decides what happens next.
//!
//! # Modules
//!
//! - [`implementation`]: the [`Consensus`](implementation::Consensus) state machine.
//! - [`pluggables`]: the [`Adaptor`](pluggables::Adaptor) and [`Clock`](pluggables::Clock) traits it is
//!   built against.
//! - [`timing`]: the stateless rules that decide when to close and when consensus is reached.
//! - [`proposal`], [`disputed_tx`], [`tx_set`]: the objects a round is made of.
//! - [`params`], [`types`]: parameters, phases, modes, and results.

pub mod disputed_tx;

pub mod implementation;

pub mod params;

pub mod pluggables;

pub mod proposal;

pub mod timing;

pub mod tx_set;

pub mod types;

pub use implementation::{Consensus, ConsensusConfiguration, ConsensusError};
pub use params::ConsensusParams;
pub use pluggables::{Adaptor, Clock, SystemClock};
pub use proposal::{Proposal, SignedProposal};
pub use tx_set::TxSet;
pub use types::{ConsensusMode, ConsensusPhase, ConsensusResult, ConsensusState, TimeoutPolicy};
