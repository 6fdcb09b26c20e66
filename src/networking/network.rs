/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Network`] trait.

use ed25519_dalek::VerifyingKey;

use crate::types::validator_set::ValidatorSet;

use super::messages::Message;

/// Methods that a type needs to implement to carry messages between replicas.
///
/// `Network` implementations are handles: the replica clones the network once for each thread that sends
/// or receives, and every clone must reach the same peers. `broadcast` should reach every peer the
/// network is connected to, not only the validators, so that observers can follow consensus.
pub trait Network: Clone + Send {
    /// Inform the network provider of the trusted validator set on wake-up.
    fn init_validator_set(&mut self, validator_set: ValidatorSet);

    /// Send a message to all peers without blocking.
    fn broadcast(&mut self, message: Message);

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: VerifyingKey, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(VerifyingKey, Message)>;
}
