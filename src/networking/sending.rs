/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Outbound side of the replica's networking.

use ed25519_dalek::VerifyingKey;

use super::{messages::Message, network::Network};

/// Wraps the user's [`Network`] so that components can send positions, validations, transaction sets,
/// and node sync messages without converting them into a [`Message`] first.
#[derive(Clone)]
pub(crate) struct SenderHandle<N: Network> {
    network: N,
}

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn send<M: Into<Message>>(&mut self, peer: VerifyingKey, msg: M) {
        self.network.send(peer, msg.into())
    }

    pub(crate) fn broadcast<M: Into<Message>>(&mut self, msg: M) {
        self.network.broadcast(msg.into())
    }

    /// Send `msg` to `peer` if we know which peer has what we want, and ask everyone otherwise.
    pub(crate) fn send_or_broadcast<M: Into<Message>>(&mut self, peer: Option<VerifyingKey>, msg: M) {
        match peer {
            Some(peer) => self.send(peer, msg),
            None => self.broadcast(msg),
        }
    }
}
