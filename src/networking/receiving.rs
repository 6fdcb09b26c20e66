/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for receiving messages from the P2P network.

use std::{
    sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use ed25519_dalek::VerifyingKey;

use super::{
    messages::{ConsensusMessage, Message, NodeSyncMessage, NodeSyncRequest, NodeSyncResponse},
    network::Network,
};

/// Spawn the poller thread, which polls the [`Network`] for messages and distributes them into receiver
/// handles.
///
/// The kinds of messages that the poller polls are:
/// 1. Consensus messages (processed by the [algorithm](crate::algorithm) thread),
/// 2. Node sync requests (processed by the [`NodeSyncServer`](crate::node_sync::server::NodeSyncServer)),
///    and
/// 3. Node sync responses (processed by the algorithm thread's
///    [inbound ledgers](crate::node_sync::inbound::InboundLedgers)).
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    shutdown_signal: Receiver<()>,
) -> (
    JoinHandle<()>,
    Receiver<(VerifyingKey, ConsensusMessage)>,
    Receiver<(VerifyingKey, NodeSyncRequest)>,
    Receiver<(VerifyingKey, NodeSyncResponse)>,
) {
    let (to_consensus_msg_receiver, consensus_msg_receiver) = mpsc::channel();
    let (to_sync_request_receiver, sync_request_receiver) = mpsc::channel();
    let (to_sync_response_receiver, sync_response_receiver) = mpsc::channel();

    let poller_thread = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Poller thread disconnected from main thread")
            }
        }

        if let Some((origin, msg)) = network.recv() {
            match msg {
                Message::ConsensusMessage(c_msg) => {
                    let _ = to_consensus_msg_receiver.send((origin, c_msg));
                }
                Message::NodeSyncMessage(s_msg) => match s_msg {
                    NodeSyncMessage::NodeSyncRequest(s_req) => {
                        let _ = to_sync_request_receiver.send((origin, s_req));
                    }
                    NodeSyncMessage::NodeSyncResponse(s_res) => {
                        let _ = to_sync_response_receiver.send((origin, s_res));
                    }
                },
            }
        } else {
            thread::yield_now()
        }
    });
    (
        poller_thread,
        consensus_msg_receiver,
        sync_request_receiver,
        sync_response_receiver,
    )
}

/// A receiving end for [`ConsensusMessage`]s.
///
/// Messages are returned in arrival order. Positions for ledgers other than the one the engine is
/// working on are not filtered here: the engine keeps recent positions of every peer so that it can play
/// them back if it switches ledgers.
pub(crate) struct ConsensusMessageStub {
    receiver: Receiver<(VerifyingKey, ConsensusMessage)>,
}

impl ConsensusMessageStub {
    pub(crate) fn new(receiver: Receiver<(VerifyingKey, ConsensusMessage)>) -> ConsensusMessageStub {
        Self { receiver }
    }

    /// Receive a message, waiting until `deadline` at most.
    pub(crate) fn recv(
        &self,
        deadline: Instant,
    ) -> Result<(VerifyingKey, ConsensusMessage), ConsensusMessageReceiveError> {
        while Instant::now() < deadline {
            match self.receiver.recv_timeout(deadline - Instant::now()) {
                Ok((origin, msg)) => return Ok((origin, msg)),
                Err(RecvTimeoutError::Timeout) => thread::yield_now(),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ConsensusMessageReceiveError::Disconnected)
                }
            }
        }

        Err(ConsensusMessageReceiveError::Timeout)
    }
}

#[derive(Debug)]
pub(crate) enum ConsensusMessageReceiveError {
    Timeout,
    Disconnected,
}

/// A receiving end for node sync responses, read by the algorithm thread between consensus messages.
pub(crate) struct NodeSyncClientStub {
    responses: Receiver<(VerifyingKey, NodeSyncResponse)>,
}

impl NodeSyncClientStub {
    pub(crate) fn new(responses: Receiver<(VerifyingKey, NodeSyncResponse)>) -> NodeSyncClientStub {
        NodeSyncClientStub { responses }
    }

    /// Receive a [`NodeSyncResponse`] if available, else return
    /// [`NodeSyncResponseReceiveError::NotAvailable`].
    pub(crate) fn recv_response(
        &self,
    ) -> Result<(VerifyingKey, NodeSyncResponse), NodeSyncResponseReceiveError> {
        match self.responses.try_recv() {
            Ok((origin, response)) => Ok((origin, response)),
            Err(TryRecvError::Disconnected) => Err(NodeSyncResponseReceiveError::Disconnected),
            Err(TryRecvError::Empty) => Err(NodeSyncResponseReceiveError::NotAvailable),
        }
    }
}

#[derive(Debug)]
pub enum NodeSyncResponseReceiveError {
    Disconnected,
    NotAvailable,
}

/// A receiving end for node sync requests. The [`NodeSyncServerStub::recv_request`] method returns the
/// received request.
pub(crate) struct NodeSyncServerStub {
    requests: Receiver<(VerifyingKey, NodeSyncRequest)>,
}

impl NodeSyncServerStub {
    pub(crate) fn new(requests: Receiver<(VerifyingKey, NodeSyncRequest)>) -> NodeSyncServerStub {
        NodeSyncServerStub { requests }
    }

    /// Receive a [`NodeSyncRequest`], waiting for `timeout` at most. Returns
    /// [`NodeSyncRequestReceiveError::NotAvailable`] if none arrived.
    pub(crate) fn recv_request(
        &self,
        timeout: Duration,
    ) -> Result<(VerifyingKey, NodeSyncRequest), NodeSyncRequestReceiveError> {
        match self.requests.recv_timeout(timeout) {
            Ok((origin, request)) => Ok((origin, request)),
            // Safety: the node sync server thread (the only caller of this function) shuts down before the
            // poller thread (the sender side of this channel), so we will never be disconnected at this point.
            Err(RecvTimeoutError::Disconnected) => Err(NodeSyncRequestReceiveError::Disconnected),
            Err(RecvTimeoutError::Timeout) => Err(NodeSyncRequestReceiveError::NotAvailable),
        }
    }
}

#[derive(Debug)]
pub enum NodeSyncRequestReceiveError {
    Disconnected,
    NotAvailable,
}
