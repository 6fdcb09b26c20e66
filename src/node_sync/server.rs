/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Implements the [`NodeSyncServer`], which answers requests for ledger headers and SHAMap nodes from
//! replicas that are acquiring ledgers.
//!
//! The server only serves data that never changes: closed ledgers from the
//! [ledger history](crate::ledger::LedgerHistoryCamera), nodes in the tree-node cache, and objects in the
//! node store. It therefore never contends with the algorithm thread for anything but the read lock of
//! the ledger history.
//!
//! Requests are handed from a dispatcher thread to a fixed pool of worker threads over a bounded
//! queue. When every worker is busy and the queue is full, further requests are dropped: the
//! requesting replica will time out and ask again, possibly of another peer.
//!
//! The client side of this protocol is explained [here](crate::node_sync::inbound).

use std::{
    cmp::min,
    sync::{
        mpsc::{self, Receiver, Sender, SyncSender, TryRecvError, TrySendError},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, SystemTime},
};

use ed25519_dalek::VerifyingKey;

use crate::{
    events::{Event, ReceiveNodeRequestEvent, SendNodeResponseEvent},
    ledger::{Ledger, LedgerHistoryCamera},
    networking::{
        receiving::NodeSyncServerStub, sending::SenderHandle, Network, NodeSyncRequest,
        NodeSyncResponse,
    },
    node_store::NodeStore,
    shamap::{Family, SHAMapType},
    types::data_types::CryptoHash,
};

/// How long the dispatcher waits for a request before checking for the shutdown signal again.
const DISPATCH_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Immutable parameters that define the behaviour of the [`NodeSyncServer`].
#[derive(Clone, Debug)]
pub(crate) struct NodeSyncServerConfiguration {
    /// Number of worker threads.
    pub(crate) workers: usize,

    /// Number of requests that may wait for a worker.
    pub(crate) queue_size: usize,

    /// Maximum number of objects or nodes sent in one response.
    pub(crate) response_limit: usize,

    /// Maximum number of levels below a requested node that are sent along with it.
    pub(crate) max_fat_depth: u8,
}

type Job = (VerifyingKey, NodeSyncRequest);

pub(crate) struct NodeSyncServer<N: Network + 'static, S: NodeStore> {
    config: NodeSyncServerConfiguration,
    family: Arc<Family<S>>,
    history: LedgerHistoryCamera<S>,
    receiver: NodeSyncServerStub,
    sender: SenderHandle<N>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network + 'static, S: NodeStore> NodeSyncServer<N, S> {
    pub(crate) fn new(
        config: NodeSyncServerConfiguration,
        family: Arc<Family<S>>,
        history: LedgerHistoryCamera<S>,
        requests: Receiver<(VerifyingKey, NodeSyncRequest)>,
        network: N,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            config,
            family,
            history,
            receiver: NodeSyncServerStub::new(requests),
            sender: SenderHandle::new(network),
            shutdown_signal,
            event_publisher,
        }
    }

    pub(crate) fn start(self) -> JoinHandle<()> {
        thread::spawn(move || {
            let (job_sender, job_receiver) = mpsc::sync_channel::<Job>(self.config.queue_size);
            let job_receiver = Arc::new(Mutex::new(job_receiver));

            let workers: Vec<JoinHandle<()>> = (0..self.config.workers.max(1))
                .map(|_| {
                    NodeSyncWorker {
                        config: self.config.clone(),
                        family: Arc::clone(&self.family),
                        history: self.history.clone(),
                        sender: self.sender.clone(),
                        event_publisher: self.event_publisher.clone(),
                    }
                    .start(Arc::clone(&job_receiver))
                })
                .collect();

            self.dispatch(job_sender);

            for worker in workers {
                if worker.join().is_err() {
                    log::error!("Node sync worker panicked");
                }
            }
        })
    }

    /// Hand requests to the workers until the shutdown signal arrives. Returning drops `jobs`, which
    /// stops the workers once they have drained the queue.
    fn dispatch(&self, jobs: SyncSender<Job>) {
        loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("Node sync server thread disconnected from main thread")
                }
            }

            match self.receiver.recv_request(DISPATCH_POLL_INTERVAL) {
                Ok(job) => match jobs.try_send(job) {
                    Ok(()) => (),
                    Err(TrySendError::Full((origin, _))) => log::debug!(
                        "Node sync queue is full, dropping request from {:?}",
                        origin.to_bytes()
                    ),
                    Err(TrySendError::Disconnected(_)) => {
                        log::error!("Every node sync worker has exited");
                        return;
                    }
                },
                Err(_) => thread::yield_now(),
            }
        }
    }
}

/// A worker thread of the [`NodeSyncServer`]. Every worker sends its own responses.
struct NodeSyncWorker<N: Network + 'static, S: NodeStore> {
    config: NodeSyncServerConfiguration,
    family: Arc<Family<S>>,
    history: LedgerHistoryCamera<S>,
    sender: SenderHandle<N>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network + 'static, S: NodeStore> NodeSyncWorker<N, S> {
    fn start(mut self, jobs: Arc<Mutex<Receiver<Job>>>) -> JoinHandle<()> {
        thread::spawn(move || loop {
            let job = jobs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .recv();
            let (origin, request) = match job {
                Ok(job) => job,
                Err(_) => return,
            };

            Event::ReceiveNodeRequest(ReceiveNodeRequestEvent {
                timestamp: SystemTime::now(),
                peer: origin.to_bytes(),
                requested: request_len(&request),
            })
            .publish(&self.event_publisher);

            let response = self.serve(request);
            if response.is_empty() {
                continue;
            }
            let sent = response.len();
            self.sender.send(origin, response);

            Event::SendNodeResponse(SendNodeResponseEvent {
                timestamp: SystemTime::now(),
                peer: origin.to_bytes(),
                sent,
            })
            .publish(&self.event_publisher);
        })
    }

    fn serve(&self, request: NodeSyncRequest) -> NodeSyncResponse {
        match request {
            NodeSyncRequest::GetObjects { hashes } => NodeSyncResponse::Objects {
                objects: hashes
                    .iter()
                    .filter_map(|hash| self.get_object(hash).map(|bytes| (*hash, bytes)))
                    .take(self.config.response_limit)
                    .collect(),
            },
            NodeSyncRequest::GetLedgerNodes {
                ledger,
                map_type,
                node_ids,
                depth,
            } => {
                let mut nodes = Vec::new();
                if let Some(closed) = self.get_ledger(&ledger) {
                    let map = match map_type {
                        SHAMapType::State => closed.state_map(),
                        SHAMapType::Transaction => closed.tx_map(),
                    };
                    let depth = min(depth, self.config.max_fat_depth);
                    for node_id in node_ids {
                        if nodes.len() >= self.config.response_limit {
                            break;
                        }
                        match map.get_node_fat(&node_id, depth) {
                            Ok(Some(fat)) => nodes.extend(fat),
                            Ok(None) => (),
                            Err(err) => {
                                log::debug!("Cannot serve node of ledger {}: {}", ledger, err)
                            }
                        }
                    }
                    nodes.truncate(self.config.response_limit);
                }
                NodeSyncResponse::LedgerNodes {
                    ledger,
                    map_type,
                    nodes,
                }
            }
        }
    }

    /// Look for an object in the tree-node cache, then among the headers of the ledgers in the history,
    /// then in the node store.
    fn get_object(&self, hash: &CryptoHash) -> Option<Vec<u8>> {
        if let Some(node) = self.family.cache().fetch(hash) {
            return Some(node.serialize_with_prefix());
        }
        if let Some(ledger) = self.history.get(hash) {
            return Some(ledger.info().canonical_bytes());
        }
        match self.family.db().fetch(hash) {
            Ok(object) => object.map(|object| object.data),
            Err(err) => {
                log::debug!("Cannot serve object {}: {}", hash, err);
                None
            }
        }
    }

    fn get_ledger(&self, hash: &CryptoHash) -> Option<Arc<Ledger<S>>> {
        self.history.get(hash).or_else(|| {
            Ledger::load(Arc::clone(&self.family), hash)
                .map(Arc::new)
                .ok()
        })
    }
}

fn request_len(request: &NodeSyncRequest) -> usize {
    match request {
        NodeSyncRequest::GetObjects { hashes } => hashes.len(),
        NodeSyncRequest::GetLedgerNodes { node_ids, .. } => node_ids.len(),
    }
}
