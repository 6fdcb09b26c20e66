/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Acquisition of closed ledgers from peers.
//!
//! ## Acquiring a ledger
//!
//! A ledger is acquired knowing nothing but its hash, in two stages:
//! 1. **Header**: the header is requested with a [`GetObjects`](NodeSyncRequest::GetObjects) request, and
//!    accepted only if its canonical bytes hash to the ledger's hash. The header names the root hashes of
//!    the ledger's state and transaction maps.
//! 2. **Maps**: both maps are created [synching](crate::shamap::SHAMapState::Synching) towards their root
//!    hashes, and are filled in from the root down. Each request asks for the nodes that the maps report
//!    [missing](crate::shamap::SHAMap::get_missing_nodes), along with a few levels of their descendants.
//!    Every node is checked against the hash its parent expects before it is attached, and is written to
//!    the node store as soon as it is attached.
//!
//! Nodes already in the local node store are never requested, so acquiring a ledger that shares most of
//! its state with a ledger we have only transfers the difference.
//!
//! ## Choosing peers
//!
//! Requests go to the last peer that sent us something useful for the ledger, or to every peer if there
//! is none yet. A peer that sends a node that does not verify is forgotten. If no useful response
//! arrives within the request timeout, the missing data is requested again from every peer, and after
//! too many timeouts the acquisition is abandoned.

use std::{
    collections::HashMap,
    sync::{mpsc::Sender, Arc},
    time::{Duration, Instant, SystemTime},
};

use ed25519_dalek::VerifyingKey;

use crate::{
    events::{EndAcquireEvent, Event, StartAcquireEvent},
    ledger::{Ledger, LedgerInfo},
    networking::{sending::SenderHandle, Network, NodeSyncRequest, NodeSyncResponse},
    node_store::{NodeObject, NodeObjectType, NodeStore},
    shamap::{Family, SHAMap, SHAMapAddNode, SHAMapError, SHAMapType},
    types::data_types::CryptoHash,
};

/// Parameters of ledger acquisition.
#[derive(Clone, Debug)]
pub(crate) struct InboundConfiguration {
    /// How long to wait for a useful response before asking every peer again.
    pub(crate) request_timeout: Duration,

    /// Number of timeouts after which an acquisition is abandoned.
    pub(crate) max_timeouts: u32,

    /// Maximum number of missing nodes asked for in one request.
    pub(crate) max_missing_per_request: usize,

    /// Number of levels below each missing node to ask for along with it.
    pub(crate) fat_depth: u8,
}

/// A ledger being acquired.
struct InboundLedger<S: NodeStore> {
    hash: CryptoHash,
    header: Option<LedgerInfo>,
    state_map: Option<SHAMap<S>>,
    tx_map: Option<SHAMap<S>>,
    peer: Option<VerifyingKey>,
    last_progress: Instant,
    timeouts: u32,
}

impl<S: NodeStore> InboundLedger<S> {
    fn new(hash: CryptoHash, now: Instant) -> Self {
        Self {
            hash,
            header: None,
            state_map: None,
            tx_map: None,
            peer: None,
            last_progress: now,
            timeouts: 0,
        }
    }

    /// Accept a verified header, creating the maps to fill in.
    fn set_header(&mut self, family: &Arc<Family<S>>, info: LedgerInfo) {
        self.state_map = Some(SHAMap::new_synching(
            Arc::clone(family),
            info.account_hash,
            SHAMapType::State,
        ));
        self.tx_map = Some(SHAMap::new_synching(
            Arc::clone(family),
            info.tx_hash,
            SHAMapType::Transaction,
        ));
        self.header = Some(info);
    }

    fn map_mut(&mut self, map_type: SHAMapType) -> Option<&mut SHAMap<S>> {
        match map_type {
            SHAMapType::State => self.state_map.as_mut(),
            SHAMapType::Transaction => self.tx_map.as_mut(),
        }
    }

    /// Whether both maps are complete. Completed maps become immutable.
    fn finish_sync(&mut self) -> Result<bool, SHAMapError> {
        let state_done = match self.state_map.as_mut() {
            Some(map) => map.finish_sync()?,
            None => return Ok(false),
        };
        let tx_done = match self.tx_map.as_mut() {
            Some(map) => map.finish_sync()?,
            None => return Ok(false),
        };
        Ok(state_done && tx_done)
    }

    /// Take the parts of a completed acquisition.
    fn take_parts(&mut self) -> Option<(LedgerInfo, SHAMap<S>, SHAMap<S>)> {
        Some((
            self.header.take()?,
            self.state_map.take()?,
            self.tx_map.take()?,
        ))
    }
}

/// Every ledger the replica is currently acquiring. Owned and driven by the algorithm thread.
pub(crate) struct InboundLedgers<N: Network + 'static, S: NodeStore> {
    config: InboundConfiguration,
    family: Arc<Family<S>>,
    sender: SenderHandle<N>,
    acquiring: HashMap<CryptoHash, InboundLedger<S>>,

    /// Abandoned acquisitions, which are not restarted until a request timeout has passed.
    abandoned: HashMap<CryptoHash, Instant>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network + 'static, S: NodeStore> InboundLedgers<N, S> {
    pub(crate) fn new(
        config: InboundConfiguration,
        family: Arc<Family<S>>,
        sender: SenderHandle<N>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            config,
            family,
            sender,
            acquiring: HashMap::new(),
            abandoned: HashMap::new(),
            event_publisher,
        }
    }

    pub(crate) fn is_acquiring(&self, hash: &CryptoHash) -> bool {
        self.acquiring.contains_key(hash)
    }

    pub(crate) fn len(&self) -> usize {
        self.acquiring.len()
    }

    /// Start acquiring the ledger with `hash`, unless it is already being acquired. If the ledger turns
    /// out to be complete in the local node store, it is returned right away.
    pub(crate) fn acquire(&mut self, hash: CryptoHash, now: Instant) -> Option<Arc<Ledger<S>>> {
        if hash.is_zero() || self.acquiring.contains_key(&hash) {
            return None;
        }
        if let Some(abandoned_at) = self.abandoned.get(&hash) {
            if now.saturating_duration_since(*abandoned_at) < self.config.request_timeout {
                return None;
            }
            self.abandoned.remove(&hash);
        }

        log::debug!("Acquiring ledger {}", hash);
        Event::StartAcquire(StartAcquireEvent {
            timestamp: SystemTime::now(),
            ledger: hash,
        })
        .publish(&self.event_publisher);

        let mut inbound = InboundLedger::new(hash, now);

        // A ledger we stored earlier only needs the nodes that are not in the store.
        if let Ok(Some(object)) = self.family.db().fetch(&hash) {
            if object.obj_type == NodeObjectType::Ledger {
                if let Ok(info) = LedgerInfo::from_canonical_bytes(&object.data, &hash) {
                    inbound.set_header(&self.family, info);
                }
            }
        }

        self.acquiring.insert(hash, inbound);
        self.progress(&hash)
    }

    /// Process a response from `origin`. Returns the ledgers the response completed.
    pub(crate) fn on_response(
        &mut self,
        origin: VerifyingKey,
        response: NodeSyncResponse,
        now: Instant,
    ) -> Vec<Arc<Ledger<S>>> {
        let mut touched = Vec::new();
        match response {
            NodeSyncResponse::Objects { objects } => {
                for (hash, bytes) in objects {
                    let inbound = match self.acquiring.get_mut(&hash) {
                        Some(inbound) if inbound.header.is_none() => inbound,
                        _ => continue,
                    };
                    match LedgerInfo::from_canonical_bytes(&bytes, &hash) {
                        Ok(info) => {
                            inbound.set_header(&self.family, info);
                            inbound.peer = Some(origin);
                            inbound.last_progress = now;
                            inbound.timeouts = 0;
                            touched.push(hash);
                        }
                        Err(err) => {
                            log::warn!("Peer sent a bad header for ledger {}: {}", hash, err)
                        }
                    }
                }
            }
            NodeSyncResponse::LedgerNodes {
                ledger,
                map_type,
                nodes,
            } => {
                let inbound = match self.acquiring.get_mut(&ledger) {
                    Some(inbound) => inbound,
                    None => return Vec::new(),
                };
                let map = match inbound.map_mut(map_type) {
                    Some(map) => map,
                    None => return Vec::new(),
                };

                let mut useful = 0;
                let mut misbehaved = false;
                for (node_id, wire) in nodes {
                    match map.add_known_node(&node_id, &wire) {
                        Ok(SHAMapAddNode::Useful) => useful += 1,
                        Ok(SHAMapAddNode::Duplicate) | Ok(SHAMapAddNode::Invalid) => (),
                        Err(err @ SHAMapError::HashMismatch { .. })
                        | Err(err @ SHAMapError::InvalidNode { .. }) => {
                            log::warn!(
                                "Peer sent a bad node {} of ledger {}: {}",
                                node_id,
                                ledger,
                                err
                            );
                            misbehaved = true;
                            break;
                        }
                        Err(err) => {
                            log::error!("Cannot attach node {} of ledger {}: {}", node_id, ledger, err);
                            break;
                        }
                    }
                }

                if misbehaved {
                    if inbound.peer == Some(origin) {
                        inbound.peer = None;
                    }
                } else if useful > 0 {
                    inbound.peer = Some(origin);
                    inbound.last_progress = now;
                    inbound.timeouts = 0;
                    touched.push(ledger);
                }
            }
        }

        touched
            .iter()
            .filter_map(|hash| self.progress(hash))
            .collect()
    }

    /// Re-request the missing data of acquisitions that have made no progress for a request timeout,
    /// abandoning those that timed out too often.
    pub(crate) fn tick(&mut self, now: Instant) {
        let timeout = self.config.request_timeout;
        let stalled: Vec<CryptoHash> = self
            .acquiring
            .values()
            .filter(|inbound| now.saturating_duration_since(inbound.last_progress) >= timeout)
            .map(|inbound| inbound.hash)
            .collect();

        for hash in stalled {
            let abandon = match self.acquiring.get_mut(&hash) {
                Some(inbound) => {
                    inbound.timeouts += 1;
                    inbound.peer = None;
                    inbound.last_progress = now;
                    inbound.timeouts > self.config.max_timeouts
                }
                None => continue,
            };
            if abandon {
                log::warn!("Abandoning acquisition of ledger {}", hash);
                self.acquiring.remove(&hash);
                self.abandoned.insert(hash, now);
            } else {
                self.request(&hash);
            }
        }
    }

    /// Complete the acquisition of `hash` if it has everything, otherwise ask for what it is missing.
    fn progress(&mut self, hash: &CryptoHash) -> Option<Arc<Ledger<S>>> {
        let inbound = self.acquiring.get_mut(hash)?;
        match inbound.finish_sync() {
            Ok(true) => (),
            Ok(false) => {
                self.request(hash);
                return None;
            }
            Err(err) => {
                log::error!("Cannot check progress of ledger {}: {}", hash, err);
                return None;
            }
        }

        let mut inbound = self.acquiring.remove(hash)?;
        let (info, state_map, tx_map) = inbound.take_parts()?;
        let header = NodeObject::new(NodeObjectType::Ledger, info.hash, info.canonical_bytes());
        let ledger = match Ledger::from_parts(info, state_map, tx_map) {
            Ok(ledger) => ledger,
            Err(err) => {
                log::error!("Acquired ledger {} does not assemble: {}", hash, err);
                return None;
            }
        };
        if let Err(err) = self.family.db().store(&header) {
            log::error!("Cannot store header of acquired ledger {}: {}", hash, err);
        }

        log::debug!("Acquired ledger {} ({})", hash, ledger.seq());
        Event::EndAcquire(EndAcquireEvent {
            timestamp: SystemTime::now(),
            ledger: *hash,
            seq: ledger.seq(),
        })
        .publish(&self.event_publisher);

        Some(Arc::new(ledger))
    }

    /// Ask for the header of `hash` if we do not have it, otherwise for the missing nodes of its maps.
    fn request(&mut self, hash: &CryptoHash) {
        let inbound = match self.acquiring.get(hash) {
            Some(inbound) => inbound,
            None => return,
        };
        let peer = inbound.peer;

        let mut requests = Vec::new();
        if inbound.header.is_none() {
            requests.push(NodeSyncRequest::GetObjects {
                hashes: vec![*hash],
            });
        } else {
            for map in [&inbound.state_map, &inbound.tx_map].into_iter().flatten() {
                if !map.is_synching() {
                    continue;
                }
                match map.get_missing_nodes(self.config.max_missing_per_request) {
                    Ok(missing) if !missing.is_empty() => {
                        requests.push(NodeSyncRequest::GetLedgerNodes {
                            ledger: *hash,
                            map_type: map.map_type(),
                            node_ids: missing.into_iter().map(|(node_id, _)| node_id).collect(),
                            depth: self.config.fat_depth,
                        })
                    }
                    Ok(_) => (),
                    Err(err) => log::error!("Cannot list missing nodes of ledger {}: {}", hash, err),
                }
            }
        }

        for request in requests {
            self.sender.send_or_broadcast(peer, request);
        }
    }
}
