/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build, run, and initialize the storage of a replica.
//!
//! A replica is one node of a network that agrees, round by round, on a sequence of ledgers. Each
//! replica is uniquely identified by an [Ed25519 public key](ed25519_dalek::VerifyingKey).
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the replica](ReplicaSpec) with:
//!   1. `ReplicaSpec::builder` to construct a `ReplicaSpecBuilder`,
//!   2. The setters of the `ReplicaSpecBuilder`, and
//!   3. The `ReplicaSpecBuilder::build` method to construct a [ReplicaSpec],
//! - The function to [start](ReplicaSpec::start) a [Replica] given its specification,
//! - The function to [initialize](Replica::initialize) the replica's node store with a genesis ledger,
//! - [The type](Replica) which keeps the replica alive.
//!
//! ## Validators and observers
//!
//! Not every replica has to take part in consensus. A replica whose key is not in the
//! [validator set](Configuration::validator_set) still follows rounds, builds ledgers, and collects
//! validations, but never proposes nor validates. Its trust in ledgers comes only from the validations
//! of the validators in its validator set.
//!
//! For observers to keep up, the library user's [networking provider's](crate::networking) broadcast
//! method must send messages to all peers it is connected to, and not only the validators.
//!
//! ## Starting a replica
//!
//! ```ignore
//! let genesis = Replica::initialize(node_store.clone(), total_coins, accounts)?;
//!
//! let replica =
//!     ReplicaSpec::builder()
//!     .network(network)
//!     .node_store(node_store)
//!     .processor(processor)
//!     .clock(SystemClock)
//!     .last_closed(genesis)
//!     .configuration(configuration)
//!     .on_fully_validated(handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! ### Required setters
//!
//! - `.network(...)`
//! - `.node_store(...)`
//! - `.processor(...)`
//! - `.clock(...)`
//! - `.last_closed(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters are for registering user-defined event handlers for events from [crate::events]:
//! - `.on_accept_ledger(...)`
//! - `.on_fully_validated(...)`
//! - `.on_persist_ledger(...)`
//! - `.on_propose(...)`
//! - `.on_validate(...)`
//! - `.on_receive_position(...)`
//! - `.on_receive_validation(...)`
//! - `.on_reject_message(...)`
//! - `.on_start_round(...)`
//! - `.on_close_ledger(...)`
//! - `.on_create_dispute(...)`
//! - `.on_mode_change(...)`
//! - `.on_consensus_reached(...)`
//! - `.on_consensus_timeout(...)`
//! - `.on_switch_ledger(...)`
//! - `.on_equivocation(...)`
//! - `.on_start_acquire(...)`
//! - `.on_end_acquire(...)`
//! - `.on_receive_node_request(...)`
//! - `.on_send_node_response(...)`
//!
//! The replica's [configuration](Configuration) is also defined using the builder pattern:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(signing_key)
//!     .network_id(NetworkID::new(0))
//!     .validator_set(validator_set)
//!     .log_events(true)
//!     .build()
//! ```

use std::{
    sync::{
        mpsc::{self, Sender},
        Arc, RwLock,
    },
    thread::JoinHandle,
    time::Duration,
};

use ed25519_dalek::SigningKey;
use typed_builder::TypedBuilder;

use crate::{
    algorithm::{AdaptorConfiguration, Algorithm, LedgerAdaptor},
    consensus::{Clock, Consensus, ConsensusConfiguration, ConsensusParams, TimeoutPolicy},
    event_bus::*,
    events::*,
    ledger::{Ledger, LedgerError, LedgerHistory, LedgerHistoryCamera, TransactionProcessor},
    networking::{
        receiving::{start_polling, ConsensusMessageStub, NodeSyncClientStub},
        sending::SenderHandle,
        Network,
    },
    node_store::NodeStore,
    node_sync::{
        inbound::{InboundConfiguration, InboundLedgers},
        server::{NodeSyncServer, NodeSyncServerConfiguration},
    },
    shamap::{
        family::{DEFAULT_CACHE_TARGET_AGE, DEFAULT_CACHE_TARGET_SIZE},
        Family, SHAMapItem,
    },
    types::{
        crypto_primitives::Keypair,
        data_types::{CryptoHash, NetworkID},
        validator_set::ValidatorSet,
    },
    validations::{ValidationParams, Validations},
};

/// Stores the user-defined parameters required to start the replica, that is:
/// 1. The replica's [keypair](ed25519_dalek::SigningKey).
/// 2. The [network ID](crate::types::data_types::NetworkID) of the network it takes part in.
/// 3. The validator set: the validators whose positions and validations this replica trusts, and
///    their weights.
/// 4. The [consensus](ConsensusParams) and [validation](ValidationParams) timing parameters, and what
///    to do when a round [times out](TimeoutPolicy).
/// 5. How often the algorithm thread drives the current round forward.
/// 6. The sizes of the node sync server's worker pool and queue, and the limits on what it sends.
/// 7. How persistently ledgers are acquired from peers.
/// 8. How many closed ledgers are kept in memory, and how big the tree-node cache is.
/// 9. The "Log Events" flag, if set to "true" then logs should be printed.
///
/// ## Network ID
///
/// Positions and validations carry the network ID and are rejected by replicas of other networks. This
/// keeps a validator that runs on two networks with the same keypair from having its messages replayed
/// from one network onto the other.
///
/// ## Log Events
///
/// This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.network_id(...)`
    - `.validator_set(...)`
    - `.log_events(...)`

    Every other setter is optional and falls back to a default suitable for a production network.
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the replica's keypair, used to sign positions and validations. Required."))]
    pub me: SigningKey,
    #[builder(setter(doc = "Set the ID of the network the replica takes part in. Required."))]
    pub network_id: NetworkID,
    #[builder(setter(doc = "Set the validators the replica trusts, and their weights. Required."))]
    pub validator_set: ValidatorSet,
    #[builder(default, setter(doc = "Set the timing parameters of consensus rounds. Optional."))]
    pub consensus_params: ConsensusParams,
    #[builder(default, setter(doc = "Set the parameters that decide which validations are current. Optional."))]
    pub validation_params: ValidationParams,
    #[builder(default, setter(doc = "Set what the replica does when a round expires. Optional."))]
    pub timeout_policy: TimeoutPolicy,
    #[builder(default = Duration::from_secs(1), setter(doc = "Set how often the current round is driven forward. Defaults to 1s."))]
    pub timer_interval: Duration,
    #[builder(default = 4, setter(doc = "Set the number of threads serving node sync requests. Defaults to 4."))]
    pub node_sync_workers: usize,
    #[builder(default = 64, setter(doc = "Set the number of node sync requests that may wait for a worker before further requests are dropped. Defaults to 64."))]
    pub node_sync_queue_size: usize,
    #[builder(default = 256, setter(doc = "Set the maximum number of objects or nodes sent in one node sync response. Defaults to 256."))]
    pub node_sync_response_limit: usize,
    #[builder(default = 2, setter(doc = "Set the maximum number of levels below a requested node that are sent along with it. Defaults to 2."))]
    pub node_sync_max_fat_depth: u8,
    #[builder(default = Duration::from_secs(3), setter(doc = "Set how long an acquisition waits for a useful response before asking every peer again. Defaults to 3s."))]
    pub acquire_timeout: Duration,
    #[builder(default = 10, setter(doc = "Set the number of timeouts after which an acquisition is abandoned. Defaults to 10."))]
    pub acquire_max_timeouts: u32,
    #[builder(default = 128, setter(doc = "Set the maximum number of missing nodes asked for in one request. Defaults to 128."))]
    pub acquire_max_missing: usize,
    #[builder(default = 256, setter(doc = "Set the number of ledgers before the newest fully validated ledger that are kept in memory. Defaults to 256."))]
    pub history_keep: u32,
    #[builder(default = DEFAULT_CACHE_TARGET_SIZE, setter(doc = "Set the number of tree nodes the cache tries to stay under. Optional."))]
    pub cache_target_size: usize,
    #[builder(default = DEFAULT_CACHE_TARGET_AGE, setter(doc = "Set the age after which unused cached tree nodes are evicted. Optional."))]
    pub cache_target_age: Duration,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

/// Parameters of every component of a replica, split out of a [Configuration].
struct ComponentConfigurations {
    consensus: ConsensusConfiguration,
    adaptor: AdaptorConfiguration,
    node_sync_server: NodeSyncServerConfiguration,
    inbound: InboundConfiguration,
}

impl From<Configuration> for ComponentConfigurations {
    fn from(config: Configuration) -> Self {
        let keypair = Keypair::new(config.me);
        ComponentConfigurations {
            adaptor: AdaptorConfiguration {
                keypair: keypair.clone(),
                network_id: config.network_id,
                history_keep: config.history_keep,
                tx_set_request_interval: config.timer_interval,
                peer_ledger_freshness: config.consensus_params.propose_freshness,
            },
            node_sync_server: NodeSyncServerConfiguration {
                workers: config.node_sync_workers,
                queue_size: config.node_sync_queue_size,
                response_limit: config.node_sync_response_limit,
                max_fat_depth: config.node_sync_max_fat_depth,
            },
            inbound: InboundConfiguration {
                request_timeout: config.acquire_timeout,
                max_timeouts: config.acquire_max_timeouts,
                max_missing_per_request: config.acquire_max_missing,
                fat_depth: config.node_sync_max_fat_depth,
            },
            consensus: ConsensusConfiguration {
                keypair,
                network_id: config.network_id,
                validator_set: config.validator_set,
                params: config.consensus_params,
                timeout_policy: config.timeout_policy,
            },
        }
    }
}

/// Stores all necessary parameters and trait implementations required to run the [Replica].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.network(...)`
    - `.node_store(...)`
    - `.processor(...)`
    - `.clock(...)`
    - `.last_closed(...)`
    - `.configuration(...)`

    Optional:
    - `.on_accept_ledger(...)`
    - `.on_fully_validated(...)`
    - `.on_persist_ledger(...)`
    - `.on_propose(...)`
    - `.on_validate(...)`
    - `.on_receive_position(...)`
    - `.on_receive_validation(...)`
    - `.on_reject_message(...)`
    - `.on_start_round(...)`
    - `.on_close_ledger(...)`
    - `.on_create_dispute(...)`
    - `.on_mode_change(...)`
    - `.on_consensus_reached(...)`
    - `.on_consensus_timeout(...)`
    - `.on_switch_ledger(...)`
    - `.on_equivocation(...)`
    - `.on_start_acquire(...)`
    - `.on_end_acquire(...)`
    - `.on_receive_node_request(...)`
    - `.on_send_node_response(...)`
"))]
pub struct ReplicaSpec<S: NodeStore, P: TransactionProcessor, N: Network + 'static, C: Clock + 'static> {
    // Required parameters
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the store that SHAMap nodes and ledger headers are persisted into. The argument must implement the [NodeStore](crate::node_store::NodeStore) trait. Required."))]
    node_store: S,
    #[builder(setter(doc = "Set the code that applies transactions to ledger state. The argument must implement the [TransactionProcessor](crate::ledger::TransactionProcessor) trait. Required."))]
    processor: P,
    #[builder(setter(doc = "Set the source of time. The argument must implement the [Clock](crate::consensus::Clock) trait. Required."))]
    clock: C,
    #[builder(setter(doc = "Set the hash of the ledger to start from. The ledger must be in the node store, e.g., put there by [Replica::initialize]. Required."))]
    last_closed: CryptoHash,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a replica. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&AcceptLedgerEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AcceptLedgerEvent>),
    doc = "Register a handler closure to be invoked after the replica builds a ledger from the result of a round. Optional."))]
    on_accept_ledger: Option<HandlerPtr<AcceptLedgerEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&FullyValidatedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<FullyValidatedEvent>),
    doc = "Register a handler closure to be invoked after a ledger gathers a quorum of trusted validations. Optional."))]
    on_fully_validated: Option<HandlerPtr<FullyValidatedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PersistLedgerEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PersistLedgerEvent>),
    doc = "Register a handler closure to be invoked after a fully validated ledger is written to the node store. Optional."))]
    on_persist_ledger: Option<HandlerPtr<PersistLedgerEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a position. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ValidateEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ValidateEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a validation. Optional."))]
    on_validate: Option<HandlerPtr<ValidateEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceivePositionEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceivePositionEvent>),
    doc = "Register a handler closure to be invoked after the replica accepts a peer's position. Optional."))]
    on_receive_position: Option<HandlerPtr<ReceivePositionEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveValidationEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveValidationEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a validation with a valid signature. Optional."))]
    on_receive_validation: Option<HandlerPtr<ReceiveValidationEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RejectMessageEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RejectMessageEvent>),
    doc = "Register a handler closure to be invoked after the replica rejects a message from a peer. Optional."))]
    on_reject_message: Option<HandlerPtr<RejectMessageEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartRoundEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartRoundEvent>),
    doc = "Register a handler closure to be invoked after the replica starts a round. Optional."))]
    on_start_round: Option<HandlerPtr<StartRoundEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CloseLedgerEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CloseLedgerEvent>),
    doc = "Register a handler closure to be invoked after the replica closes its open ledger. Optional."))]
    on_close_ledger: Option<HandlerPtr<CloseLedgerEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CreateDisputeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CreateDisputeEvent>),
    doc = "Register a handler closure to be invoked after a transaction becomes disputed. Optional."))]
    on_create_dispute: Option<HandlerPtr<CreateDisputeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ModeChangeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ModeChangeEvent>),
    doc = "Register a handler closure to be invoked after the replica's consensus mode changes. Optional."))]
    on_mode_change: Option<HandlerPtr<ModeChangeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ConsensusReachedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ConsensusReachedEvent>),
    doc = "Register a handler closure to be invoked after a round reaches consensus. Optional."))]
    on_consensus_reached: Option<HandlerPtr<ConsensusReachedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ConsensusTimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ConsensusTimeoutEvent>),
    doc = "Register a handler closure to be invoked after a round expires. Optional."))]
    on_consensus_timeout: Option<HandlerPtr<ConsensusTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SwitchLedgerEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SwitchLedgerEvent>),
    doc = "Register a handler closure to be invoked after the replica finds out the network builds on another last closed ledger. Optional."))]
    on_switch_ledger: Option<HandlerPtr<SwitchLedgerEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EquivocationEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EquivocationEvent>),
    doc = "Register a handler closure to be invoked after a validator is caught validating two ledgers with the same sequence number. Optional."))]
    on_equivocation: Option<HandlerPtr<EquivocationEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartAcquireEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartAcquireEvent>),
    doc = "Register a handler closure to be invoked after the replica starts acquiring a ledger from peers. Optional."))]
    on_start_acquire: Option<HandlerPtr<StartAcquireEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EndAcquireEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EndAcquireEvent>),
    doc = "Register a handler closure to be invoked after the replica finishes acquiring a ledger. Optional."))]
    on_end_acquire: Option<HandlerPtr<EndAcquireEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveNodeRequestEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveNodeRequestEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a node sync request from a peer. Optional."))]
    on_receive_node_request: Option<HandlerPtr<ReceiveNodeRequestEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SendNodeResponseEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SendNodeResponseEvent>),
    doc = "Register a handler closure to be invoked after the replica sends a node sync response to a peer. Optional."))]
    on_send_node_response: Option<HandlerPtr<SendNodeResponseEvent>>,
}

impl<S: NodeStore, P: TransactionProcessor, N: Network + 'static, C: Clock + 'static>
    ReplicaSpec<S, P, N, C>
{
    /// Starts all threads and channels associated with running a replica, and returns the handles to them
    /// in a [Replica] struct.
    ///
    /// Fails if the last closed ledger cannot be loaded from the node
    /// store.
    pub fn start(mut self) -> Result<Replica<S>, LedgerError> {
        let log_events = self.configuration.log_events;
        let cache_target_size = self.configuration.cache_target_size;
        let cache_target_age = self.configuration.cache_target_age;
        let validation_params = self.configuration.validation_params.clone();
        let validator_set = self.configuration.validator_set.clone();
        let network_id = self.configuration.network_id;
        let timer_interval = self.configuration.timer_interval;
        let configs: ComponentConfigurations = self.configuration.into();

        // The ledger we start from is in the store, so it was fully validated.
        let family = Arc::new(Family::with_cache_params(
            self.node_store,
            cache_target_size,
            cache_target_age,
        ));
        let last_closed = Arc::new(Ledger::load(Arc::clone(&family), &self.last_closed)?);
        let mut history = LedgerHistory::new();
        history.set_last_closed(Arc::clone(&last_closed));
        history.set_validated(&last_closed.hash());
        let history = Arc::new(RwLock::new(history));

        self.network.init_validator_set(validator_set.clone());

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, consensus_msgs, node_sync_requests, node_sync_responses) =
            start_polling(self.network.clone(), poller_shutdown_receiver);

        let event_handlers = EventHandlers::new(
            log_events,
            UserHandlers {
                on_accept_ledger: self.on_accept_ledger,
                on_fully_validated: self.on_fully_validated,
                on_persist_ledger: self.on_persist_ledger,
                on_propose: self.on_propose,
                on_validate: self.on_validate,
                on_receive_position: self.on_receive_position,
                on_receive_validation: self.on_receive_validation,
                on_reject_message: self.on_reject_message,
                on_start_round: self.on_start_round,
                on_close_ledger: self.on_close_ledger,
                on_create_dispute: self.on_create_dispute,
                on_mode_change: self.on_mode_change,
                on_consensus_reached: self.on_consensus_reached,
                on_consensus_timeout: self.on_consensus_timeout,
                on_switch_ledger: self.on_switch_ledger,
                on_equivocation: self.on_equivocation,
                on_start_acquire: self.on_start_acquire,
                on_end_acquire: self.on_end_acquire,
                on_receive_node_request: self.on_receive_node_request,
                on_send_node_response: self.on_send_node_response,
            },
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let (node_sync_server_shutdown, node_sync_server_shutdown_receiver) = mpsc::channel();
        let node_sync_server = NodeSyncServer::new(
            configs.node_sync_server,
            Arc::clone(&family),
            LedgerHistoryCamera::new(Arc::clone(&history)),
            node_sync_requests,
            self.network.clone(),
            node_sync_server_shutdown_receiver,
            event_publisher.clone(),
        )
        .start();

        let validations = Validations::new(
            validation_params,
            network_id,
            validator_set,
            event_publisher.clone(),
        );
        let inbound = InboundLedgers::new(
            configs.inbound,
            Arc::clone(&family),
            SenderHandle::new(self.network.clone()),
            event_publisher.clone(),
        );
        let adaptor = LedgerAdaptor::new(
            configs.adaptor,
            Arc::clone(&family),
            Arc::clone(&history),
            Arc::clone(&last_closed),
            validations,
            inbound,
            self.processor,
            self.network.clone(),
            self.clock.clone(),
            event_publisher.clone(),
        );
        let consensus = Consensus::new(
            configs.consensus,
            adaptor,
            self.clock,
            last_closed,
            event_publisher,
        );

        let (submission_sender, submissions) = mpsc::channel();
        let (algorithm_shutdown, algorithm_shutdown_receiver) = mpsc::channel();
        let algorithm = Algorithm::new(
            consensus,
            ConsensusMessageStub::new(consensus_msgs),
            NodeSyncClientStub::new(node_sync_responses),
            submissions,
            timer_interval,
            algorithm_shutdown_receiver,
        )
        .start();

        let (event_bus_shutdown, event_bus) = match event_subscriber {
            Some(event_subscriber) => {
                let (shutdown, shutdown_receiver) = mpsc::channel();
                (
                    Some(shutdown),
                    Some(start_event_bus(event_handlers, event_subscriber, shutdown_receiver)),
                )
            }
            None => (None, None),
        };

        Ok(Replica {
            ledger_history_camera: LedgerHistoryCamera::new(history),
            submission_sender,
            poller: Some(poller),
            poller_shutdown,
            algorithm: Some(algorithm),
            algorithm_shutdown,
            node_sync_server: Some(node_sync_server),
            node_sync_server_shutdown,
            event_bus,
            event_bus_shutdown,
        })
    }
}

/// A handle to the background threads of a replica. When this value is dropped, all background threads
/// are gracefully shut down.
pub struct Replica<S: NodeStore> {
    ledger_history_camera: LedgerHistoryCamera<S>,
    submission_sender: Sender<Vec<u8>>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    algorithm: Option<JoinHandle<()>>,
    algorithm_shutdown: Sender<()>,
    node_sync_server: Option<JoinHandle<()>>,
    node_sync_server_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<S: NodeStore> Replica<S> {
    /// Write the genesis ledger, holding `accounts` and `total_coins` in existence, into `node_store`.
    /// Returns the hash of the genesis ledger, which replicas of a new network start from.
    ///
    /// Every replica of a network must be initialized with the same accounts.
    pub fn initialize(
        node_store: S,
        total_coins: u64,
        accounts: impl IntoIterator<Item = SHAMapItem>,
    ) -> Result<CryptoHash, LedgerError> {
        let family = Arc::new(Family::new(node_store));
        let mut genesis = Ledger::genesis(Arc::clone(&family), total_coins, accounts)?;
        let objects = genesis.flush_dirty()?;
        family.db().store_batch(&objects)?;
        Ok(genesis.hash())
    }

    /// Submit a transaction to the replica's open ledger. The transaction is relayed to peers, and
    /// considered for the next ledger that closes.
    pub fn submit_transaction(&self, tx: Vec<u8>) {
        if self.submission_sender.send(tx).is_err() {
            log::error!("Cannot submit transaction: the algorithm thread has exited");
        }
    }

    /// Returns a [Ledger History Camera](crate::ledger::LedgerHistoryCamera) which can be used to peek into
    /// the ledgers the replica holds in memory.
    pub fn ledger_history_camera(&self) -> &LedgerHistoryCamera<S> {
        &self.ledger_history_camera
    }

    /// Whether the algorithm thread is still driving rounds. It stops for good if the replica finds that
    /// its own stored or in-memory data is corrupt.
    pub fn is_running(&self) -> bool {
        self.algorithm
            .as_ref()
            .map_or(false, |algorithm| !algorithm.is_finished())
    }
}

impl<S: NodeStore> Drop for Replica<S> {
    fn drop(&mut self) {
        // The order of thread shutdown in this function is important, as the threads make assumptions about
        // the validity of their channels based on this. The algorithm and node sync server threads receive
        // messages from the poller, and assume that the poller will live longer than them.

        if let Some(shutdown) = &self.event_bus_shutdown {
            let _ = shutdown.send(());
        }
        join(self.event_bus.take(), "event bus");

        let _ = self.algorithm_shutdown.send(());
        join(self.algorithm.take(), "algorithm");

        let _ = self.node_sync_server_shutdown.send(());
        join(self.node_sync_server.take(), "node sync server");

        let _ = self.poller_shutdown.send(());
        join(self.poller.take(), "poller");
    }
}

fn join(thread: Option<JoinHandle<()>>, name: &str) {
    if let Some(thread) = thread {
        if thread.join().is_err() {
            log::error!("The {} thread panicked", name);
        }
    }
}
