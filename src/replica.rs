/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a replica.
//!
//! hBFT-rs replicates a log of client requests across a fixed set of processes. In our terminology, these
//! processes are called 'replicas', and the set of all of them is the 'replica set'. Each replica is uniquely
//! identified by a [`ReplicaId`]. A replica set of `3f + 1` replicas tolerates `f` Byzantine replicas.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the replica](ReplicaSpec) with:
//!   1. `ReplicaSpec::builder` to construct a `ReplicaSpecBuilder`,
//!   2. The setters of the `ReplicaSpecBuilder`, and
//!   3. The `ReplicaSpecBuilder::build` method to construct a [`ReplicaSpec`],
//! - The function to [start](ReplicaSpec::start) a [`Replica`] given its specification,
//! - [The type](Replica) through which messages and the passage of time are fed to the replica.
//!
//! ## Starting a replica
//!
//! ```ignore
//! let mut replica =
//!     ReplicaSpec::builder()
//!     .network(network)
//!     .configuration(configuration)
//!     .on_execute_request(execute_handler)
//!     .build()
//!     .start(Instant::now())?;
//!
//! replica.deliver(Origin::Client(client), Message::Request(request));
//! replica.tick(Instant::now());
//! ```
//!
//! ### Required setters
//!
//! - `.network(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters register user-defined event handlers for events from [`crate::events`]:
//! - `.on_execute_request(...)`
//! - `.on_stabilize_checkpoint(...)`
//! - `.on_buffer_request(...)`
//! - `.on_prepare(...)`
//! - `.on_commit(...)`
//! - `.on_speculative_execute(...)`
//! - `.on_checkpoint(...)`
//! - `.on_view_change(...)`
//! - `.on_new_view(...)`
//! - `.on_receive_request(...)`
//! - `.on_receive_prepare(...)`
//! - `.on_receive_commit(...)`
//! - `.on_receive_checkpoint(...)`
//! - `.on_receive_view_change(...)`
//! - `.on_receive_new_view(...)`
//! - `.on_start_view(...)`
//! - `.on_timeout(...)`
//! - `.on_conflicting_commit(...)`
//!
//! ## Driving a replica
//!
//! A [`Replica`] does not spawn threads. The library user owns the loop that drives it:
//! 1. Every message received from the transport is passed to [`Replica::deliver`], together with its
//!    [`Origin`].
//! 2. [`Replica::tick`] is called regularly with the current time, so that request, checkpoint and
//!    view-change timers can expire.
//!
//! Both calls return once the replica has reacted, having sent its messages through the [`Network`].

use std::{
    collections::BTreeSet,
    error::Error,
    fmt::{self, Display, Formatter},
    time::{Duration, Instant},
};

use typed_builder::TypedBuilder;

use crate::{
    event_bus::{EventHandlers, HandlerPtr},
    events::*,
    hbft::{
        history::ExecutionHistory,
        implementation::{Hbft, HbftConfiguration},
        message_log::{MessageLog, MessageLogConfiguration},
    },
    networking::{
        messages::{Message, Origin},
        network::Network,
    },
    types::{
        data_types::{ReplicaId, SequenceNumber, ViewNumber},
        quorum::replica_count,
    },
};

/// Stores the user-defined parameters required to start a replica, that is:
/// 1. The replica's [`ReplicaId`] and the ids of the whole replica set.
/// 2. The number of Byzantine replicas `f` the replica set tolerates.
/// 3. The initial timeout of request timers, and of the view-change timer.
/// 4. The checkpoint interval, the size of the watermark window, and the admission threshold.
/// 5. The "Log Events" flag.
///
/// ## Note
///
/// [`Configuration`] is marked `#[non_exhaustive]`, so the fields have to be set through
/// [`Configuration::builder`].
#[derive(Clone, Debug, TypedBuilder)]
#[non_exhaustive]
pub struct Configuration {
    #[builder(setter(doc = "Set the id of this replica. Required."))]
    pub me: ReplicaId,
    #[builder(setter(doc = "Set the ids of every replica in the replica set, this replica included. Required."))]
    pub replicas: Vec<ReplicaId>,
    #[builder(setter(doc = "Set the number of Byzantine replicas `f` that the replica set tolerates. Required."))]
    pub tolerance: u64,
    #[builder(setter(doc = "Set the initial timeout of request timers, also used as the checkpoint timeout. Required."))]
    pub request_timeout: Duration,
    #[builder(setter(doc = "Set the timeout for entering a view after it gathers enough votes, per view skipped. Required."))]
    pub view_change_timeout: Duration,
    #[builder(setter(doc = "Set the number of sequence numbers between two checkpoints. Required."))]
    pub checkpoint_interval: u64,
    #[builder(setter(doc = "Set the size of the watermark window. Must be at least the checkpoint interval. Required."))]
    pub watermark_interval: u64,
    #[builder(setter(doc = "Set the number of active tickets at which the primary starts buffering requests. Required."))]
    pub buffer_threshold: usize,
    #[builder(default = true, setter(doc = "Log every event through the `log` crate? Optional, defaults to `true`."))]
    pub log_events: bool,
}

impl Configuration {
    /// Check that the configuration describes a replica set that can run hBFT.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let unique: BTreeSet<&ReplicaId> = self.replicas.iter().collect();
        if unique.len() != self.replicas.len() {
            return Err(ConfigurationError::DuplicateReplica);
        }
        if !unique.contains(&self.me) {
            return Err(ConfigurationError::NotAMember(self.me));
        }
        let required = replica_count(self.tolerance);
        if self.replicas.len() < required {
            return Err(ConfigurationError::TooFewReplicas {
                replicas: self.replicas.len(),
                required,
            });
        }
        if self.checkpoint_interval == 0 {
            return Err(ConfigurationError::ZeroCheckpointInterval);
        }
        if self.watermark_interval < self.checkpoint_interval {
            return Err(ConfigurationError::WatermarkIntervalTooSmall {
                watermark_interval: self.watermark_interval,
                checkpoint_interval: self.checkpoint_interval,
            });
        }
        if self.buffer_threshold == 0 {
            return Err(ConfigurationError::ZeroBufferThreshold);
        }
        Ok(())
    }
}

impl From<Configuration> for HbftConfiguration {
    fn from(config: Configuration) -> Self {
        let mut replicas = config.replicas;
        replicas.sort();
        HbftConfiguration {
            me: config.me,
            replicas,
            tolerance: config.tolerance,
            request_timeout: config.request_timeout,
            view_change_timeout: config.view_change_timeout,
            message_log: MessageLogConfiguration {
                buffer_threshold: config.buffer_threshold,
                checkpoint_interval: config.checkpoint_interval,
                watermark_interval: config.watermark_interval,
            },
        }
    }
}

/// Reason why a [`Configuration`] was refused by [`ReplicaSpec::start`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigurationError {
    DuplicateReplica,
    NotAMember(ReplicaId),
    TooFewReplicas { replicas: usize, required: usize },
    ZeroCheckpointInterval,
    WatermarkIntervalTooSmall {
        watermark_interval: u64,
        checkpoint_interval: u64,
    },
    ZeroBufferThreshold,
}

impl Display for ConfigurationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::DuplicateReplica => write!(f, "the replica set lists a replica twice"),
            ConfigurationError::NotAMember(me) => {
                write!(f, "replica {} is not a member of the replica set", me)
            }
            ConfigurationError::TooFewReplicas { replicas, required } => write!(
                f,
                "{} replicas cannot tolerate the configured faults, at least {} are required",
                replicas, required
            ),
            ConfigurationError::ZeroCheckpointInterval => {
                write!(f, "the checkpoint interval must be positive")
            }
            ConfigurationError::WatermarkIntervalTooSmall {
                watermark_interval,
                checkpoint_interval,
            } => write!(
                f,
                "the watermark interval {} is smaller than the checkpoint interval {}",
                watermark_interval, checkpoint_interval
            ),
            ConfigurationError::ZeroBufferThreshold => {
                write!(f, "the buffer threshold must be positive")
            }
        }
    }
}

impl Error for ConfigurationError {}

/// Stores all necessary parameters and trait implementations required to run a [`Replica`].
#[derive(TypedBuilder)]
pub struct ReplicaSpec<N: Network + 'static> {
    // Required parameters
    #[builder(setter(doc = "Set the implementation of the transport. The argument must implement the [Network](crate::networking::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a replica. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&ExecuteRequestEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ExecuteRequestEvent>),
    doc = "Register a handler closure to be invoked after a request is appended to the execution history. Optional."))]
    on_execute_request: Option<HandlerPtr<ExecuteRequestEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StabilizeCheckpointEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StabilizeCheckpointEvent>),
    doc = "Register a handler closure to be invoked after a checkpoint becomes stable. Optional."))]
    on_stabilize_checkpoint: Option<HandlerPtr<StabilizeCheckpointEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&BufferRequestEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<BufferRequestEvent>),
    doc = "Register a handler closure to be invoked after the primary buffers a request. Optional."))]
    on_buffer_request: Option<HandlerPtr<BufferRequestEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PrepareEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PrepareEvent>),
    doc = "Register a handler closure to be invoked after the primary broadcasts a prepare. Optional."))]
    on_prepare: Option<HandlerPtr<PrepareEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a commit. Optional."))]
    on_commit: Option<HandlerPtr<CommitEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SpeculativeExecuteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SpeculativeExecuteEvent>),
    doc = "Register a handler closure to be invoked after the replica speculatively executes a request and replies. Optional."))]
    on_speculative_execute: Option<HandlerPtr<SpeculativeExecuteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CheckpointEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CheckpointEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a checkpoint proof. Optional."))]
    on_checkpoint: Option<HandlerPtr<CheckpointEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ViewChangeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ViewChangeEvent>),
    doc = "Register a handler closure to be invoked after the replica votes for a view change. Optional."))]
    on_view_change: Option<HandlerPtr<ViewChangeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&NewViewEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<NewViewEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a new view message. Optional."))]
    on_new_view: Option<HandlerPtr<NewViewEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveRequestEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveRequestEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a request. Optional."))]
    on_receive_request: Option<HandlerPtr<ReceiveRequestEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceivePrepareEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceivePrepareEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a prepare. Optional."))]
    on_receive_prepare: Option<HandlerPtr<ReceivePrepareEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveCommitEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveCommitEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a commit. Optional."))]
    on_receive_commit: Option<HandlerPtr<ReceiveCommitEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveCheckpointEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveCheckpointEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a checkpoint proof. Optional."))]
    on_receive_checkpoint: Option<HandlerPtr<ReceiveCheckpointEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveViewChangeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveViewChangeEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a view change vote. Optional."))]
    on_receive_view_change: Option<HandlerPtr<ReceiveViewChangeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveNewViewEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveNewViewEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a new view message. Optional."))]
    on_receive_new_view: Option<HandlerPtr<ReceiveNewViewEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartViewEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartViewEvent>),
    doc = "Register a handler closure to be invoked after the replica enters a new view. Optional."))]
    on_start_view: Option<HandlerPtr<StartViewEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&TimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<TimeoutEvent>),
    doc = "Register a handler closure to be invoked after one of the replica's timers expires. Optional."))]
    on_timeout: Option<HandlerPtr<TimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ConflictingCommitEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ConflictingCommitEvent>),
    doc = "Register a handler closure to be invoked after the replica observes f + 1 conflicting commits. Optional."))]
    on_conflicting_commit: Option<HandlerPtr<ConflictingCommitEvent>>,
}

impl<N: Network + 'static> ReplicaSpec<N> {
    /// Validate the configuration and start a [`Replica`] in the initial view, with `now` as its current time.
    pub fn start(self, now: Instant) -> Result<Replica<N>, ConfigurationError> {
        self.configuration.validate()?;
        let log_events = self.configuration.log_events;

        let mut event_handlers = EventHandlers::default();
        if log_events {
            event_handlers.add_loggers();
        }
        event_handlers.execute_request_handlers.extend(self.on_execute_request);
        event_handlers.stabilize_checkpoint_handlers.extend(self.on_stabilize_checkpoint);
        event_handlers.buffer_request_handlers.extend(self.on_buffer_request);
        event_handlers.prepare_handlers.extend(self.on_prepare);
        event_handlers.commit_handlers.extend(self.on_commit);
        event_handlers.speculative_execute_handlers.extend(self.on_speculative_execute);
        event_handlers.checkpoint_handlers.extend(self.on_checkpoint);
        event_handlers.view_change_handlers.extend(self.on_view_change);
        event_handlers.new_view_handlers.extend(self.on_new_view);
        event_handlers.receive_request_handlers.extend(self.on_receive_request);
        event_handlers.receive_prepare_handlers.extend(self.on_receive_prepare);
        event_handlers.receive_commit_handlers.extend(self.on_receive_commit);
        event_handlers.receive_checkpoint_handlers.extend(self.on_receive_checkpoint);
        event_handlers.receive_view_change_handlers.extend(self.on_receive_view_change);
        event_handlers.receive_new_view_handlers.extend(self.on_receive_new_view);
        event_handlers.start_view_handlers.extend(self.on_start_view);
        event_handlers.timeout_handlers.extend(self.on_timeout);
        event_handlers.conflicting_commit_handlers.extend(self.on_conflicting_commit);

        let hbft = Hbft::new(self.configuration.into(), self.network, event_handlers, now);
        Ok(Replica { hbft })
    }
}

/// A running hBFT replica.
pub struct Replica<N: Network> {
    hbft: Hbft<N>,
}

impl<N: Network> Replica<N> {
    /// Process a message delivered by the transport.
    pub fn deliver(&mut self, origin: Origin, message: Message) {
        self.hbft.on_receive_msg(origin, message)
    }

    /// Let the replica observe that the time is now `now`, expiring its timers.
    pub fn tick(&mut self, now: Instant) {
        self.hbft.tick(now)
    }

    pub fn id(&self) -> ReplicaId {
        self.hbft.me()
    }

    pub fn view(&self) -> ViewNumber {
        self.hbft.view()
    }

    /// The largest view this replica voted for or entered.
    pub fn largest_view(&self) -> ViewNumber {
        self.hbft.largest_view()
    }

    pub fn primary(&self) -> ReplicaId {
        self.hbft.primary()
    }

    pub fn is_primary(&self) -> bool {
        self.hbft.is_primary()
    }

    /// The last sequence number this replica assigned, accepted, or skipped.
    pub fn seq_counter(&self) -> SequenceNumber {
        self.hbft.seq_counter()
    }

    /// Whether this replica has voted for a view change that has not happened yet.
    pub fn is_disgruntled(&self) -> bool {
        self.hbft.is_disgruntled()
    }

    /// Whether this replica entered a new view, and is waiting for that view's first checkpoint.
    pub fn is_awaiting_checkpoint(&self) -> bool {
        self.hbft.is_awaiting_checkpoint()
    }

    /// The committed execution history.
    pub fn history(&self) -> &ExecutionHistory {
        self.hbft.history()
    }

    /// The requests executed speculatively since the stable checkpoint.
    pub fn speculative_requests(&self) -> &ExecutionHistory {
        self.hbft.speculative_requests()
    }

    pub fn message_log(&self) -> &MessageLog {
        self.hbft.message_log()
    }
}
