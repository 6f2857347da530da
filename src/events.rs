/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of hBFT-rs events for event handling and logging.
//!
//! Note: an event for a given action indicates that the action has been completed.

use std::time::SystemTime;

use crate::{
    hbft::{
        messages::{
            CheckpointRound, Commit, NewView, Prepare, Reply, Request, ViewChange,
        },
        timers::Expiry,
    },
    networking::messages::Origin,
    types::data_types::{Digest, ReplicaId, SequenceNumber, ViewNumber},
};

pub enum Event {
    // Events that change the execution history or the message log.
    ExecuteRequest(ExecuteRequestEvent),
    StabilizeCheckpoint(StabilizeCheckpointEvent),
    BufferRequest(BufferRequestEvent),
    // Events that involve broadcasting or sending a message or a reply.
    Prepare(PrepareEvent),
    Commit(CommitEvent),
    SpeculativeExecute(SpeculativeExecuteEvent),
    Checkpoint(CheckpointEvent),
    ViewChange(ViewChangeEvent),
    NewView(NewViewEvent),
    // Events that involve receiving a message.
    ReceiveRequest(ReceiveRequestEvent),
    ReceivePrepare(ReceivePrepareEvent),
    ReceiveCommit(ReceiveCommitEvent),
    ReceiveCheckpoint(ReceiveCheckpointEvent),
    ReceiveViewChange(ReceiveViewChangeEvent),
    ReceiveNewView(ReceiveNewViewEvent),
    // View and timer events.
    StartView(StartViewEvent),
    Timeout(TimeoutEvent),
    ConflictingCommit(ConflictingCommitEvent),
}

/// A request was committed by `2f + 1` replicas and appended to the execution history.
pub struct ExecuteRequestEvent {
    pub timestamp: SystemTime,
    pub seq: SequenceNumber,
    pub request: Request,
}

/// A checkpoint became stable, and the message log was garbage collected up to it.
pub struct StabilizeCheckpointEvent {
    pub timestamp: SystemTime,
    pub seq: SequenceNumber,
    pub digest: Digest,
}

/// The primary put a client request into its admission buffer.
pub struct BufferRequestEvent {
    pub timestamp: SystemTime,
    pub request: Request,
}

pub struct PrepareEvent {
    pub timestamp: SystemTime,
    pub prepare: Prepare,
}

pub struct CommitEvent {
    pub timestamp: SystemTime,
    pub commit: Commit,
}

/// The replica executed a request speculatively and sent `reply` to the client.
pub struct SpeculativeExecuteEvent {
    pub timestamp: SystemTime,
    pub reply: Reply,
}

pub struct CheckpointEvent {
    pub timestamp: SystemTime,
    pub round: CheckpointRound,
    pub seq: SequenceNumber,
    pub digest: Digest,
}

pub struct ViewChangeEvent {
    pub timestamp: SystemTime,
    pub view_change: ViewChange,
}

pub struct NewViewEvent {
    pub timestamp: SystemTime,
    pub new_view: NewView,
}

pub struct ReceiveRequestEvent {
    pub timestamp: SystemTime,
    pub origin: Origin,
    pub request: Request,
}

pub struct ReceivePrepareEvent {
    pub timestamp: SystemTime,
    pub origin: ReplicaId,
    pub prepare: Prepare,
}

pub struct ReceiveCommitEvent {
    pub timestamp: SystemTime,
    pub origin: ReplicaId,
    pub commit: Commit,
}

pub struct ReceiveCheckpointEvent {
    pub timestamp: SystemTime,
    pub origin: ReplicaId,
    pub round: CheckpointRound,
    pub seq: SequenceNumber,
    pub digest: Digest,
}

pub struct ReceiveViewChangeEvent {
    pub timestamp: SystemTime,
    pub origin: ReplicaId,
    pub view_change: ViewChange,
}

pub struct ReceiveNewViewEvent {
    pub timestamp: SystemTime,
    pub origin: ReplicaId,
    pub new_view: NewView,
}

pub struct StartViewEvent {
    pub timestamp: SystemTime,
    pub view: ViewNumber,
    pub primary: ReplicaId,
}

pub struct TimeoutEvent {
    pub timestamp: SystemTime,
    pub expiry: Expiry,
}

/// At least `f + 1` replicas committed a different request than the one this replica recorded for a slot.
pub struct ConflictingCommitEvent {
    pub timestamp: SystemTime,
    pub view: ViewNumber,
    pub seq: SequenceNumber,
}
