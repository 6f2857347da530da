/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for structured messages that are exchanged between clients and replicas as part of the
//! [hBFT](crate::hbft) protocol.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    crypto_primitives::digest,
    data_types::{
        ClientId, Digest, Operation, ReplicaId, RequestKey, SequenceNumber, Timestamp, ViewNumber,
    },
};

use super::history::{Checkpoint, ExecutionHistory};

/// An operation submitted by a client.
///
/// Requests are ordered by `(client, timestamp)` first, which is also the key under which replicas remember
/// them.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub struct Request {
    pub client: ClientId,
    pub timestamp: Timestamp,
    pub operation: Operation,
}

impl Request {
    pub fn new(client: ClientId, timestamp: Timestamp, operation: Operation) -> Self {
        Self {
            client,
            timestamp,
            operation,
        }
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::new(self.client, self.timestamp)
    }

    pub fn digest(&self) -> Digest {
        digest(self)
    }
}

/// Sent by the primary of `view` to assign `seq` to `request`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Prepare {
    pub view: ViewNumber,
    pub seq: SequenceNumber,
    pub digest: Digest,
    pub request: Request,
    pub primary: ReplicaId,
}

impl Prepare {
    /// Whether `digest` covers the carried request.
    pub fn is_well_formed(&self) -> bool {
        self.digest == self.request.digest()
    }
}

/// Sent by every replica that speculatively executed `request` at `seq` in `view`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Commit {
    pub view: ViewNumber,
    pub seq: SequenceNumber,
    pub digest: Digest,
    pub request: Request,
    pub replica: ReplicaId,
}

impl Commit {
    /// Whether `digest` covers the carried request.
    pub fn is_well_formed(&self) -> bool {
        self.digest == self.request.digest()
    }
}

/// Sent by a replica to the client after executing its request, speculatively or otherwise.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Reply {
    pub view: ViewNumber,
    pub seq: SequenceNumber,
    pub timestamp: Timestamp,
    pub client: ClientId,
    pub replica: ReplicaId,
    pub result: Operation,
}

/// The three rounds of the checkpoint protocol.
///
/// 1. `First`: the primary proposes its execution history.
/// 2. `Second`: every replica that accepted the proposal echoes it. `2f + 1` matching echoes form the first
///    checkpoint certificate (CER1).
/// 3. `Third`: every replica holding CER1 confirms it. `2f + 1` matching confirmations form the second
///    checkpoint certificate (CER2), which makes the checkpoint stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub enum CheckpointRound {
    First,
    Second,
    Third,
}

/// A replica's claim that its execution history up to `seq` is `history`, and that `history` digests to
/// `digest`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CheckpointProof {
    pub seq: SequenceNumber,
    pub digest: Digest,
    pub replica: ReplicaId,
    pub history: ExecutionHistory,
}

impl CheckpointProof {
    /// Create a proof from `replica` covering every entry of `history` up to and including `seq`.
    pub fn new(seq: SequenceNumber, replica: ReplicaId, history: &ExecutionHistory) -> Self {
        let history = history.before(seq);
        Self {
            seq,
            digest: history.digest(),
            replica,
            history,
        }
    }

    /// Whether `digest` covers the carried history, and the history does not extend past `seq`.
    pub fn is_well_formed(&self) -> bool {
        self.digest == self.history.digest() && self.history.after(self.seq).is_empty()
    }
}

/// A replica's vote to move to `new_view`.
///
/// The vote carries everything the next primary needs to decide which requests survive the view change:
/// - `checkpoint`: the last stable checkpoint of the voter (its low watermark),
/// - `speculative_requests` ("R"): the requests it executed speculatively above that checkpoint,
/// - `certified_history` ("P"): the history certified by CER1 in the view being abandoned, if any,
/// - `accepted_history` ("Q"): the round-I checkpoint history it accepted in the view being abandoned, if
///   any.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ViewChange {
    pub new_view: ViewNumber,
    pub replica: ReplicaId,
    pub checkpoint: Checkpoint,
    pub speculative_requests: ExecutionHistory,
    pub certified_history: Option<ExecutionHistory>,
    pub accepted_history: Option<ExecutionHistory>,
}

/// Content of a sequence number slot carried by a [`NewView`].
///
/// A slot that is absent from [`NewView::requests`] is neither known nor reserved.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum RequestSlot {
    /// At least `f + 1` votes agree on the request at this sequence number.
    Known(Request),
    /// Some vote mentions this sequence number, but not enough votes agree on its request.
    ReservedUnknown,
}

/// Sent by the primary of `new_view` once it holds `2f + 1` votes for it.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct NewView {
    pub new_view: ViewNumber,
    pub primary: ReplicaId,
    pub view_changes: Vec<ViewChange>,
    pub checkpoint: Checkpoint,
    pub requests: BTreeMap<SequenceNumber, RequestSlot>,
}

impl NewView {
    /// The execution history that replicas adopt when entering `new_view`: the chosen checkpoint followed by
    /// every known request. Reserved slots are left empty.
    pub fn history(&self) -> ExecutionHistory {
        let mut history = self.checkpoint.history.clone();
        for (seq, slot) in &self.requests {
            if let RequestSlot::Known(request) = slot {
                history.add_entry(*seq, request.clone());
            }
        }
        history
    }
}
