/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The replica's ledger of in-flight and stabilized protocol state.
//!
//! A [`MessageLog`] owns:
//! 1. The active [tickets](Ticket), keyed by `(view, seq)`, and the cache of completed tickets, keyed by the
//!    [`RequestKey`] of their request.
//! 2. The admission buffer: a FIFO queue of client requests that the primary has not ticketed yet.
//! 3. The watermark window and the last stable checkpoint.
//! 4. The proofs of the three checkpoint rounds, and the checkpoint certificates formed from them
//!    ([`checkpoints`]).
//! 5. The view-change votes, and the construction and validation of new-view messages
//!    ([`view_changes`]).

use std::collections::{BTreeMap, VecDeque};

use crate::types::data_types::{ReplicaId, RequestKey, SequenceNumber, ViewNumber};

use super::{
    history::{Checkpoint, ExecutionHistory},
    messages::{CheckpointProof, CheckpointRound, Request, ViewChange},
    ticket::Ticket,
};

pub mod checkpoints;

pub mod view_changes;

pub use checkpoints::CheckpointOutcome;
pub use view_changes::{NewViewError, ViewChangeResult};

#[derive(Clone, Copy, Debug)]
pub struct MessageLogConfiguration {
    /// Number of active tickets at which the primary starts buffering new requests.
    pub buffer_threshold: usize,
    /// Number of sequence numbers between two checkpoints.
    pub checkpoint_interval: u64,
    /// Width of the window of sequence numbers a replica processes.
    pub watermark_interval: u64,
}

type ProofTable = BTreeMap<SequenceNumber, BTreeMap<ReplicaId, CheckpointProof>>;

pub struct MessageLog {
    config: MessageLogConfiguration,
    tickets: BTreeMap<(ViewNumber, SequenceNumber), Ticket>,
    ticket_cache: BTreeMap<RequestKey, Ticket>,
    buffer: VecDeque<Request>,
    proofs: BTreeMap<CheckpointRound, ProofTable>,
    accepted_histories: BTreeMap<ViewNumber, ExecutionHistory>,
    certified_histories: BTreeMap<ViewNumber, ExecutionHistory>,
    view_changes: BTreeMap<ViewNumber, BTreeMap<ReplicaId, ViewChange>>,
    stable_checkpoint: Checkpoint,
    low_water_mark: SequenceNumber,
    high_water_mark: SequenceNumber,
}

impl MessageLog {
    pub fn new(config: MessageLogConfiguration) -> Self {
        Self {
            config,
            tickets: BTreeMap::new(),
            ticket_cache: BTreeMap::new(),
            buffer: VecDeque::new(),
            proofs: BTreeMap::new(),
            accepted_histories: BTreeMap::new(),
            certified_histories: BTreeMap::new(),
            view_changes: BTreeMap::new(),
            stable_checkpoint: Checkpoint::genesis(),
            low_water_mark: SequenceNumber::init(),
            high_water_mark: SequenceNumber::init() + config.watermark_interval,
        }
    }

    pub fn config(&self) -> &MessageLogConfiguration {
        &self.config
    }

    /* ↓↓↓ Tickets ↓↓↓ */

    /// Get the active ticket for `(view, seq)`, creating it if no message referenced the slot before.
    pub fn new_ticket(&mut self, view: ViewNumber, seq: SequenceNumber) -> &mut Ticket {
        self.tickets
            .entry((view, seq))
            .or_insert_with(|| Ticket::new(view, seq))
    }

    pub fn get_ticket(&self, view: ViewNumber, seq: SequenceNumber) -> Option<&Ticket> {
        self.tickets.get(&(view, seq))
    }

    pub fn get_ticket_mut(&mut self, view: ViewNumber, seq: SequenceNumber) -> Option<&mut Ticket> {
        self.tickets.get_mut(&(view, seq))
    }

    pub fn get_ticket_from_cache(&self, key: &RequestKey) -> Option<&Ticket> {
        self.ticket_cache.get(key)
    }

    /// Move the active ticket for `(view, seq)` into the completed-ticket cache under `key`.
    ///
    /// Returns `false` if there is no such active ticket, e.g., because it was already completed.
    pub fn complete_ticket(&mut self, key: RequestKey, view: ViewNumber, seq: SequenceNumber) -> bool {
        match self.tickets.remove(&(view, seq)) {
            Some(ticket) => {
                self.ticket_cache.insert(key, ticket);
                true
            }
            None => false,
        }
    }

    pub fn active_tickets(&self) -> usize {
        self.tickets.len()
    }

    pub fn completed_tickets(&self) -> usize {
        self.ticket_cache.len()
    }

    /* ↓↓↓ Admission buffer ↓↓↓ */

    /// Whether new client requests should be buffered instead of ticketed.
    pub fn should_buffer(&self) -> bool {
        self.tickets.len() >= self.config.buffer_threshold
    }

    pub fn buffer(&mut self, request: Request) {
        self.buffer.push_back(request)
    }

    /// Put `request` back at the head of the buffer, e.g., after popping it but failing to ticket it.
    pub fn buffer_first(&mut self, request: Request) {
        self.buffer.push_front(request)
    }

    pub fn pop_buffer(&mut self) -> Option<Request> {
        self.buffer.pop_front()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /* ↓↓↓ Watermarks ↓↓↓ */

    pub fn is_between_water_marks(&self, seq: SequenceNumber) -> bool {
        self.low_water_mark <= seq && seq <= self.high_water_mark
    }

    pub fn low_water_mark(&self) -> SequenceNumber {
        self.low_water_mark
    }

    pub fn high_water_mark(&self) -> SequenceNumber {
        self.high_water_mark
    }

    pub fn stable_checkpoint(&self) -> &Checkpoint {
        &self.stable_checkpoint
    }
}
