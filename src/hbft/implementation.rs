/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Event-driven implementation of a single hBFT replica.
//!
//! Main type: [`Hbft`].

use std::{
    cmp::max,
    collections::BTreeSet,
    time::{Duration, Instant, SystemTime},
};

use crate::{
    event_bus::EventHandlers,
    events::*,
    hbft::{
        history::ExecutionHistory,
        message_log::{CheckpointOutcome, MessageLog, MessageLogConfiguration},
        messages::{
            CheckpointProof, CheckpointRound, Commit, NewView, Prepare, Reply, Request, ViewChange,
        },
        roles::{is_primary, select_primary},
        ticket::TicketPhase,
        timers::{Expiry, Timers},
    },
    networking::{
        messages::{Message, Origin},
        network::Network,
        sending::SenderHandle,
    },
    types::{
        data_types::{ReplicaId, RequestKey, SequenceNumber, ViewNumber},
        quorum::quorum_large,
    },
};

/// Parameters of the [`Hbft`] engine, derived from the replica's
/// [`Configuration`](crate::replica::Configuration).
#[derive(Clone, Debug)]
pub(crate) struct HbftConfiguration {
    pub(crate) me: ReplicaId,
    /// Sorted, without duplicates.
    pub(crate) replicas: Vec<ReplicaId>,
    pub(crate) tolerance: u64,
    pub(crate) request_timeout: Duration,
    pub(crate) view_change_timeout: Duration,
    pub(crate) message_log: MessageLogConfiguration,
}

/// A single participant in the hBFT protocol.
///
/// # Usage
///
/// The caller interacts with an `Hbft` by calling two methods:
/// 1. [`on_receive_msg`](Self::on_receive_msg): whenever a message is delivered to the replica.
/// 2. [`tick`](Self::tick): as often as is practical, with the current time, so that timers can expire.
///
/// Neither method blocks. Everything the replica sends goes through the [`Network`] it was created with.
///
/// # Per-request flow
///
/// 1. A client sends a [`Request`]. Backups forward it to the primary. The primary assigns it the next
///    sequence number and broadcasts a [`Prepare`].
/// 2. Every replica that accepts the `Prepare` executes the request speculatively, replies to the client,
///    and broadcasts a [`Commit`].
/// 3. Once `2f + 1` matching commits are collected, the request is appended to the execution history and
///    its ticket is completed.
///
/// If `f + 1` commits disagree with the request a replica recorded for the slot, the replica votes for a
/// view change instead.
pub(crate) struct Hbft<N: Network> {
    config: HbftConfiguration,
    view: ViewNumber,
    largest_view: ViewNumber,
    seq_counter: SequenceNumber,
    message_log: MessageLog,
    history: ExecutionHistory,
    speculative_requests: ExecutionHistory,
    received_requests: BTreeSet<RequestKey>,
    /// Every sequence number up to here is settled without being in the execution history: it is covered by
    /// a certified history, or a new view skipped it.
    settled_through: SequenceNumber,
    /// The greatest sequence number this replica started the checkpoint protocol for.
    checkpoint_started: SequenceNumber,
    /// A round-I proof that arrived before the execution history reached it.
    deferred_checkpoint: Option<CheckpointProof>,
    disgruntled: bool,
    awaiting_checkpoint: bool,
    timers: Timers,
    now: Instant,
    sender: SenderHandle<N>,
    event_handlers: EventHandlers,
}

impl<N: Network> Hbft<N> {
    pub(crate) fn new(
        config: HbftConfiguration,
        network: N,
        event_handlers: EventHandlers,
        now: Instant,
    ) -> Self {
        let message_log = MessageLog::new(config.message_log);
        Self {
            config,
            view: ViewNumber::init(),
            largest_view: ViewNumber::init(),
            seq_counter: SequenceNumber::init(),
            message_log,
            history: ExecutionHistory::new(),
            speculative_requests: ExecutionHistory::new(),
            received_requests: BTreeSet::new(),
            settled_through: SequenceNumber::init(),
            checkpoint_started: SequenceNumber::init(),
            deferred_checkpoint: None,
            disgruntled: false,
            awaiting_checkpoint: false,
            timers: Timers::new(),
            now,
            sender: SenderHandle::new(network),
            event_handlers,
        }
    }

    /* ↓↓↓ Accessors ↓↓↓ */

    pub(crate) fn me(&self) -> ReplicaId {
        self.config.me
    }

    pub(crate) fn view(&self) -> ViewNumber {
        self.view
    }

    pub(crate) fn largest_view(&self) -> ViewNumber {
        self.largest_view
    }

    pub(crate) fn primary(&self) -> ReplicaId {
        select_primary(self.view, &self.config.replicas)
    }

    pub(crate) fn is_primary(&self) -> bool {
        is_primary(self.config.me, self.view, &self.config.replicas)
    }

    pub(crate) fn seq_counter(&self) -> SequenceNumber {
        self.seq_counter
    }

    pub(crate) fn is_disgruntled(&self) -> bool {
        self.disgruntled
    }

    pub(crate) fn is_awaiting_checkpoint(&self) -> bool {
        self.awaiting_checkpoint
    }

    pub(crate) fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    pub(crate) fn speculative_requests(&self) -> &ExecutionHistory {
        &self.speculative_requests
    }

    pub(crate) fn message_log(&self) -> &MessageLog {
        &self.message_log
    }

    /* ↓↓↓ Entry points ↓↓↓ */

    /// Process a `message` delivered from `origin`.
    ///
    /// Clients may only send requests. Messages from replicas outside the replica set, and from this replica
    /// itself, are dropped.
    pub(crate) fn on_receive_msg(&mut self, origin: Origin, message: Message) {
        let replica = match origin {
            Origin::Client(client) => {
                match message {
                    Message::Request(request) => self.on_receive_request(origin, request),
                    other => log::debug!("Dropping {} from client {}.", other.kind(), client),
                }
                return;
            }
            Origin::Replica(replica) => replica,
        };
        if replica == self.config.me || !self.config.replicas.contains(&replica) {
            log::debug!("Dropping {} from replica {}.", message.kind(), replica);
            return;
        }

        match message {
            Message::Request(request) => self.on_receive_request(origin, request),
            Message::Prepare(prepare) => self.on_receive_prepare(replica, prepare),
            Message::Commit(commit) => self.on_receive_commit(replica, commit),
            Message::CheckpointI(proof) => {
                self.on_receive_checkpoint(replica, CheckpointRound::First, proof)
            }
            Message::CheckpointII(proof) => {
                self.on_receive_checkpoint(replica, CheckpointRound::Second, proof)
            }
            Message::CheckpointIII(proof) => {
                self.on_receive_checkpoint(replica, CheckpointRound::Third, proof)
            }
            Message::ViewChange(view_change) => self.on_receive_view_change(replica, view_change),
            Message::NewView(new_view) => self.on_receive_new_view(replica, new_view),
        }
    }

    /// Expire every timer whose deadline is at or before `now`, and act on the expiries.
    pub(crate) fn tick(&mut self, now: Instant) {
        self.now = max(self.now, now);
        for expiry in self.timers.expired(self.now) {
            self.publish(Event::Timeout(TimeoutEvent {
                timestamp: SystemTime::now(),
                expiry,
            }));
            match expiry {
                Expiry::Request { target_view, .. } => self.suspect_primary(target_view),
                Expiry::Checkpoint => self.suspect_primary(self.view + 1),
                Expiry::ViewChange => self.send_view_change(self.largest_view + 1),
            }
        }
    }

    /* ↓↓↓ Normal case ↓↓↓ */

    fn on_receive_request(&mut self, origin: Origin, request: Request) {
        self.publish(Event::ReceiveRequest(ReceiveRequestEvent {
            timestamp: SystemTime::now(),
            origin,
            request: request.clone(),
        }));
        if self.disgruntled || self.awaiting_checkpoint {
            log::debug!("Dropping request {:?}: view change in progress.", request.key());
            return;
        }

        let key = request.key();
        let cached_reply = self
            .message_log
            .get_ticket_from_cache(&key)
            .and_then(|ticket| ticket.reply().get())
            .cloned();
        if let Some(reply) = cached_reply {
            self.sender.send_reply(key.client, reply);
            return;
        }
        if self.history.contains_request(&request) || !self.received_requests.insert(key) {
            return;
        }

        self.timers
            .start_request_timer(key, self.config.request_timeout, self.view, self.now);
        if !self.is_primary() {
            let primary = self.primary();
            self.sender.send(primary, request);
            return;
        }

        if self.message_log.should_buffer() {
            self.buffer_request(request);
        } else if let Err(request) = self.assign_sequence_number(request) {
            self.buffer_request(request);
        }
    }

    fn buffer_request(&mut self, request: Request) {
        self.message_log.buffer(request.clone());
        self.publish(Event::BufferRequest(BufferRequestEvent {
            timestamp: SystemTime::now(),
            request,
        }));
    }

    /// Assign the next sequence number to `request`, broadcast a [`Prepare`] for it, and execute it
    /// speculatively. Gives `request` back if the next sequence number is beyond the high watermark.
    fn assign_sequence_number(&mut self, request: Request) -> Result<(), Request> {
        let seq = self.seq_counter + 1;
        if !self.message_log.is_between_water_marks(seq) {
            return Err(request);
        }
        self.seq_counter = seq;

        let view = self.view;
        let prepare = Prepare {
            view,
            seq,
            digest: request.digest(),
            request: request.clone(),
            primary: self.config.me,
        };
        let ticket = self.message_log.new_ticket(view, seq);
        ticket.append(request.clone());
        ticket.append(prepare.clone());
        ticket.cas_phase(TicketPhase::Prepare, TicketPhase::Commit);

        self.sender.broadcast(prepare.clone());
        self.publish(Event::Prepare(PrepareEvent {
            timestamp: SystemTime::now(),
            prepare,
        }));
        self.speculatively_execute(view, seq, request);
        Ok(())
    }

    fn on_receive_prepare(&mut self, origin: ReplicaId, prepare: Prepare) {
        self.publish(Event::ReceivePrepare(ReceivePrepareEvent {
            timestamp: SystemTime::now(),
            origin,
            prepare: prepare.clone(),
        }));
        if !self.accepts_phase_messages() {
            return;
        }
        if origin != prepare.primary
            || prepare.primary != select_primary(prepare.view, &self.config.replicas)
        {
            log::debug!("Rejecting prepare from {}: not the primary.", origin);
            return;
        }
        if prepare.view != self.view || !self.message_log.is_between_water_marks(prepare.seq) {
            return;
        }
        if !prepare.is_well_formed() {
            log::debug!("Rejecting prepare from {}: digest mismatch.", origin);
            return;
        }

        let (view, seq) = (prepare.view, prepare.seq);
        if self.history.contains(seq) || self.already_replied(&prepare.request.key(), view, seq) {
            return;
        }
        if self.speculative_requests.contains_request(&prepare.request)
            && self.speculative_requests.get(seq) != Some(&prepare.request)
        {
            log::warn!(
                "Rejecting prepare for {} at {}: the request was already executed at another sequence number.",
                view,
                seq
            );
            return;
        }

        let ticket = self.message_log.new_ticket(view, seq);
        if let Some(recorded) = ticket.prepare() {
            if recorded.digest != prepare.digest {
                log::warn!("Rejecting prepare for {} at {}: conflicts with a recorded prepare.", view, seq);
                return;
            }
        }
        let request = prepare.request.clone();
        ticket.append(prepare);
        if ticket.cas_phase(TicketPhase::Prepare, TicketPhase::Commit) {
            self.seq_counter = max(self.seq_counter, seq);
            self.speculatively_execute(view, seq, request);
        }
    }

    fn on_receive_commit(&mut self, origin: ReplicaId, commit: Commit) {
        self.publish(Event::ReceiveCommit(ReceiveCommitEvent {
            timestamp: SystemTime::now(),
            origin,
            commit: commit.clone(),
        }));
        if !self.accepts_phase_messages() {
            return;
        }
        if origin != commit.replica {
            log::debug!("Rejecting commit relayed by {} on behalf of {}.", origin, commit.replica);
            return;
        }
        if commit.view != self.view || !self.message_log.is_between_water_marks(commit.seq) {
            return;
        }
        if !commit.is_well_formed() {
            log::debug!("Rejecting commit from {}: digest mismatch.", origin);
            return;
        }
        if self.history.contains(commit.seq) {
            return;
        }

        let (view, seq) = (commit.view, commit.seq);
        self.message_log.new_ticket(view, seq).append(commit);
        self.try_advance(view, seq);
    }

    /// Execute `request` speculatively at `seq`: reply to the client, and broadcast this replica's
    /// [`Commit`]. The ticket for `(view, seq)` must already be in the commit phase.
    fn speculatively_execute(&mut self, view: ViewNumber, seq: SequenceNumber, request: Request) {
        let me = self.config.me;
        self.speculative_requests.add_entry(seq, request.clone());
        let reply = Reply {
            view,
            seq,
            timestamp: request.timestamp,
            client: request.client,
            replica: me,
            result: request.operation.clone(),
        };
        let commit = Commit {
            view,
            seq,
            digest: request.digest(),
            request,
            replica: me,
        };
        let ticket = self.message_log.new_ticket(view, seq);
        ticket.append(reply.clone());
        ticket.append(commit.clone());

        self.sender.send_reply(reply.client, reply.clone());
        self.publish(Event::SpeculativeExecute(SpeculativeExecuteEvent {
            timestamp: SystemTime::now(),
            reply,
        }));
        self.sender.broadcast(commit.clone());
        self.publish(Event::Commit(CommitEvent {
            timestamp: SystemTime::now(),
            commit,
        }));

        self.try_advance(view, seq);
    }

    /// Re-evaluate the quorum predicates of the ticket for `(view, seq)`.
    fn try_advance(&mut self, view: ViewNumber, seq: SequenceNumber) {
        let f = self.config.tolerance;
        let (phase, prepared) = match self.message_log.get_ticket(view, seq) {
            Some(ticket) => (ticket.phase(), ticket.prepared_request(f).cloned()),
            None => return,
        };

        // A replica that missed the prepare adopts the request that f + 1 replicas committed.
        if phase == TicketPhase::Prepare {
            if let Some(request) = prepared {
                if let Some(ticket) = self.message_log.get_ticket_mut(view, seq) {
                    ticket.append(request.clone());
                    if ticket.cas_phase(TicketPhase::Prepare, TicketPhase::Commit) {
                        self.seq_counter = max(self.seq_counter, seq);
                        self.speculatively_execute(view, seq, request);
                    }
                }
            }
            return;
        }

        let (committed, conflicting, request) = match self.message_log.get_ticket(view, seq) {
            Some(ticket) => (
                ticket.is_committed_local(f),
                ticket.is_committed_conflicting(f),
                ticket.request().cloned(),
            ),
            None => return,
        };
        match request {
            Some(request) if committed => self.execute(view, seq, request),
            _ if conflicting => self.on_conflicting_commit(view, seq),
            _ => (),
        }
    }

    /// Append `request` to the execution history at `seq` and complete its ticket.
    fn execute(&mut self, view: ViewNumber, seq: SequenceNumber, request: Request) {
        if self.history.get(seq) == Some(&request) {
            return;
        }
        let key = request.key();
        self.history.add_entry(seq, request.clone());
        self.speculative_requests.add_entry(seq, request.clone());
        self.message_log.complete_ticket(key, view, seq);
        self.timers.cancel_request_timer(&key);
        self.publish(Event::ExecuteRequest(ExecuteRequestEvent {
            timestamp: SystemTime::now(),
            seq,
            request,
        }));

        self.on_history_advanced();
        self.drain_buffer();
    }

    /// Ticket as many buffered requests as the admission threshold and the watermark window allow.
    fn drain_buffer(&mut self) {
        if !self.is_primary() || !self.accepts_phase_messages() {
            return;
        }
        while !self.message_log.should_buffer() {
            let request = match self.message_log.pop_buffer() {
                Some(request) => request,
                None => break,
            };
            if let Err(request) = self.assign_sequence_number(request) {
                self.message_log.buffer_first(request);
                break;
            }
        }
    }

    fn on_conflicting_commit(&mut self, view: ViewNumber, seq: SequenceNumber) {
        log::warn!(
            "At least f + 1 conflicting commits for {} at {}. Voting for a view change.",
            view,
            seq
        );
        self.publish(Event::ConflictingCommit(ConflictingCommitEvent {
            timestamp: SystemTime::now(),
            view,
            seq,
        }));
        self.suspect_primary(self.view + 1);
    }

    /* ↓↓↓ Checkpoints ↓↓↓ */

    /// Get the greatest sequence number up to which the execution history has no gaps, counting from the
    /// stable checkpoint, or from the last settled sequence number if that is greater.
    fn executed_through(&self) -> SequenceNumber {
        let mut through = max(self.message_log.stable_checkpoint().seq, self.settled_through);
        while self.history.contains(through + 1) {
            through = through + 1;
        }
        through
    }

    /// Start the checkpoint protocol for the greatest checkpoint sequence number that the execution history
    /// covers without gaps, and re-append a deferred round-I proof once the history has caught up with it.
    ///
    /// The primary starts the protocol with a round-I proof. Backups arm the checkpoint timer instead.
    fn on_history_advanced(&mut self) {
        let through = self.executed_through();
        let due = through.last_checkpoint(self.message_log.config().checkpoint_interval);
        if due > self.checkpoint_started && due > self.message_log.stable_checkpoint().seq {
            self.checkpoint_started = due;
            if self.is_primary() {
                self.send_checkpoint(CheckpointRound::First, due);
            } else {
                self.timers
                    .start_checkpoint_timer(self.now + self.config.request_timeout);
            }
        }

        let caught_up = self
            .deferred_checkpoint
            .as_ref()
            .map_or(false, |proof| proof.seq <= through);
        if caught_up {
            if let Some(proof) = self.deferred_checkpoint.take() {
                self.record_checkpoint(CheckpointRound::First, proof);
            }
        }
    }

    fn on_receive_checkpoint(
        &mut self,
        origin: ReplicaId,
        round: CheckpointRound,
        proof: CheckpointProof,
    ) {
        self.publish(Event::ReceiveCheckpoint(ReceiveCheckpointEvent {
            timestamp: SystemTime::now(),
            origin,
            round,
            seq: proof.seq,
            digest: proof.digest,
        }));
        if origin != proof.replica {
            log::debug!("Rejecting checkpoint proof relayed by {} on behalf of {}.", origin, proof.replica);
            return;
        }
        if proof.seq > self.message_log.high_water_mark() {
            log::debug!("Rejecting checkpoint proof from {} at {}: above the high watermark.", origin, proof.seq);
            return;
        }
        self.record_checkpoint(round, proof);
    }

    /// Broadcast this replica's proof for `round` at `seq`, and record it.
    fn send_checkpoint(&mut self, round: CheckpointRound, seq: SequenceNumber) {
        let proof = CheckpointProof::new(seq, self.config.me, &self.history);
        self.sender
            .broadcast(Message::checkpoint(round, proof.clone()));
        self.publish(Event::Checkpoint(CheckpointEvent {
            timestamp: SystemTime::now(),
            round,
            seq,
            digest: proof.digest,
        }));
        self.record_checkpoint(round, proof);
    }

    fn record_checkpoint(&mut self, round: CheckpointRound, proof: CheckpointProof) {
        let seq = proof.seq;
        let primary = self.primary();
        let reached = self.executed_through() >= seq;
        let outcome = self.message_log.append_checkpoint(
            round,
            proof,
            self.config.tolerance,
            &self.history,
            reached,
            self.view,
            primary,
        );

        match outcome {
            CheckpointOutcome::Stale | CheckpointOutcome::Duplicate => (),
            CheckpointOutcome::Rejected => {
                log::debug!("Rejected a malformed {:?} checkpoint proof at {}.", round, seq)
            }
            CheckpointOutcome::Mismatch => {
                log::warn!(
                    "{:?} checkpoint proof at {} contradicts the execution history. Voting for a view change.",
                    round,
                    seq
                );
                self.suspect_primary(self.view + 1);
            }
            CheckpointOutcome::Deferred(proof) => {
                let newer = self
                    .deferred_checkpoint
                    .as_ref()
                    .map_or(true, |deferred| deferred.seq < proof.seq);
                if newer {
                    self.deferred_checkpoint = Some(proof);
                }
            }
            CheckpointOutcome::Recorded => {
                if round == CheckpointRound::First {
                    self.timers.cancel_checkpoint_timer();
                    self.awaiting_checkpoint = false;
                    self.send_checkpoint(CheckpointRound::Second, seq);
                }
            }
            CheckpointOutcome::Certified(history) => {
                self.adopt_history(&history);
                self.send_checkpoint(CheckpointRound::Third, seq);
            }
            CheckpointOutcome::Stabilized {
                checkpoint,
                collected,
            } => {
                self.disgruntled = false;
                self.adopt_history(&checkpoint.history);
                if checkpoint.seq >= self.checkpoint_started {
                    self.timers.cancel_checkpoint_timer();
                }
                if collected {
                    self.speculative_requests = self.speculative_requests.after(checkpoint.seq);
                    self.publish(Event::StabilizeCheckpoint(StabilizeCheckpointEvent {
                        timestamp: SystemTime::now(),
                        seq: checkpoint.seq,
                        digest: checkpoint.digest(),
                    }));
                    self.drain_buffer();
                }
            }
        }
    }

    /// Bring the execution history in line with `certified`, a history that `2f + 1` replicas vouched for.
    fn adopt_history(&mut self, certified: &ExecutionHistory) {
        for (seq, request) in certified {
            if self.history.get(*seq) == Some(request) {
                continue;
            }
            if self.history.add_entry(*seq, request.clone()).is_some() {
                log::warn!("Replaced the request executed at {} with a certified one.", seq);
            }
            self.speculative_requests.add_entry(*seq, request.clone());
            self.timers.cancel_request_timer(&request.key());
            self.publish(Event::ExecuteRequest(ExecuteRequestEvent {
                timestamp: SystemTime::now(),
                seq: *seq,
                request: request.clone(),
            }));
            self.seq_counter = max(self.seq_counter, *seq);
        }
        if let Ok(greatest) = certified.greatest_seq_number() {
            self.settled_through = max(self.settled_through, greatest);
        }
        self.on_history_advanced();
    }

    /* ↓↓↓ View changes ↓↓↓ */

    /// Vote to leave the current view, unless a vote of this replica is already pending. The vote targets
    /// `target`, or the view after the largest one this replica ever voted for if that is greater.
    fn suspect_primary(&mut self, target: ViewNumber) {
        if self.disgruntled {
            return;
        }
        self.send_view_change(max(target, self.largest_view + 1));
    }

    /// Vote for `new_view`, unless it is not beyond the current view or this replica already voted for it.
    fn send_view_change(&mut self, new_view: ViewNumber) {
        let me = self.config.me;
        if new_view <= self.view || self.message_log.has_voted(new_view, me) {
            return;
        }
        self.disgruntled = true;
        self.largest_view = max(self.largest_view, new_view);

        let view_change = self.message_log.produce_view_change(
            new_view,
            self.view,
            me,
            &self.speculative_requests,
        );
        self.sender.broadcast(view_change.clone());
        self.publish(Event::ViewChange(ViewChangeEvent {
            timestamp: SystemTime::now(),
            view_change,
        }));

        if self.message_log.view_change_votes(new_view) >= quorum_large(self.config.tolerance) {
            self.start_view_change_timer();
        }
        self.try_new_view(new_view);
    }

    fn on_receive_view_change(&mut self, origin: ReplicaId, view_change: ViewChange) {
        self.publish(Event::ReceiveViewChange(ReceiveViewChangeEvent {
            timestamp: SystemTime::now(),
            origin,
            view_change: view_change.clone(),
        }));
        if origin != view_change.replica {
            log::debug!("Rejecting vote relayed by {} on behalf of {}.", origin, view_change.replica);
            return;
        }
        if view_change.new_view <= self.view {
            return;
        }

        let me = self.config.me;
        let target = view_change.new_view;
        let result =
            self.message_log
                .accept_view_change(view_change, me, self.view, self.config.tolerance);
        if result.should_bandwagon {
            if let Some(bandwagon_view) = result.bandwagon_view {
                self.send_view_change(bandwagon_view);
            }
        }
        if result.begin_next_vote && self.message_log.has_voted(target, me) {
            self.start_view_change_timer();
        }
        self.try_new_view(target);
    }

    /// Arm the view-change timer, unless it is already running. Its duration grows with the number of views
    /// this replica is trying to skip.
    fn start_view_change_timer(&mut self) {
        if self.timers.is_view_change_timer_running() {
            return;
        }
        let skipped = max(1, self.largest_view - self.view) as u32;
        let deadline = self.now + self.config.view_change_timeout * skipped;
        self.timers.start_view_change_timer(deadline);
    }

    /// If this replica is the primary of `target`, and holds enough votes for it, build and broadcast the
    /// [`NewView`], then enter `target`.
    fn try_new_view(&mut self, target: ViewNumber) {
        let me = self.config.me;
        let f = self.config.tolerance;
        if target <= self.view || select_primary(target, &self.config.replicas) != me {
            return;
        }
        if !self.message_log.has_voted(target, me) {
            if self.message_log.view_change_votes(target) + 1 >= quorum_large(f) {
                self.send_view_change(target);
            }
            return;
        }

        let new_view = match self.message_log.produce_new_view(target, me, f) {
            Some(new_view) => new_view,
            None => return,
        };
        self.sender.broadcast(new_view.clone());
        self.publish(Event::NewView(NewViewEvent {
            timestamp: SystemTime::now(),
            new_view: new_view.clone(),
        }));
        self.apply_new_view(new_view);
    }

    fn on_receive_new_view(&mut self, origin: ReplicaId, new_view: NewView) {
        self.publish(Event::ReceiveNewView(ReceiveNewViewEvent {
            timestamp: SystemTime::now(),
            origin,
            new_view: new_view.clone(),
        }));
        if origin != new_view.primary
            || select_primary(new_view.new_view, &self.config.replicas) != origin
        {
            log::debug!("Rejecting new view from {}: not the primary.", origin);
            return;
        }
        if new_view.new_view <= self.view {
            return;
        }
        if !new_view
            .view_changes
            .iter()
            .all(|vote| self.config.replicas.contains(&vote.replica))
        {
            log::debug!("Rejecting new view from {}: votes from unknown replicas.", origin);
            return;
        }
        self.apply_new_view(new_view);
    }

    /// Validate `new_view`, and if it is valid, adopt its history, enter its view, and treat it as the round-I
    /// checkpoint proof of the new primary.
    fn apply_new_view(&mut self, new_view: NewView) {
        if let Err(error) = self
            .message_log
            .accept_new_view(&new_view, self.config.tolerance)
        {
            log::warn!("Rejecting new view for {}: {}.", new_view.new_view, error);
            return;
        }

        let adopted = new_view.history();
        self.repair_history(&adopted, &new_view);
        self.enter_view(new_view.new_view);

        let seq = adopted
            .greatest_seq_number()
            .unwrap_or(SequenceNumber::init());
        self.checkpoint_started = max(self.checkpoint_started, seq);
        let stable = self.message_log.stable_checkpoint().seq;
        if seq < stable || (seq == stable && stable > SequenceNumber::init()) {
            self.awaiting_checkpoint = false;
            return;
        }
        let proof = CheckpointProof::new(seq, new_view.primary, &adopted);
        self.record_checkpoint(CheckpointRound::First, proof);
    }

    /// Make the execution history equal to `adopted` above the stable checkpoint, and move the sequence
    /// counter past every slot `new_view` mentions, reserved ones included.
    fn repair_history(&mut self, adopted: &ExecutionHistory, new_view: &NewView) {
        let stable = self.message_log.stable_checkpoint().seq;
        let divergence = self
            .history
            .after(stable)
            .iter()
            .find(|(seq, request)| adopted.get(**seq) != Some(*request))
            .map(|(seq, _)| *seq);
        if let Some(seq) = divergence {
            log::warn!("Rolling back the execution history from {}.", seq);
            self.history
                .roll_back(SequenceNumber::new(seq.int().saturating_sub(1)));
        }

        for (seq, request) in adopted.after(stable).iter() {
            if self.history.contains(*seq) {
                continue;
            }
            self.history.add_entry(*seq, request.clone());
            self.publish(Event::ExecuteRequest(ExecuteRequestEvent {
                timestamp: SystemTime::now(),
                seq: *seq,
                request: request.clone(),
            }));
            let reply = Reply {
                view: new_view.new_view,
                seq: *seq,
                timestamp: request.timestamp,
                client: request.client,
                replica: self.config.me,
                result: request.operation.clone(),
            };
            self.sender.send_reply(reply.client, reply);
        }

        let greatest = adopted
            .greatest_seq_number()
            .unwrap_or(SequenceNumber::init());
        let reserved = new_view
            .requests
            .keys()
            .next_back()
            .copied()
            .unwrap_or(SequenceNumber::init());
        self.seq_counter = max(self.seq_counter, max(greatest, reserved));
        self.settled_through = max(self.settled_through, max(greatest, reserved));
    }

    fn enter_view(&mut self, view: ViewNumber) {
        self.view = view;
        self.largest_view = max(self.largest_view, view);
        self.disgruntled = false;
        self.awaiting_checkpoint = true;
        self.timers.clear();
        self.deferred_checkpoint = None;
        self.received_requests.clear();
        while self.message_log.pop_buffer().is_some() {}
        self.speculative_requests = self
            .history
            .after(self.message_log.stable_checkpoint().seq);

        let primary = self.primary();
        log::debug!("Entering view {} with primary {}.", view, primary);
        self.publish(Event::StartView(StartViewEvent {
            timestamp: SystemTime::now(),
            view,
            primary,
        }));
    }

    /* ↓↓↓ Helpers ↓↓↓ */

    fn accepts_phase_messages(&self) -> bool {
        !self.disgruntled && !self.awaiting_checkpoint
    }

    fn already_replied(&self, key: &RequestKey, view: ViewNumber, seq: SequenceNumber) -> bool {
        self.message_log.get_ticket_from_cache(key).is_some()
            || self
                .message_log
                .get_ticket(view, seq)
                .map_or(false, |ticket| ticket.reply().is_resolved())
    }

    fn publish(&self, event: Event) {
        self.event_handlers.fire_handlers(event)
    }
}
