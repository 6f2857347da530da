/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-slot aggregation of protocol messages.
//!
//! A [`Ticket`] collects every [`Request`], [`Prepare`], [`Commit`] and [`Reply`] that a replica sees for
//! one `(view, seq)` slot, and answers quorum questions about them. Its phase only moves forward, and only
//! through [`Ticket::cas_phase`], so duplicated or reordered deliveries never apply a transition twice.

use std::collections::BTreeMap;

use crate::types::{
    data_types::{Digest, ReplicaId, SequenceNumber, ViewNumber},
    quorum::{quorum_large, quorum_small},
};

use super::messages::{Commit, Prepare, Reply, Request};

/// Phase of a ticket. `Prepare` is initial, `Commit` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TicketPhase {
    Prepare,
    Commit,
}

/// Write-once slot holding the reply this replica sent for a ticket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplySlot {
    Pending,
    Resolved(Reply),
}

impl ReplySlot {
    /// Store `reply` if the slot is still pending. Returns whether the slot changed.
    pub fn resolve(&mut self, reply: Reply) -> bool {
        match self {
            ReplySlot::Pending => {
                *self = ReplySlot::Resolved(reply);
                true
            }
            ReplySlot::Resolved(_) => false,
        }
    }

    pub fn get(&self) -> Option<&Reply> {
        match self {
            ReplySlot::Pending => None,
            ReplySlot::Resolved(reply) => Some(reply),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, ReplySlot::Resolved(_))
    }
}

/// A message that can be recorded in a [`Ticket`].
#[derive(Clone, Debug)]
pub enum TicketMessage {
    Request(Request),
    Prepare(Prepare),
    Commit(Commit),
    Reply(Reply),
}

impl From<Request> for TicketMessage {
    fn from(request: Request) -> Self {
        TicketMessage::Request(request)
    }
}

impl From<Prepare> for TicketMessage {
    fn from(prepare: Prepare) -> Self {
        TicketMessage::Prepare(prepare)
    }
}

impl From<Commit> for TicketMessage {
    fn from(commit: Commit) -> Self {
        TicketMessage::Commit(commit)
    }
}

impl From<Reply> for TicketMessage {
    fn from(reply: Reply) -> Self {
        TicketMessage::Reply(reply)
    }
}

#[derive(Clone, Debug)]
pub struct Ticket {
    view: ViewNumber,
    seq: SequenceNumber,
    phase: TicketPhase,
    request: Option<Request>,
    prepare: Option<Prepare>,
    commits: BTreeMap<ReplicaId, Commit>,
    reply: ReplySlot,
}

impl Ticket {
    pub fn new(view: ViewNumber, seq: SequenceNumber) -> Self {
        Self {
            view,
            seq,
            phase: TicketPhase::Prepare,
            request: None,
            prepare: None,
            commits: BTreeMap::new(),
            reply: ReplySlot::Pending,
        }
    }

    pub fn view(&self) -> ViewNumber {
        self.view
    }

    pub fn seq(&self) -> SequenceNumber {
        self.seq
    }

    pub fn phase(&self) -> TicketPhase {
        self.phase
    }

    /// The first request recorded for this slot, either directly or through a [`Prepare`].
    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    pub fn prepare(&self) -> Option<&Prepare> {
        self.prepare.as_ref()
    }

    pub fn reply(&self) -> &ReplySlot {
        &self.reply
    }

    pub fn commits(&self) -> impl Iterator<Item = &Commit> {
        self.commits.values()
    }

    /// Record `message`. The first message of each kind fills the corresponding field, and later ones
    /// are ignored. Commits are kept per replica, so a replica's commit counts at most once.
    ///
    /// Returns whether the ticket changed.
    pub fn append<M: Into<TicketMessage>>(&mut self, message: M) -> bool {
        match message.into() {
            TicketMessage::Request(request) => {
                if self.request.is_none() {
                    self.request = Some(request);
                    true
                } else {
                    false
                }
            }
            TicketMessage::Prepare(prepare) => {
                if self.prepare.is_some() {
                    return false;
                }
                if self.request.is_none() {
                    self.request = Some(prepare.request.clone());
                }
                self.prepare = Some(prepare);
                true
            }
            TicketMessage::Commit(commit) => {
                if self.commits.contains_key(&commit.replica) {
                    return false;
                }
                self.commits.insert(commit.replica, commit);
                true
            }
            TicketMessage::Reply(reply) => self.reply.resolve(reply),
        }
    }

    /// Whether at least `2f + 1` replicas committed the request recorded in this ticket. A ticket without a
    /// recorded request is never committed.
    pub fn is_committed_local(&self, f: u64) -> bool {
        match &self.request {
            Some(request) => {
                let expected = self.expected_digest(request);
                self.commits
                    .values()
                    .filter(|commit| commit.digest == expected && &commit.request == request)
                    .count()
                    >= quorum_large(f)
            }
            None => false,
        }
    }

    /// Whether at least `f + 1` replicas committed something other than the request recorded in this
    /// ticket. Such a ticket must never be executed: the slot may already hold a different request at
    /// other correct replicas.
    pub fn is_committed_conflicting(&self, f: u64) -> bool {
        match &self.request {
            Some(request) => {
                let expected = self.expected_digest(request);
                self.commits
                    .values()
                    .filter(|commit| commit.digest != expected || &commit.request != request)
                    .count()
                    >= quorum_small(f)
            }
            None => false,
        }
    }

    /// Get the request carried by at least `f + 1` identical commits, if there is one.
    ///
    /// At least one of those commits comes from a correct replica, so a replica that missed the
    /// [`Prepare`] for this slot can safely adopt the request.
    pub fn prepared_request(&self, f: u64) -> Option<&Request> {
        let mut tally: BTreeMap<(Digest, &Request), usize> = BTreeMap::new();
        for commit in self.commits.values() {
            *tally.entry((commit.digest, &commit.request)).or_insert(0) += 1;
        }
        tally
            .into_iter()
            .filter(|(_, count)| *count >= quorum_small(f))
            .max_by_key(|(_, count)| *count)
            .map(|((_, request), _)| request)
    }

    /// Move the ticket from phase `old` to phase `new`, if it is in phase `old` and `new` does not precede
    /// `old`. Returns whether the transition happened.
    pub fn cas_phase(&mut self, old: TicketPhase, new: TicketPhase) -> bool {
        if self.phase != old || new < old {
            return false;
        }
        self.phase = new;
        true
    }

    fn expected_digest(&self, request: &Request) -> Digest {
        match &self.prepare {
            Some(prepare) => prepare.digest,
            None => request.digest(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::data_types::{ClientId, Operation, Timestamp};

    fn request(op: u8) -> Request {
        Request::new(ClientId::new(7), Timestamp::new(1), Operation::new(vec![op]))
    }

    fn commit(replica: u64, request: &Request) -> Commit {
        Commit {
            view: ViewNumber::init(),
            seq: SequenceNumber::new(1),
            digest: request.digest(),
            request: request.clone(),
            replica: ReplicaId::new(replica),
        }
    }

    fn prepare(request: &Request) -> Prepare {
        Prepare {
            view: ViewNumber::init(),
            seq: SequenceNumber::new(1),
            digest: request.digest(),
            request: request.clone(),
            primary: ReplicaId::new(1),
        }
    }

    fn reply(replica: u64) -> Reply {
        Reply {
            view: ViewNumber::init(),
            seq: SequenceNumber::new(1),
            timestamp: Timestamp::new(1),
            client: ClientId::new(7),
            replica: ReplicaId::new(replica),
            result: Operation::new(vec![1]),
        }
    }

    #[test]
    fn first_writer_wins_per_field() {
        let mut ticket = Ticket::new(ViewNumber::init(), SequenceNumber::new(1));
        assert!(ticket.append(prepare(&request(1))));
        assert!(!ticket.append(prepare(&request(2))));
        assert!(!ticket.append(request(2)));
        assert_eq!(ticket.request(), Some(&request(1)));

        assert!(ticket.append(reply(0)));
        assert!(!ticket.append(reply(3)));
        assert_eq!(ticket.reply().get().map(|r| r.replica), Some(ReplicaId::new(0)));
    }

    #[test]
    fn duplicate_commits_do_not_inflate_the_quorum() {
        let r = request(1);
        let mut ticket = Ticket::new(ViewNumber::init(), SequenceNumber::new(1));
        ticket.append(r.clone());
        ticket.append(commit(0, &r));
        ticket.append(commit(1, &r));
        assert!(!ticket.append(commit(1, &r)));
        assert!(!ticket.is_committed_local(1));

        ticket.append(commit(2, &r));
        assert!(ticket.is_committed_local(1));
        assert!(!ticket.is_committed_conflicting(1));
    }

    #[test]
    fn conflicting_commits_are_detected() {
        let mut ticket = Ticket::new(ViewNumber::init(), SequenceNumber::new(1));
        ticket.append(prepare(&request(1)));
        ticket.append(commit(0, &request(1)));
        ticket.append(commit(2, &request(2)));
        assert!(!ticket.is_committed_conflicting(1));

        ticket.append(commit(3, &request(2)));
        assert!(ticket.is_committed_conflicting(1));
        assert!(!ticket.is_committed_local(1));
        assert_eq!(ticket.phase(), TicketPhase::Prepare);
    }

    #[test]
    fn prepared_request_needs_f_plus_one_identical_commits() {
        let mut ticket = Ticket::new(ViewNumber::init(), SequenceNumber::new(1));
        ticket.append(commit(0, &request(1)));
        ticket.append(commit(1, &request(2)));
        assert_eq!(ticket.prepared_request(1), None);

        ticket.append(commit(2, &request(2)));
        assert_eq!(ticket.prepared_request(1), Some(&request(2)));
    }

    #[test]
    fn phase_transitions_happen_at_most_once() {
        let mut ticket = Ticket::new(ViewNumber::init(), SequenceNumber::new(1));
        assert!(ticket.cas_phase(TicketPhase::Prepare, TicketPhase::Commit));
        assert!(!ticket.cas_phase(TicketPhase::Prepare, TicketPhase::Commit));
        assert!(!ticket.cas_phase(TicketPhase::Commit, TicketPhase::Prepare));
        assert_eq!(ticket.phase(), TicketPhase::Commit);
    }
}
