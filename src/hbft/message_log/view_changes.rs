/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! View-change votes and new-view messages.
//!
//! ## Choosing what survives a view change
//!
//! The primary of the new view and every replica that receives its [`NewView`] run the same deterministic
//! [reconciliation](reconcile) over the same set of votes, so a replica accepts a `NewView` only if it
//! arrives at exactly the checkpoint and request slots that the primary sent. Reconciliation has two
//! steps:
//! 1. Choose the checkpoint history `M`:
//!    - **Rule A**: a history that at least `2f + 1` voters report as their CER1 history ("P"), and that at
//!      least `f + 1` voters report as their accepted round-I history ("Q").
//!    - **Rule B**: otherwise, if at least `2f + 1` voters report no CER1 history, the last stable
//!      checkpoint of the new primary, taken from its own vote.
//! 2. Fill the slots above `M`: every sequence number mentioned in some voter's speculative requests
//!    ("R") becomes [`Known`](RequestSlot::Known) if at least `f + 1` votes carry the same request there,
//!    and [`ReservedUnknown`](RequestSlot::ReservedUnknown) otherwise.

use std::{
    collections::{BTreeMap, BTreeSet},
    error::Error,
    fmt::{self, Display, Formatter},
};

use crate::{
    hbft::{
        history::{Checkpoint, ExecutionHistory},
        messages::{NewView, Request, RequestSlot, ViewChange},
    },
    types::{
        data_types::{ReplicaId, SequenceNumber, ViewNumber},
        quorum::{quorum_large, quorum_small},
    },
};

use super::MessageLog;

/// What a replica should do after recording a view-change vote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewChangeResult {
    /// Exactly `f + 1` other replicas now vote for views beyond the current one, so at least one correct
    /// replica wants to leave it. The replica should join them.
    pub should_bandwagon: bool,
    /// The smallest view beyond the current one that another replica voted for.
    pub bandwagon_view: Option<ViewNumber>,
    /// The view the recorded vote targets now has at least `2f + 1` votes, so the timer for moving past it
    /// should start counting.
    pub begin_next_vote: bool,
}

/// Reasons for rejecting a [`NewView`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NewViewError {
    /// A carried vote targets a different view than the message.
    WrongTargetView { vote: ViewNumber, new_view: ViewNumber },
    /// Two carried votes come from the same replica.
    DuplicateVote(ReplicaId),
    /// Fewer than `2f + 1` votes are carried.
    InsufficientVotes { votes: usize, required: usize },
    /// The new primary's own vote is not among the carried votes.
    MissingPrimaryVote(ReplicaId),
    /// Neither Rule A nor Rule B yields a checkpoint from the carried votes.
    NoCheckpoint,
    /// The carried checkpoint differs from the one the votes yield.
    CheckpointMismatch,
    /// The carried request slots differ from the ones the votes yield.
    RequestsMismatch,
}

impl Display for NewViewError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            NewViewError::WrongTargetView { vote, new_view } => write!(
                f,
                "vote targets view {} but the new view is {}",
                vote, new_view
            ),
            NewViewError::DuplicateVote(replica) => {
                write!(f, "replica {} voted more than once", replica)
            }
            NewViewError::InsufficientVotes { votes, required } => {
                write!(f, "{} votes carried, {} required", votes, required)
            }
            NewViewError::MissingPrimaryVote(primary) => {
                write!(f, "the vote of primary {} is missing", primary)
            }
            NewViewError::NoCheckpoint => write!(f, "the votes do not determine a checkpoint"),
            NewViewError::CheckpointMismatch => write!(f, "the carried checkpoint does not match"),
            NewViewError::RequestsMismatch => write!(f, "the carried requests do not match"),
        }
    }
}

impl Error for NewViewError {}

impl MessageLog {
    /// Build this replica's vote for `new_view`, record it, and return it.
    ///
    /// `speculative_requests` are the requests this replica executed speculatively. Only those above the
    /// stable checkpoint are carried.
    pub fn produce_view_change(
        &mut self,
        new_view: ViewNumber,
        current_view: ViewNumber,
        me: ReplicaId,
        speculative_requests: &ExecutionHistory,
    ) -> ViewChange {
        let checkpoint = self.stable_checkpoint.clone();
        let view_change = ViewChange {
            new_view,
            replica: me,
            speculative_requests: speculative_requests.after(checkpoint.seq),
            checkpoint,
            certified_history: self.certified_histories.get(&current_view).cloned(),
            accepted_history: self.accepted_histories.get(&current_view).cloned(),
        };
        self.record_vote(view_change.clone());
        view_change
    }

    /// Record `vote` if it targets a view beyond `current_view`, and tally the votes for those views.
    pub fn accept_view_change(
        &mut self,
        vote: ViewChange,
        me: ReplicaId,
        current_view: ViewNumber,
        f: u64,
    ) -> ViewChangeResult {
        let target = vote.new_view;
        if target > current_view {
            self.record_vote(vote);
        }

        let others: BTreeSet<ReplicaId> = self
            .view_changes
            .range((current_view + 1)..)
            .flat_map(|(_, votes)| votes.keys().copied())
            .filter(|replica| *replica != me)
            .collect();
        let bandwagon_view = self
            .view_changes
            .range((current_view + 1)..)
            .find(|(_, votes)| votes.keys().any(|replica| *replica != me))
            .map(|(view, _)| *view);
        let votes_for_target = self.view_changes.get(&target).map_or(0, |votes| votes.len());

        ViewChangeResult {
            should_bandwagon: others.len() == quorum_small(f),
            bandwagon_view,
            begin_next_vote: votes_for_target >= quorum_large(f),
        }
    }

    /// Keep `vote` as the only vote of its replica. A replica's first vote for a view is the one that counts,
    /// and a vote for another view replaces it, so the log holds at most one vote per replica.
    fn record_vote(&mut self, vote: ViewChange) {
        let (replica, target) = (vote.replica, vote.new_view);
        if self.has_voted(target, replica) {
            return;
        }
        for votes in self.view_changes.values_mut() {
            votes.remove(&replica);
        }
        self.view_changes.retain(|_, votes| !votes.is_empty());
        self.view_changes.entry(target).or_default().insert(replica, vote);
    }

    /// Whether `replica` has a recorded vote for `view`.
    pub fn has_voted(&self, view: ViewNumber, replica: ReplicaId) -> bool {
        self.view_changes
            .get(&view)
            .map_or(false, |votes| votes.contains_key(&replica))
    }

    /// Get the number of votes recorded for `view`.
    pub fn view_change_votes(&self, view: ViewNumber) -> usize {
        self.view_changes.get(&view).map_or(0, |votes| votes.len())
    }

    /// Build the [`NewView`] for `new_view`, if this replica voted for it and holds at least `2f + 1` votes
    /// for it from which a checkpoint can be chosen.
    pub fn produce_new_view(&self, new_view: ViewNumber, me: ReplicaId, f: u64) -> Option<NewView> {
        let votes = self.view_changes.get(&new_view)?;
        if !votes.contains_key(&me) || votes.len() < quorum_large(f) {
            return None;
        }
        let (checkpoint, requests) = reconcile(votes, me, f)?;

        Some(NewView {
            new_view,
            primary: me,
            view_changes: votes.values().cloned().collect(),
            checkpoint,
            requests,
        })
    }

    /// Validate `new_view` by reconciling its votes independently, and if it is valid, discard the tickets
    /// and votes of the views it supersedes.
    pub fn accept_new_view(&mut self, new_view: &NewView, f: u64) -> Result<(), NewViewError> {
        let mut votes = BTreeMap::new();
        for vote in &new_view.view_changes {
            if vote.new_view != new_view.new_view {
                return Err(NewViewError::WrongTargetView {
                    vote: vote.new_view,
                    new_view: new_view.new_view,
                });
            }
            if votes.insert(vote.replica, vote.clone()).is_some() {
                return Err(NewViewError::DuplicateVote(vote.replica));
            }
        }
        if votes.len() < quorum_large(f) {
            return Err(NewViewError::InsufficientVotes {
                votes: votes.len(),
                required: quorum_large(f),
            });
        }
        if !votes.contains_key(&new_view.primary) {
            return Err(NewViewError::MissingPrimaryVote(new_view.primary));
        }

        let (checkpoint, requests) =
            reconcile(&votes, new_view.primary, f).ok_or(NewViewError::NoCheckpoint)?;
        if checkpoint != new_view.checkpoint {
            return Err(NewViewError::CheckpointMismatch);
        }
        if requests != new_view.requests {
            return Err(NewViewError::RequestsMismatch);
        }

        let view = new_view.new_view;
        self.tickets.retain(|(ticket_view, _), _| *ticket_view >= view);
        self.view_changes = self.view_changes.split_off(&(view + 1));
        self.accepted_histories = self.accepted_histories.split_off(&view);
        self.certified_histories = self.certified_histories.split_off(&view);
        Ok(())
    }
}

/// Choose the checkpoint and the request slots that survive a view change, given `votes` for the new view
/// and the `primary` of the new view. Returns `None` if neither Rule A nor Rule B applies.
pub fn reconcile(
    votes: &BTreeMap<ReplicaId, ViewChange>,
    primary: ReplicaId,
    f: u64,
) -> Option<(Checkpoint, BTreeMap<SequenceNumber, RequestSlot>)> {
    let checkpoint = choose_checkpoint(votes, primary, f)?;
    let requests = reconcile_requests(votes, checkpoint.seq, f);
    Some((checkpoint, requests))
}

fn choose_checkpoint(
    votes: &BTreeMap<ReplicaId, ViewChange>,
    primary: ReplicaId,
    f: u64,
) -> Option<Checkpoint> {
    // Rule A.
    for candidate in votes.values().filter_map(|vote| vote.certified_history.as_ref()) {
        let certified = votes
            .values()
            .filter(|vote| vote.certified_history.as_ref() == Some(candidate))
            .count();
        let accepted = votes
            .values()
            .filter(|vote| vote.accepted_history.as_ref() == Some(candidate))
            .count();
        if certified >= quorum_large(f) && accepted >= quorum_small(f) {
            return Some(Checkpoint::of(candidate.clone()));
        }
    }

    // Rule B.
    let uncertified = votes
        .values()
        .filter(|vote| {
            vote.certified_history
                .as_ref()
                .map_or(true, |history| history.is_empty())
        })
        .count();
    if uncertified >= quorum_large(f) {
        return votes.get(&primary).map(|vote| vote.checkpoint.clone());
    }

    None
}

fn reconcile_requests(
    votes: &BTreeMap<ReplicaId, ViewChange>,
    above: SequenceNumber,
    f: u64,
) -> BTreeMap<SequenceNumber, RequestSlot> {
    let mut tally: BTreeMap<SequenceNumber, BTreeMap<&Request, usize>> = BTreeMap::new();
    for vote in votes.values() {
        for (seq, request) in vote.speculative_requests.iter().filter(|(seq, _)| **seq > above) {
            *tally.entry(*seq).or_default().entry(request).or_insert(0) += 1;
        }
    }

    tally
        .into_iter()
        .map(|(seq, candidates)| {
            let slot = candidates
                .into_iter()
                .filter(|(_, count)| *count >= quorum_small(f))
                .max_by_key(|(_, count)| *count)
                .map_or(RequestSlot::ReservedUnknown, |(request, _)| {
                    RequestSlot::Known(request.clone())
                });
            (seq, slot)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hbft::message_log::tests::{config, request};

    const F: u64 = 1;

    fn view(n: u64) -> ViewNumber {
        ViewNumber::new(n)
    }

    fn speculative(entries: &[(u64, u64)]) -> ExecutionHistory {
        entries
            .iter()
            .map(|(seq, timestamp)| (SequenceNumber::new(*seq), request(*timestamp)))
            .collect()
    }

    fn vote(replica: u64, new_view: u64, speculative_requests: ExecutionHistory) -> ViewChange {
        ViewChange {
            new_view: view(new_view),
            replica: ReplicaId::new(replica),
            checkpoint: Checkpoint::genesis(),
            speculative_requests,
            certified_history: None,
            accepted_history: None,
        }
    }

    #[test]
    fn bandwagon_fires_at_exactly_f_plus_one_other_votes() {
        let mut log = MessageLog::new(config());
        let me = ReplicaId::new(0);

        let result = log.accept_view_change(vote(1, 3, ExecutionHistory::new()), me, view(1), F);
        assert!(!result.should_bandwagon);

        let result = log.accept_view_change(vote(2, 2, ExecutionHistory::new()), me, view(1), F);
        assert!(result.should_bandwagon);
        assert_eq!(result.bandwagon_view, Some(view(2)));
        assert!(!result.begin_next_vote);

        let result = log.accept_view_change(vote(3, 2, ExecutionHistory::new()), me, view(1), F);
        assert!(!result.should_bandwagon);

        // Votes for the current view or older do not count.
        let result = log.accept_view_change(vote(3, 1, ExecutionHistory::new()), me, view(1), F);
        assert!(!result.should_bandwagon);
    }

    #[test]
    fn a_replica_holds_at_most_one_vote() {
        let mut log = MessageLog::new(config());
        let me = ReplicaId::new(0);
        let faulty = ReplicaId::new(3);
        for new_view in 2..1000 {
            log.accept_view_change(vote(3, new_view, ExecutionHistory::new()), me, view(1), F);
        }
        assert!(log.has_voted(view(999), faulty));
        assert!(!log.has_voted(view(2), faulty));
        assert_eq!((2..1000).map(|v| log.view_change_votes(view(v))).sum::<usize>(), 1);

        // The first vote for a view counts, and re-delivering it does not move the replica's vote.
        log.accept_view_change(vote(1, 2, speculative(&[(1, 1)])), me, view(1), F);
        log.accept_view_change(vote(1, 2, ExecutionHistory::new()), me, view(1), F);
        assert_eq!(log.view_change_votes(view(2)), 1);
        assert_eq!(
            log.view_changes[&view(2)][&ReplicaId::new(1)].speculative_requests,
            speculative(&[(1, 1)])
        );
    }

    #[test]
    fn begin_next_vote_counts_own_vote() {
        let mut log = MessageLog::new(config());
        let me = ReplicaId::new(0);
        log.produce_view_change(view(2), view(1), me, &ExecutionHistory::new());
        log.accept_view_change(vote(1, 2, ExecutionHistory::new()), me, view(1), F);
        let result = log.accept_view_change(vote(2, 2, ExecutionHistory::new()), me, view(1), F);
        assert!(result.begin_next_vote);
        assert!(log.has_voted(view(2), me));
    }

    #[test]
    fn new_view_reconciles_requests_with_placeholders() {
        let mut log = MessageLog::new(config());
        let me = ReplicaId::new(2);
        log.produce_view_change(view(2), view(1), me, &speculative(&[(1, 1), (2, 2)]));
        log.accept_view_change(vote(0, 2, speculative(&[(1, 1)])), me, view(1), F);
        assert_eq!(log.produce_new_view(view(2), me, F), None);
        log.accept_view_change(vote(3, 2, speculative(&[(1, 1), (2, 5), (3, 3)])), me, view(1), F);

        let new_view = log.produce_new_view(view(2), me, F).expect("three votes are enough");
        assert_eq!(new_view.checkpoint, Checkpoint::genesis());
        assert_eq!(new_view.view_changes.len(), 3);
        assert_eq!(
            new_view.requests.get(&SequenceNumber::new(1)),
            Some(&RequestSlot::Known(request(1)))
        );
        assert_eq!(
            new_view.requests.get(&SequenceNumber::new(2)),
            Some(&RequestSlot::ReservedUnknown)
        );
        assert_eq!(
            new_view.requests.get(&SequenceNumber::new(3)),
            Some(&RequestSlot::ReservedUnknown)
        );
        assert_eq!(new_view.requests.get(&SequenceNumber::new(4)), None);

        // Another replica holding the same votes accepts it.
        let mut other = MessageLog::new(config());
        assert_eq!(other.accept_new_view(&new_view, F), Ok(()));
    }

    #[test]
    fn rule_a_prefers_the_certified_history() {
        let certified = speculative(&[(1, 1), (2, 2)]);
        let mut votes = BTreeMap::new();
        for replica in 0..3 {
            let mut v = vote(replica, 2, speculative(&[(1, 1), (2, 2), (3, 3)]));
            v.certified_history = Some(certified.clone());
            if replica < 2 {
                v.accepted_history = Some(certified.clone());
            }
            votes.insert(ReplicaId::new(replica), v);
        }

        let (checkpoint, requests) = reconcile(&votes, ReplicaId::new(2), F).expect("rule A applies");
        assert_eq!(checkpoint, Checkpoint::new(SequenceNumber::new(2), certified));
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests.get(&SequenceNumber::new(3)),
            Some(&RequestSlot::Known(request(3)))
        );
    }

    #[test]
    fn tampered_new_views_are_rejected() {
        let mut log = MessageLog::new(config());
        let me = ReplicaId::new(2);
        log.produce_view_change(view(2), view(1), me, &speculative(&[(1, 1)]));
        log.accept_view_change(vote(0, 2, speculative(&[(1, 1)])), me, view(1), F);
        log.accept_view_change(vote(1, 2, ExecutionHistory::new()), me, view(1), F);
        let new_view = log.produce_new_view(view(2), me, F).expect("three votes are enough");

        let mut dropped_slot = new_view.clone();
        dropped_slot.requests.clear();
        assert_eq!(
            MessageLog::new(config()).accept_new_view(&dropped_slot, F),
            Err(NewViewError::RequestsMismatch)
        );

        let mut placeholder = new_view.clone();
        placeholder
            .requests
            .insert(SequenceNumber::new(1), RequestSlot::ReservedUnknown);
        assert_eq!(
            MessageLog::new(config()).accept_new_view(&placeholder, F),
            Err(NewViewError::RequestsMismatch)
        );

        let mut short = new_view.clone();
        short.view_changes.pop();
        assert_eq!(
            MessageLog::new(config()).accept_new_view(&short, F),
            Err(NewViewError::InsufficientVotes { votes: 2, required: 3 })
        );

        let mut duplicated = new_view.clone();
        duplicated.view_changes[1] = duplicated.view_changes[0].clone();
        assert_eq!(
            MessageLog::new(config()).accept_new_view(&duplicated, F),
            Err(NewViewError::DuplicateVote(ReplicaId::new(0)))
        );
    }

    #[test]
    fn accepting_a_new_view_discards_old_tickets_and_votes() {
        let mut log = MessageLog::new(config());
        let me = ReplicaId::new(2);
        log.new_ticket(view(1), SequenceNumber::new(1));
        log.produce_view_change(view(2), view(1), me, &ExecutionHistory::new());
        log.accept_view_change(vote(0, 2, ExecutionHistory::new()), me, view(1), F);
        log.accept_view_change(vote(1, 2, ExecutionHistory::new()), me, view(1), F);
        log.accept_view_change(vote(3, 3, ExecutionHistory::new()), me, view(1), F);
        let new_view = log.produce_new_view(view(2), me, F).expect("three votes are enough");

        assert_eq!(log.accept_new_view(&new_view, F), Ok(()));
        assert_eq!(log.active_tickets(), 0);
        assert_eq!(log.view_change_votes(view(2)), 0);
        assert_eq!(log.view_change_votes(view(3)), 1);
    }
}
