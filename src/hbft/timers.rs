/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cooperative timers of a replica.
//!
//! Timers never fire on their own. The replica passes the current time to [`Timers::expired`] whenever it
//! is [ticked](crate::replica::Replica::tick), and acts on the returned [`Expiry`]s. There are three kinds
//! of timers:
//! 1. One [`LinearBackoff`] per outstanding client request. Each expiry votes for the next view and extends
//!    the timeout by the initial timeout, so a replica that keeps waiting votes for ever higher views ever
//!    more slowly.
//! 2. The checkpoint timer, armed by a backup that committed a checkpoint sequence number, and cancelled
//!    by a valid round-I checkpoint proof.
//! 3. The view-change timer, armed once a view this replica voted for has gathered `2f + 1` votes, and
//!    cancelled when the replica enters a new view.

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use crate::types::data_types::{RequestKey, ViewNumber};

/// Timer whose timeout grows linearly with every expiry.
#[derive(Clone, Debug)]
pub(crate) struct LinearBackoff {
    initial_timeout: Duration,
    timeout: Duration,
    target_view: ViewNumber,
    deadline: Instant,
}

impl LinearBackoff {
    /// Create a timer that, on its first expiry, targets the view after `current_view`.
    pub(crate) fn new(initial_timeout: Duration, current_view: ViewNumber, now: Instant) -> Self {
        Self {
            initial_timeout,
            timeout: initial_timeout,
            target_view: current_view + 1,
            deadline: now + initial_timeout,
        }
    }

    pub(crate) fn target_view(&self) -> ViewNumber {
        self.target_view
    }

    #[cfg(test)]
    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Target the next view, extend the timeout by the initial timeout, and restart the timer at `now`.
    pub(crate) fn expire(&mut self, now: Instant) {
        self.target_view = self.target_view + 1;
        self.timeout += self.initial_timeout;
        self.deadline = now + self.timeout;
    }
}

/// A timer that expired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expiry {
    /// The request identified by `key` did not complete in time. The replica should vote for `target_view`.
    Request {
        key: RequestKey,
        target_view: ViewNumber,
    },
    /// No valid round-I checkpoint proof arrived in time.
    Checkpoint,
    /// No new view was entered in time after the voted-for view gathered enough votes.
    ViewChange,
}

#[derive(Debug, Default)]
pub(crate) struct Timers {
    requests: BTreeMap<RequestKey, LinearBackoff>,
    checkpoint: Option<Instant>,
    view_change: Option<Instant>,
}

impl Timers {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Start the timer for `key`, unless it is already running.
    pub(crate) fn start_request_timer(
        &mut self,
        key: RequestKey,
        timeout: Duration,
        current_view: ViewNumber,
        now: Instant,
    ) {
        self.requests
            .entry(key)
            .or_insert_with(|| LinearBackoff::new(timeout, current_view, now));
    }

    /// Cancel the timer for `key`. Returns whether it was running.
    pub(crate) fn cancel_request_timer(&mut self, key: &RequestKey) -> bool {
        self.requests.remove(key).is_some()
    }

    #[cfg(test)]
    pub(crate) fn request_timer(&self, key: &RequestKey) -> Option<&LinearBackoff> {
        self.requests.get(key)
    }

    pub(crate) fn start_checkpoint_timer(&mut self, deadline: Instant) {
        self.checkpoint = Some(deadline);
    }

    pub(crate) fn cancel_checkpoint_timer(&mut self) {
        self.checkpoint = None;
    }

    pub(crate) fn start_view_change_timer(&mut self, deadline: Instant) {
        self.view_change = Some(deadline);
    }

    pub(crate) fn is_view_change_timer_running(&self) -> bool {
        self.view_change.is_some()
    }

    /// Cancel every timer.
    pub(crate) fn clear(&mut self) {
        self.requests.clear();
        self.checkpoint = None;
        self.view_change = None;
    }

    /// Collect every timer that expired at `now`. Request timers are restarted with extended backoff, and
    /// the checkpoint and view-change timers are disarmed.
    pub(crate) fn expired(&mut self, now: Instant) -> Vec<Expiry> {
        let mut expired = Vec::new();
        for (key, timer) in self.requests.iter_mut() {
            if timer.is_expired(now) {
                expired.push(Expiry::Request {
                    key: *key,
                    target_view: timer.target_view(),
                });
                timer.expire(now);
            }
        }
        if self.checkpoint.map_or(false, |deadline| now >= deadline) {
            self.checkpoint = None;
            expired.push(Expiry::Checkpoint);
        }
        if self.view_change.map_or(false, |deadline| now >= deadline) {
            self.view_change = None;
            expired.push(Expiry::ViewChange);
        }
        expired
    }
}
