/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The execution history of a replica, and stable checkpoints of it.
//!
//! hBFT-rs does not host an application state machine. Instead, the ordered record of executed requests
//! stands in for replica state, and its [digest](ExecutionHistory::digest) stands in for a state hash. Two
//! replicas are in the same state if and only if their histories are equal.

use std::{
    collections::{btree_map, BTreeMap},
    error::Error,
    fmt::{self, Display, Formatter},
};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    crypto_primitives::digest,
    data_types::{Digest, SequenceNumber},
};

use super::messages::Request;

/// Ordered map from sequence number to the request executed at that sequence number.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ExecutionHistory {
    entries: BTreeMap<SequenceNumber, Request>,
}

impl ExecutionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `request` was executed at `seq`, returning the request previously recorded there, if any.
    pub fn add_entry(&mut self, seq: SequenceNumber, request: Request) -> Option<Request> {
        self.entries.insert(seq, request)
    }

    pub fn get(&self, seq: SequenceNumber) -> Option<&Request> {
        self.entries.get(&seq)
    }

    pub fn contains(&self, seq: SequenceNumber) -> bool {
        self.entries.contains_key(&seq)
    }

    pub fn contains_request(&self, request: &Request) -> bool {
        self.entries.values().any(|executed| executed == request)
    }

    /// Remove every entry with a sequence number greater than `seq`.
    pub fn roll_back(&mut self, seq: SequenceNumber) {
        let _ = self.entries.split_off(&(seq + 1));
    }

    /// Get a copy of this history containing only the entries with sequence numbers less than or equal to
    /// `seq`.
    pub fn before(&self, seq: SequenceNumber) -> ExecutionHistory {
        ExecutionHistory {
            entries: self
                .entries
                .range(..=seq)
                .map(|(seq, request)| (*seq, request.clone()))
                .collect(),
        }
    }

    /// Get a copy of this history containing only the entries with sequence numbers greater than `seq`.
    pub fn after(&self, seq: SequenceNumber) -> ExecutionHistory {
        ExecutionHistory {
            entries: self
                .entries
                .range((seq + 1)..)
                .map(|(seq, request)| (*seq, request.clone()))
                .collect(),
        }
    }

    /// Get the greatest sequence number in this history.
    ///
    /// # Errors
    /// [`HistoryError::EmptyHistory`] if nothing has been executed.
    pub fn greatest_seq_number(&self) -> Result<SequenceNumber, HistoryError> {
        self.entries
            .keys()
            .next_back()
            .copied()
            .ok_or(HistoryError::EmptyHistory)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, SequenceNumber, Request> {
        self.entries.iter()
    }

    pub fn digest(&self) -> Digest {
        digest(self)
    }
}

impl<'a> IntoIterator for &'a ExecutionHistory {
    type Item = (&'a SequenceNumber, &'a Request);
    type IntoIter = btree_map::Iter<'a, SequenceNumber, Request>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl FromIterator<(SequenceNumber, Request)> for ExecutionHistory {
    fn from_iter<I: IntoIterator<Item = (SequenceNumber, Request)>>(iter: I) -> Self {
        ExecutionHistory {
            entries: iter.into_iter().collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryError {
    EmptyHistory,
}

impl Display for HistoryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            HistoryError::EmptyHistory => write!(f, "the execution history is empty"),
        }
    }
}

impl Error for HistoryError {}

/// A stabilized snapshot of an execution history, taken at sequence number `seq`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Checkpoint {
    pub seq: SequenceNumber,
    pub history: ExecutionHistory,
}

impl Checkpoint {
    pub fn new(seq: SequenceNumber, history: ExecutionHistory) -> Self {
        Self { seq, history }
    }

    /// The checkpoint every replica starts with: nothing executed.
    pub fn genesis() -> Self {
        Self {
            seq: SequenceNumber::init(),
            history: ExecutionHistory::new(),
        }
    }

    /// Create a checkpoint at the greatest sequence number of `history`.
    pub fn of(history: ExecutionHistory) -> Self {
        let seq = history
            .greatest_seq_number()
            .unwrap_or(SequenceNumber::init());
        Self { seq, history }
    }

    pub fn digest(&self) -> Digest {
        self.history.digest()
    }
}
