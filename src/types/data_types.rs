/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store numbers and bytes, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::{Add, Sub},
};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use borsh::{BorshDeserialize, BorshSerialize};

/// Identifier of a replica.
///
/// The replica set is fixed at startup, and its members are totally ordered by their `ReplicaId`. The order
/// determines which replica is [the primary](crate::hbft::roles::select_primary) of each view.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ReplicaId(u64);

impl ReplicaId {
    /// Create a new `ReplicaId` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` of this `ReplicaId`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

/// Identifier of a client that submits requests to the replica set.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ClientId(u64);

impl ClientId {
    /// Create a new `ClientId` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` of this `ClientId`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

/// View number. Every view has exactly one primary, which assigns sequence numbers to requests.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ViewNumber(u64);

impl ViewNumber {
    /// Create a new `ViewNumber` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the initial `ViewNumber`, which is 1.
    pub const fn init() -> Self {
        Self(1)
    }

    /// Get the inner `u64` of this `ViewNumber`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for ViewNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Add<u64> for ViewNumber {
    type Output = ViewNumber;

    fn add(self, rhs: u64) -> Self::Output {
        ViewNumber(self.0.saturating_add(rhs))
    }
}

impl Sub<ViewNumber> for ViewNumber {
    type Output = i64;

    fn sub(self, rhs: ViewNumber) -> Self::Output {
        (self.0 as i64).sub(rhs.0 as i64)
    }
}

/// Position of a request in the total order agreed on by the replica set.
///
/// Starts at 0 before any request has been assigned, so the first request of a fresh cluster gets
/// sequence number 1.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    /// Create a new `SequenceNumber` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the initial `SequenceNumber`, which is 0.
    pub const fn init() -> Self {
        Self(0)
    }

    /// Get the inner `u64` of this `SequenceNumber`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the greatest sequence number at or below this one that ends a checkpoint interval of `interval`
    /// requests. That is [`init`](Self::init) if `interval` is 0.
    pub const fn last_checkpoint(&self, interval: u64) -> Self {
        match interval {
            0 => Self::init(),
            _ => Self(self.0 / interval * interval),
        }
    }
}

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Add<u64> for SequenceNumber {
    type Output = SequenceNumber;

    fn add(self, rhs: u64) -> Self::Output {
        SequenceNumber(self.0.saturating_add(rhs))
    }
}

/// Client-chosen timestamp of a request. Together with the [`ClientId`] it identifies the request.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new `Timestamp` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` of this `Timestamp`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

/// Ordering key of a request: the client that sent it and the timestamp it chose.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct RequestKey {
    pub client: ClientId,
    pub timestamp: Timestamp,
}

impl RequestKey {
    pub const fn new(client: ClientId, timestamp: Timestamp) -> Self {
        Self { client, timestamp }
    }
}

/// Opaque operation submitted by a client.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct Operation(Vec<u8>);

impl Operation {
    /// Create a new `Operation` wrapping `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get a reference to the inner bytes of this `Operation`.
    pub fn bytes(&self) -> &Vec<u8> {
        &self.0
    }
}

/// 32-byte digest computed with [`digest`](crate::types::crypto_primitives::digest).
///
/// Digests stand in for signatures and state hashes: two protocol objects are considered to agree if and
/// only if their digests are equal.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Create a new `Digest` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner bytes of this `Digest`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", STANDARD_NO_PAD.encode(self.0))
    }
}
