/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The hBFT agreement protocol.
//!
//! ## Normal case
//!
//! hBFT orders client [requests](messages::Request) with two message exchanges, and executes them
//! speculatively:
//! 1. The primary of the current view assigns the next sequence number to a request and broadcasts a
//!    [`Prepare`](messages::Prepare).
//! 2. Every replica that accepts the `Prepare` executes the request speculatively, replies to the client,
//!    and broadcasts a [`Commit`](messages::Commit).
//! 3. A replica that collects `2f + 1` matching commits appends the request to its
//!    [execution history](history::ExecutionHistory).
//!
//! The state of each `(view, seq)` slot is tracked in a [`Ticket`](ticket::Ticket). Tickets live in the
//! replica's [`MessageLog`](message_log::MessageLog), which also holds the admission buffer of requests
//! that the primary has not ticketed yet.
//!
//! ## Checkpoints
//!
//! Every `checkpoint_interval` sequence numbers, replicas agree on their execution history in three rounds
//! of [checkpoint proofs](messages::CheckpointProof):
//! 1. The primary broadcasts a round-I proof for its history.
//! 2. Replicas whose own history matches broadcast a round-II proof. `2f + 1` matching round-II proofs form
//!    the first certificate (CER1).
//! 3. Replicas that formed CER1 broadcast a round-III proof. `2f + 1` matching round-III proofs form the
//!    second certificate (CER2), which makes the checkpoint stable.
//!
//! A stable checkpoint lets the replica garbage-collect the state it covers, and slides the watermark
//! window that bounds the sequence numbers the primary may assign.
//!
//! ## View changes
//!
//! A replica that suspects the primary votes for a new view with a
//! [`ViewChange`](messages::ViewChange). The primary of that view collects `2f + 1` votes, reconciles
//! them into a checkpoint and a list of requests to re-execute, and broadcasts a
//! [`NewView`](messages::NewView). Every replica checks the reconciliation independently before adopting
//! it. See [`message_log::view_changes`].
//!
//! ## Timers
//!
//! Suspicion is driven by the [timers](timers) of each replica: per-request timers with linear backoff, the
//! checkpoint timer, and the view-change timer.

pub mod history;

pub mod messages;

pub mod ticket;

pub mod message_log;

pub mod roles;

pub mod timers;

pub(crate) mod implementation;
