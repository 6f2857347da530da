/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable networking.
//!
//! hBFT-rs does not own a transport. The library user provides an implementation of [`Network`] for
//! outbound messages, and hands every inbound message to [`Replica::deliver`](crate::replica::Replica::deliver).

pub mod network;

pub mod messages;

pub(crate) mod sending;

pub use messages::{Message, Origin};
pub use network::Network;
