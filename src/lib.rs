/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A per-replica engine for the hBFT Byzantine fault tolerant agreement protocol.
//!
//! hBFT totally orders client requests among `3f + 1` replicas, `f` of which may be Byzantine. Replicas
//! execute requests speculatively after two message exchanges, agree on their execution history through a
//! three-round checkpoint protocol, and replace a faulty primary through view changes.
//!
//! The entry point for library users is [`replica`]. The protocol itself is described in [`hbft`].

pub mod types;

pub mod hbft;

pub mod networking;

pub mod events;

pub(crate) mod event_bus;

pub(crate) mod logging;

pub mod replica;
