/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types and functions that are used across multiple components of hBFT-rs.
//!
//! Types specific to single components of the protocol, e.g., tickets and checkpoint proofs, can be found
//! in the submodules of [`crate::hbft`].

pub mod data_types;

pub mod crypto_primitives;

pub mod quorum;
