/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Exhaustive enumeration of every message a replica can receive.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    hbft::messages::{
        CheckpointProof, CheckpointRound, Commit, NewView, Prepare, Request, ViewChange,
    },
    types::data_types::{ClientId, ReplicaId},
};

/// All message variants used in hBFT-rs.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Message {
    Request(Request),
    Prepare(Prepare),
    Commit(Commit),
    CheckpointI(CheckpointProof),
    CheckpointII(CheckpointProof),
    CheckpointIII(CheckpointProof),
    ViewChange(ViewChange),
    NewView(NewView),
}

impl Message {
    /// Wrap `proof` in the variant for `round`.
    pub fn checkpoint(round: CheckpointRound, proof: CheckpointProof) -> Message {
        match round {
            CheckpointRound::First => Message::CheckpointI(proof),
            CheckpointRound::Second => Message::CheckpointII(proof),
            CheckpointRound::Third => Message::CheckpointIII(proof),
        }
    }

    /// Get a short name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request(_) => "Request",
            Message::Prepare(_) => "Prepare",
            Message::Commit(_) => "Commit",
            Message::CheckpointI(_) => "CheckpointI",
            Message::CheckpointII(_) => "CheckpointII",
            Message::CheckpointIII(_) => "CheckpointIII",
            Message::ViewChange(_) => "ViewChange",
            Message::NewView(_) => "NewView",
        }
    }
}

impl From<Request> for Message {
    fn from(value: Request) -> Self {
        Message::Request(value)
    }
}

impl From<Prepare> for Message {
    fn from(value: Prepare) -> Self {
        Message::Prepare(value)
    }
}

impl From<Commit> for Message {
    fn from(value: Commit) -> Self {
        Message::Commit(value)
    }
}

impl From<ViewChange> for Message {
    fn from(value: ViewChange) -> Self {
        Message::ViewChange(value)
    }
}

impl From<NewView> for Message {
    fn from(value: NewView) -> Self {
        Message::NewView(value)
    }
}

/// Sender of a delivered message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Origin {
    Replica(ReplicaId),
    Client(ClientId),
}
