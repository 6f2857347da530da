/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Accumulation of checkpoint proofs, and stabilization.
//!
//! Proofs are kept per round, per sequence number, per replica, so a re-delivered proof never counts twice.
//! A certificate forms at the moment the `2f + 1`-th matching proof (identical digest) is recorded, which
//! makes every certificate fire exactly once.

use crate::types::{
    data_types::{ReplicaId, SequenceNumber, ViewNumber},
    quorum::quorum_large,
};

use super::MessageLog;
use crate::hbft::{
    history::{Checkpoint, ExecutionHistory},
    messages::{CheckpointProof, CheckpointRound},
};

/// What happened when a checkpoint proof was appended to the [`MessageLog`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckpointOutcome {
    /// The proof is about a sequence number that is already covered by the stable checkpoint.
    Stale,
    /// The proof is malformed, or is a round-I proof from a replica other than the primary.
    Rejected,
    /// The proof contradicts this replica's own execution history. The caller should vote for a view change.
    Mismatch,
    /// The same replica already sent a proof for this round and sequence number.
    Duplicate,
    /// A round-I proof from the primary arrived before this replica executed every request it covers. The
    /// caller should hold it, and append it again once the execution history has caught up.
    Deferred(CheckpointProof),
    /// The proof was recorded without forming a certificate.
    Recorded,
    /// The proof completed `2f + 1` matching round-II proofs (CER1) for `history`.
    Certified(ExecutionHistory),
    /// The proof completed `2f + 1` matching round-III proofs (CER2) for `checkpoint`. `collected` tells
    /// whether the checkpoint was newer than the stable checkpoint, and garbage collection ran.
    Stabilized {
        checkpoint: Checkpoint,
        collected: bool,
    },
}

impl MessageLog {
    /// Record `proof` as a proof of `round`.
    ///
    /// `history` is this replica's execution history, and `reached` tells whether it holds every sequence
    /// number from the stable checkpoint up to the proof's sequence number. `view` is the replica's current
    /// view, and `primary` the primary of that view. Proofs are validated as follows:
    /// 1. Round-I proofs must come from `primary`. Once `reached`, they must carry the digest of `history` up
    ///    to the proof's sequence number. Before that, they are [deferred](CheckpointOutcome::Deferred).
    /// 2. Round-II and round-III proofs must carry that same digest if `reached`. A replica that is behind
    ///    records them anyway, and catches up once CER1 forms.
    /// 3. The digest of every proof must cover the history it carries.
    pub fn append_checkpoint(
        &mut self,
        round: CheckpointRound,
        proof: CheckpointProof,
        f: u64,
        history: &ExecutionHistory,
        reached: bool,
        view: ViewNumber,
        primary: ReplicaId,
    ) -> CheckpointOutcome {
        if self.is_stale(proof.seq) {
            return CheckpointOutcome::Stale;
        }

        let own_digest = history.before(proof.seq).digest();
        match round {
            CheckpointRound::First => {
                if proof.replica != primary {
                    return CheckpointOutcome::Rejected;
                }
                if !reached {
                    if !proof.is_well_formed() {
                        return CheckpointOutcome::Rejected;
                    }
                    return CheckpointOutcome::Deferred(proof);
                }
                if proof.digest != own_digest {
                    return CheckpointOutcome::Mismatch;
                }
            }
            CheckpointRound::Second | CheckpointRound::Third => {
                if reached && proof.digest != own_digest {
                    return CheckpointOutcome::Mismatch;
                }
            }
        }
        if !proof.is_well_formed() {
            return CheckpointOutcome::Rejected;
        }

        let seq = proof.seq;
        let digest = proof.digest;
        let proofs_at_seq = self
            .proofs
            .entry(round)
            .or_default()
            .entry(seq)
            .or_default();
        if proofs_at_seq.contains_key(&proof.replica) {
            return CheckpointOutcome::Duplicate;
        }
        let candidate = proof.history.clone();
        proofs_at_seq.insert(proof.replica, proof);
        let matching = proofs_at_seq
            .values()
            .filter(|recorded| recorded.digest == digest)
            .count();
        let certified = matching == quorum_large(f);

        match round {
            CheckpointRound::First => {
                self.accepted_histories.insert(view, candidate);
                CheckpointOutcome::Recorded
            }
            CheckpointRound::Second if certified => {
                self.certified_histories.insert(view, candidate.clone());
                CheckpointOutcome::Certified(candidate)
            }
            CheckpointRound::Third if certified => {
                let checkpoint = Checkpoint::new(seq, candidate);
                let collected = seq > self.stable_checkpoint.seq;
                if collected {
                    self.stabilize(checkpoint.clone());
                }
                CheckpointOutcome::Stabilized {
                    checkpoint,
                    collected,
                }
            }
            CheckpointRound::Second | CheckpointRound::Third => CheckpointOutcome::Recorded,
        }
    }

    /// Make `checkpoint` the stable checkpoint:
    /// 1. Delete every ticket, completed ticket, and checkpoint proof at or below its sequence number.
    /// 2. Slide the watermark window forward in whole checkpoint intervals, up to the checkpoint.
    fn stabilize(&mut self, checkpoint: Checkpoint) {
        let seq = checkpoint.seq;

        self.tickets.retain(|(_, ticket_seq), _| *ticket_seq > seq);
        self.ticket_cache.retain(|_, ticket| ticket.seq() > seq);
        for table in self.proofs.values_mut() {
            *table = table.split_off(&(seq + 1));
        }

        let interval = self.config.checkpoint_interval;
        if interval > 0 {
            let slide = (seq.int().saturating_sub(self.low_water_mark.int()) / interval) * interval;
            self.low_water_mark = self.low_water_mark + slide;
            self.high_water_mark = self.high_water_mark + slide;
        }

        log::debug!("Checkpoint at {} is stable.", seq);
        self.stable_checkpoint = checkpoint;
    }

    fn is_stale(&self, seq: SequenceNumber) -> bool {
        let stable = self.stable_checkpoint.seq;
        seq < stable || (seq == stable && stable > SequenceNumber::init())
    }

    /// Get the round-I checkpoint history that this replica accepted in `view`, if any ("Q").
    pub fn accepted_history(&self, view: ViewNumber) -> Option<&ExecutionHistory> {
        self.accepted_histories.get(&view)
    }

    /// Get the history certified by `2f + 1` matching round-II proofs in `view`, if any ("P").
    pub fn certified_history(&self, view: ViewNumber) -> Option<&ExecutionHistory> {
        self.certified_histories.get(&view)
    }

    /// Get the number of proofs recorded for `round` at `seq`.
    pub fn checkpoint_proofs(&self, round: CheckpointRound, seq: SequenceNumber) -> usize {
        self.proofs
            .get(&round)
            .and_then(|table| table.get(&seq))
            .map_or(0, |proofs| proofs.len())
    }

    /// Get the number of proofs recorded for any round at or below `seq`.
    pub fn checkpoint_proofs_up_to(&self, seq: SequenceNumber) -> usize {
        self.proofs
            .values()
            .flat_map(|table| table.range(..=seq))
            .map(|(_, proofs)| proofs.len())
            .sum()
    }
}
