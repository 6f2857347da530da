/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Threshold arithmetic for a replica set that tolerates `f` Byzantine replicas.
//!
//! A replica set of `n = 3f + 1` replicas needs:
//! - `f + 1` matching messages to be sure that at least one correct replica vouches for a fact, and
//! - `2f + 1` matching messages to be sure that any two such quorums intersect in a correct replica.

/// Number of replicas needed to tolerate `f` Byzantine replicas: `3f + 1`.
pub const fn replica_count(f: u64) -> usize {
    (3 * f + 1) as usize
}

/// The small quorum: `f + 1`.
pub const fn quorum_small(f: u64) -> usize {
    (f + 1) as usize
}

/// The large quorum: `2f + 1`.
pub const fn quorum_large(f: u64) -> usize {
    (2 * f + 1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorums_for_small_replica_sets() {
        assert_eq!(replica_count(1), 4);
        assert_eq!(quorum_small(1), 2);
        assert_eq!(quorum_large(1), 3);
        assert_eq!(quorum_large(2), 5);
        assert_eq!(quorum_small(0), 1);
    }
}
