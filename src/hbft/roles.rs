/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that determine what role a replica plays in a given view.

use crate::types::data_types::{ReplicaId, ViewNumber};

/// Get the primary of `view`: the replica at index `view mod n` of the sorted `replicas`.
///
/// # Precondition
/// `replicas` is sorted and non-empty.
pub fn select_primary(view: ViewNumber, replicas: &[ReplicaId]) -> ReplicaId {
    let index = (view.int() % replicas.len() as u64) as usize;
    replicas[index]
}

/// Determine whether `replica` is the primary of `view`.
pub fn is_primary(replica: ReplicaId, view: ViewNumber, replicas: &[ReplicaId]) -> bool {
    select_primary(view, replicas) == replica
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_rotates_over_the_sorted_replica_set() {
        let replicas: Vec<ReplicaId> = [3, 5, 8, 13].into_iter().map(ReplicaId::new).collect();
        assert_eq!(select_primary(ViewNumber::new(0), &replicas), ReplicaId::new(3));
        assert_eq!(select_primary(ViewNumber::init(), &replicas), ReplicaId::new(5));
        assert_eq!(select_primary(ViewNumber::new(6), &replicas), ReplicaId::new(8));
        assert!(is_primary(ReplicaId::new(13), ViewNumber::new(7), &replicas));
    }
}
