use hbft_rs::{
    networking::Message,
    types::data_types::{ReplicaId, SequenceNumber, ViewNumber},
};
use log::LevelFilter;

mod common;

use crate::common::{
    cluster::{request, Cluster, Parameters, REQUEST_TIMEOUT},
    logging::setup_logger,
};

// Replicas never execute different requests at the same sequence number.
fn assert_agreement(cluster: &Cluster) {
    let ids = cluster.live();
    for (i, a) in ids.iter().enumerate() {
        for b in &ids[i + 1..] {
            let history_a = cluster.replica(*a).history();
            let history_b = cluster.replica(*b).history();
            for (seq, request) in history_a {
                if let Some(other) = history_b.get(*seq) {
                    assert_eq!(request, other, "replicas {} and {} disagree at {}", a, b, seq);
                }
            }
        }
    }
}

#[test]
fn shuffled_delivery_commits_the_same_history_everywhere() {
    setup_logger(LevelFilter::Info);

    for seed in [3, 17, 2023] {
        // No checkpoint is reached, so reordering alone can not cause a view change.
        let mut cluster = Cluster::new(Parameters {
            checkpoint_interval: 100,
            watermark_interval: 100,
            buffer_threshold: 100,
        });
        cluster.shuffle(seed);
        for timestamp in 1..=8 {
            cluster.broadcast_request(request(timestamp % 3, timestamp));
        }
        cluster.deliver_all();

        assert_agreement(&cluster);
        let reference = cluster.replica(ReplicaId::new(0)).history().clone();
        assert_eq!(reference.len(), 8);
        for id in cluster.ids() {
            assert_eq!(cluster.replica(id).history(), &reference);
        }
    }
}

#[test]
fn shuffled_delivery_with_checkpoints_and_timeouts_preserves_agreement() {
    setup_logger(LevelFilter::Info);

    for seed in [5, 99] {
        let mut cluster = Cluster::new(Parameters {
            checkpoint_interval: 2,
            watermark_interval: 8,
            buffer_threshold: 100,
        });
        cluster.shuffle(seed);
        for timestamp in 1..=6 {
            cluster.broadcast_request(request(1, timestamp));
        }
        cluster.deliver_all();
        assert_agreement(&cluster);

        for _ in 0..4 {
            cluster.advance(REQUEST_TIMEOUT);
            assert_agreement(&cluster);
        }
    }
}

#[test]
fn shuffled_delivery_with_checkpoints_needs_no_view_change() {
    setup_logger(LevelFilter::Info);

    for seed in 0..40 {
        // The watermark window is wide enough to hold every request, so no message is dropped for being early.
        let mut cluster = Cluster::new(Parameters {
            checkpoint_interval: 2,
            watermark_interval: 8,
            buffer_threshold: 100,
        });
        cluster.shuffle(seed);
        for timestamp in 1..=6 {
            cluster.broadcast_request(request(1, timestamp));
        }
        cluster.deliver_all();

        let reference = cluster.replica(ReplicaId::new(0)).history().clone();
        let six = SequenceNumber::new(6);
        for id in cluster.ids() {
            let replica = cluster.replica(id);
            assert!(
                cluster
                    .sent_by(id)
                    .iter()
                    .all(|message| !matches!(message, Message::ViewChange(_))),
                "replica {} voted for a view change with seed {}",
                id,
                seed
            );
            assert_eq!(replica.view(), ViewNumber::init());
            assert!(!replica.is_disgruntled());
            assert_eq!(replica.history(), &reference);

            // Every sequence number up to the stable checkpoint was executed.
            let stable = replica.message_log().stable_checkpoint();
            assert_eq!(stable.seq, six, "replica {} with seed {}", id, seed);
            for seq in 1..=6 {
                assert!(stable.history.contains(SequenceNumber::new(seq)));
            }
        }
    }
}
