use hbft_rs::{
    hbft::messages::{Commit, Prepare},
    networking::{Message, Origin},
    types::data_types::{ClientId, ReplicaId, SequenceNumber, ViewNumber},
};
use log::LevelFilter;

mod common;

use crate::common::{
    cluster::{request, Cluster, Parameters},
    logging::setup_logger,
};

#[test]
fn request_is_committed_on_every_replica() {
    setup_logger(LevelFilter::Debug);

    // 1. Start 4 replicas with a checkpoint interval that this test does not reach.
    let mut cluster = Cluster::new(Parameters {
        checkpoint_interval: 10,
        watermark_interval: 20,
        buffer_threshold: 100,
    });
    let primary = ReplicaId::new(1);
    assert_eq!(cluster.replica(primary).primary(), primary);

    // 2. A client sends a request to every replica.
    let r = request(1, 1);
    cluster.broadcast_request(r.clone());
    cluster.deliver_all();

    // 3. Every replica executed the request at sequence number 1, exactly once, and replied.
    for id in cluster.ids() {
        let replica = cluster.replica(id);
        assert_eq!(replica.view(), ViewNumber::init());
        assert_eq!(replica.history().get(SequenceNumber::new(1)), Some(&r));
        assert_eq!(replica.history().len(), 1);
        assert_eq!(cluster.executed_by(id), vec![(SequenceNumber::new(1), r.clone())]);
        assert_eq!(replica.message_log().active_tickets(), 0);
        assert!(replica.message_log().get_ticket_from_cache(&r.key()).is_some());
    }
    let replies = cluster.replies_to(ClientId::new(1));
    assert_eq!(replies.len(), 4);
    assert!(replies
        .iter()
        .all(|reply| reply.seq == SequenceNumber::new(1) && reply.result == r.operation));

    // 4. Only the primary broadcast a prepare.
    for id in cluster.ids() {
        let prepares = cluster
            .sent_by(id)
            .into_iter()
            .filter(|message| matches!(message, Message::Prepare(_)))
            .count();
        assert_eq!(prepares, if id == primary { 1 } else { 0 });
    }
}

#[test]
fn retransmitted_request_is_answered_from_the_cache() {
    setup_logger(LevelFilter::Debug);

    let mut cluster = Cluster::new(Parameters {
        checkpoint_interval: 10,
        watermark_interval: 20,
        buffer_threshold: 100,
    });
    let r = request(1, 1);
    cluster.broadcast_request(r.clone());
    cluster.deliver_all();
    let replies_before = cluster.replies_to(ClientId::new(1)).len();

    // Retransmit the request to the primary and to a backup.
    cluster.submit(ReplicaId::new(1), r.clone());
    cluster.submit(ReplicaId::new(3), r.clone());
    cluster.deliver_all();

    let replies = cluster.replies_to(ClientId::new(1));
    assert_eq!(replies.len(), replies_before + 2);
    assert!(replies.iter().all(|reply| reply.seq == SequenceNumber::new(1)));
    for id in cluster.ids() {
        assert_eq!(cluster.replica(id).history().len(), 1);
        assert_eq!(cluster.replica(id).seq_counter(), SequenceNumber::new(1));
        assert_eq!(cluster.executed_by(id).len(), 1);
    }
}

#[test]
fn sequence_numbers_are_assigned_contiguously() {
    setup_logger(LevelFilter::Debug);

    let mut cluster = Cluster::new(Parameters {
        checkpoint_interval: 10,
        watermark_interval: 20,
        buffer_threshold: 100,
    });
    let requests: Vec<_> = (1..=3).map(|timestamp| request(7, timestamp)).collect();
    for r in &requests {
        cluster.broadcast_request(r.clone());
    }
    cluster.deliver_all();

    let primary_history = cluster.replica(ReplicaId::new(1)).history().clone();
    let assigned: Vec<u64> = primary_history.iter().map(|(seq, _)| seq.int()).collect();
    assert_eq!(assigned, vec![1, 2, 3]);
    for r in &requests {
        assert!(primary_history.contains_request(r));
    }
    for id in cluster.ids() {
        assert_eq!(cluster.replica(id).history(), &primary_history);
    }
}

#[test]
fn primary_buffers_requests_above_the_threshold() {
    setup_logger(LevelFilter::Debug);

    let mut cluster = Cluster::new(Parameters {
        checkpoint_interval: 10,
        watermark_interval: 20,
        buffer_threshold: 1,
    });
    let primary = ReplicaId::new(1);
    let first = request(1, 1);
    let second = request(2, 1);

    // The first request takes the only ticket the threshold allows. The second waits in the buffer.
    cluster.deliver_now(primary, Origin::Client(first.client), Message::Request(first.clone()));
    cluster.deliver_now(primary, Origin::Client(second.client), Message::Request(second.clone()));
    assert_eq!(cluster.replica(primary).message_log().active_tickets(), 1);
    assert_eq!(cluster.replica(primary).message_log().buffered(), 1);

    // Completing the first ticket drains the buffer.
    cluster.deliver_all();
    assert_eq!(cluster.replica(primary).message_log().buffered(), 0);
    for id in cluster.ids() {
        let history = cluster.replica(id).history();
        assert_eq!(history.get(SequenceNumber::new(1)), Some(&first));
        assert_eq!(history.get(SequenceNumber::new(2)), Some(&second));
    }
}

#[test]
fn primary_does_not_assign_beyond_the_high_watermark() {
    setup_logger(LevelFilter::Debug);

    // Checkpoints every 2 sequence numbers, in a window of 4.
    let mut cluster = Cluster::new(Parameters::default());
    let primary = ReplicaId::new(1);
    let requests: Vec<_> = (1..=5).map(|timestamp| request(3, timestamp)).collect();
    for r in &requests {
        cluster.deliver_now(primary, Origin::Client(r.client), Message::Request(r.clone()));
    }
    assert_eq!(cluster.replica(primary).seq_counter(), SequenceNumber::new(4));
    assert_eq!(cluster.replica(primary).message_log().buffered(), 1);

    // The stable checkpoint at 2 slides the window, which lets the fifth request in.
    cluster.deliver_all();
    for id in cluster.ids() {
        let replica = cluster.replica(id);
        assert_eq!(replica.history().len(), 5);
        assert_eq!(replica.history().get(SequenceNumber::new(5)), Some(&requests[4]));
        assert_eq!(replica.message_log().stable_checkpoint().seq, SequenceNumber::new(4));
    }
    assert_eq!(cluster.replica(primary).message_log().buffered(), 0);
}

#[test]
fn messages_from_unknown_senders_are_dropped() {
    setup_logger(LevelFilter::Debug);

    let mut cluster = Cluster::new(Parameters::default());
    let r = request(1, 1);

    // A client may only send requests.
    let prepare = Prepare {
        view: ViewNumber::init(),
        seq: SequenceNumber::new(1),
        digest: r.digest(),
        request: r.clone(),
        primary: ReplicaId::new(1),
    };
    cluster.deliver_now(
        ReplicaId::new(0),
        Origin::Client(ClientId::new(1)),
        Message::Prepare(prepare.clone()),
    );
    // A replica outside the replica set is ignored.
    cluster.deliver_now(
        ReplicaId::new(0),
        Origin::Replica(ReplicaId::new(42)),
        Message::Prepare(prepare.clone()),
    );
    // A backup cannot prepare on behalf of the primary.
    cluster.deliver_now(
        ReplicaId::new(0),
        Origin::Replica(ReplicaId::new(2)),
        Message::Prepare(prepare),
    );
    cluster.deliver_all();

    let replica = cluster.replica(ReplicaId::new(0));
    assert!(replica.speculative_requests().is_empty());
    assert_eq!(replica.message_log().active_tickets(), 0);
    assert!(cluster.replies_to(ClientId::new(1)).is_empty());
}

#[test]
fn conflicting_commits_trigger_a_view_change_vote() {
    setup_logger(LevelFilter::Debug);

    let mut cluster = Cluster::new(Parameters {
        checkpoint_interval: 10,
        watermark_interval: 20,
        buffer_threshold: 100,
    });
    let victim = ReplicaId::new(0);
    let forged = request(9, 9);

    // Replicas 2 and 3 appear to commit a different request at the slot to the victim.
    let substitute = forged.clone();
    cluster.set_mutator(move |envelope| {
        if envelope.recipient != victim {
            return;
        }
        if let Message::Commit(commit) = &mut envelope.message {
            if commit.replica == ReplicaId::new(2) || commit.replica == ReplicaId::new(3) {
                *commit = Commit {
                    digest: substitute.digest(),
                    request: substitute.clone(),
                    ..commit.clone()
                };
            }
        }
    });

    let r = request(1, 1);
    cluster.broadcast_request(r.clone());
    cluster.deliver_all();

    // The victim did not execute either request, and voted for the next view.
    let victim_replica = cluster.replica(victim);
    assert!(victim_replica.history().is_empty());
    assert!(victim_replica.is_disgruntled());
    let votes: Vec<ViewNumber> = cluster
        .sent_by(victim)
        .into_iter()
        .filter_map(|message| match message {
            Message::ViewChange(vote) => Some(vote.new_view),
            _ => None,
        })
        .collect();
    assert_eq!(votes, vec![ViewNumber::new(2)]);

    // One vote does not change the view, and the other replicas committed the real request.
    for id in cluster.ids() {
        assert_eq!(cluster.replica(id).view(), ViewNumber::init());
        if id != victim {
            assert_eq!(cluster.replica(id).history().get(SequenceNumber::new(1)), Some(&r));
            assert!(cluster
                .sent_by(id)
                .iter()
                .all(|message| !matches!(message, Message::ViewChange(_))));
        }
    }
}
