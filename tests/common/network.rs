use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use hbft_rs::{
    hbft::messages::Reply,
    networking::{Message, Network, Origin},
    types::data_types::{ClientId, ReplicaId},
};

/// A message in flight.
#[derive(Clone, Debug)]
pub(crate) struct Envelope {
    pub(crate) origin: Origin,
    pub(crate) recipient: ReplicaId,
    pub(crate) message: Message,
}

/// Everything that replicas of a cluster pushed onto the network.
#[derive(Default)]
pub(crate) struct Wire {
    /// Messages not delivered yet, in the order they were sent.
    pub(crate) in_flight: VecDeque<Envelope>,
    /// Every message sent or broadcast, once per call, keyed by its sender.
    pub(crate) sent: Vec<(ReplicaId, Message)>,
    pub(crate) replies: Vec<(ClientId, Reply)>,
}

/// A mock network stub through which all replicas of a cluster push their messages onto one shared queue.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    me: ReplicaId,
    peers: Vec<ReplicaId>,
    wire: Arc<Mutex<Wire>>,
}

impl Network for NetworkStub {
    fn broadcast(&mut self, message: Message) {
        let mut wire = self.wire.lock().unwrap();
        wire.sent.push((self.me, message.clone()));
        for peer in self.peers.iter().filter(|peer| **peer != self.me) {
            wire.in_flight.push_back(Envelope {
                origin: Origin::Replica(self.me),
                recipient: *peer,
                message: message.clone(),
            });
        }
    }

    fn send(&mut self, peer: ReplicaId, message: Message) {
        let mut wire = self.wire.lock().unwrap();
        wire.sent.push((self.me, message.clone()));
        wire.in_flight.push_back(Envelope {
            origin: Origin::Replica(self.me),
            recipient: peer,
            message,
        });
    }

    fn send_reply(&mut self, client: ClientId, reply: Reply) {
        self.wire.lock().unwrap().replies.push((client, reply));
    }
}

pub(crate) fn mock_network(peers: &[ReplicaId]) -> (Arc<Mutex<Wire>>, Vec<NetworkStub>) {
    let wire = Arc::new(Mutex::new(Wire::default()));
    let stubs = peers
        .iter()
        .map(|me| NetworkStub {
            me: *me,
            peers: peers.to_vec(),
            wire: wire.clone(),
        })
        .collect();
    (wire, stubs)
}
