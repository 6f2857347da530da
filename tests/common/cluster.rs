#![allow(dead_code)]

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use hbft_rs::{
    events::ExecuteRequestEvent,
    hbft::messages::{Reply, Request},
    networking::{Message, Origin},
    replica::{Configuration, Replica, ReplicaSpec},
    types::data_types::{ClientId, Operation, ReplicaId, SequenceNumber, Timestamp},
};
use rand::{rngs::StdRng, Rng, SeedableRng};

use super::network::{mock_network, Envelope, NetworkStub, Wire};

pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);
pub(crate) const VIEW_CHANGE_TIMEOUT: Duration = Duration::from_secs(2);

// Upper bound on the number of deliveries in one call to `deliver_all`, so that a livelock fails the test
// instead of hanging it.
const MAX_DELIVERIES: usize = 1_000_000;

pub(crate) type Mutator = Box<dyn FnMut(&mut Envelope)>;

/// Parameters of a test cluster of 4 replicas tolerating 1 fault.
#[derive(Clone, Copy)]
pub(crate) struct Parameters {
    pub(crate) checkpoint_interval: u64,
    pub(crate) watermark_interval: u64,
    pub(crate) buffer_threshold: usize,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            checkpoint_interval: 2,
            watermark_interval: 4,
            buffer_threshold: 100,
        }
    }
}

/// A cluster of replicas connected by a simulated network, driven from the test's thread.
///
/// Messages are delivered one at a time, oldest first, or in a random order if the cluster is
/// [shuffled](Cluster::shuffle). Time only passes when the test [advances](Cluster::advance) it.
pub(crate) struct Cluster {
    ids: Vec<ReplicaId>,
    replicas: Vec<Replica<NetworkStub>>,
    wire: Arc<Mutex<Wire>>,
    crashed: BTreeSet<ReplicaId>,
    mutator: Option<Mutator>,
    rng: Option<StdRng>,
    executed: Arc<Mutex<Vec<(ReplicaId, SequenceNumber, Request)>>>,
    now: Instant,
}

impl Cluster {
    pub(crate) fn new(parameters: Parameters) -> Cluster {
        let ids: Vec<ReplicaId> = (0..4).map(ReplicaId::new).collect();
        let (wire, stubs) = mock_network(&ids);
        let executed = Arc::new(Mutex::new(Vec::new()));
        let now = Instant::now();

        let replicas = ids
            .iter()
            .zip(stubs)
            .map(|(me, network)| {
                let configuration = Configuration::builder()
                    .me(*me)
                    .replicas(ids.clone())
                    .tolerance(1)
                    .request_timeout(REQUEST_TIMEOUT)
                    .view_change_timeout(VIEW_CHANGE_TIMEOUT)
                    .checkpoint_interval(parameters.checkpoint_interval)
                    .watermark_interval(parameters.watermark_interval)
                    .buffer_threshold(parameters.buffer_threshold)
                    .log_events(true)
                    .build();
                let record = executed.clone();
                let me = *me;
                ReplicaSpec::builder()
                    .network(network)
                    .configuration(configuration)
                    .on_execute_request(move |event: &ExecuteRequestEvent| {
                        record
                            .lock()
                            .unwrap()
                            .push((me, event.seq, event.request.clone()))
                    })
                    .build()
                    .start(now)
                    .unwrap()
            })
            .collect();

        Cluster {
            ids,
            replicas,
            wire,
            crashed: BTreeSet::new(),
            mutator: None,
            rng: None,
            executed,
            now,
        }
    }

    pub(crate) fn ids(&self) -> Vec<ReplicaId> {
        self.ids.clone()
    }

    pub(crate) fn replica(&self, id: ReplicaId) -> &Replica<NetworkStub> {
        &self.replicas[id.int() as usize]
    }

    /// Ids of the replicas that have not crashed.
    pub(crate) fn live(&self) -> Vec<ReplicaId> {
        self.ids
            .iter()
            .copied()
            .filter(|id| !self.crashed.contains(id))
            .collect()
    }

    /// Stop delivering messages to and from `id`, and stop ticking it.
    pub(crate) fn crash(&mut self, id: ReplicaId) {
        self.crashed.insert(id);
    }

    /// Run `mutator` on every envelope right before it is delivered.
    pub(crate) fn set_mutator(&mut self, mutator: impl FnMut(&mut Envelope) + 'static) {
        self.mutator = Some(Box::new(mutator));
    }

    /// Deliver messages in an order chosen by a random number generator seeded with `seed`.
    pub(crate) fn shuffle(&mut self, seed: u64) {
        self.rng = Some(StdRng::seed_from_u64(seed));
    }

    /// Send `request` from its client to `recipient`.
    pub(crate) fn submit(&mut self, recipient: ReplicaId, request: Request) {
        self.wire.lock().unwrap().in_flight.push_back(Envelope {
            origin: Origin::Client(request.client),
            recipient,
            message: Message::Request(request),
        });
    }

    /// Send `request` from its client to every replica.
    pub(crate) fn broadcast_request(&mut self, request: Request) {
        for id in self.ids() {
            self.submit(id, request.clone());
        }
    }

    /// Deliver `message` to `recipient` immediately, bypassing the queue.
    pub(crate) fn deliver_now(&mut self, recipient: ReplicaId, origin: Origin, message: Message) {
        if !self.crashed.contains(&recipient) {
            self.replicas[recipient.int() as usize].deliver(origin, message);
        }
    }

    /// Deliver messages until none is in flight.
    pub(crate) fn deliver_all(&mut self) {
        for _ in 0..MAX_DELIVERIES {
            let envelope = {
                let mut wire = self.wire.lock().unwrap();
                let len = wire.in_flight.len();
                let next = match self.rng.as_mut() {
                    Some(rng) if len > 0 => wire.in_flight.remove(rng.gen_range(0, len)),
                    _ => wire.in_flight.pop_front(),
                };
                match next {
                    Some(envelope) => envelope,
                    None => return,
                }
            };
            self.deliver(envelope);
        }
        panic!("messages are still in flight after {} deliveries", MAX_DELIVERIES);
    }

    fn deliver(&mut self, mut envelope: Envelope) {
        if self.crashed.contains(&envelope.recipient) {
            return;
        }
        if let Origin::Replica(sender) = envelope.origin {
            if self.crashed.contains(&sender) {
                return;
            }
        }
        if let Some(mutator) = self.mutator.as_mut() {
            mutator(&mut envelope);
        }
        self.replicas[envelope.recipient.int() as usize].deliver(envelope.origin, envelope.message);
    }

    /// Let `duration` pass on every live replica, then deliver everything their timers caused.
    pub(crate) fn advance(&mut self, duration: Duration) {
        self.now += duration;
        let now = self.now;
        for id in self.live() {
            self.replicas[id.int() as usize].tick(now);
        }
        self.deliver_all();
    }

    /// Every message `id` sent or broadcast so far.
    pub(crate) fn sent_by(&self, id: ReplicaId) -> Vec<Message> {
        self.wire
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|(sender, _)| *sender == id)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub(crate) fn replies_to(&self, client: ClientId) -> Vec<Reply> {
        self.wire
            .lock()
            .unwrap()
            .replies
            .iter()
            .filter(|(recipient, _)| *recipient == client)
            .map(|(_, reply)| reply.clone())
            .collect()
    }

    /// Every request `id` appended to its execution history, in order, as reported by its event handler.
    pub(crate) fn executed_by(&self, id: ReplicaId) -> Vec<(SequenceNumber, Request)> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .filter(|(replica, _, _)| *replica == id)
            .map(|(_, seq, request)| (*seq, request.clone()))
            .collect()
    }
}

pub(crate) fn request(client: u64, timestamp: u64) -> Request {
    Request::new(
        ClientId::new(client),
        Timestamp::new(timestamp),
        Operation::new(format!("op-{}-{}", client, timestamp).into_bytes()),
    )
}
