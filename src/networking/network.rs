/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use crate::{
    hbft::messages::Reply,
    types::data_types::{ClientId, ReplicaId},
};

use super::messages::Message;

/// Outbound side of the transport that connects a replica to its peers and clients.
///
/// Implementations must not block. Messages may be delivered late, more than once, or in a different order
/// than they were sent; the replica tolerates all three.
pub trait Network: Clone + Send {
    /// Send a message to every replica in the replica set other than this one.
    fn broadcast(&mut self, message: Message);

    /// Send a message to the specified replica.
    fn send(&mut self, peer: ReplicaId, message: Message);

    /// Send a reply to the specified client.
    fn send_reply(&mut self, client: ClientId, reply: Reply);
}
