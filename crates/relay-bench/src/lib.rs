//! Shared fixtures for the Relay benchmarks.

use bytes::Bytes;
use relay_protocol::{codec, Envelope};
use tenvis_relay_core::{ActorHandle, ActorId, Coordinator, HubHandle, Identity};
use tokio::sync::mpsc;

/// An encoded envelope whose message text is `size` bytes long.
pub fn payload(user: &str, size: usize) -> Bytes {
    let envelope = Envelope::new(user, "x".repeat(size));
    codec::encode(&envelope).expect("benchmark envelope encodes")
}

/// Register `count` queue-only actors with the hub and return their queues.
///
/// Nothing drains the queues; callers read from them or let them fill.
pub async fn register_sinks(
    hub: &HubHandle,
    count: usize,
    capacity: usize,
) -> Vec<mpsc::Receiver<Bytes>> {
    let mut queues = Vec::with_capacity(count);
    for n in 0..count {
        let (tx, rx) = mpsc::channel(capacity);
        let identity = Identity::resolve(Some(format!("sink-{}", n).as_str()));
        if hub
            .register(ActorHandle::new(ActorId::next(), identity, tx))
            .await
            .is_err()
        {
            break;
        }
        queues.push(rx);
    }
    queues
}
