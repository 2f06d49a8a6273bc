//! The broadcast hub.
//!
//! One hub task per process owns the registry of live connection actors.
//! Everything that touches the registry arrives as an event on one of three
//! channels and is applied by the hub loop, one event at a time, so the
//! registry needs no lock and every broadcast sees a complete snapshot.

use crate::identity::{ActorId, Identity};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub loop is no longer running.
    #[error("Hub is not running")]
    Stopped,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each of the three event channels.
    pub event_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { event_buffer: 256 }
    }
}

/// Registration record for a connection actor.
///
/// Holds the sending side of the actor's outbound queue. Once the hub drops
/// the record the queue closes and the actor's outbound pump finishes.
#[derive(Debug)]
pub struct ActorHandle {
    id: ActorId,
    identity: Identity,
    outbound: mpsc::Sender<Bytes>,
}

impl ActorHandle {
    /// Create a registration record.
    #[must_use]
    pub fn new(id: ActorId, identity: Identity, outbound: mpsc::Sender<Bytes>) -> Self {
        Self {
            id,
            identity,
            outbound,
        }
    }

    /// The actor's identifier.
    #[must_use]
    pub fn id(&self) -> ActorId {
        self.id
    }

    /// The actor's identity.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

/// The capability connection actors use to reach the hub.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Add an actor to the registry.
    async fn register(&self, actor: ActorHandle) -> Result<(), HubError>;

    /// Remove an actor from the registry and close its outbound queue.
    ///
    /// Unknown actors are ignored.
    async fn unregister(&self, id: ActorId) -> Result<(), HubError>;

    /// Offer a payload to every registered actor.
    async fn broadcast(&self, payload: Bytes) -> Result<(), HubError>;
}

/// Counters published by the hub loop after every event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Actors currently registered.
    pub registered: usize,
    /// Broadcast events applied.
    pub broadcasts: u64,
    /// Payloads placed on an outbound queue.
    pub delivered: u64,
    /// Payloads not delivered because an outbound queue was full or closed.
    pub dropped: u64,
}

/// Cloneable handle to a running hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<ActorHandle>,
    unregister_tx: mpsc::Sender<ActorId>,
    broadcast_tx: mpsc::Sender<Bytes>,
    stats: watch::Receiver<HubStats>,
}

impl HubHandle {
    /// Latest published statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        *self.stats.borrow()
    }

    /// Subscribe to statistics updates.
    #[must_use]
    pub fn watch_stats(&self) -> watch::Receiver<HubStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl Coordinator for HubHandle {
    async fn register(&self, actor: ActorHandle) -> Result<(), HubError> {
        self.register_tx
            .send(actor)
            .await
            .map_err(|_| HubError::Stopped)
    }

    async fn unregister(&self, id: ActorId) -> Result<(), HubError> {
        self.unregister_tx
            .send(id)
            .await
            .map_err(|_| HubError::Stopped)
    }

    async fn broadcast(&self, payload: Bytes) -> Result<(), HubError> {
        self.broadcast_tx
            .send(payload)
            .await
            .map_err(|_| HubError::Stopped)
    }
}

/// The hub loop and the registry it owns.
pub struct Hub {
    registry: HashMap<ActorId, ActorHandle>,
    register_rx: mpsc::Receiver<ActorHandle>,
    unregister_rx: mpsc::Receiver<ActorId>,
    broadcast_rx: mpsc::Receiver<Bytes>,
    stats: HubStats,
    stats_tx: watch::Sender<HubStats>,
}

impl Hub {
    /// Create a hub and its handle without starting the loop.
    #[must_use]
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        let buffer = config.event_buffer.max(1);
        let (register_tx, register_rx) = mpsc::channel(buffer);
        let (unregister_tx, unregister_rx) = mpsc::channel(buffer);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(buffer);
        let (stats_tx, stats) = watch::channel(HubStats::default());

        let hub = Self {
            registry: HashMap::new(),
            register_rx,
            unregister_rx,
            broadcast_rx,
            stats: HubStats::default(),
            stats_tx,
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            stats,
        };

        (hub, handle)
    }

    /// Create a hub and spawn its loop on the current runtime.
    #[must_use]
    pub fn start(config: HubConfig) -> (HubHandle, JoinHandle<()>) {
        info!("Starting hub with config: {:?}", config);
        let (hub, handle) = Self::new(config);
        (handle, tokio::spawn(hub.run()))
    }

    /// Run the hub loop.
    ///
    /// Applies one event per iteration. When several channels are ready the
    /// loop takes registrations first, then unregistrations, then
    /// broadcasts, so an actor that registered before sending a message is
    /// always in the snapshot that message is fanned out to. Returns once
    /// every [`HubHandle`] has been dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                Some(actor) = self.register_rx.recv() => self.handle_register(actor),
                Some(id) = self.unregister_rx.recv() => self.handle_unregister(id),
                Some(payload) = self.broadcast_rx.recv() => self.handle_broadcast(payload),
                else => break,
            }

            self.stats.registered = self.registry.len();
            self.stats_tx.send_replace(self.stats);
        }

        info!(remaining = self.registry.len(), "Hub stopped");
    }

    fn handle_register(&mut self, actor: ActorHandle) {
        debug!(
            actor = %actor.id,
            user = %actor.identity,
            registered = self.registry.len() + 1,
            "Registered"
        );
        self.registry.insert(actor.id, actor);
    }

    fn handle_unregister(&mut self, id: ActorId) {
        // Dropping the record closes the actor's outbound queue
        match self.registry.remove(&id) {
            Some(actor) => debug!(
                actor = %id,
                user = %actor.identity,
                registered = self.registry.len(),
                "Unregistered"
            ),
            None => trace!(actor = %id, "Unregister for unknown actor"),
        }
    }

    fn handle_broadcast(&mut self, payload: Bytes) {
        self.stats.broadcasts += 1;

        let mut delivered = 0u64;
        let mut dropped = 0u64;

        for (id, actor) in &self.registry {
            match actor.outbound.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    debug!(actor = %id, user = %actor.identity, "Outbound queue full, message dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    // Actor is shutting down; its unregister is on the way
                    dropped += 1;
                    trace!(actor = %id, "Outbound queue closed");
                }
            }
        }

        self.stats.delivered += delivered;
        self.stats.dropped += dropped;
        trace!(recipients = delivered, dropped, bytes = payload.len(), "Broadcast");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn actor(identity: &str, capacity: usize) -> (ActorHandle, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = ActorHandle::new(ActorId::next(), Identity::resolve(Some(identity)), tx);
        (handle, rx)
    }

    async fn wait_for(hub: &HubHandle, mut f: impl FnMut(&HubStats) -> bool) -> HubStats {
        let mut rx = hub.watch_stats();
        let stats = *timeout(Duration::from_secs(5), rx.wait_for(|s| f(s)))
            .await
            .expect("timed out waiting for hub")
            .expect("hub stopped");
        stats
    }

    #[tokio::test]
    async fn test_register_then_broadcast_delivers_once() {
        let (hub, _task) = Hub::start(HubConfig::default());
        let (a, mut rx) = actor("alice", 8);

        hub.register(a).await.unwrap();
        hub.broadcast(Bytes::from("p")).await.unwrap();
        wait_for(&hub, |s| s.broadcasts == 1).await;

        assert_eq!(rx.try_recv().unwrap(), Bytes::from("p"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_closes_queue_and_stops_delivery() {
        let (hub, _task) = Hub::start(HubConfig::default());
        let (a, mut rx) = actor("alice", 8);
        let id = a.id();

        hub.register(a).await.unwrap();
        hub.unregister(id).await.unwrap();
        hub.broadcast(Bytes::from("p")).await.unwrap();
        let stats = wait_for(&hub, |s| s.broadcasts == 1).await;

        assert_eq!(stats.registered, 0);
        assert_eq!(stats.delivered, 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unregister_unknown_is_noop() {
        let (hub, _task) = Hub::start(HubConfig::default());
        let (a, mut rx) = actor("alice", 8);

        hub.register(a).await.unwrap();
        hub.unregister(ActorId::next()).await.unwrap();
        hub.broadcast(Bytes::from("still here")).await.unwrap();
        let stats = wait_for(&hub, |s| s.broadcasts == 1).await;

        assert_eq!(stats.registered, 1);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from("still here"));
    }

    #[tokio::test]
    async fn test_unregister_twice_is_noop() {
        let (hub, _task) = Hub::start(HubConfig::default());
        let (a, _rx) = actor("alice", 8);
        let id = a.id();

        hub.register(a).await.unwrap();
        hub.unregister(id).await.unwrap();
        hub.unregister(id).await.unwrap();
        hub.broadcast(Bytes::from("p")).await.unwrap();

        let stats = wait_for(&hub, |s| s.broadcasts == 1).await;
        assert_eq!(stats.registered, 0);
    }

    #[tokio::test]
    async fn test_shared_identity_both_receive() {
        let (hub, _task) = Hub::start(HubConfig::default());
        let (a1, mut rx1) = actor("alice", 8);
        let (a2, mut rx2) = actor("alice", 8);
        assert_eq!(a1.identity(), a2.identity());
        assert_ne!(a1.id(), a2.id());

        hub.register(a1).await.unwrap();
        hub.register(a2).await.unwrap();
        hub.broadcast(Bytes::from("p")).await.unwrap();
        let stats = wait_for(&hub, |s| s.broadcasts == 1).await;

        assert_eq!(stats.registered, 2);
        assert_eq!(rx1.recv().await.unwrap(), Bytes::from("p"));
        assert_eq!(rx2.recv().await.unwrap(), Bytes::from("p"));
    }

    #[tokio::test]
    async fn test_late_registration_misses_earlier_broadcast() {
        let (hub, _task) = Hub::start(HubConfig::default());
        let (early, mut early_rx) = actor("early", 8);
        let (late, mut late_rx) = actor("late", 8);

        hub.register(early).await.unwrap();
        hub.broadcast(Bytes::from("first")).await.unwrap();
        wait_for(&hub, |s| s.broadcasts == 1).await;

        hub.register(late).await.unwrap();
        hub.broadcast(Bytes::from("second")).await.unwrap();
        wait_for(&hub, |s| s.broadcasts == 2).await;

        assert_eq!(early_rx.recv().await.unwrap(), Bytes::from("first"));
        assert_eq!(early_rx.recv().await.unwrap(), Bytes::from("second"));
        assert_eq!(late_rx.recv().await.unwrap(), Bytes::from("second"));
        assert!(late_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops_only_for_that_actor() {
        let (hub, _task) = Hub::start(HubConfig::default());
        let (slow, mut slow_rx) = actor("slow", 1);
        let (fast, mut fast_rx) = actor("fast", 8);

        hub.register(slow).await.unwrap();
        hub.register(fast).await.unwrap();
        hub.broadcast(Bytes::from("one")).await.unwrap();
        hub.broadcast(Bytes::from("two")).await.unwrap();
        hub.broadcast(Bytes::from("three")).await.unwrap();
        let stats = wait_for(&hub, |s| s.broadcasts == 3).await;

        assert_eq!(stats.delivered, 4);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.registered, 2);

        assert_eq!(fast_rx.recv().await.unwrap(), Bytes::from("one"));
        assert_eq!(fast_rx.recv().await.unwrap(), Bytes::from("two"));
        assert_eq!(fast_rx.recv().await.unwrap(), Bytes::from("three"));

        assert_eq!(slow_rx.recv().await.unwrap(), Bytes::from("one"));
        assert!(slow_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_broadcasts_share_one_order() {
        const SENDERS: usize = 8;
        const PER_SENDER: usize = 50;
        const TOTAL: usize = SENDERS * PER_SENDER;

        let (hub, _task) = Hub::start(HubConfig::default());
        let mut receivers = Vec::new();
        for i in 0..4 {
            let (a, rx) = actor(&format!("user-{}", i), TOTAL);
            hub.register(a).await.unwrap();
            receivers.push(rx);
        }

        let mut tasks = Vec::new();
        for sender in 0..SENDERS {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                for n in 0..PER_SENDER {
                    hub.broadcast(Bytes::from(format!("{}:{}", sender, n)))
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        wait_for(&hub, |s| s.broadcasts == TOTAL as u64).await;

        let mut orders = Vec::new();
        for rx in &mut receivers {
            let mut order = Vec::with_capacity(TOTAL);
            while let Ok(payload) = rx.try_recv() {
                order.push(payload);
            }
            assert_eq!(order.len(), TOTAL);
            orders.push(order);
        }
        assert!(orders.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_concurrent_membership_changes_are_atomic() {
        let (hub, _task) = Hub::start(HubConfig::default());
        let (anchor, mut anchor_rx) = actor("anchor", 1024);
        hub.register(anchor).await.unwrap();

        let churn = {
            let hub = hub.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    let (a, _rx) = actor("churn", 4);
                    let id = a.id();
                    hub.register(a).await.unwrap();
                    hub.unregister(id).await.unwrap();
                }
            })
        };
        for n in 0..100 {
            hub.broadcast(Bytes::from(n.to_string())).await.unwrap();
        }
        churn.await.unwrap();
        let stats = wait_for(&hub, |s| s.broadcasts == 100 && s.registered == 1).await;

        // Every broadcast reached the anchor exactly once, in order
        for n in 0..100 {
            assert_eq!(anchor_rx.recv().await.unwrap(), Bytes::from(n.to_string()));
        }
        assert!(anchor_rx.try_recv().is_err());
        assert!(stats.delivered >= 100);
    }

    #[tokio::test]
    async fn test_loop_stops_when_handles_dropped() {
        let (hub, task) = Hub::start(HubConfig::default());
        drop(hub);
        timeout(Duration::from_secs(5), task)
            .await
            .expect("hub did not stop")
            .unwrap();
    }
}
