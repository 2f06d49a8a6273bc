//! Connection actors.
//!
//! A connection actor bridges one network connection to the hub with two
//! pumps:
//!
//! - the **inbound pump** reads frames, wraps each in an [`Envelope`] tagged
//!   with the actor's identity, and submits it to the hub as a broadcast;
//! - the **outbound pump** drains the actor's bounded queue, which only the
//!   hub writes to, and writes each payload to the connection as text.
//!
//! Whichever pump stops first ends the actor. The actor then unregisters,
//! which closes its queue, and waits for the outbound pump to close the
//! connection.

use crate::hub::{ActorHandle, Coordinator};
use crate::identity::{ActorId, Identity};
use bytes::Bytes;
use relay_protocol::{codec, Envelope};
use std::sync::Arc;
use tenvis_relay_transport::{Connection, FrameReader, FrameWriter, TransportError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Default capacity of an actor's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Why an actor stopped.
#[derive(Debug)]
enum Termination {
    /// Peer closed the connection normally.
    PeerClosed,
    /// Reading from the connection failed.
    ReadFailed(TransportError),
    /// The outbound pump stopped first.
    WriterStopped,
    /// The hub is gone.
    HubStopped,
}

/// One client connection and its two pumps.
pub struct ConnectionActor {
    id: ActorId,
    identity: Identity,
    hub: Arc<dyn Coordinator>,
    connection: Box<dyn Connection>,
    queue_capacity: usize,
}

impl ConnectionActor {
    /// Create an actor for an accepted connection.
    ///
    /// A missing or empty `identity` becomes `"anon"`.
    #[must_use]
    pub fn new(
        hub: Arc<dyn Coordinator>,
        connection: Box<dyn Connection>,
        identity: Option<&str>,
    ) -> Self {
        Self {
            id: ActorId::next(),
            identity: Identity::resolve(identity),
            hub,
            connection,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Set the outbound queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
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

    /// Run the actor on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the actor until its connection ends.
    pub async fn run(self) {
        let Self {
            id,
            identity,
            hub,
            connection,
            queue_capacity,
        } = self;

        let remote = connection.remote_addr();
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity);
        let (reader, mut writer) = connection.split();

        if let Err(e) = hub
            .register(ActorHandle::new(id, identity.clone(), queue_tx))
            .await
        {
            warn!(actor = %id, error = %e, "Registration failed");
            if let Err(e) = writer.close().await {
                debug!(actor = %id, error = %e, "Close failed");
            }
            return;
        }

        debug!(actor = %id, user = %identity, remote = ?remote, "Connection opened");

        let mut outbound = tokio::spawn(outbound_pump(id, writer, queue_rx));
        let mut outbound_finished = false;

        let termination = tokio::select! {
            termination = inbound_pump(id, &identity, reader, hub.as_ref()) => termination,
            _ = &mut outbound => {
                outbound_finished = true;
                Termination::WriterStopped
            }
        };

        match &termination {
            Termination::PeerClosed => debug!(actor = %id, user = %identity, "Client disconnected"),
            Termination::ReadFailed(e) => {
                warn!(actor = %id, user = %identity, error = %e, "Connection error")
            }
            Termination::WriterStopped | Termination::HubStopped => {
                debug!(actor = %id, user = %identity, reason = ?termination, "Connection ending")
            }
        }

        if let Err(e) = hub.unregister(id).await {
            debug!(actor = %id, error = %e, "Unregister skipped");
        }

        if !outbound_finished {
            if let Err(e) = outbound.await {
                warn!(actor = %id, error = %e, "Outbound pump failed");
            }
        }

        debug!(actor = %id, "Connection closed");
    }
}

/// Read frames until the connection ends, submitting each as a broadcast.
async fn inbound_pump(
    id: ActorId,
    identity: &Identity,
    mut reader: Box<dyn FrameReader>,
    hub: &dyn Coordinator,
) -> Termination {
    loop {
        let frame = match reader.recv().await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Termination::PeerClosed,
            Err(e) => return Termination::ReadFailed(e),
        };

        trace!(actor = %id, bytes = frame.len(), "Frame received");

        let envelope = Envelope::from_frame(identity.as_str(), &frame);
        let payload = match codec::encode(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(actor = %id, error = %e, "Failed to encode envelope, frame skipped");
                continue;
            }
        };

        if hub.broadcast(payload).await.is_err() {
            return Termination::HubStopped;
        }
    }
}

/// Write queued payloads until the queue closes or a write fails, then
/// close the connection.
async fn outbound_pump(
    id: ActorId,
    mut writer: Box<dyn FrameWriter>,
    mut queue: mpsc::Receiver<Bytes>,
) {
    while let Some(payload) = queue.recv().await {
        if let Err(e) = writer.send_text(payload).await {
            warn!(actor = %id, error = %e, "Write failed");
            break;
        }
    }

    if let Err(e) = writer.close().await {
        debug!(actor = %id, error = %e, "Close failed");
    }
}
