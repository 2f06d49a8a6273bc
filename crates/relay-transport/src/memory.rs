//! In-process connections.
//!
//! [`pair`] returns a [`MemoryConnection`] for the server side and a
//! [`MemoryPeer`] that plays the remote client. Useful for driving
//! connection actors without a network.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::traits::{is_clean_close, Connection, FrameReader, FrameWriter, TransportError};

enum PeerFrame {
    Data(Bytes),
    Close(Option<u16>),
    Error(String),
}

/// Create a connected in-memory pair.
///
/// `capacity` bounds each direction; a peer that stops reading makes the
/// server-side writer wait once `capacity` frames are in flight.
#[must_use]
pub fn pair(capacity: usize) -> (MemoryConnection, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
    let closes = Arc::new(AtomicUsize::new(0));

    (
        MemoryConnection {
            inbound: inbound_rx,
            outbound: outbound_tx,
            closes: Arc::clone(&closes),
        },
        MemoryPeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
            closes,
        },
    )
}

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    inbound: mpsc::Receiver<PeerFrame>,
    outbound: mpsc::Sender<Bytes>,
    closes: Arc<AtomicUsize>,
}

impl Connection for MemoryConnection {
    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        (
            Box::new(MemoryReader {
                inbound: self.inbound,
            }),
            Box::new(MemoryWriter {
                outbound: Some(self.outbound),
                closes: self.closes,
            }),
        )
    }
}

struct MemoryReader {
    inbound: mpsc::Receiver<PeerFrame>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.inbound.recv().await {
            Some(PeerFrame::Data(data)) => Ok(Some(data)),
            Some(PeerFrame::Close(None)) | None => Ok(None),
            Some(PeerFrame::Close(Some(code))) if is_clean_close(code) => Ok(None),
            Some(PeerFrame::Close(Some(code))) => Err(TransportError::UnexpectedClose {
                code,
                reason: String::new(),
            }),
            Some(PeerFrame::Error(reason)) => Err(TransportError::ReceiveFailed(reason)),
        }
    }
}

struct MemoryWriter {
    outbound: Option<mpsc::Sender<Bytes>>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send_text(&mut self, payload: Bytes) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::ConnectionClosed)?;
        if std::str::from_utf8(&payload).is_err() {
            return Err(TransportError::InvalidText);
        }
        outbound
            .send(payload)
            .await
            .map_err(|_| TransportError::SendFailed("peer dropped".into()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.outbound.take().is_some() {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Client side of an in-memory connection.
pub struct MemoryPeer {
    inbound: mpsc::Sender<PeerFrame>,
    outbound: mpsc::Receiver<Bytes>,
    closes: Arc<AtomicUsize>,
}

impl MemoryPeer {
    /// Send a data frame to the server side.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side has been dropped.
    pub async fn send(&self, data: impl Into<Bytes>) -> Result<(), TransportError> {
        self.push(PeerFrame::Data(data.into())).await
    }

    /// Close the connection from the client side with an optional status code.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side has been dropped.
    pub async fn close(&self, code: Option<u16>) -> Result<(), TransportError> {
        self.push(PeerFrame::Close(code)).await
    }

    /// Make the server side's next read fail.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side has been dropped.
    pub async fn fail(&self, reason: impl Into<String>) -> Result<(), TransportError> {
        self.push(PeerFrame::Error(reason.into())).await
    }

    /// Receive the next frame written by the server side.
    ///
    /// Returns `None` once the server side has closed and all frames are read.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.outbound.recv().await
    }

    /// Receive a frame if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.outbound.try_recv().ok()
    }

    /// Number of times the server side actually closed the connection.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    async fn push(&self, frame: PeerFrame) -> Result<(), TransportError> {
        self.inbound
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (conn, mut peer) = pair(8);
        let (mut reader, mut writer) = Connection::split(Box::new(conn));

        peer.send("hi").await.unwrap();
        assert_eq!(reader.recv().await.unwrap(), Some(Bytes::from("hi")));

        writer.send_text(Bytes::from("back")).await.unwrap();
        assert_eq!(peer.recv().await, Some(Bytes::from("back")));
    }

    #[tokio::test]
    async fn test_close_classification() {
        let (conn, peer) = pair(8);
        let (mut reader, _writer) = Connection::split(Box::new(conn));

        peer.close(Some(1001)).await.unwrap();
        peer.close(Some(1011)).await.unwrap();
        peer.fail("reset").await.unwrap();

        assert!(reader.recv().await.unwrap().is_none());
        assert!(matches!(
            reader.recv().await,
            Err(TransportError::UnexpectedClose { code: 1011, .. })
        ));
        assert!(matches!(
            reader.recv().await,
            Err(TransportError::ReceiveFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_dropped_peer_is_clean_close() {
        let (conn, peer) = pair(8);
        let (mut reader, _writer) = Connection::split(Box::new(conn));
        drop(peer);
        assert!(reader.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_counted_once() {
        let (conn, mut peer) = pair(8);
        let (_reader, mut writer) = Connection::split(Box::new(conn));

        writer.close().await.unwrap();
        writer.close().await.unwrap();

        assert_eq!(peer.close_count(), 1);
        assert!(peer.recv().await.is_none());
        assert!(matches!(
            writer.send_text(Bytes::from("late")).await,
            Err(TransportError::ConnectionClosed)
        ));
    }
}
