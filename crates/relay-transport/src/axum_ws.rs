//! WebSocket connections upgraded through axum.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tracing::{debug, trace};

use crate::traits::{is_clean_close, Connection, FrameReader, FrameWriter, TransportError};

/// A WebSocket upgraded by an axum handler.
pub struct AxumConnection {
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    max_message_size: usize,
}

impl AxumConnection {
    /// Wrap an upgraded socket.
    ///
    /// `max_message_size` should match the limit given to
    /// `WebSocketUpgrade::max_message_size`.
    #[must_use]
    pub fn new(socket: WebSocket, max_message_size: usize) -> Self {
        Self {
            socket,
            remote_addr: None,
            max_message_size,
        }
    }

    /// Record the peer address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

impl Connection for AxumConnection {
    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|a| a.to_string())
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let (sink, stream) = self.socket.split();
        (
            Box::new(AxumReader {
                stream,
                max_message_size: self.max_message_size,
            }),
            Box::new(AxumWriter { sink, closed: false }),
        )
    }
}

struct AxumReader {
    stream: SplitStream<WebSocket>,
    max_message_size: usize,
}

impl AxumReader {
    fn check_size(&self, size: usize) -> Result<(), TransportError> {
        if size > self.max_message_size {
            return Err(TransportError::FrameTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FrameReader for AxumReader {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.check_size(text.len())?;
                    return Ok(Some(Bytes::from(text)));
                }
                Some(Ok(Message::Binary(data))) => {
                    self.check_size(data.len())?;
                    return Ok(Some(Bytes::from(data)));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    trace!("Control frame");
                }
                Some(Ok(Message::Close(None))) => {
                    debug!("Received close frame without status");
                    return Ok(None);
                }
                Some(Ok(Message::Close(Some(frame)))) => {
                    if is_clean_close(frame.code) {
                        debug!(code = frame.code, "Received close frame");
                        return Ok(None);
                    }
                    return Err(TransportError::UnexpectedClose {
                        code: frame.code,
                        reason: frame.reason.into_owned(),
                    });
                }
                Some(Err(e)) => {
                    let e = e.into_inner();
                    if is_disconnect(e.as_ref()) {
                        debug!(error = %e, "Peer went away");
                        return Ok(None);
                    }
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => return Ok(None),
            }
        }
    }
}

/// axum wraps the tungstenite error; unwrap it to classify drops.
#[cfg(feature = "websocket")]
fn is_disconnect(error: &(dyn std::error::Error + Send + Sync + 'static)) -> bool {
    error
        .downcast_ref::<tokio_tungstenite::tungstenite::Error>()
        .is_some_and(crate::websocket::is_disconnect)
}

#[cfg(not(feature = "websocket"))]
fn is_disconnect(_error: &(dyn std::error::Error + Send + Sync + 'static)) -> bool {
    false
}

struct AxumWriter {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl FrameWriter for AxumWriter {
    async fn send_text(&mut self, payload: Bytes) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }

        let text = String::from_utf8(payload.to_vec()).map_err(|_| TransportError::InvalidText)?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }

        self.sink
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }
}
