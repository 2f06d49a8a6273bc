//! WebSocket connections over tokio-tungstenite.
//!
//! Wraps any handshaken [`WebSocketStream`], whether it came from a raw TCP
//! listener or a client-side `connect_async`.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    tungstenite::{error::ProtocolError as WsProtocolError, Error as WsError, Message},
    WebSocketStream,
};
use tracing::{debug, trace};

use crate::traits::{is_clean_close, Connection, FrameReader, FrameWriter, TransportError};

/// Default maximum inbound message size (64 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// A WebSocket connection.
pub struct WebSocketConnection<S> {
    stream: WebSocketStream<S>,
    remote_addr: Option<SocketAddr>,
    max_message_size: usize,
}

impl<S> WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Create a new WebSocket connection.
    #[must_use]
    pub fn new(stream: WebSocketStream<S>) -> Self {
        Self {
            stream,
            remote_addr: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Record the peer address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Set the maximum inbound message size.
    #[must_use]
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }
}

impl<S> Connection for WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|a| a.to_string())
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let (sink, stream) = self.stream.split();
        (
            Box::new(WebSocketReader {
                stream,
                max_message_size: self.max_message_size,
            }),
            Box::new(WebSocketWriter { sink, closed: false }),
        )
    }
}

struct WebSocketReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
    max_message_size: usize,
}

impl<S> WebSocketReader<S> {
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
impl<S> FrameReader for WebSocketReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
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
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    // Pongs are queued by tungstenite itself
                    trace!("Control frame");
                }
                Some(Ok(Message::Close(None))) => {
                    debug!("Received close frame without status");
                    return Ok(None);
                }
                Some(Ok(Message::Close(Some(frame)))) => {
                    let code = u16::from(frame.code);
                    if is_clean_close(code) {
                        debug!(code, "Received close frame");
                        return Ok(None);
                    }
                    return Err(TransportError::UnexpectedClose {
                        code,
                        reason: frame.reason.into_owned(),
                    });
                }
                Some(Err(e)) if is_disconnect(&e) => {
                    debug!(error = %e, "Peer went away");
                    return Ok(None);
                }
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => return Ok(None),
            }
        }
    }
}

/// Whether a read error means the peer simply went away.
///
/// A dropped TCP connection surfaces as a reset without closing handshake,
/// which counts as 1006 and is a clean closure.
pub(crate) fn is_disconnect(error: &WsError) -> bool {
    matches!(
        error,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(WsProtocolError::ResetWithoutClosingHandshake)
    )
}

struct WebSocketWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    closed: bool,
}

#[async_trait]
impl<S> FrameWriter for WebSocketWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
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

        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(format!("Failed to close: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{
        accept_async, connect_async,
        tungstenite::protocol::{frame::coding::CloseCode, CloseFrame},
        MaybeTlsStream,
    };

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn connected_pair() -> (Box<WebSocketConnection<TcpStream>>, Client) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            WebSocketConnection::new(ws).with_remote_addr(peer)
        });

        let (client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        (Box::new(server.await.unwrap()), client)
    }

    #[tokio::test]
    async fn test_text_and_binary_frames() {
        let (conn, mut client) = connected_pair().await;
        assert!(conn.remote_addr().is_some());
        let (mut reader, _writer) = Connection::split(conn);

        client.send(Message::Text("hi".into())).await.unwrap();
        client.send(Message::Binary(vec![1, 2, 3])).await.unwrap();

        assert_eq!(reader.recv().await.unwrap().unwrap(), Bytes::from("hi"));
        assert_eq!(
            reader.recv().await.unwrap().unwrap(),
            Bytes::from(vec![1u8, 2, 3])
        );
    }

    #[tokio::test]
    async fn test_send_text() {
        let (conn, mut client) = connected_pair().await;
        let (_reader, mut writer) = Connection::split(conn);

        writer.send_text(Bytes::from("hello")).await.unwrap();

        match client.next().await {
            Some(Ok(Message::Text(text))) => assert_eq!(text, "hello"),
            other => panic!("Expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_normal_close_is_clean() {
        let (conn, mut client) = connected_pair().await;
        let (mut reader, _writer) = Connection::split(conn);

        client
            .close(Some(CloseFrame {
                code: CloseCode::Away,
                reason: "bye".into(),
            }))
            .await
            .unwrap();

        assert!(reader.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unexpected_close_code() {
        let (conn, mut client) = connected_pair().await;
        let (mut reader, _writer) = Connection::split(conn);

        client
            .close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "nope".into(),
            }))
            .await
            .unwrap();

        match reader.recv().await {
            Err(TransportError::UnexpectedClose { code, reason }) => {
                assert_eq!(code, 1008);
                assert_eq!(reason, "nope");
            }
            other => panic!("Expected UnexpectedClose, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropped_peer_is_clean() {
        let (conn, client) = connected_pair().await;
        let (mut reader, _writer) = Connection::split(conn);

        drop(client);

        assert!(reader.recv().await.unwrap().is_none());
    }

    #[test]
    fn test_is_disconnect() {
        assert!(is_disconnect(&WsError::ConnectionClosed));
        assert!(is_disconnect(&WsError::Protocol(
            WsProtocolError::ResetWithoutClosingHandshake
        )));
        assert!(!is_disconnect(&WsError::Protocol(
            WsProtocolError::HandshakeIncomplete
        )));
    }

    #[tokio::test]
    async fn test_oversized_frame() {
        let (conn, mut client) = connected_pair().await;
        let conn = Box::new((*conn).with_max_message_size(4));
        let (mut reader, _writer) = Connection::split(conn);

        client.send(Message::Text("too long".into())).await.unwrap();

        assert!(matches!(
            reader.recv().await,
            Err(TransportError::FrameTooLarge { size: 8, max: 4 })
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (conn, _client) = connected_pair().await;
        let (_reader, mut writer) = Connection::split(conn);

        writer.close().await.unwrap();
        writer.close().await.unwrap();
        assert!(matches!(
            writer.send_text(Bytes::from("late")).await,
            Err(TransportError::ConnectionClosed)
        ));
    }
}
