//! Connection abstraction traits for Relay.
//!
//! A connection is split once into a reader half and a writer half so the
//! two pumps of a connection actor can own one half each.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Close codes treated as an expected end of the connection:
/// normal closure, going away, and abnormal closure (no close frame).
pub const CLEAN_CLOSE_CODES: [u16; 3] = [1000, 1001, 1006];

/// Check whether a close code marks an expected shutdown.
#[must_use]
pub fn is_clean_close(code: u16) -> bool {
    CLEAN_CLOSE_CODES.contains(&code)
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was already closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Peer closed with a status code outside the expected set.
    #[error("Connection closed unexpectedly (code {code}): {reason}")]
    UnexpectedClose {
        /// Close status code.
        code: u16,
        /// Close reason sent by the peer.
        reason: String,
    },

    /// Inbound frame exceeds the configured limit.
    #[error("Frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Received frame size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Outbound payload was not valid UTF-8 and cannot be sent as text.
    #[error("Payload is not valid UTF-8 text")]
    InvalidText,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The read half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next data frame, text or binary.
    ///
    /// Control frames are handled internally. Returns `Ok(None)` when the
    /// peer closed the connection cleanly; any other termination is an error.
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// The write half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send a payload as a text frame.
    async fn send_text(&mut self, payload: Bytes) -> Result<(), TransportError>;

    /// Close the connection.
    ///
    /// Only the first call has an effect; later calls return `Ok(())`.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// An established bidirectional connection.
pub trait Connection: Send {
    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Split the connection into its read and write halves.
    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>);
}
