//! The envelope wrapped around every relayed message.

use serde::{Deserialize, Serialize};

/// A relayed message tagged with its sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Identity of the sending connection.
    pub user: String,
    /// Message body as text.
    #[serde(rename = "mensaje")]
    pub message: String,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(user: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            message: message.into(),
        }
    }

    /// Wrap a raw inbound frame.
    ///
    /// Frames are not required to be UTF-8; invalid sequences are replaced
    /// with U+FFFD so the result is always valid JSON text.
    #[must_use]
    pub fn from_frame(user: impl Into<String>, frame: &[u8]) -> Self {
        Self {
            user: user.into(),
            message: String::from_utf8_lossy(frame).into_owned(),
        }
    }
}
