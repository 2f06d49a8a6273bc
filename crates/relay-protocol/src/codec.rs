//! JSON codec for envelopes.

use bytes::Bytes;
use thiserror::Error;

use crate::envelope::Envelope;

/// Maximum encoded envelope size (16 MiB).
pub const MAX_ENVELOPE_SIZE: usize = 16 * 1024 * 1024;

/// Errors that can occur while encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Encoded envelope exceeds the maximum size.
    #[error("Envelope size {0} exceeds maximum {MAX_ENVELOPE_SIZE}")]
    TooLarge(usize),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode an envelope to its wire form.
///
/// # Errors
///
/// Returns an error if serialization fails or the result is too large.
pub fn encode(envelope: &Envelope) -> Result<Bytes, ProtocolError> {
    let data = serde_json::to_vec(envelope)?;

    if data.len() > MAX_ENVELOPE_SIZE {
        return Err(ProtocolError::TooLarge(data.len()));
    }

    Ok(Bytes::from(data))
}

/// Decode an envelope from its wire form.
///
/// # Errors
///
/// Returns an error if the data is not a valid envelope.
pub fn decode(data: &[u8]) -> Result<Envelope, ProtocolError> {
    if data.len() > MAX_ENVELOPE_SIZE {
        return Err(ProtocolError::TooLarge(data.len()));
    }

    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_exact_shape() {
        let encoded = encode(&Envelope::new("alice", "hi")).unwrap();
        assert_eq!(&encoded[..], br#"{"user":"alice","mensaje":"hi"}"#);
    }

    #[test]
    fn test_encode_escapes_text() {
        let encoded = encode(&Envelope::new("eve", "say \"hi\"\n")).unwrap();
        assert_eq!(&encoded[..], br#"{"user":"eve","mensaje":"say \"hi\"\n"}"#);
    }

    #[test]
    fn test_encode_too_large() {
        let body = "a".repeat(MAX_ENVELOPE_SIZE);
        match encode(&Envelope::new("alice", body)) {
            Err(ProtocolError::TooLarge(_)) => {}
            other => panic!("Expected TooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_missing_field() {
        assert!(matches!(
            decode(br#"{"user":"alice"}"#),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_decode_wire_form() {
        let envelope = decode(br#"{"user":"bob","mensaje":"hey"}"#).unwrap();
        assert_eq!(envelope, Envelope::new("bob", "hey"));
    }
}
