//! # relay-protocol
//!
//! Wire format for the Relay broadcast server.
//!
//! Every frame a client receives is a JSON envelope naming the sender and
//! carrying the text the sender wrote:
//!
//! ```json
//! {"user":"alice","mensaje":"hi"}
//! ```
//!
//! Field names and order are fixed; browser clients parse this shape as is.
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, Envelope};
//!
//! let envelope = Envelope::from_frame("alice", b"hi");
//! let encoded = codec::encode(&envelope).unwrap();
//! assert_eq!(&encoded[..], br#"{"user":"alice","mensaje":"hi"}"#);
//! ```

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, ProtocolError};
pub use envelope::Envelope;
