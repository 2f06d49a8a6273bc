//! # Relay Server
//!
//! Realtime broadcast relay: every text message a client sends over its
//! WebSocket is delivered to every connected client, tagged with the
//! sender's name.
//!
//! The binary wires the pieces together; they are exposed here so the
//! server can be embedded or driven from tests.

pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{router, run_server, serve, AppState};
