//! # relay-transport
//!
//! Connection abstraction for the Relay broadcast server.
//!
//! Every transport hands the core an object implementing [`Connection`],
//! which is split once into a [`FrameReader`] and a [`FrameWriter`]:
//!
//! - **axum** - sockets upgraded by the HTTP server
//! - **WebSocket** - any tokio-tungstenite stream
//! - **memory** - in-process pairs for tests and benchmarks
//!
//! ```rust,ignore
//! use tenvis_relay_transport::Connection;
//!
//! async fn echo(conn: Box<dyn Connection>) {
//!     let (mut reader, mut writer) = conn.split();
//!     while let Ok(Some(frame)) = reader.recv().await {
//!         if writer.send_text(frame).await.is_err() {
//!             break;
//!         }
//!     }
//!     let _ = writer.close().await;
//! }
//! ```

pub mod axum_ws;
pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use axum_ws::AxumConnection;
pub use memory::{MemoryConnection, MemoryPeer};
pub use traits::{is_clean_close, Connection, FrameReader, FrameWriter, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
