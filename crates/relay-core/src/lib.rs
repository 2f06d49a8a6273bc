//! # relay-core
//!
//! The broadcast hub and the connection actors that feed it.
//!
//! - **Hub** - single task owning the registry of live connections
//! - **ConnectionActor** - per-connection inbound and outbound pumps
//! - **Identity** - sender names attached to every envelope
//!
//! ## Architecture
//!
//! ```text
//!  wire ──▶ inbound pump ──broadcast──▶ ┌─────────┐
//!                        ──register───▶ │   Hub   │──try_send──▶ outbound queue ──▶ outbound pump ──▶ wire
//!                        ──unregister─▶ └─────────┘
//! ```
//!
//! The hub applies one event at a time. A full outbound queue drops the
//! message for that connection only; the hub never waits on a client.

pub mod actor;
pub mod hub;
pub mod identity;

pub use actor::{ConnectionActor, DEFAULT_QUEUE_CAPACITY};
pub use hub::{ActorHandle, Coordinator, Hub, HubConfig, HubError, HubHandle, HubStats};
pub use identity::{ActorId, Identity, ANONYMOUS};
