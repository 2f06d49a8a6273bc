//! Sender identities.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity used when a connection does not name itself.
pub const ANONYMOUS: &str = "anon";

/// Display name attached to every message a connection sends.
///
/// Identities are not unique; any number of connections may share one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Resolve a caller-supplied name, falling back to [`ANONYMOUS`] when it
    /// is absent or empty.
    #[must_use]
    pub fn resolve(name: Option<&str>) -> Self {
        match name {
            Some(name) if !name.is_empty() => Self(name.to_string()),
            _ => Self::anonymous(),
        }
    }

    /// The anonymous identity.
    #[must_use]
    pub fn anonymous() -> Self {
        Self(ANONYMOUS.to_string())
    }

    /// Get the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier of one connection actor.
///
/// The hub registry is keyed by this, not by [`Identity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(u64);

static NEXT_ACTOR_ID: AtomicU64 = AtomicU64::new(1);

impl ActorId {
    /// Allocate a fresh identifier.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor_{}", self.0)
    }
}
