//! Basic type definitions for the chat server
//!
//! - `SessionId`: newtype around the monotonic numeric session identifier
//! - `Username`: type alias of `Arc<str>`, a cheaply cloned display name

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Unique session identifier (newtype pattern)
///
/// Assigned by the registry in increasing order starting at 1 and never
/// reused. The value 0 is reserved for the server itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Sender id carried by server-generated notices
    pub const SERVER: SessionId = SessionId(0);

    /// First id handed out to a client session
    pub const FIRST: SessionId = SessionId(1);

    /// Check if this id denotes the server rather than a client
    pub fn is_server(&self) -> bool {
        *self == Self::SERVER
    }

    /// The id following this one, or None once the id space is exhausted
    pub fn next(&self) -> Option<SessionId> {
        self.0.checked_add(1).map(SessionId)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Username set at handshake
///
/// Cheap to clone: the registry tags every delivery with the sender's name.
pub type Username = Arc<str>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_id_reserved() {
        assert!(SessionId::SERVER.is_server());
        assert!(!SessionId::FIRST.is_server());
    }

    #[test]
    fn test_session_id_next() {
        assert_eq!(SessionId(1).next(), Some(SessionId(2)));
        assert_eq!(SessionId(u64::MAX).next(), None);
    }

    #[test]
    fn test_session_id_display() {
        assert_eq!(SessionId(42).to_string(), "#42");
    }
}
