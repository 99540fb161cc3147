//! Message protocol definitions
//!
//! One JSON record per WebSocket text frame, in both directions:
//! `{"sender_id": 3, "type": "text", "body": "hi"}`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::types::SessionId;

/// Kind of a message record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Free chat text, relayed to everyone
    Text,
    /// Client leaves; also the server's acknowledgement back to that client
    Logout,
    /// Stop the server; also the notice every client receives on shutdown
    Shutdown,
    /// Body names a user whose messages the sender no longer wants
    Block,
    /// Body names a user to accept messages from again
    Unblock,
}

impl MessageType {
    /// Wire name of this type
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Logout => "logout",
            MessageType::Shutdown => "shutdown",
            MessageType::Block => "block",
            MessageType::Unblock => "unblock",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "logout" => Ok(MessageType::Logout),
            "shutdown" => Ok(MessageType::Shutdown),
            "block" => Ok(MessageType::Block),
            "unblock" => Ok(MessageType::Unblock),
            other => Err(SessionError::UnknownType(other.to_string())),
        }
    }
}

/// An immutable chat message record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub sender_id: SessionId,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub body: String,
}

/// Inbound shape: the type stays a plain string so an unknown type can be
/// told apart from a frame that is not a record at all.
#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    sender_id: SessionId,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    body: String,
}

impl Message {
    /// Create a message
    pub fn new(sender_id: SessionId, kind: MessageType, body: impl Into<String>) -> Self {
        Self {
            sender_id,
            kind,
            body: body.into(),
        }
    }

    /// Server notice carried as text
    pub fn notice(body: impl Into<String>) -> Self {
        Self::new(SessionId::SERVER, MessageType::Text, body)
    }

    /// Notice sent to every session when the server stops
    pub fn shutdown_notice() -> Self {
        Self::new(SessionId::SERVER, MessageType::Shutdown, "Server is shutting down.")
    }

    /// Acknowledgement sent back to a client that logged out
    pub fn logout_ack() -> Self {
        Self::new(SessionId::SERVER, MessageType::Logout, "You have been logged out.")
    }

    /// Check if the server produced this message
    pub fn is_notice(&self) -> bool {
        self.sender_id.is_server()
    }

    /// Serialize to a single frame payload
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a single frame payload
    ///
    /// Returns `SessionError::Malformed` for non-records and
    /// `SessionError::UnknownType` for records with an unrecognized type.
    pub fn decode(text: &str) -> Result<Self, SessionError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let kind = envelope.kind.parse()?;
        Ok(Self {
            sender_id: envelope.sender_id,
            kind,
            body: envelope.body,
        })
    }
}

/// Notice texts broadcast by sessions
pub mod notices {
    pub fn joined(user: &str) -> String {
        format!("User {} has joined the chat.", user)
    }

    pub fn logged_out(user: &str) -> String {
        format!("User {} has logged out.", user)
    }

    pub fn disconnected(user: &str) -> String {
        format!("User {} has disconnected.", user)
    }

    pub fn blocked(user: &str, target: &str) -> String {
        format!("User {} has blocked {}.", user, target)
    }

    pub fn unblocked(user: &str, target: &str) -> String {
        format!("User {} has unblocked {}.", user, target)
    }
}
