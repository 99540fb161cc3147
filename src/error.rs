//! Error types for the chat server
//!
//! Defines server, session, registry, configuration and client errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Server-level errors
///
/// A bind failure is fatal: the process does not proceed as a server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Could not bind the listening socket (fatal)
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error on the listening socket
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-connection errors
///
/// Never propagated beyond the owning session; see [`SessionError::policy`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// WebSocket protocol or transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Peer closed the connection or the stream ended
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Username handshake failed
    #[error("Handshake failed: {0}")]
    Handshake(&'static str),

    /// Handshake did not complete in time
    #[error("Handshake timed out")]
    HandshakeTimeout,

    /// Client stopped accepting data
    #[error("Write to client timed out")]
    WriteTimeout,

    /// Frame that is not a message record
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Well-formed record with a type this server does not know
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// Binary or other non-text frame
    #[error("Unsupported frame")]
    UnsupportedFrame,

    /// Registry actor is gone
    #[error("Registry unavailable: {0}")]
    Registry(#[from] RegistryError),
}

/// What a session does with an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Close only the affected session
    CloseSession,
    /// Log and keep receiving
    LogOnly,
    /// Close the session and shut the whole server down
    EscalateShutdown,
}

impl SessionError {
    /// Policy table mapping each error kind to its handling
    pub fn policy(&self) -> ErrorPolicy {
        match self {
            SessionError::WebSocket(_)
            | SessionError::ConnectionClosed
            | SessionError::Handshake(_)
            | SessionError::HandshakeTimeout
            | SessionError::WriteTimeout
            | SessionError::Malformed(_) => ErrorPolicy::CloseSession,
            SessionError::UnknownType(_) | SessionError::UnsupportedFrame => ErrorPolicy::LogOnly,
            SessionError::Registry(_) => ErrorPolicy::EscalateShutdown,
        }
    }
}

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Registry has shut down or its actor has stopped
    #[error("Registry closed")]
    Closed,

    /// No more session ids can be assigned
    #[error("Session id space exhausted")]
    IdsExhausted,
}

/// Command line configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Port argument is not a valid port number
    #[error("Invalid port: {0}")]
    InvalidPort(String),

    /// A required positional argument is missing
    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),
}

/// Client-side errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// WebSocket protocol or transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Server sent something that is not a valid message record
    #[error("Invalid message from server: {0}")]
    Protocol(#[from] SessionError),

    /// Outgoing record could not be serialized
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
