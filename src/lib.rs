//! Multi-user WebSocket Chat Relay Library
//!
//! A chat server that relays text from every client to every other client,
//! with per-client blocking and a client-triggered global shutdown.
//!
//! # Features
//! - Username handshake on connect
//! - Broadcast of chat text to all connected clients
//! - Per-client blacklist (block / unblock senders)
//! - Logout and disconnect notices
//! - Graceful, idempotent server shutdown
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Registry` is the actor owning the roster of live sessions
//! - Each connection runs a `Session` task that owns its own blacklist and
//!   publishes a copy to the registry, which filters at broadcast time
//! - Per-session outboxes are bounded; a session that falls behind is evicted
//! - `Server` accepts connections and owns start/stop
//! - No locks needed - roster access goes through message passing
//!
//! # Example
//! ```ignore
//! use chat_relay::{startup, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::from_args(std::env::args().skip(1)).unwrap();
//!     startup(config).await.unwrap();
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod message;
pub mod registry;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use client::{parse_console_line, ChatClient, ChatReceiver, ChatSender};
pub use config::{ClientConfig, ServerConfig, SessionLimits, DEFAULT_PORT};
pub use error::{ClientError, ConfigError, ErrorPolicy, RegistryError, ServerError, SessionError};
pub use handler::handle_connection;
pub use message::{Message, MessageType};
pub use registry::{Registry, RegistryCommand, RegistryHandle};
pub use server::{startup, Server, ServerHandle};
pub use session::{Blacklist, Session, SessionState};
pub use types::{SessionId, Username};
