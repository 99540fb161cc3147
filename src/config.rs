//! Command line configuration
//!
//! Server: `chat_relay [port]`. Client: `chat_client <server[:port]> <username>`.
//! Both default to port 1500.

use std::time::Duration;

use crate::error::ConfigError;

/// Default chat port for server and client
pub const DEFAULT_PORT: u16 = 1500;

/// Default bind host (all interfaces)
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Channel buffer size for registry commands
pub const COMMAND_BUFFER_SIZE: usize = 256;

/// Time a new connection gets to send its username
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Deliveries a session may fall behind by before it is evicted
pub const OUTBOX_CAPACITY: usize = 128;

/// Longest a single write to a client may block
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub command_buffer: usize,
    pub handshake_timeout: Duration,
    pub outbox_capacity: usize,
    pub write_timeout: Duration,
}

/// Per-connection limits handed to every connection task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub handshake_timeout: Duration,
    pub outbox_capacity: usize,
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            command_buffer: COMMAND_BUFFER_SIZE,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            outbox_capacity: OUTBOX_CAPACITY,
            write_timeout: WRITE_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Parse the arguments after the program name
    ///
    /// The only argument is an optional port.
    pub fn from_args<I, S>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::default();
        if let Some(port) = args.into_iter().next() {
            config.port = parse_port(port.as_ref())?;
        }
        Ok(config)
    }

    /// `host:port` string to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            handshake_timeout: self.handshake_timeout,
            outbox_capacity: self.outbox_capacity,
            write_timeout: self.write_timeout,
        }
    }
}

/// Client settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
}

impl ClientConfig {
    /// Parse `<server[:port]> <username>`
    pub fn from_args<I, S>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut args = args.into_iter();
        let target = args.next().ok_or(ConfigError::MissingArgument("server"))?;
        let username = args.next().ok_or(ConfigError::MissingArgument("username"))?;

        let target = target.as_ref();
        let (server, port) = match target.rsplit_once(':') {
            Some((host, port)) => (host.to_string(), parse_port(port)?),
            None => (target.to_string(), DEFAULT_PORT),
        };

        Ok(Self {
            server,
            port,
            username: username.as_ref().to_string(),
        })
    }

    /// WebSocket URL of the server
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.server, self.port)
    }
}

fn parse_port(s: &str) -> Result<u16, ConfigError> {
    s.parse().map_err(|_| ConfigError::InvalidPort(s.to_string()))
}
