//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake, username
//! handshake, admission to the registry, then the session's receive loop.

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::SessionLimits;
use crate::error::SessionError;
use crate::registry::RegistryHandle;
use crate::server::ServerHandle;
use crate::session::{read_username, Session};

/// Handle a new TCP connection
///
/// Both handshakes must finish within the handshake timeout of `limits`.
/// Errors returned here concern this connection only.
pub async fn handle_connection(
    stream: TcpStream,
    registry: RegistryHandle,
    server: ServerHandle,
    limits: SessionLimits,
) -> Result<(), SessionError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    let handshake = async {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (sink, mut source) = ws_stream.split();
        let username = read_username(&mut source).await?;
        Ok::<_, SessionError>((sink, source, username))
    };

    let (sink, source, username) = timeout(limits.handshake_timeout, handshake)
        .await
        .unwrap_or(Err(SessionError::HandshakeTimeout))?;

    info!("'{}' connected from {}", username, peer_addr);

    let (session, inbox) = Session::admit(username.into(), sink, registry, server, limits).await?;
    session.run(source, inbox).await;

    debug!("Connection from {} finished", peer_addr);

    Ok(())
}
