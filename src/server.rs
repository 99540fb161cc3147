//! Server: acceptor and lifecycle
//!
//! Binds the listening socket, runs the accept loop, and owns global
//! shutdown. Each accepted connection gets its own task, so a slow or broken
//! client never holds up acceptance.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::handler::handle_connection;
use crate::registry::{Registry, RegistryHandle};

/// A bound chat server, ready to accept connections
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    registry: RegistryHandle,
    /// Flipped to true exactly once, by the first shutdown
    stop: Arc<watch::Sender<bool>>,
}

impl Server {
    /// Bind the listening socket and start the registry actor
    ///
    /// A bind failure is fatal and reported as `ServerError::Bind`.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let addr = config.bind_addr();
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => return Err(ServerError::Bind { addr, source }),
        };

        let registry = Registry::spawn(config.command_buffer);
        let (stop, _) = watch::channel(false);

        Ok(Self {
            config,
            listener,
            registry,
            stop: Arc::new(stop),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// A handle that can stop this server from anywhere
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            registry: self.registry.clone(),
            stop: self.stop.clone(),
        }
    }

    /// Accept connections until shutdown is requested
    ///
    /// Returns once the listener is closed and every connection task has
    /// finished.
    pub async fn run(self) {
        let handle = self.handle();
        let mut stop_rx = self.stop.subscribe();
        let mut connections = JoinSet::new();

        info!("Accepting connections on {}", self.config.bind_addr());

        loop {
            if *stop_rx.borrow_and_update() {
                break;
            }

            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("New connection from {}", addr);
                        let registry = self.registry.clone();
                        let server = handle.clone();
                        let limits = self.config.session_limits();

                        // Spawn handler task for each connection
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, registry, server, limits).await {
                                warn!("Connection from {} ended with error: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!("Connection task failed: {}", e);
                    }
                }
            }
        }

        drop(self.listener);
        info!(
            "Stopped accepting connections, waiting for {} connection(s)",
            connections.len()
        );

        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                error!("Connection task failed: {}", e);
            }
        }

        info!("Server stopped");
    }
}

/// Bind and serve until shutdown
pub async fn startup(config: ServerConfig) -> Result<(), ServerError> {
    let server = Server::bind(config).await?;
    info!("Chat server listening on {}", server.local_addr()?);
    server.run().await;
    Ok(())
}

/// Cloneable control handle for a running server
#[derive(Debug, Clone)]
pub struct ServerHandle {
    registry: RegistryHandle,
    stop: Arc<watch::Sender<bool>>,
}

impl ServerHandle {
    /// Stop accepting, notify every session and close them
    ///
    /// Only the first call has an effect.
    pub async fn shutdown(&self) {
        if self.stop.send_replace(true) {
            debug!("Shutdown already requested");
            return;
        }

        info!("Server shutting down");
        if let Err(e) = self.registry.shutdown().await {
            warn!("Registry shutdown failed: {}", e);
        }
    }

    /// Check if shutdown has been requested
    pub fn is_shutting_down(&self) -> bool {
        *self.stop.borrow()
    }

    /// Number of registered sessions (0 once the registry is gone)
    pub async fn session_count(&self) -> usize {
        self.registry.session_count().await.unwrap_or(0)
    }
}
