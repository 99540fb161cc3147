//! Session: one connected client
//!
//! A session is admitted once its username handshake has completed. From then
//! on a single task owns it and runs [`Session::run`], which selects between
//! frames from the client and messages queued by the registry. That task is
//! the only one that ever mutates the session's blacklist; the registry gets a
//! copy after every change and applies it when it fans out.

use std::collections::HashSet;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::config::SessionLimits;
use crate::error::{ErrorPolicy, SessionError};
use crate::message::{notices, Message, MessageType};
use crate::registry::RegistryHandle;
use crate::server::ServerHandle;
use crate::types::{SessionId, Username};

/// Server side of a client WebSocket
pub type WsStream = WebSocketStream<TcpStream>;
/// Write half of a client WebSocket
pub type WsSink = SplitSink<WsStream, WsMessage>;
/// Read half of a client WebSocket
pub type WsSource = SplitStream<WsStream>;
/// Receiving end of a session's outbox
pub type Inbox = mpsc::Receiver<Message>;

/// Lifecycle of an admitted session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Registered and receiving
    Active,
    /// Removed from the registry, channel closed (terminal)
    Closed,
}

/// Usernames whose messages a session declines to receive
#[derive(Debug, Default)]
pub struct Blacklist(HashSet<String>);

impl Blacklist {
    /// Add a user; returns false if already present
    pub fn block(&mut self, user: &str) -> bool {
        self.0.insert(user.to_string())
    }

    /// Remove a user; returns false if not present
    pub fn unblock(&mut self, user: &str) -> bool {
        self.0.remove(user)
    }

    /// Copy of the current set, for publishing to the registry
    pub fn snapshot(&self) -> HashSet<String> {
        self.0.clone()
    }
}

/// Why a session ended; decides which notice goes out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Logout,
    Shutdown,
    Disconnected,
}

/// What the receive loop does next
#[derive(Debug)]
enum Flow {
    Continue,
    /// Keep delivering until the registry closes the outbox, then close
    Drain,
    Close(CloseReason),
}

/// Read the username a client sends right after connecting
///
/// Ping and pong frames are skipped; anything else that is not a non-empty
/// text frame fails the handshake.
pub async fn read_username<S>(source: &mut S) -> Result<String, SessionError>
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = source.next().await {
        match frame? {
            WsMessage::Text(text) => {
                let username = text.trim();
                if username.is_empty() {
                    return Err(SessionError::Handshake("empty username"));
                }
                return Ok(username.to_string());
            }
            WsMessage::Binary(_) => {
                return Err(SessionError::Handshake("expected a username"));
            }
            WsMessage::Close(_) => return Err(SessionError::ConnectionClosed),
            _ => {}
        }
    }
    Err(SessionError::ConnectionClosed)
}

/// A connected, admitted client
pub struct Session {
    id: SessionId,
    username: Username,
    blacklist: Blacklist,
    state: SessionState,
    sink: WsSink,
    write_timeout: Duration,
    registry: RegistryHandle,
    server: ServerHandle,
}

impl Session {
    /// Register a session and announce it
    ///
    /// Returns the session together with the inbox the registry delivers to.
    /// If the session cannot be registered and announced, it is removed again
    /// and the connection is closed.
    pub async fn admit(
        username: Username,
        mut sink: WsSink,
        registry: RegistryHandle,
        server: ServerHandle,
        limits: SessionLimits,
    ) -> Result<(Self, Inbox), SessionError> {
        let (outbox, inbox) = mpsc::channel(limits.outbox_capacity);

        let id = match registry.register(username.clone(), outbox).await {
            Ok(id) => id,
            Err(e) => {
                let _ = timeout(limits.write_timeout, sink.close()).await;
                return Err(e.into());
            }
        };

        let joined = Message::notice(notices::joined(&username));
        if let Err(e) = registry.broadcast(joined).await {
            registry.remove(id).await;
            let _ = timeout(limits.write_timeout, sink.close()).await;
            return Err(e.into());
        }

        let session = Self {
            id,
            username,
            blacklist: Blacklist::default(),
            state: SessionState::Active,
            sink,
            write_timeout: limits.write_timeout,
            registry,
            server,
        };

        Ok((session, inbox))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Run the receive loop until the session closes
    pub async fn run(mut self, mut source: WsSource, mut inbox: Inbox) {
        let reason = loop {
            let step = tokio::select! {
                frame = source.next() => self.on_frame(frame).await,
                message = inbox.recv() => self.on_delivery(message).await,
            };

            match step {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close(reason)) => break reason,
                Ok(Flow::Drain) => {
                    self.drain(&mut inbox).await;
                    break CloseReason::Shutdown;
                }
                Err(e) => match e.policy() {
                    ErrorPolicy::LogOnly => {
                        warn!("Session {} ignored input: {}", self.id, e);
                    }
                    ErrorPolicy::CloseSession => {
                        debug!("Session {} ending: {}", self.id, e);
                        break CloseReason::Disconnected;
                    }
                    ErrorPolicy::EscalateShutdown => {
                        error!("Session {} cannot continue: {}", self.id, e);
                        self.server.shutdown().await;
                        break CloseReason::Shutdown;
                    }
                },
            }
        };

        self.close(reason).await;
    }

    /// Write one message to this session's client
    ///
    /// A client that stops reading fails the write after the write timeout.
    pub async fn send(&mut self, message: &Message) -> Result<(), SessionError> {
        let text = message.encode()?;
        timeout(self.write_timeout, self.sink.send(WsMessage::Text(text.into())))
            .await
            .map_err(|_| SessionError::WriteTimeout)??;
        Ok(())
    }

    /// Handle one frame (or the end of the stream) from the client
    async fn on_frame(
        &mut self,
        frame: Option<Result<WsMessage, tungstenite::Error>>,
    ) -> Result<Flow, SessionError> {
        match frame {
            None => Err(SessionError::ConnectionClosed),
            Some(Err(e)) => Err(e.into()),
            Some(Ok(WsMessage::Text(text))) => {
                let message = Message::decode(&text)?;
                self.dispatch(message).await
            }
            Some(Ok(WsMessage::Close(_))) => Err(SessionError::ConnectionClosed),
            Some(Ok(WsMessage::Binary(_))) => Err(SessionError::UnsupportedFrame),
            // Ping/Pong are answered by tungstenite
            Some(Ok(_)) => Ok(Flow::Continue),
        }
    }

    /// Handle one message queued by the registry
    ///
    /// Blacklists were already applied when it was broadcast. `None` means the
    /// registry dropped this session: at shutdown, or for falling behind.
    async fn on_delivery(&mut self, message: Option<Message>) -> Result<Flow, SessionError> {
        let Some(message) = message else {
            if self.server.is_shutting_down() {
                return Ok(Flow::Close(CloseReason::Shutdown));
            }
            warn!("Session {} was dropped by the registry", self.id);
            return Ok(Flow::Close(CloseReason::Disconnected));
        };

        self.send(&message).await?;

        if message.is_notice() && message.kind == MessageType::Shutdown {
            Ok(Flow::Close(CloseReason::Shutdown))
        } else {
            Ok(Flow::Continue)
        }
    }

    /// Act on a message received from the client
    async fn dispatch(&mut self, message: Message) -> Result<Flow, SessionError> {
        match message.kind {
            MessageType::Text => {
                // Sender id is always the relaying session's own
                let relayed = Message::new(self.id, MessageType::Text, message.body);
                self.registry.broadcast(relayed).await?;
                Ok(Flow::Continue)
            }
            MessageType::Logout => self.logout().await,
            MessageType::Shutdown => {
                info!("Session {} ('{}') requested shutdown", self.id, self.username);
                self.server.shutdown().await;
                Ok(Flow::Drain)
            }
            MessageType::Block => {
                let target = message.body.trim();
                if target.is_empty() {
                    warn!("Session {} sent BLOCK without a user", self.id);
                    return Ok(Flow::Continue);
                }
                if self.blacklist.block(target) {
                    self.publish_blacklist().await?;
                }
                let notice = notices::blocked(&self.username, target);
                self.registry.broadcast(Message::notice(notice)).await?;
                Ok(Flow::Continue)
            }
            MessageType::Unblock => {
                let target = message.body.trim();
                if target.is_empty() {
                    warn!("Session {} sent UNBLOCK without a user", self.id);
                    return Ok(Flow::Continue);
                }
                if self.blacklist.unblock(target) {
                    self.publish_blacklist().await?;
                }
                let notice = notices::unblocked(&self.username, target);
                self.registry.broadcast(Message::notice(notice)).await?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Hand the registry a copy of the blacklist
    ///
    /// Sent on the same channel as broadcasts, so every broadcast queued after
    /// it is filtered with the new set.
    async fn publish_blacklist(&self) -> Result<(), SessionError> {
        self.registry
            .set_blacklist(self.id, self.blacklist.snapshot())
            .await?;
        Ok(())
    }

    /// Leave: announce, acknowledge to the client, close
    async fn logout(&mut self) -> Result<Flow, SessionError> {
        info!("Session {} ('{}') logged out", self.id, self.username);
        self.registry.remove(self.id).await;
        self.registry
            .broadcast(Message::notice(notices::logged_out(&self.username)))
            .await?;
        // The client may already be gone; closing follows either way
        if let Err(e) = self.send(&Message::logout_ack()).await {
            debug!("Session {} missed logout ack: {}", self.id, e);
        }
        Ok(Flow::Close(CloseReason::Logout))
    }

    /// Deliver whatever is queued until the outbox closes
    async fn drain(&mut self, inbox: &mut Inbox) {
        while let Some(message) = inbox.recv().await {
            if let Err(e) = self.on_delivery(Some(message)).await {
                debug!("Session {} stopped draining: {}", self.id, e);
                break;
            }
        }
    }

    /// Enter CLOSED; later calls do nothing
    async fn close(&mut self, reason: CloseReason) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;

        self.registry.remove(self.id).await;
        if reason == CloseReason::Disconnected {
            let notice = Message::notice(notices::disconnected(&self.username));
            if let Err(e) = self.registry.broadcast(notice).await {
                debug!("Disconnect notice for {} not sent: {}", self.id, e);
            }
        }
        let _ = timeout(self.write_timeout, self.sink.close()).await;

        info!("Session {} ('{}') closed ({:?})", self.id, self.username, reason);
    }
}
