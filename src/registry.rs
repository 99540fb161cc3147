//! Registry actor implementation
//!
//! The central actor that owns the roster of live sessions. Every membership
//! change, every blacklist update and every broadcast goes through one command
//! channel, so a broadcast always iterates a roster that nothing else is
//! mutating and sees each blacklist exactly as it stood at that moment.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::message::Message;
use crate::types::{SessionId, Username};

/// Outbound queue of a session
///
/// Bounded; a session that lets it fill up is evicted instead of stalling
/// the broadcast.
pub type Outbox = mpsc::Sender<Message>;

/// Commands sent from sessions and the server to the registry actor
#[derive(Debug)]
pub enum RegistryCommand {
    /// Admit a session and assign it an id
    Register {
        username: Username,
        outbox: Outbox,
        reply: oneshot::Sender<Result<SessionId, RegistryError>>,
    },
    /// Drop a session (no-op if absent)
    Remove {
        id: SessionId,
    },
    /// Replace the registry's copy of a session's blacklist
    SetBlacklist {
        id: SessionId,
        blocked: HashSet<String>,
    },
    /// Fan a message out to every registered session
    Broadcast {
        message: Message,
    },
    /// Notify and drop every session, refuse further registrations
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    /// Report how many sessions are registered
    Count {
        reply: oneshot::Sender<usize>,
    },
}

/// Registry entry for one live session
#[derive(Debug)]
struct Entry {
    username: Username,
    outbox: Outbox,
    /// Usernames this session has blocked, as last published by it
    blocked: HashSet<String>,
}

/// The registry actor
///
/// Ids are handed out in increasing order and never reused.
pub struct Registry {
    /// Live sessions: SessionId -> Entry
    sessions: HashMap<SessionId, Entry>,
    /// Next id to assign, None once exhausted
    next_id: Option<SessionId>,
    /// Set by the first shutdown
    closed: bool,
    /// Command receiver channel
    receiver: mpsc::Receiver<RegistryCommand>,
}

impl Registry {
    /// Create a new Registry with the given command receiver
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>) -> Self {
        Self {
            sessions: HashMap::new(),
            next_id: Some(SessionId::FIRST),
            closed: false,
            receiver,
        }
    }

    /// Start a registry actor and return a handle to it
    pub fn spawn(buffer: usize) -> RegistryHandle {
        let (tx, rx) = mpsc::channel(buffer);
        tokio::spawn(Registry::new(rx).run());
        RegistryHandle { sender: tx }
    }

    /// Run the Registry event loop
    ///
    /// Continuously receives and processes commands until all handles are dropped.
    pub async fn run(mut self) {
        debug!("Registry started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        debug!("Registry stopped");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                username,
                outbox,
                reply,
            } => {
                let result = self.handle_register(username, outbox);
                let _ = reply.send(result);
            }
            RegistryCommand::Remove { id } => {
                self.handle_remove(id);
            }
            RegistryCommand::SetBlacklist { id, blocked } => {
                self.handle_set_blacklist(id, blocked);
            }
            RegistryCommand::Broadcast { message } => {
                self.handle_broadcast(message);
            }
            RegistryCommand::Shutdown { reply } => {
                self.handle_shutdown();
                let _ = reply.send(());
            }
            RegistryCommand::Count { reply } => {
                let _ = reply.send(self.sessions.len());
            }
        }
    }

    /// Handle session admission
    fn handle_register(&mut self, username: Username, outbox: Outbox) -> Result<SessionId, RegistryError> {
        if self.closed {
            return Err(RegistryError::Closed);
        }

        let id = self.next_id.ok_or(RegistryError::IdsExhausted)?;
        self.next_id = id.next();

        info!("Session {} registered as '{}'", id, username);
        self.sessions.insert(
            id,
            Entry {
                username,
                outbox,
                blocked: HashSet::new(),
            },
        );
        debug!("Total sessions: {}", self.sessions.len());

        Ok(id)
    }

    /// Handle session removal
    fn handle_remove(&mut self, id: SessionId) {
        if self.sessions.remove(&id).is_some() {
            info!("Session {} removed", id);
            debug!("Total sessions: {}", self.sessions.len());
        }
    }

    /// Handle a blacklist update; later broadcasts see the new set
    fn handle_set_blacklist(&mut self, id: SessionId, blocked: HashSet<String>) {
        match self.sessions.get_mut(&id) {
            Some(entry) => {
                debug!("Session {} now blocks {} user(s)", id, blocked.len());
                entry.blocked = blocked;
            }
            None => debug!("Blacklist update for unknown session {}", id),
        }
    }

    /// Handle fan-out to every registered session
    ///
    /// Recipients that have blocked the sender's username are skipped. Notices
    /// have no sender name and reach everyone. A closed outbox means the
    /// session has ended and a full one means it stopped keeping up; either
    /// way the entry is dropped here and delivery to the others continues.
    fn handle_broadcast(&mut self, message: Message) {
        let sender_name = if message.is_notice() {
            None
        } else {
            self.sessions
                .get(&message.sender_id)
                .map(|entry| entry.username.clone())
        };

        let mut dropped = Vec::new();
        for (id, entry) in &self.sessions {
            if let Some(name) = &sender_name {
                if entry.blocked.contains(&**name) {
                    debug!("Session {} has blocked '{}', skipping", id, name);
                    continue;
                }
            }

            match entry.outbox.try_send(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("Session {} outbox full, evicting slow consumer", id);
                    dropped.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("Session {} outbox closed, dropping it", id);
                    dropped.push(*id);
                }
            }
        }

        for id in dropped {
            self.sessions.remove(&id);
        }
    }

    /// Handle global shutdown
    fn handle_shutdown(&mut self) {
        if self.closed {
            debug!("Registry already shut down");
            return;
        }
        self.closed = true;

        info!("Shutting down {} session(s)", self.sessions.len());
        for (id, entry) in self.sessions.drain() {
            if let Err(TrySendError::Full(_)) = entry.outbox.try_send(Message::shutdown_notice()) {
                warn!("Session {} outbox full, shutdown notice not queued", id);
            }
            // Dropping the entry closes the outbox once the notice is read
        }
    }
}

/// Cloneable handle used to talk to the registry actor
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Admit a session, returning its fresh id
    pub async fn register(&self, username: Username, outbox: Outbox) -> Result<SessionId, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.command(RegistryCommand::Register {
            username,
            outbox,
            reply,
        })
        .await?;
        rx.await.map_err(|_| RegistryError::Closed)?
    }

    /// Remove a session; removing an absent id is a no-op
    pub async fn remove(&self, id: SessionId) {
        let _ = self.command(RegistryCommand::Remove { id }).await;
    }

    /// Publish a session's blacklist
    ///
    /// Takes effect for every broadcast queued after this call returns.
    pub async fn set_blacklist(&self, id: SessionId, blocked: HashSet<String>) -> Result<(), RegistryError> {
        self.command(RegistryCommand::SetBlacklist { id, blocked }).await
    }

    /// Queue a message for every registered session
    pub async fn broadcast(&self, message: Message) -> Result<(), RegistryError> {
        self.command(RegistryCommand::Broadcast { message }).await
    }

    /// Send the shutdown notice to every session and close the roster
    ///
    /// Only the first call has an effect.
    pub async fn shutdown(&self) -> Result<(), RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.command(RegistryCommand::Shutdown { reply }).await?;
        rx.await.map_err(|_| RegistryError::Closed)
    }

    /// Number of registered sessions
    pub async fn session_count(&self) -> Result<usize, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.command(RegistryCommand::Count { reply }).await?;
        rx.await.map_err(|_| RegistryError::Closed)
    }

    async fn command(&self, cmd: RegistryCommand) -> Result<(), RegistryError> {
        self.sender.send(cmd).await.map_err(|_| RegistryError::Closed)
    }
}

#[cfg(test)]
impl RegistryHandle {
    /// Handle over a bare channel, for driving sessions against a scripted registry
    pub(crate) fn from_sender(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::task::JoinSet;

    fn outbox() -> (Outbox, mpsc::Receiver<Message>) {
        mpsc::channel(64)
    }

    fn text(from: SessionId, body: &str) -> Message {
        Message::new(from, MessageType::Text, body)
    }

    fn blocking(names: &[&str]) -> HashSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn test_ids_are_monotonic_and_not_reused() {
        let registry = Registry::spawn(16);
        let (tx1, _rx1) = outbox();
        let (tx2, _rx2) = outbox();
        let (tx3, _rx3) = outbox();

        let a = registry.register("alice".into(), tx1).await.unwrap();
        let b = registry.register("bob".into(), tx2).await.unwrap();
        assert_eq!(a, SessionId(1));
        assert_eq!(b, SessionId(2));

        registry.remove(b).await;
        let c = registry.register("carol".into(), tx3).await.unwrap();
        assert_eq!(c, SessionId(3));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let registry = Registry::spawn(16);
        let (tx1, mut rx1) = outbox();
        let (tx2, mut rx2) = outbox();

        let a = registry.register("alice".into(), tx1).await.unwrap();
        registry.register("bob".into(), tx2).await.unwrap();

        registry.broadcast(text(a, "hi")).await.unwrap();

        for rx in [&mut rx1, &mut rx2] {
            let message = rx.recv().await.unwrap();
            assert_eq!(message.body, "hi");
            assert_eq!(message.sender_id, a);
        }
    }

    #[tokio::test]
    async fn test_blacklist_applies_at_broadcast_time() {
        let registry = Registry::spawn(16);
        let (tx1, mut rx1) = outbox();
        let (tx2, mut rx2) = outbox();

        let a = registry.register("alice".into(), tx1).await.unwrap();
        let b = registry.register("bob".into(), tx2).await.unwrap();

        registry.broadcast(text(b, "before")).await.unwrap();
        registry.set_blacklist(a, blocking(&["bob"])).await.unwrap();
        registry.broadcast(text(b, "while blocked")).await.unwrap();
        registry.set_blacklist(a, HashSet::new()).await.unwrap();
        registry.broadcast(text(b, "after")).await.unwrap();

        // Nothing was read until now: alice's queue holds exactly what was
        // allowed when each broadcast ran, regardless of the later unblock
        assert_eq!(rx1.recv().await.unwrap().body, "before");
        assert_eq!(rx1.recv().await.unwrap().body, "after");
        assert!(matches!(rx1.try_recv(), Err(TryRecvError::Empty)));

        for body in ["before", "while blocked", "after"] {
            assert_eq!(rx2.recv().await.unwrap().body, body);
        }
    }

    #[tokio::test]
    async fn test_notices_ignore_blacklists() {
        let registry = Registry::spawn(16);
        let (tx, mut rx) = outbox();
        let a = registry.register("alice".into(), tx).await.unwrap();
        registry.set_blacklist(a, blocking(&["alice", "server"])).await.unwrap();

        registry.broadcast(Message::notice("hello")).await.unwrap();

        let message = rx.recv().await.unwrap();
        assert!(message.is_notice());
        assert_eq!(message.body, "hello");
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = Registry::spawn(16);
        let (tx, mut rx) = outbox();
        let id = registry.register("alice".into(), tx).await.unwrap();

        registry.remove(id).await;
        registry.remove(id).await;
        registry.remove(SessionId(99)).await;
        registry.set_blacklist(id, blocking(&["bob"])).await.unwrap();

        assert_eq!(registry.session_count().await.unwrap(), 0);
        registry.broadcast(Message::notice("late")).await.unwrap();
        // Registry dropped its sender, so the outbox is closed and empty
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dead_outbox_does_not_stop_fan_out() {
        let registry = Registry::spawn(16);
        let (tx1, rx1) = outbox();
        let (tx2, mut rx2) = outbox();

        let a = registry.register("alice".into(), tx1).await.unwrap();
        registry.register("bob".into(), tx2).await.unwrap();
        drop(rx1);

        registry.broadcast(text(a, "still here")).await.unwrap();

        assert_eq!(rx2.recv().await.unwrap().body, "still here");
        assert_eq!(registry.session_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_full_outbox_evicts_only_that_session() {
        let registry = Registry::spawn(16);
        let (slow_tx, mut slow_rx) = mpsc::channel(2);
        let (tx, mut rx) = outbox();

        registry.register("slow".into(), slow_tx).await.unwrap();
        let a = registry.register("alice".into(), tx).await.unwrap();

        for i in 0..5 {
            registry.broadcast(text(a, &i.to_string())).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(rx.recv().await.unwrap().body, i.to_string());
        }
        assert_eq!(registry.session_count().await.unwrap(), 1);

        // The slow session keeps what fit, then its inbox ends
        assert_eq!(slow_rx.recv().await.unwrap().body, "0");
        assert_eq!(slow_rx.recv().await.unwrap().body, "1");
        assert!(slow_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_per_sender_order_is_preserved() {
        let registry = Registry::spawn(16);
        let (tx1, _rx1) = outbox();
        let (tx2, mut rx2) = outbox();

        let a = registry.register("alice".into(), tx1).await.unwrap();
        registry.register("bob".into(), tx2).await.unwrap();

        for i in 0..10 {
            registry.broadcast(text(a, &i.to_string())).await.unwrap();
        }
        for i in 0..10 {
            assert_eq!(rx2.recv().await.unwrap().body, i.to_string());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_churn_during_broadcasts_never_skips_a_registered_session() {
        const ROUNDS: usize = 200;
        let registry = Registry::spawn(64);

        let mut steady = Vec::new();
        for i in 0..3 {
            let (tx, rx) = mpsc::channel(ROUNDS + 16);
            registry.register(format!("steady{}", i).into(), tx).await.unwrap();
            steady.push(rx);
        }

        let broadcaster = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for i in 0..ROUNDS {
                    registry.broadcast(Message::notice(i.to_string())).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut churners = JoinSet::new();
        for task in 0..8 {
            let registry = registry.clone();
            churners.spawn(async move {
                for round in 0..20 {
                    let (tx, mut rx) = mpsc::channel(ROUNDS + 16);
                    let name = format!("churn{}-{}", task, round);
                    let id = registry.register(name.into(), tx).await.unwrap();
                    tokio::task::yield_now().await;
                    registry.remove(id).await;

                    // Everything broadcast between register and remove, no gaps
                    let mut seen = Vec::new();
                    while let Some(message) = rx.recv().await {
                        seen.push(message.body.parse::<usize>().unwrap());
                    }
                    assert!(
                        seen.windows(2).all(|pair| pair[1] == pair[0] + 1),
                        "gap in {:?}",
                        seen
                    );
                }
            });
        }

        while let Some(joined) = churners.join_next().await {
            joined.unwrap();
        }
        broadcaster.await.unwrap();

        // Registered before the first broadcast, so they see every one
        for mut rx in steady {
            for i in 0..ROUNDS {
                assert_eq!(rx.recv().await.unwrap().body, i.to_string());
            }
        }
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let registry = Registry::spawn(16);
        let (tx1, mut rx1) = outbox();
        let (tx2, mut rx2) = outbox();
        registry.register("alice".into(), tx1).await.unwrap();
        registry.register("bob".into(), tx2).await.unwrap();

        registry.shutdown().await.unwrap();
        registry.shutdown().await.unwrap();

        for rx in [&mut rx1, &mut rx2] {
            let message = rx.recv().await.unwrap();
            assert_eq!(message.kind, MessageType::Shutdown);
            // Exactly one notice, then the outbox is closed
            assert!(rx.recv().await.is_none());
        }
    }

    #[tokio::test]
    async fn test_register_after_shutdown_fails() {
        let registry = Registry::spawn(16);
        registry.shutdown().await.unwrap();

        let (tx, mut rx) = outbox();
        let result = registry.register("late".into(), tx).await;
        assert!(matches!(result, Err(RegistryError::Closed)));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
    }
}
