//! The hub: live session registry, dedup window, and fan-out.
//!
//! All hub state is owned by a single task. Connections talk to it only by
//! sending [`HubCommand`]s through a [`HubHandle`]; commands are handled one
//! at a time in arrival order, so registration, removal and broadcast never
//! race and no lock guards the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use courier_common::Envelope;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::recent::RecentIds;
use super::session::Session;

/// Capacity of the command queue feeding the hub task.
const COMMAND_CAPACITY: usize = 1024;

/// Requests the hub task serves.
#[derive(Debug)]
pub enum HubCommand {
    Register(Session),
    Deregister(String),
    Broadcast {
        envelope: Arc<Envelope>,
        sender: Option<String>,
    },
}

/// What happened to a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// The id was in the recency window; nothing was sent.
    Duplicate,
    /// The sending session is no longer registered; nothing was sent.
    SenderGone,
    /// Enqueued on `delivered` sessions; `shed` sessions were dropped because
    /// their queue was full or gone.
    Sent { delivered: usize, shed: usize },
}

pub struct Hub {
    sessions: HashMap<String, Session>,
    recent: RecentIds,
    /// Mirror of `sessions.len()` for readers outside the hub task. Only the
    /// hub writes it.
    live: Arc<AtomicUsize>,
}

impl Hub {
    pub fn new(recent_window: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            recent: RecentIds::new(recent_window),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Start the hub task and return a handle to it.
    ///
    /// The task stops once every handle has been dropped.
    pub fn spawn(recent_window: usize) -> HubHandle {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let hub = Self::new(recent_window);
        let live = hub.live.clone();
        tokio::spawn(hub.run(rx));
        HubHandle { tx, live }
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<HubCommand>) {
        tracing::debug!("hub started");
        while let Some(command) = commands.recv().await {
            self.handle(command);
            self.live.store(self.sessions.len(), Ordering::Relaxed);
        }
        tracing::info!(sessions = self.sessions.len(), "hub stopped");
        self.sessions.clear();
        self.live.store(0, Ordering::Relaxed);
    }

    pub fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register(session) => self.register(session),
            HubCommand::Deregister(session_id) => {
                self.deregister(&session_id);
            }
            HubCommand::Broadcast { envelope, sender } => {
                self.broadcast(envelope, sender.as_deref());
            }
        }
    }

    pub fn register(&mut self, session: Session) {
        tracing::debug!(session_id = %session.id(), "session registered");
        self.sessions.insert(session.id().to_string(), session);
    }

    /// Remove a session, closing its outbound queue. Returns `false` if it
    /// was not registered.
    pub fn deregister(&mut self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id).is_some();
        if removed {
            tracing::debug!(%session_id, "session deregistered");
        }
        removed
    }

    /// Fan `envelope` out to every session except `sender`, unless its id was
    /// seen recently.
    ///
    /// A `sender` the hub no longer knows (already shed or deregistered) is
    /// ignored. Never blocks: a session whose queue is full is shed on the
    /// spot and delivery continues with the rest.
    pub fn broadcast(
        &mut self,
        envelope: Arc<Envelope>,
        sender: Option<&str>,
    ) -> BroadcastOutcome {
        if let Some(session_id) = sender.filter(|id| !self.sessions.contains_key(*id)) {
            tracing::debug!(
                %session_id,
                envelope_id = %envelope.id(),
                "ignoring envelope from unregistered session"
            );
            return BroadcastOutcome::SenderGone;
        }

        if !self.recent.insert(envelope.id()) {
            tracing::debug!(envelope_id = %envelope.id(), "duplicate envelope suppressed");
            return BroadcastOutcome::Duplicate;
        }

        let mut delivered = 0;
        let mut dropped = Vec::new();
        for (session_id, session) in &self.sessions {
            if sender == Some(session_id.as_str()) {
                continue;
            }
            match session.try_enqueue(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(%session_id, "outbound queue full, dropping slow session");
                    dropped.push(session_id.clone());
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(%session_id, "outbound queue closed, dropping session");
                    dropped.push(session_id.clone());
                }
            }
        }

        for session_id in &dropped {
            if let Some(session) = self.sessions.remove(session_id) {
                session.shed();
            }
        }

        tracing::trace!(
            envelope_id = %envelope.id(),
            source_id = %envelope.source_id(),
            delivered,
            shed = dropped.len(),
            "envelope broadcast"
        );

        BroadcastOutcome::Sent {
            delivered,
            shed: dropped.len(),
        }
    }

    #[cfg(test)]
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Cloneable entry point to a running hub. Store in `AppState`.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
    live: Arc<AtomicUsize>,
}

impl HubHandle {
    /// Number of registered sessions as of the last command the hub handled.
    pub fn session_count(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub async fn register(&self, session: Session) {
        self.send(HubCommand::Register(session)).await;
    }

    pub async fn deregister(&self, session_id: &str) {
        self.send(HubCommand::Deregister(session_id.to_string())).await;
    }

    /// Submit an envelope for fan-out. `sender` is the originating session,
    /// which never gets its own message back from the hub.
    pub async fn broadcast(&self, envelope: Envelope, sender: Option<&str>) {
        self.send(HubCommand::Broadcast {
            envelope: Arc::new(envelope),
            sender: sender.map(str::to_string),
        })
        .await;
    }

    async fn send(&self, command: HubCommand) {
        if self.tx.send(command).await.is_err() {
            tracing::warn!("hub task is not running, command dropped");
        }
    }
}
