//! Session registry: the process-wide table of live sessions.
//!
//! The registry is responsible for:
//! - Creating sessions and associating them with channels
//! - Starting, stopping and cleaning up sessions
//! - Retaining sessions across disconnects so a client can resume
//! - Sweeping sessions that stay detached for too long
//! - Graceful shutdown

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::agent::AgentRegistry;
use crate::notify::Channel;

use super::conversation::{Lifecycle, Session, SessionConfig, SessionMetadata, StartOptions};
use super::error::SessionError;

/// Prefix for generated session ids.
pub const SESSION_ID_PREFIX: &str = "session_";

// ============================================================================
// Session Registry
// ============================================================================

/// Lookup tables guarded together so they never disagree.
#[derive(Default)]
struct RegistryTables {
    sessions: HashMap<String, Arc<Session>>,
    /// Channel id -> session id.
    channels: HashMap<String, String>,
    /// Session id -> when it lost its channel.
    detached_at: HashMap<String, Instant>,
}

impl RegistryTables {
    /// Associate `channel_id` with `session_id`, dropping stale associations.
    fn bind(&mut self, channel_id: &str, session_id: &str) -> Option<String> {
        self.channels.retain(|_, sid| sid != session_id);
        self.detached_at.remove(session_id);
        self.channels
            .insert(channel_id.to_string(), session_id.to_string())
            .filter(|previous| previous != session_id)
    }
}

/// Registry of live sessions. Cheap to clone.
#[derive(Clone)]
pub struct SessionRegistry {
    // Lock is never held across .await points.
    tables: Arc<Mutex<RegistryTables>>,
    agents: Arc<dyn AgentRegistry>,
    config: SessionConfig,
    sweeper: Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SessionRegistry {
    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    pub fn new(agents: Arc<dyn AgentRegistry>, config: SessionConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            tables: Arc::new(Mutex::new(RegistryTables::default())),
            agents,
            config,
            sweeper: Arc::new(tokio::sync::Mutex::new(None)),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Agent registry used to materialize runtimes.
    pub fn agents(&self) -> &Arc<dyn AgentRegistry> {
        &self.agents
    }

    /// Stop the sweeper, then stop and clean up every session.
    pub async fn shutdown(&self) {
        info!("Shutting down session registry");

        if self.shutdown_tx.send(true).is_err() {
            debug!("No shutdown listeners");
        }
        let sweeper = self.sweeper.lock().await.take();
        if let Some(handle) = sweeper
            && let Err(e) = handle.await
        {
            warn!(error = ?e, "Sweeper task panicked during shutdown");
        }

        let ids: Vec<String> = {
            let tables = self.tables.lock().expect("registry lock poisoned");
            tables.sessions.keys().cloned().collect()
        };
        for id in ids {
            self.stop_session(&id).await;
            self.cleanup_session(&id);
        }

        info!("Session registry shutdown complete");
    }

    // ------------------------------------------------------------------------
    // Core API
    // ------------------------------------------------------------------------

    /// Allocate a session in `Created` state, optionally bound to `channel`.
    pub fn create_session(&self, channel: Option<&Arc<dyn Channel>>) -> String {
        let id = format!("{}{}", SESSION_ID_PREFIX, Ulid::new());
        let session = Arc::new(Session::new(id.clone(), self.config.clone()));

        let displaced = {
            let mut tables = self.tables.lock().expect("registry lock poisoned");
            tables.sessions.insert(id.clone(), session.clone());
            if channel.is_none() {
                // Never attached counts as detached, so the sweeper can reclaim it.
                tables.detached_at.insert(id.clone(), Instant::now());
            }
            channel.and_then(|ch| tables.bind(ch.id(), &id).map(|prev| (prev, ch.id())))
        };
        if let Some(channel) = channel {
            session.attach_channel(channel);
        }
        if let Some((previous, channel_id)) = displaced {
            self.mark_detached(&previous, channel_id);
        }

        info!(session_id = %id, "Session created");
        id
    }

    /// Look up a session. Absence is not an error.
    pub fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        let tables = self.tables.lock().expect("registry lock poisoned");
        tables.sessions.get(id).cloned()
    }

    /// Reverse lookup through the channel association.
    pub fn get_session_by_channel(&self, channel_id: &str) -> Option<Arc<Session>> {
        let tables = self.tables.lock().expect("registry lock poisoned");
        tables
            .channels
            .get(channel_id)
            .and_then(|sid| tables.sessions.get(sid))
            .cloned()
    }

    /// Transition `Created -> Started`.
    ///
    /// If the requested agent cannot be materialized the session is treated as
    /// fatally failed: an `Error` status is emitted, the flush grace elapses,
    /// and the session is stopped and cleaned up.
    pub async fn start_session(&self, id: &str, options: StartOptions) -> Result<(), SessionError> {
        let session = self
            .get_session(id)
            .ok_or_else(|| SessionError::InvalidState(format!("session not found: {id}")))?;

        match session.start(self.agents.as_ref(), options).await {
            Ok(()) => Ok(()),
            Err(e @ SessionError::AgentNotFound(_)) => {
                warn!(session_id = %id, error = %e, "Session failed to start");
                session.report_fatal(&e.to_string()).await;
                self.stop_session(id).await;
                self.cleanup_session(id);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Transition to `Stopped`. Idempotent; unknown ids are a no-op.
    pub async fn stop_session(&self, id: &str) {
        match self.get_session(id) {
            Some(session) => {
                session.stop().await;
            }
            None => debug!(session_id = %id, "Stop requested for unknown session"),
        }
    }

    /// Release all runtime state and forget the session.
    ///
    /// Never fails; problems are logged so the tables stay consistent.
    pub fn cleanup_session(&self, id: &str) {
        let session = {
            let mut tables = self.tables.lock().expect("registry lock poisoned");
            tables.channels.retain(|_, sid| sid != id);
            tables.detached_at.remove(id);
            tables.sessions.remove(id)
        };

        let Some(session) = session else {
            debug!(session_id = %id, "Cleanup requested for unknown session");
            return;
        };

        if session.lifecycle() != Lifecycle::Stopped {
            warn!(session_id = %id, "Cleaning up a session that was not stopped");
        }
        session.detach_channel();
        session.release();
        info!(session_id = %id, "Session cleaned up");
    }

    /// Metadata for every registered session.
    pub fn list(&self) -> Vec<SessionMetadata> {
        let sessions: Vec<Arc<Session>> = {
            let tables = self.tables.lock().expect("registry lock poisoned");
            tables.sessions.values().cloned().collect()
        };
        sessions.iter().map(|s| s.metadata()).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.lock().expect("registry lock poisoned").sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------------

    /// Re-associate a retained session with a new channel.
    pub fn attach_channel(
        &self,
        id: &str,
        channel: &Arc<dyn Channel>,
    ) -> Result<Arc<Session>, SessionError> {
        let (session, displaced) = {
            let mut tables = self.tables.lock().expect("registry lock poisoned");
            let session = tables
                .sessions
                .get(id)
                .cloned()
                .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))?;
            if session.lifecycle() == Lifecycle::Stopped {
                return Err(SessionError::InvalidState("session is stopped".into()));
            }
            let displaced = tables.bind(channel.id(), id);
            (session, displaced)
        };

        session.attach_channel(channel);
        if let Some(previous) = displaced {
            self.mark_detached(&previous, channel.id());
        }

        info!(session_id = %id, channel_id = %channel.id(), "Channel attached");
        Ok(session)
    }

    /// Drop the association for a closed channel.
    ///
    /// The session is retained (so a reconnect can resume it) but its channel
    /// reference is cleared. Returns the affected session id.
    pub fn detach_channel(&self, channel_id: &str) -> Option<String> {
        let session = {
            let mut tables = self.tables.lock().expect("registry lock poisoned");
            let session_id = tables.channels.remove(channel_id)?;
            tables.detached_at.insert(session_id.clone(), Instant::now());
            tables.sessions.get(&session_id).cloned()
        };

        let session = session?;
        // A resume may already have pointed the notifier elsewhere.
        if session.notifier().channel_id().as_deref() == Some(channel_id) {
            session.detach_channel();
        }
        info!(session_id = %session.id(), channel_id = %channel_id, "Channel detached, session retained");
        Some(session.id().to_string())
    }

    /// Record that `session_id` lost `channel_id` to another session.
    fn mark_detached(&self, session_id: &str, channel_id: &str) {
        let session = {
            let mut tables = self.tables.lock().expect("registry lock poisoned");
            tables.detached_at.insert(session_id.to_string(), Instant::now());
            tables.sessions.get(session_id).cloned()
        };
        if let Some(session) = session
            && session.notifier().channel_id().as_deref() == Some(channel_id)
        {
            session.detach_channel();
        }
    }

    // ------------------------------------------------------------------------
    // Disconnect sweep
    // ------------------------------------------------------------------------

    /// Stop and clean up sessions detached for longer than `timeout`.
    ///
    /// Returns the ids that were swept.
    pub async fn sweep_detached(&self, timeout: Duration) -> Vec<String> {
        let expired: Vec<String> = {
            let tables = self.tables.lock().expect("registry lock poisoned");
            tables
                .detached_at
                .iter()
                .filter(|(_, since)| since.elapsed() > timeout)
                .map(|(id, _)| id.clone())
                .collect()
        };

        for id in &expired {
            info!(session_id = %id, "Sweeping session after prolonged disconnect");
            self.stop_session(id).await;
            self.cleanup_session(id);
        }
        expired
    }

    /// Spawn the background sweeper. It exits on `shutdown()`.
    pub async fn spawn_sweeper(&self, interval: Duration, timeout: Duration) {
        let registry = self.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // skip immediate tick
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        registry.sweep_detached(timeout).await;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("Session sweeper stopped");
        });

        let mut sweeper = self.sweeper.lock().await;
        if let Some(previous) = sweeper.replace(handle) {
            previous.abort();
        }
        info!(
            interval_seconds = interval.as_secs(),
            timeout_seconds = timeout.as_secs(),
            "Session sweeper started"
        );
    }
}
