//! MCP session management.
//!
//! Manages session lifecycle for MCP Streamable HTTP connections.
//! Sessions are identified by UUID v4 strings and own their handler and
//! SSE transport. The [`SessionRegistry`] is the only owner of the map
//! entry for an identifier and hands sessions out as `Arc<McpSession>`.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handler::McpHandler;
use super::progress::NotificationOutlet;

/// Capacity of the per-session SSE broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Events that can be sent to MCP clients via SSE.
#[derive(Clone, Debug)]
pub enum McpEvent {
    /// A JSON-RPC message to send to the client.
    JsonRpc(String),
}

/// Error type for session registry operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session already exists: {0}")]
    Duplicate(String),

    #[error("Failed to release transport: {0}")]
    Transport(#[from] TransportError),
}

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport already closed")]
    AlreadyClosed,

    #[error("Transport closed")]
    Closed,

    #[error("No SSE subscribers")]
    NoSubscribers,
}

/// Sending half of a session transport.
///
/// Shares the transport's closed flag, so nothing is delivered once the
/// session has been released.
#[derive(Clone, Debug)]
pub struct SessionOutlet {
    event_tx: broadcast::Sender<McpEvent>,
    closed: Arc<AtomicBool>,
}

impl SessionOutlet {
    /// Send an event to all SSE subscribers.
    pub fn send(&self, event: McpEvent) -> Result<usize, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.event_tx
            .send(event)
            .map_err(|_| TransportError::NoSubscribers)
    }
}

/// Server-to-client channel of one session.
///
/// Closing the transport cancels its token, which ends every open SSE
/// stream and every analysis run started from the session.
#[derive(Debug)]
pub struct SessionTransport {
    outlet: SessionOutlet,
    cancel: CancellationToken,
}

impl SessionTransport {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            outlet: SessionOutlet {
                event_tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe to session events for SSE streaming.
    pub fn subscribe(&self) -> broadcast::Receiver<McpEvent> {
        self.outlet.event_tx.subscribe()
    }

    /// Send an event to all SSE subscribers.
    pub fn send(&self, event: McpEvent) -> Result<usize, TransportError> {
        self.outlet.send(event)
    }

    /// Notification outlet writing to this session's SSE subscribers.
    pub fn outlet(&self) -> NotificationOutlet {
        NotificationOutlet::Session(self.outlet.clone())
    }

    /// Token cancelled when the transport closes.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.outlet.closed.load(Ordering::Acquire)
    }

    /// Close the transport. A second close fails with `AlreadyClosed`.
    pub fn close(&self) -> Result<(), TransportError> {
        if self.outlet.closed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::AlreadyClosed);
        }
        self.cancel.cancel();
        Ok(())
    }
}

impl Default for SessionTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closing,
    Closed,
}

/// An MCP session.
pub struct McpSession {
    /// Unique session identifier.
    pub id: String,
    /// When the session was created.
    pub created_at: Instant,
    last_activity: Mutex<Instant>,
    handler: McpHandler,
    transport: SessionTransport,
    request_lock: Arc<tokio::sync::Mutex<()>>,
    state: Mutex<SessionState>,
}

impl McpSession {
    pub fn new(id: impl Into<String>, handler: McpHandler, transport: SessionTransport) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            created_at: now,
            last_activity: Mutex::new(now),
            handler,
            transport,
            request_lock: Arc::new(tokio::sync::Mutex::new(())),
            state: Mutex::new(SessionState::Active),
        }
    }

    pub fn handler(&self) -> &McpHandler {
        &self.handler
    }

    pub fn transport(&self) -> &SessionTransport {
        &self.transport
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Record activity on the session.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Wait for exclusive use of the session for one request.
    ///
    /// The guard is owned so it can move into a background task that
    /// finishes a streamed response.
    pub async fn begin_request(&self) -> OwnedMutexGuard<()> {
        let guard = self.request_lock.clone().lock_owned().await;
        self.touch();
        guard
    }

    /// Whether a request currently holds the session.
    pub fn is_busy(&self) -> bool {
        self.request_lock.try_lock().is_err()
    }

    /// Release the handler and the transport.
    ///
    /// Both releases always run; the session ends `Closed` even when the
    /// transport release fails.
    fn close(&self) -> Result<(), TransportError> {
        *self.state.lock() = SessionState::Closing;
        self.handler.release();
        let result = self.transport.close();
        *self.state.lock() = SessionState::Closed;
        result
    }
}

impl std::fmt::Debug for McpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Outcome of closing every session at shutdown.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub closed: usize,
    pub failed: Vec<(String, SessionError)>,
}

/// Registry of live MCP sessions.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<McpSession>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session.
    ///
    /// Fails if the identifier is already present; the existing entry is
    /// left untouched.
    pub async fn create(
        &self,
        id: &str,
        handler: McpHandler,
        transport: SessionTransport,
    ) -> Result<Arc<McpSession>, SessionError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(id) {
            warn!("Refusing to create duplicate MCP session: {}", id);
            return Err(SessionError::Duplicate(id.to_string()));
        }
        let session = Arc::new(McpSession::new(id, handler, transport));
        sessions.insert(id.to_string(), session.clone());
        info!("Created MCP session: {}", id);
        Ok(session)
    }

    /// Get a session by ID, recording activity on it.
    pub async fn lookup(&self, id: &str) -> Option<Arc<McpSession>> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(id).cloned();
        if let Some(session) = &session {
            session.touch();
        }
        session
    }

    /// Close a session.
    ///
    /// Returns `Ok(false)` when no such session exists. The entry is removed
    /// before the session is released, so it stays removed even when the
    /// release fails.
    pub async fn close(&self, id: &str) -> Result<bool, SessionError> {
        let removed = self.sessions.write().await.remove(id);
        let Some(session) = removed else {
            debug!("Close of unknown MCP session ignored: {}", id);
            return Ok(false);
        };

        session.close()?;
        info!("Closed MCP session: {}", id);
        Ok(true)
    }

    /// Close every session, continuing past individual failures.
    pub async fn close_all(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        for id in self.ids().await {
            match self.close(&id).await {
                Ok(true) => report.closed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to close MCP session {}: {}", id, e);
                    report.failed.push((id, e));
                }
            }
        }
        info!(
            "Closed {} MCP sessions ({} failed)",
            report.closed,
            report.failed.len()
        );
        report
    }

    /// Close sessions idle longer than `max_idle` with no request in flight.
    pub async fn cleanup_stale(&self, max_idle: Duration) -> usize {
        let stale: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| s.idle_for() > max_idle && !s.is_busy())
                .map(|s| s.id.clone())
                .collect()
        };

        let mut closed = 0;
        for id in stale {
            info!("Cleaning up stale MCP session: {}", id);
            match self.close(&id).await {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to close stale MCP session {}: {}", id, e),
            }
        }
        closed
    }

    /// Get the number of active sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::SinkError;
    use crate::test_support::test_state;

    fn handler(id: &str) -> McpHandler {
        McpHandler::new(id, test_state())
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let registry = SessionRegistry::new();
        let session = registry
            .create("abc", handler("abc"), SessionTransport::new())
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Active);
        let found = registry.lookup("abc").await.unwrap();
        assert!(Arc::ptr_eq(&session, &found));
        assert!(registry.lookup("missing").await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_create() {
        let registry = SessionRegistry::new();

        let (first, second) = tokio::join!(
            registry.create("dup", handler("dup"), SessionTransport::new()),
            registry.create("dup", handler("dup"), SessionTransport::new()),
        );

        let (winner, loser) = match (first, second) {
            (Ok(s), Err(e)) | (Err(e), Ok(s)) => (s, e),
            _ => panic!("exactly one create must succeed"),
        };
        assert!(matches!(loser, SessionError::Duplicate(ref id) if id == "dup"));

        let found = registry.lookup("dup").await.unwrap();
        assert!(Arc::ptr_eq(&winner, &found));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let registry = SessionRegistry::new();
        let session = registry
            .create("abc", handler("abc"), SessionTransport::new())
            .await
            .unwrap();

        assert!(registry.close("abc").await.unwrap());
        assert!(!registry.close("abc").await.unwrap());
        assert!(!registry.close("never-existed").await.unwrap());

        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.transport().is_closed());
        assert!(session.transport().cancellation().is_cancelled());
        assert!(registry.lookup("abc").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_release_still_removes_entry() {
        let registry = SessionRegistry::new();
        let transport = SessionTransport::new();
        transport.close().unwrap();
        registry
            .create("abc", handler("abc"), transport)
            .await
            .unwrap();

        let result = registry.close("abc").await;
        assert!(matches!(
            result,
            Err(SessionError::Transport(TransportError::AlreadyClosed))
        ));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_close_all_reports_failures() {
        let registry = SessionRegistry::new();
        for id in ["a", "b", "c"] {
            registry
                .create(id, handler(id), SessionTransport::new())
                .await
                .unwrap();
        }
        let broken = SessionTransport::new();
        broken.close().unwrap();
        registry.create("d", handler("d"), broken).await.unwrap();

        let report = registry.close_all().await;
        assert_eq!(report.closed, 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "d");
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_cleanup_skips_busy_sessions() {
        let registry = SessionRegistry::new();
        registry
            .create("idle", handler("idle"), SessionTransport::new())
            .await
            .unwrap();
        let busy = registry
            .create("busy", handler("busy"), SessionTransport::new())
            .await
            .unwrap();
        let _guard = busy.begin_request().await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let closed = registry.cleanup_stale(Duration::from_millis(5)).await;

        assert_eq!(closed, 1);
        assert_eq!(registry.ids().await, vec!["busy".to_string()]);
    }

    #[tokio::test]
    async fn test_transport_send_after_close_fails() {
        let transport = SessionTransport::new();
        let mut rx = transport.subscribe();

        transport.send(McpEvent::JsonRpc("{}".to_string())).unwrap();
        assert!(matches!(rx.recv().await, Ok(McpEvent::JsonRpc(_))));

        transport.close().unwrap();
        assert!(matches!(
            transport.send(McpEvent::JsonRpc("{}".to_string())),
            Err(TransportError::Closed)
        ));
        assert!(matches!(transport.close(), Err(TransportError::AlreadyClosed)));
    }

    #[tokio::test]
    async fn test_notification_outlet_stops_at_close() {
        let transport = SessionTransport::new();
        let mut rx = transport.subscribe();
        let outlet = transport.outlet();

        outlet
            .notify("notifications/prompts/list_changed", serde_json::json!({}))
            .unwrap();
        assert!(matches!(rx.recv().await, Ok(McpEvent::JsonRpc(_))));

        transport.close().unwrap();
        assert!(matches!(
            outlet.notify("notifications/prompts/list_changed", serde_json::json!({})),
            Err(SinkError::SessionClosed)
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_notification_outlet_without_listeners() {
        let transport = SessionTransport::new();
        assert!(matches!(
            transport.outlet().send(McpEvent::JsonRpc("{}".to_string())),
            Err(SinkError::Disconnected)
        ));
    }
}
