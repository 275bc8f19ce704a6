//! Relay of server-to-client notifications.

use legal_mcp_types::ProgressEvent;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::session::{McpEvent, SessionOutlet, TransportError};
use crate::analysis::{ProgressSink, SinkError};

/// Where notifications produced while handling a request are written.
#[derive(Clone, Debug)]
pub enum NotificationOutlet {
    /// The session's `GET` SSE stream.
    Session(SessionOutlet),
    /// The SSE response of the originating `POST`.
    Stream(mpsc::UnboundedSender<McpEvent>),
}

impl NotificationOutlet {
    /// Serialize and send a JSON-RPC notification.
    pub fn notify(&self, method: &str, params: Value) -> Result<(), SinkError> {
        let message = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.send(McpEvent::JsonRpc(serde_json::to_string(&message)?))
    }

    pub fn send(&self, event: McpEvent) -> Result<(), SinkError> {
        match self {
            NotificationOutlet::Session(outlet) => match outlet.send(event) {
                Ok(_) => Ok(()),
                Err(TransportError::NoSubscribers) => Err(SinkError::Disconnected),
                Err(_) => Err(SinkError::SessionClosed),
            },
            NotificationOutlet::Stream(tx) => tx.send(event).map_err(|_| SinkError::Disconnected),
        }
    }
}

/// Per-request context handed to the session handler.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub outlet: NotificationOutlet,
    /// Session-wide token, cancelled when the session closes.
    pub cancel: CancellationToken,
}

/// Relays analysis progress as `notifications/progress` messages.
///
/// Without a progress token the caller did not ask for progress and every
/// event is dropped.
pub struct NotificationSink {
    token: Option<Value>,
    counter: AtomicU64,
    outlet: NotificationOutlet,
    session_cancel: CancellationToken,
}

impl NotificationSink {
    pub fn new(token: Option<Value>, context: &RequestContext) -> Self {
        Self {
            token,
            counter: AtomicU64::new(0),
            outlet: context.outlet.clone(),
            session_cancel: context.cancel.clone(),
        }
    }
}

impl ProgressSink for NotificationSink {
    fn emit(&self, event: &ProgressEvent) -> Result<(), SinkError> {
        let Some(token) = &self.token else {
            return Ok(());
        };
        if self.session_cancel.is_cancelled() {
            return Err(SinkError::SessionClosed);
        }

        let progress = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Progress {} for token {}", progress, token);
        self.outlet.notify(
            "notifications/progress",
            json!({
                "progressToken": token,
                "progress": progress,
                "message": event.description(),
            }),
        )
    }
}
