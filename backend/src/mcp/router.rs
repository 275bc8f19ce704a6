//! Session routing for inbound MCP requests.

use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::handler::{JsonRpcRequest, McpHandler, INTERNAL_ERROR};
use super::session::{McpSession, SessionError, SessionRegistry, SessionTransport};
use crate::state::AppState;

/// JSON-RPC code for requests that cannot be routed to a session.
pub const BAD_REQUEST: i32 = -32000;
/// JSON-RPC code for an unknown session identifier.
pub const UNKNOWN_SESSION: i32 = -32001;

/// Error type for request routing.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Bad request: unable to route MCP POST")]
    BadRequest,

    #[error("Unknown session")]
    UnknownSession(String),

    #[error("Internal server error")]
    Internal(#[from] SessionError),
}

impl RouteError {
    /// JSON-RPC error code for this rejection.
    pub fn code(&self) -> i32 {
        match self {
            RouteError::BadRequest => BAD_REQUEST,
            RouteError::UnknownSession(_) => UNKNOWN_SESSION,
            RouteError::Internal(_) => INTERNAL_ERROR,
        }
    }
}

/// The session a request was routed to.
#[derive(Debug)]
pub enum Routed {
    Existing(Arc<McpSession>),
    /// Created for this initialization request.
    Created(Arc<McpSession>),
}

impl Routed {
    pub fn session(&self) -> &Arc<McpSession> {
        match self {
            Routed::Existing(session) | Routed::Created(session) => session,
        }
    }
}

/// Whether `request` may open a new session.
pub fn is_initialize_request(request: &JsonRpcRequest) -> bool {
    request.jsonrpc == "2.0"
        && request.method == "initialize"
        && request.id.is_some()
        && request.params.as_ref().is_some_and(|p| p.is_object())
}

/// Matches requests to sessions, creating one on initialization.
#[derive(Clone)]
pub struct McpRouter {
    registry: SessionRegistry,
    state: AppState,
}

impl McpRouter {
    pub fn new(registry: SessionRegistry, state: AppState) -> Self {
        Self { registry, state }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Route a request by its `Mcp-Session-Id`.
    pub async fn route(
        &self,
        session_id: Option<&str>,
        request: &JsonRpcRequest,
    ) -> Result<Routed, RouteError> {
        if let Some(id) = session_id {
            if let Some(session) = self.registry.lookup(id).await {
                return Ok(Routed::Existing(session));
            }
        }

        if is_initialize_request(request) {
            if let Some(id) = session_id {
                debug!("Initialize with unknown session {}, creating a new one", id);
            }
            return self.create_session().await.map(Routed::Created);
        }

        match session_id {
            Some(id) => {
                debug!("Rejecting {} for unknown session {}", request.method, id);
                Err(RouteError::UnknownSession(id.to_string()))
            }
            None => {
                debug!("Rejecting {} without session", request.method);
                Err(RouteError::BadRequest)
            }
        }
    }

    async fn create_session(&self) -> Result<Arc<McpSession>, RouteError> {
        let id = Uuid::new_v4().to_string();
        let handler = McpHandler::new(&id, self.state.clone());
        match self
            .registry
            .create(&id, handler, SessionTransport::new())
            .await
        {
            Ok(session) => {
                info!("MCP: New session initialized: {}", id);
                Ok(session)
            }
            Err(e) => {
                error!("MCP: Failed to create session: {}", e);
                Err(e.into())
            }
        }
    }
}
