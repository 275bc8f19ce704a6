//! MCP Streamable HTTP endpoint handlers.
//!
//! ## Endpoints
//!
//! - `POST /mcp` - Send JSON-RPC requests (returns JSON or SSE)
//! - `GET /mcp` - Open SSE stream for server-initiated messages
//! - `DELETE /mcp` - Terminate a session

use axum::{
    body::Bytes,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Extension, Json,
};
use futures::StreamExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{BroadcastStream, UnboundedReceiverStream};
use tracing::{debug, error, info, warn};

use crate::auth::AuthConfig;
use crate::mcp::handler::{INVALID_REQUEST, PARSE_ERROR};
use crate::mcp::{
    JsonRpcRequest, JsonRpcResponse, McpEvent, McpRouter, McpSession, NotificationOutlet,
    RequestContext, RouteError, SessionState,
};

/// Header name for MCP session ID.
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// Origins allowed to call the MCP endpoint; empty allows any.
#[derive(Clone, Debug, Default)]
pub struct AllowedOrigins(Vec<String>);

impl AllowedOrigins {
    pub fn new(origins: Vec<String>) -> Self {
        Self(origins)
    }

    /// Validate the Origin header for DNS rebinding protection.
    ///
    /// Requests without an Origin header (non-browser clients) are accepted.
    fn permits(&self, headers: &HeaderMap) -> bool {
        if self.0.is_empty() {
            return true;
        }
        match headers.get(header::ORIGIN).map(|o| o.to_str()) {
            None => true,
            Some(Ok(origin)) if self.0.iter().any(|o| o == origin) => true,
            Some(origin) => {
                warn!("Rejecting MCP request from origin: {:?}", origin);
                false
            }
        }
    }
}

/// Extract session ID from headers.
fn get_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Whether the client accepts an SSE response.
fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"))
}

/// Authentication and origin checks shared by all MCP endpoints.
#[allow(clippy::result_large_err)]
fn check_access(
    auth_config: &AuthConfig,
    origins: &AllowedOrigins,
    headers: &HeaderMap,
) -> Result<(), Response> {
    if !auth_config.authorize(headers) {
        warn!("MCP: Authentication failed - no valid API key provided");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Authentication required. Provide X-API-Key header or Authorization: Bearer <api-key>"})),
        )
            .into_response());
    }

    if !origins.permits(headers) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(json!({"error": "Invalid origin"})),
        )
            .into_response());
    }

    Ok(())
}

fn rpc_error(status: StatusCode, id: Option<Value>, code: i32, message: impl Into<String>) -> Response {
    (status, Json(JsonRpcResponse::error(id, code, message))).into_response()
}

fn route_status(error: &RouteError) -> StatusCode {
    match error {
        RouteError::BadRequest => StatusCode::BAD_REQUEST,
        RouteError::UnknownSession(_) => StatusCode::NOT_FOUND,
        RouteError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(hv) = HeaderValue::from_str(session_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(MCP_SESSION_ID_HEADER), hv);
    }
    response
}

fn request_context(session: &McpSession, outlet: NotificationOutlet) -> RequestContext {
    RequestContext {
        outlet,
        cancel: session.transport().cancellation(),
    }
}

/// POST /mcp - Handle JSON-RPC requests.
///
/// Routes the request to its session (creating one on initialize) and
/// returns either `application/json`, or `text/event-stream` for tool
/// calls from clients that accept it. Requests for one session run one at
/// a time; notifications bypass the queue so cancellations reach the
/// running call.
pub async fn mcp_post(
    Extension(router): Extension<McpRouter>,
    Extension(auth_config): Extension<Arc<AuthConfig>>,
    Extension(origins): Extension<Arc<AllowedOrigins>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = check_access(&auth_config, &origins, &headers) {
        return response;
    }

    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            debug!("MCP POST: unparseable body: {}", e);
            return rpc_error(StatusCode::BAD_REQUEST, None, PARSE_ERROR, "Parse error");
        }
    };
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            debug!("MCP POST: invalid request: {}", e);
            return rpc_error(StatusCode::BAD_REQUEST, None, INVALID_REQUEST, "Invalid Request");
        }
    };

    let session_id = get_session_id(&headers);
    debug!(
        "MCP POST: method={}, session={:?}",
        request.method, session_id
    );

    let session = match router.route(session_id.as_deref(), &request).await {
        Ok(routed) => routed.session().clone(),
        Err(e) => {
            return rpc_error(route_status(&e), request.id.clone(), e.code(), e.to_string());
        }
    };

    if request.is_notification() {
        let context = request_context(&session, session.transport().outlet());
        session.handler().handle_request(&request, &context).await;
        return with_session_header(StatusCode::ACCEPTED.into_response(), &session.id);
    }

    let guard = session.begin_request().await;
    if session.state() != SessionState::Active {
        // Closed while this request was queued
        let e = RouteError::UnknownSession(session.id.clone());
        return rpc_error(route_status(&e), request.id.clone(), e.code(), e.to_string());
    }

    if request.method == "tools/call" && accepts_event_stream(&headers) {
        let (tx, rx) = mpsc::unbounded_channel();
        let context = request_context(&session, NotificationOutlet::Stream(tx.clone()));
        let task_session = session.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let handled = tokio::select! {
                response = task_session.handler().handle_request(&request, &context) => response,
                _ = tx.closed() => {
                    info!("MCP session {}: client disconnected from streamed response", task_session.id);
                    None
                }
            };
            if let Some(response) = handled {
                match serde_json::to_string(&response) {
                    Ok(json) => {
                        if tx.send(McpEvent::JsonRpc(json)).is_err() {
                            debug!("Streamed response dropped, client is gone");
                        }
                    }
                    Err(e) => error!("Failed to serialize MCP response: {}", e),
                }
            }
        });

        let stream = UnboundedReceiverStream::new(rx).map(|McpEvent::JsonRpc(json)| {
            Ok::<_, Infallible>(Event::default().event("message").data(json))
        });
        return with_session_header(Sse::new(stream).into_response(), &session.id);
    }

    let context = request_context(&session, session.transport().outlet());
    let response = session.handler().handle_request(&request, &context).await;
    drop(guard);

    let response = match response {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    with_session_header(response, &session.id)
}

/// GET /mcp - Open SSE stream for server-initiated messages.
///
/// The stream ends when the session closes.
pub async fn mcp_get(
    Extension(router): Extension<McpRouter>,
    Extension(auth_config): Extension<Arc<AuthConfig>>,
    Extension(origins): Extension<Arc<AllowedOrigins>>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = check_access(&auth_config, &origins, &headers) {
        return response;
    }

    let Some(session_id) = get_session_id(&headers) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Mcp-Session-Id header required for SSE stream"})),
        )
            .into_response();
    };

    let Some(session) = router.registry().lookup(&session_id).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Session not found"})),
        )
            .into_response();
    };

    info!("MCP: SSE stream opened for session {}", session_id);

    let closed = session.transport().cancellation();
    let stream = BroadcastStream::new(session.transport().subscribe())
        .filter_map(|result| {
            futures::future::ready(match result {
                Ok(McpEvent::JsonRpc(json)) => {
                    Some(Ok::<_, Infallible>(Event::default().event("message").data(json)))
                }
                // Lagged
                Err(_) => None,
            })
        })
        .take_until(closed.cancelled_owned());

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}

/// DELETE /mcp - Terminate a session.
pub async fn mcp_delete(
    Extension(router): Extension<McpRouter>,
    Extension(auth_config): Extension<Arc<AuthConfig>>,
    Extension(origins): Extension<Arc<AllowedOrigins>>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = check_access(&auth_config, &origins, &headers) {
        return response;
    }

    let Some(session_id) = get_session_id(&headers) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    match router.registry().close(&session_id).await {
        Ok(true) => {
            info!("MCP: Session terminated: {}", session_id);
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            // The entry is gone either way
            warn!("MCP: Session {} terminated with error: {}", session_id, e);
            StatusCode::NO_CONTENT.into_response()
        }
    }
}
