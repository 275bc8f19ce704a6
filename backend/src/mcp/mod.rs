//! MCP (Model Context Protocol) Streamable HTTP support.
//!
//! This module implements the MCP Streamable HTTP transport: sessions, the
//! request router that matches requests to them, the per-session JSON-RPC
//! handler, and the relay of progress notifications.
//!
//! ## Session Management
//!
//! Sessions are identified by the `Mcp-Session-Id` header, assigned during
//! initialization and required for subsequent requests.

pub mod handler;
pub mod progress;
pub mod router;
pub mod session;

pub use handler::{JsonRpcRequest, JsonRpcResponse, McpHandler, ToolError};
pub use progress::{NotificationOutlet, NotificationSink, RequestContext};
pub use router::{McpRouter, RouteError, Routed};
pub use session::{
    McpEvent, McpSession, SessionError, SessionOutlet, SessionRegistry, SessionState,
    SessionTransport, ShutdownReport, TransportError,
};
