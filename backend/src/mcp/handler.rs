//! MCP JSON-RPC request handler.
//!
//! One handler is owned by each session. It answers protocol methods,
//! dispatches tool calls against the shared [`AppState`] and tracks the
//! cancellation tokens of in-flight calls.

use crate::analysis::AnalysisError;
use crate::state::AppState;
use legal_mcp_types::{
    AddPromptRequest, DocumentListResponse, ExecuteAnalysisRequest, GetPromptRequest,
    ListPromptsRequest, PromptListResponse, PromptResponse,
};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::progress::{NotificationSink, RequestContext};

/// MCP protocol version we support.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Protocol versions accepted from clients, newest first.
const SUPPORTED_VERSIONS: &[&str] = &["2025-06-18", PROTOCOL_VERSION];

const SERVER_NAME: &str = "Legal MCP Server";

const INSTRUCTIONS: &str = "Use the provided tools to browse pre-loaded documents, review curated prompts, and execute live lease analysis. The document and prompt libraries are read-only; add prompts only through the MCP prompt tool.";

// JSON-RPC error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// JSON-RPC 2.0 Request.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Notifications carry no id and get no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 Response.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC 2.0 Error.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Tool call parameters from MCP.
#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
    #[serde(default, rename = "_meta")]
    meta: Option<RequestMeta>,
}

#[derive(Debug, Deserialize)]
struct RequestMeta {
    #[serde(default, rename = "progressToken")]
    progress_token: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CancelledParams {
    #[serde(rename = "requestId")]
    request_id: Value,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetPromptParams {
    name: String,
}

/// Error type for tool dispatch.
///
/// Protocol errors become JSON-RPC errors; `Failed` becomes a tool result
/// with `isError` set.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Failed(String),
}

/// Removes an in-flight entry when the call finishes or is dropped.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<String, CancellationToken>>,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.key);
    }
}

/// MCP request handler bound to one session.
pub struct McpHandler {
    session_id: String,
    state: AppState,
    in_flight: Mutex<HashMap<String, CancellationToken>>,
}

impl McpHandler {
    pub fn new(session_id: impl Into<String>, state: AppState) -> Self {
        Self {
            session_id: session_id.into(),
            state,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Cancel every in-flight call of this session.
    pub fn release(&self) {
        let tokens: Vec<_> = self.in_flight.lock().drain().collect();
        if !tokens.is_empty() {
            info!(
                "MCP session {}: cancelling {} in-flight calls",
                self.session_id,
                tokens.len()
            );
        }
        for (_, token) in tokens {
            token.cancel();
        }
    }

    /// Number of calls currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Handle an MCP JSON-RPC request.
    ///
    /// Returns `None` for notifications.
    pub async fn handle_request(
        &self,
        request: &JsonRpcRequest,
        context: &RequestContext,
    ) -> Option<JsonRpcResponse> {
        debug!(
            "MCP session {}: handling method {}",
            self.session_id, request.method
        );

        if request.is_notification() {
            self.handle_notification(request);
            return None;
        }

        let id = request.id.clone();
        let params = request.params.clone().unwrap_or_else(|| json!({}));

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id, &params),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, Self::tool_definitions()),
            "tools/call" => match self.handle_call_tool(request, params, context).await {
                Ok(value) => JsonRpcResponse::success(id, value),
                Err(e) => {
                    warn!("MCP session {}: {}", self.session_id, e);
                    JsonRpcResponse::error(id, INVALID_PARAMS, e.to_string())
                }
            },
            "prompts/list" => self.handle_list_prompts(id).await,
            "prompts/get" => self.handle_get_prompt(id, params).await,
            "logging/setLevel" => {
                info!(
                    "MCP session {}: client requested log level {}",
                    self.session_id, params["level"]
                );
                JsonRpcResponse::success(id, json!({}))
            }
            _ => JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ),
        };
        Some(response)
    }

    fn handle_notification(&self, request: &JsonRpcRequest) {
        match request.method.as_str() {
            "notifications/initialized" | "initialized" => {
                debug!("MCP session {} initialized", self.session_id);
            }
            "notifications/cancelled" => {
                let params = request.params.clone().unwrap_or(Value::Null);
                match serde_json::from_value::<CancelledParams>(params) {
                    Ok(cancelled) => self.cancel_request(&cancelled),
                    Err(e) => warn!("Malformed cancellation notification: {}", e),
                }
            }
            other => debug!("Ignoring notification: {}", other),
        }
    }

    fn cancel_request(&self, cancelled: &CancelledParams) {
        let key = cancelled.request_id.to_string();
        match self.in_flight.lock().get(&key) {
            Some(token) => {
                info!(
                    "MCP session {}: request {} cancelled by client ({})",
                    self.session_id,
                    key,
                    cancelled.reason.as_deref().unwrap_or("no reason")
                );
                token.cancel();
            }
            None => debug!("Cancellation for unknown request {}", key),
        }
    }

    /// Handle the initialize request.
    fn handle_initialize(&self, id: Option<Value>, params: &Value) -> JsonRpcResponse {
        let requested = params["protocolVersion"].as_str().unwrap_or(PROTOCOL_VERSION);
        let version = SUPPORTED_VERSIONS
            .iter()
            .find(|v| **v == requested)
            .copied()
            .unwrap_or(PROTOCOL_VERSION);
        info!(
            "MCP session {}: initialize (client {}, protocol {})",
            self.session_id,
            params["clientInfo"]["name"].as_str().unwrap_or("unknown"),
            version
        );

        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": version,
                "capabilities": {
                    "logging": {},
                    "tools": { "listChanged": true },
                    "prompts": { "listChanged": true }
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION")
                },
                "instructions": INSTRUCTIONS
            }),
        )
    }

    /// The tools/list result.
    fn tool_definitions() -> Value {
        json!({
            "tools": [
                {
                    "name": "list_documents",
                    "title": "List Documents",
                    "description": "Return all legal documents available for analysis",
                    "inputSchema": {
                        "type": "object",
                        "properties": {},
                        "required": []
                    }
                },
                {
                    "name": "list_prompts",
                    "title": "List Prompts",
                    "description": "List available prompts, optionally filtered by search text",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "search": {
                                "type": "string",
                                "description": "Case-insensitive filter on title, description and category"
                            }
                        },
                        "required": []
                    }
                },
                {
                    "name": "get_prompt",
                    "title": "Get Prompt",
                    "description": "Retrieve full prompt details",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "prompt_id": { "type": "string" }
                        },
                        "required": ["prompt_id"]
                    }
                },
                {
                    "name": "add_prompt",
                    "title": "Add Prompt",
                    "description": "Store a user-contributed prompt in the shared library",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "title": { "type": "string" },
                            "category": { "type": "string" },
                            "prompt_text": { "type": "string" }
                        },
                        "required": ["title", "category", "prompt_text"]
                    }
                },
                {
                    "name": "execute_analysis",
                    "title": "Execute Analysis",
                    "description": "Analyze a document with a selected prompt and stream the results",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "prompt_id": { "type": "string" },
                            "document_id": { "type": "string" }
                        },
                        "required": ["prompt_id", "document_id"]
                    }
                }
            ]
        })
    }

    /// Handle a tools/call request.
    async fn handle_call_tool(
        &self,
        request: &JsonRpcRequest,
        params: Value,
        context: &RequestContext,
    ) -> Result<Value, ToolError> {
        let tool_params: ToolCallParams = serde_json::from_value(params)
            .map_err(|e| ToolError::InvalidParams(e.to_string()))?;
        let args = tool_params.arguments.unwrap_or_else(|| json!({}));
        let progress_token = tool_params.meta.and_then(|m| m.progress_token);

        let result = match tool_params.name.as_str() {
            "list_documents" => self.list_documents().await,
            "list_prompts" => self.list_prompts(parse_args(args)?).await,
            "get_prompt" => self.get_prompt(parse_args(args)?).await,
            "add_prompt" => self.add_prompt(parse_args(args)?, context).await,
            "execute_analysis" => {
                let args = parse_args(args)?;
                let key = request.id.clone().unwrap_or(Value::Null).to_string();
                let cancel = context.cancel.child_token();
                self.in_flight.lock().insert(key.clone(), cancel.clone());
                let _guard = InFlightGuard {
                    in_flight: &self.in_flight,
                    key,
                };
                let sink = NotificationSink::new(progress_token, context);
                self.execute_analysis(args, &sink, &cancel).await
            }
            _ => {
                error!("MCP: Unknown tool: {}", tool_params.name);
                return Err(ToolError::UnknownTool(tool_params.name));
            }
        };

        Ok(match result {
            Ok(value) => value,
            Err(e) => {
                warn!("MCP session {}: tool failed: {}", self.session_id, e);
                tool_error(e.to_string())
            }
        })
    }

    async fn list_documents(&self) -> Result<Value, ToolError> {
        info!("MCP: Listing documents");
        let documents = self
            .state
            .documents()
            .list_documents()
            .await
            .map_err(|e| ToolError::Failed(format!("Error listing documents: {}", e)))?;

        let response = DocumentListResponse { documents };
        let structured = to_value(&response)?;
        let text = serde_json::to_string_pretty(&structured)
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        Ok(tool_result(text, structured))
    }

    async fn list_prompts(&self, args: ListPromptsRequest) -> Result<Value, ToolError> {
        let search = args.search.as_deref().filter(|s| !s.is_empty());
        let prompts = self.state.prompts().list(search).await;
        info!(
            "MCP: Listing prompts (search: {}), returning {}",
            search.unwrap_or("none"),
            prompts.len()
        );

        let listing = if prompts.is_empty() {
            match search {
                Some(query) => format!("No prompts found matching \"{}\"", query),
                None => "No prompts found".to_string(),
            }
        } else {
            prompts
                .iter()
                .map(|p| format!("- {} ({}): {}", p.title, p.category, p.description))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let text = format!("Found {} prompt(s):\n\n{}", prompts.len(), listing);

        Ok(tool_result(text, to_value(&PromptListResponse { prompts })?))
    }

    async fn get_prompt(&self, args: GetPromptRequest) -> Result<Value, ToolError> {
        info!("MCP: Getting prompt {}", args.prompt_id);
        let prompt = self.state.prompts().get(&args.prompt_id).await.ok_or_else(|| {
            ToolError::Failed(format!(
                "Error retrieving prompt: Prompt {} not found",
                args.prompt_id
            ))
        })?;

        let text = format!(
            "Prompt: {}\nCategory: {}\nDescription: {}\nCreated by: {}\nCreated at: {}\n\nPrompt Text:\n{}",
            prompt.title,
            prompt.category,
            prompt.description,
            prompt.created_by,
            prompt.created_at,
            prompt.prompt_text
        );
        Ok(tool_result(text, to_value(&PromptResponse { prompt })?))
    }

    async fn add_prompt(
        &self,
        args: AddPromptRequest,
        context: &RequestContext,
    ) -> Result<Value, ToolError> {
        if args.title.trim().is_empty() || args.prompt_text.trim().is_empty() {
            return Err(ToolError::Failed(
                "Error adding prompt: title and prompt_text must not be empty".to_string(),
            ));
        }

        let prompt = self
            .state
            .prompts()
            .add(&args.title, &args.prompt_text, &args.category)
            .await
            .map_err(|e| ToolError::Failed(format!("Error adding prompt: {}", e)))?;
        info!("MCP: Added prompt {}", prompt.id);

        if let Err(e) = context
            .outlet
            .notify("notifications/prompts/list_changed", json!({}))
        {
            debug!("Prompt list change not delivered: {}", e);
        }

        let text = format!(
            "Successfully added new prompt:\n\nID: {}\nTitle: {}\nCategory: {}\nDescription: {}\nCreated at: {}",
            prompt.id, prompt.title, prompt.category, prompt.description, prompt.created_at
        );
        Ok(tool_result(text, to_value(&PromptResponse { prompt })?))
    }

    async fn execute_analysis(
        &self,
        args: ExecuteAnalysisRequest,
        sink: &NotificationSink,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        let fail = |message: String| ToolError::Failed(format!("execute_analysis failed: {}", message));

        info!(
            "MCP: execute_analysis with prompt_id={}, document_id={}",
            args.prompt_id, args.document_id
        );

        let prompt = self
            .state
            .prompts()
            .get(&args.prompt_id)
            .await
            .ok_or_else(|| fail(format!("Prompt {} not found", args.prompt_id)))?;

        let document = self
            .state
            .documents()
            .get_document(&args.document_id)
            .await
            .map_err(|e| {
                fail(format!(
                    "Failed to retrieve document {}: {}",
                    args.document_id, e
                ))
            })?;

        let result = self
            .state
            .orchestrator()
            .run(&prompt, &document, sink, cancel)
            .await
            .map_err(|e| match e {
                AnalysisError::Cancelled => fail(e.to_string()),
                other => fail(format!("Inference call failed: {}", other)),
            })?;

        let structured = to_value(&result)?;
        let text = serde_json::to_string_pretty(&structured)
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        Ok(tool_result(text, structured))
    }

    /// Handle the prompts/list request.
    async fn handle_list_prompts(&self, id: Option<Value>) -> JsonRpcResponse {
        let prompts: Vec<Value> = self
            .state
            .prompts()
            .list(None)
            .await
            .into_iter()
            .map(|p| {
                json!({
                    "name": p.id,
                    "title": p.title,
                    "description": p.description
                })
            })
            .collect();
        JsonRpcResponse::success(id, json!({ "prompts": prompts }))
    }

    /// Handle the prompts/get request.
    async fn handle_get_prompt(&self, id: Option<Value>, params: Value) -> JsonRpcResponse {
        let params: GetPromptParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                return JsonRpcResponse::error(id, INVALID_PARAMS, format!("Invalid params: {}", e))
            }
        };

        match self.state.prompts().get(&params.name).await {
            Some(prompt) => JsonRpcResponse::success(
                id,
                json!({
                    "description": prompt.description,
                    "messages": [{
                        "role": "user",
                        "content": { "type": "text", "text": prompt.prompt_text }
                    }]
                }),
            ),
            None => JsonRpcResponse::error(
                id,
                INVALID_PARAMS,
                format!("Prompt not found: {}", params.name),
            ),
        }
    }
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidParams(e.to_string()))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::Failed(e.to_string()))
}

/// Wrap a result in MCP content format.
fn tool_result(text: String, structured: Value) -> Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": structured
    })
}

fn tool_error(text: String) -> Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::progress::NotificationOutlet;
    use crate::mcp::session::McpEvent;
    use crate::test_support::{state_with, ScriptedInference};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct Fixture {
        handler: Arc<McpHandler>,
        context: RequestContext,
        rx: mpsc::UnboundedReceiver<McpEvent>,
        _dir: TempDir,
    }

    async fn fixture(inference: ScriptedInference) -> Fixture {
        let (dir, state) = state_with(inference).await;
        let (tx, rx) = mpsc::unbounded_channel();
        Fixture {
            handler: Arc::new(McpHandler::new("test-session", state)),
            context: RequestContext {
                outlet: NotificationOutlet::Stream(tx),
                cancel: CancellationToken::new(),
            },
            rx,
            _dir: dir,
        }
    }

    fn request(id: i64, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(id)),
            method: method.to_string(),
            params: Some(params),
        }
    }

    fn call(id: i64, name: &str, arguments: Value) -> JsonRpcRequest {
        request(
            id,
            "tools/call",
            json!({ "name": name, "arguments": arguments }),
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<McpEvent>) -> Vec<Value> {
        let mut messages = Vec::new();
        while let Ok(McpEvent::JsonRpc(json)) = rx.try_recv() {
            messages.push(serde_json::from_str(&json).unwrap());
        }
        messages
    }

    #[tokio::test]
    async fn test_initialize_advertises_capabilities() {
        let f = fixture(ScriptedInference::fragments(&[])).await;
        let response = f
            .handler
            .handle_request(
                &request(1, "initialize", json!({ "protocolVersion": "2025-06-18" })),
                &f.context,
            )
            .await
            .unwrap();

        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2025-06-18");
        assert_eq!(result["serverInfo"]["name"], "Legal MCP Server");
        assert_eq!(result["capabilities"]["prompts"]["listChanged"], true);
        assert!(result["instructions"].as_str().unwrap().contains("lease analysis"));
    }

    #[tokio::test]
    async fn test_unknown_method_and_tool() {
        let f = fixture(ScriptedInference::fragments(&[])).await;

        let response = f
            .handler
            .handle_request(&request(1, "resources/list", json!({})), &f.context)
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);

        let response = f
            .handler
            .handle_request(&call(2, "delete_everything", json!({})), &f.context)
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);

        let response = f
            .handler
            .handle_request(&call(3, "get_prompt", json!({})), &f.context)
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let f = fixture(ScriptedInference::fragments(&[])).await;
        let notification = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: "notifications/initialized".to_string(),
            params: None,
        };

        assert!(f
            .handler
            .handle_request(&notification, &f.context)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_list_and_get_prompts() {
        let f = fixture(ScriptedInference::fragments(&[])).await;

        let response = f
            .handler
            .handle_request(&call(1, "list_prompts", json!({ "search": "LEASE" })), &f.context)
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["structuredContent"]["prompts"][0]["id"], "lease_summary");
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .starts_with("Found 1 prompt(s):"));

        let response = f
            .handler
            .handle_request(&call(2, "get_prompt", json!({ "prompt_id": "nope" })), &f.context)
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);

        let response = f
            .handler
            .handle_request(
                &request(3, "prompts/get", json!({ "name": "lease_summary" })),
                &f.context,
            )
            .await
            .unwrap();
        assert_eq!(
            response.result.unwrap()["messages"][0]["content"]["text"],
            "Summarize this lease."
        );
    }

    #[tokio::test]
    async fn test_add_prompt_notifies_list_changed() {
        let mut f = fixture(ScriptedInference::fragments(&[])).await;

        let response = f
            .handler
            .handle_request(
                &call(
                    1,
                    "add_prompt",
                    json!({ "title": "Rent Review", "category": "leases", "prompt_text": "Explain rent review." }),
                ),
                &f.context,
            )
            .await
            .unwrap();
        let result = response.result.unwrap();
        let id = result["structuredContent"]["prompt"]["id"].as_str().unwrap();
        assert!(id.starts_with("prompt_"));

        let messages = drain(&mut f.rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["method"], "notifications/prompts/list_changed");

        let listed = f.handler.state.prompts().list(Some("rent review")).await;
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_execute_analysis_streams_progress() {
        let mut f = fixture(ScriptedInference::fragments(&[
            "EXECUTIVE SUMMARY: ",
            "rent is due monthly.",
        ]))
        .await;

        let mut request = call(
            7,
            "execute_analysis",
            json!({ "prompt_id": "lease_summary", "document_id": "lease.pdf" }),
        );
        request.params.as_mut().unwrap()["_meta"] = json!({ "progressToken": "p-1" });

        let response = f.handler.handle_request(&request, &f.context).await.unwrap();
        let result = response.result.unwrap();
        assert_eq!(
            result["structuredContent"]["analysis"],
            "EXECUTIVE SUMMARY: rent is due monthly."
        );
        assert_eq!(result["structuredContent"]["document_filename"], "lease.pdf");

        let messages = drain(&mut f.rx);
        let progress: Vec<_> = messages.iter().map(|m| m["params"]["progress"].clone()).collect();
        assert_eq!(progress, vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);
        assert_eq!(messages[0]["params"]["message"], "Starting analysis...");
        assert_eq!(messages[1]["params"]["message"], "Analyzing executive summary...");
        assert_eq!(messages[4]["params"]["message"], "Analysis complete");
        assert_eq!(f.handler.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_execute_analysis_reports_failures_as_tool_errors() {
        let f = fixture(ScriptedInference::unreachable()).await;

        let response = f
            .handler
            .handle_request(
                &call(
                    1,
                    "execute_analysis",
                    json!({ "prompt_id": "lease_summary", "document_id": "lease.pdf" }),
                ),
                &f.context,
            )
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .starts_with("execute_analysis failed: Inference call failed"));

        let response = f
            .handler
            .handle_request(
                &call(
                    2,
                    "execute_analysis",
                    json!({ "prompt_id": "lease_summary", "document_id": "../etc/passwd" }),
                ),
                &f.context,
            )
            .await
            .unwrap();
        assert_eq!(response.result.unwrap()["isError"], true);
    }

    #[tokio::test]
    async fn test_cancelled_notification_stops_call() {
        let f = fixture(ScriptedInference::stalling_after(&["EXECUTIVE SUMMARY"])).await;

        let run = {
            let handler = f.handler.clone();
            let context = f.context.clone();
            tokio::spawn(async move {
                handler
                    .handle_request(
                        &call(
                            42,
                            "execute_analysis",
                            json!({ "prompt_id": "lease_summary", "document_id": "lease.pdf" }),
                        ),
                        &context,
                    )
                    .await
            })
        };

        while f.handler.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let cancel = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: "notifications/cancelled".to_string(),
            params: Some(json!({ "requestId": 42, "reason": "user abort" })),
        };
        assert!(f.handler.handle_request(&cancel, &f.context).await.is_none());

        let response = run.await.unwrap().unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(
            result["content"][0]["text"],
            "execute_analysis failed: analysis cancelled"
        );
        assert_eq!(f.handler.in_flight(), 0);
    }
}
