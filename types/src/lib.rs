//! Shared types for the Legal MCP server.
//!
//! This crate contains the catalogue models, analysis events and tool
//! payloads shared between the server and its clients.

/// Default port for the MCP server.
pub const DEFAULT_PORT: u16 = 3000;

pub mod analysis;
pub mod api;
pub mod document;
pub mod prompt;

// Re-export commonly used types
pub use analysis::{AnalysisResult, ProgressEvent};
pub use api::{
    AddPromptRequest, DocumentListResponse, ExecuteAnalysisRequest, GetPromptRequest,
    ListPromptsRequest, PromptListResponse, PromptResponse,
};
pub use document::{Document, DocumentMetadata};
pub use prompt::{CreatedBy, PromptDefinition, PromptLibrary, PromptSummary};
