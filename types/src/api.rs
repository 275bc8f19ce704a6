//! Tool argument and response types.

use crate::document::DocumentMetadata;
use crate::prompt::{PromptDefinition, PromptSummary};
use serde::{Deserialize, Serialize};

// ============================================================================
// Document Tools
// ============================================================================

/// Response of the `list_documents` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentMetadata>,
}

// ============================================================================
// Prompt Tools
// ============================================================================

/// Arguments of the `list_prompts` tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListPromptsRequest {
    #[serde(default)]
    pub search: Option<String>,
}

/// Response of the `list_prompts` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptListResponse {
    pub prompts: Vec<PromptSummary>,
}

/// Arguments of the `get_prompt` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptRequest {
    pub prompt_id: String,
}

/// Arguments of the `add_prompt` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddPromptRequest {
    pub title: String,
    pub category: String,
    pub prompt_text: String,
}

/// Response of the `get_prompt` and `add_prompt` tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptResponse {
    pub prompt: PromptDefinition,
}

// ============================================================================
// Analysis Tool
// ============================================================================

/// Arguments of the `execute_analysis` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteAnalysisRequest {
    pub prompt_id: String,
    pub document_id: String,
}
