//! Inference service client.
//!
//! The analysis tool only needs one capability from a language model:
//! stream the text it generates for a document and an instruction.

mod anthropic;

pub use anthropic::{AnthropicClient, InferenceSettings};

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Error type for inference calls.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("inference API key is not configured (set ANTHROPIC_API_KEY)")]
    NotConfigured,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("stream failed: {0}")]
    Stream(String),

    #[error("invalid stream event: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Incremental text fragments in generation order.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, InferenceError>> + Send>>;

/// Input for one streaming inference call.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Instruction text sent alongside the document
    pub instruction: String,
    /// MIME type of the document payload
    pub media_type: String,
    /// Base64-encoded document
    pub document_base64: String,
}

/// Trait for streaming inference backends.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Open a streaming call.
    ///
    /// Returns once the service has accepted the request; failures to
    /// connect or authenticate are reported here rather than on the stream.
    async fn open_stream(&self, request: InferenceRequest) -> Result<TextStream, InferenceError>;
}
