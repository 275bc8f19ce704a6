//! Document and prompt catalogue storage.

mod documents;
mod prompts;

pub use documents::FsDocumentStore;
pub use prompts::PromptStore;

use async_trait::async_trait;
use legal_mcp_types::{Document, DocumentMetadata};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Invalid document id: {0}")]
    InvalidDocumentId(String),

    #[error("Unsupported document type: {0}")]
    UnsupportedDocument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Read-only access to stored documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// List all analysable documents.
    async fn list_documents(&self) -> Result<Vec<DocumentMetadata>>;

    /// Fetch a document with its payload.
    async fn get_document(&self, id: &str) -> Result<Document>;
}
