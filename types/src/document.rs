//! Document storage types.

use serde::{Deserialize, Serialize};

/// Descriptor of a stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub id: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// RFC 3339 timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

/// A fetched document with its payload ready for the inference service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(flatten)]
    pub metadata: DocumentMetadata,
    /// MIME type of the payload (e.g. `application/pdf`)
    pub media_type: String,
    /// Base64-encoded file contents
    pub data_base64: String,
}

impl Document {
    /// Filename of the underlying object.
    pub fn filename(&self) -> &str {
        &self.metadata.filename
    }
}
