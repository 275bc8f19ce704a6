//! Directory-backed document store.

use super::{DocumentStore, Result, StorageError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use legal_mcp_types::{Document, DocumentMetadata};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

const PDF_EXTENSION: &str = ".pdf";
const PDF_MEDIA_TYPE: &str = "application/pdf";

/// Serves the PDF files of one directory; the file name is the document ID.
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Resolve a document ID to a path inside the root directory.
    fn resolve(&self, id: &str) -> Result<PathBuf> {
        let invalid = id.is_empty()
            || id == "."
            || id == ".."
            || id.contains('/')
            || id.contains('\\')
            || id.contains('\0');
        if invalid {
            return Err(StorageError::InvalidDocumentId(id.to_string()));
        }
        if !id.ends_with(PDF_EXTENSION) {
            return Err(StorageError::UnsupportedDocument(id.to_string()));
        }
        Ok(self.root.join(id))
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn list_documents(&self) -> Result<Vec<DocumentMetadata>> {
        debug!("Listing documents in {:?}", self.root);

        let mut entries = fs::read_dir(&self.root).await?;
        let mut documents = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(PDF_EXTENSION) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let last_modified = metadata
                .modified()
                .ok()
                .map(|t| DateTime::<Utc>::from(t).to_rfc3339());

            documents.push(DocumentMetadata {
                id: name.clone(),
                filename: name,
                size_bytes: Some(metadata.len()),
                last_modified,
            });
        }

        documents.sort_by(|a, b| a.filename.cmp(&b.filename));
        info!("Found {} documents", documents.len());
        Ok(documents)
    }

    async fn get_document(&self, id: &str) -> Result<Document> {
        let path = self.resolve(id)?;

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::DocumentNotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        debug!("Read document {} ({} bytes)", id, bytes.len());

        let metadata = fs::metadata(&path).await?;
        Ok(Document {
            metadata: DocumentMetadata {
                id: id.to_string(),
                filename: id.to_string(),
                size_bytes: Some(bytes.len() as u64),
                last_modified: metadata
                    .modified()
                    .ok()
                    .map(|t| DateTime::<Utc>::from(t).to_rfc3339()),
            },
            media_type: PDF_MEDIA_TYPE.to_string(),
            data_base64: STANDARD.encode(&bytes),
        })
    }
}
