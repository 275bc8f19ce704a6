//! Shared fixtures for unit tests.

use async_trait::async_trait;
use futures::StreamExt;
use legal_mcp_types::{Document, DocumentMetadata, ProgressEvent, PromptDefinition};
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::analysis::{ProgressSink, SinkError};
use crate::llm::{InferenceClient, InferenceError, InferenceRequest, TextStream};
use crate::state::AppState;
use crate::storage::{FsDocumentStore, PromptStore};

/// Library with two curated prompts.
pub const PROMPT_LIBRARY: &str = r#"{
    "prompts": [
        {
            "id": "lease_summary",
            "title": "Lease Summary",
            "description": "Summarize the key commercial terms",
            "category": "leases",
            "created_by": "system",
            "created_at": "2025-01-01T00:00:00Z",
            "prompt_text": "Summarize this lease."
        },
        {
            "id": "termination_rights",
            "title": "Termination Rights",
            "description": "Find early termination clauses",
            "category": "risk",
            "created_by": "system",
            "created_at": "2025-01-01T00:00:00Z",
            "prompt_text": "List all termination rights."
        }
    ]
}"#;

enum Script {
    Fragments(Vec<String>),
    FailAfter(Vec<String>),
    StallAfter(Vec<String>),
    Unreachable,
}

/// Inference client that replays a fixed script.
pub struct ScriptedInference {
    script: Script,
    released: CancellationToken,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl ScriptedInference {
    fn new(script: Script) -> Self {
        Self {
            script,
            released: CancellationToken::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn owned(fragments: &[&str]) -> Vec<String> {
        fragments.iter().map(|f| f.to_string()).collect()
    }

    /// Stream the fragments, then end normally.
    pub fn fragments(fragments: &[&str]) -> Self {
        Self::new(Script::Fragments(Self::owned(fragments)))
    }

    /// Stream the fragments, then fail.
    pub fn failing_after(fragments: &[&str]) -> Self {
        Self::new(Script::FailAfter(Self::owned(fragments)))
    }

    /// Stream the fragments, then never produce another item.
    pub fn stalling_after(fragments: &[&str]) -> Self {
        Self::new(Script::StallAfter(Self::owned(fragments)))
    }

    /// Fail to open the stream.
    pub fn unreachable() -> Self {
        Self::new(Script::Unreachable)
    }

    /// Cancelled once the opened stream has been dropped.
    pub fn released(&self) -> CancellationToken {
        self.released.clone()
    }

    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    async fn open_stream(&self, request: InferenceRequest) -> Result<TextStream, InferenceError> {
        self.requests.lock().push(request);

        let items = |fragments: &Vec<String>| {
            futures::stream::iter(
                fragments
                    .iter()
                    .cloned()
                    .map(Ok::<_, InferenceError>)
                    .collect::<Vec<_>>(),
            )
        };

        let stream: TextStream = match &self.script {
            Script::Unreachable => {
                return Err(InferenceError::Connect("connection refused".to_string()))
            }
            Script::Fragments(fragments) => Box::pin(items(fragments)),
            Script::FailAfter(fragments) => Box::pin(items(fragments).chain(
                futures::stream::once(async {
                    Err(InferenceError::Stream("connection reset".to_string()))
                }),
            )),
            Script::StallAfter(fragments) => {
                Box::pin(items(fragments).chain(futures::stream::pending()))
            }
        };

        let guard = self.released.clone().drop_guard();
        Ok(Box::pin(stream.map(move |item| {
            let _guard = &guard;
            item
        })))
    }
}

/// Sink that records every event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: &ProgressEvent) -> Result<(), SinkError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Sink whose client has gone away.
pub struct FailingSink;

impl ProgressSink for FailingSink {
    fn emit(&self, _event: &ProgressEvent) -> Result<(), SinkError> {
        Err(SinkError::Disconnected)
    }
}

pub fn prompt(title: &str) -> PromptDefinition {
    PromptDefinition::user(title, "Identify the key terms of this lease.", "leases")
}

pub fn document(filename: &str) -> Document {
    Document {
        metadata: DocumentMetadata {
            id: filename.to_string(),
            filename: filename.to_string(),
            size_bytes: Some(8),
            last_modified: None,
        },
        media_type: "application/pdf".to_string(),
        data_base64: "JVBERi0xLjQ=".to_string(),
    }
}

/// State over empty, never-loaded catalogues.
pub fn test_state() -> AppState {
    AppState::new(
        Arc::new(FsDocumentStore::new("/nonexistent/documents")),
        PromptStore::new("/nonexistent/prompts/library.json"),
        Arc::new(ScriptedInference::fragments(&[])),
    )
}

/// State over a temporary data directory holding `lease.pdf` and
/// [`PROMPT_LIBRARY`].
pub async fn state_with(inference: ScriptedInference) -> (TempDir, AppState) {
    let dir = TempDir::new().unwrap();
    let documents = dir.path().join("documents");
    std::fs::create_dir_all(&documents).unwrap();
    std::fs::write(documents.join("lease.pdf"), b"%PDF-1.4").unwrap();

    let library = dir.path().join("library.json");
    std::fs::write(&library, PROMPT_LIBRARY).unwrap();
    let prompts = PromptStore::new(&library);
    prompts.load().await.unwrap();

    let state = AppState::new(
        Arc::new(FsDocumentStore::new(&documents)),
        prompts,
        Arc::new(inference),
    );
    (dir, state)
}
