//! Drives one run of the long-running analysis tool.

use futures::StreamExt;
use legal_mcp_types::{AnalysisResult, Document, ProgressEvent, PromptDefinition};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::classifier::classify;
use super::sink::ProgressSink;
use crate::llm::{InferenceClient, InferenceError, InferenceRequest};

/// Error type for analysis runs.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("prompt text is empty")]
    EmptyPrompt,

    #[error("document payload is empty")]
    EmptyDocument,

    #[error("failed to open inference stream: {0}")]
    Open(#[source] InferenceError),

    #[error("inference stream failed: {0}")]
    Stream(#[source] InferenceError),

    #[error("analysis cancelled")]
    Cancelled,
}

/// Turns an inference text stream into progress events and one final result.
#[derive(Clone)]
pub struct AnalysisOrchestrator {
    client: Arc<dyn InferenceClient>,
}

impl AnalysisOrchestrator {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self { client }
    }

    /// Run an analysis of `document` with `prompt`.
    ///
    /// `Started` is emitted only once the inference stream is open, so a
    /// failed open produces no events at all. A run resolves exactly once;
    /// nothing is emitted after it returns, and a failed or cancelled run
    /// never emits `Completed`.
    pub async fn run(
        &self,
        prompt: &PromptDefinition,
        document: &Document,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, AnalysisError> {
        if prompt.prompt_text.trim().is_empty() {
            return Err(AnalysisError::EmptyPrompt);
        }
        if document.data_base64.is_empty() {
            return Err(AnalysisError::EmptyDocument);
        }

        info!(
            "Starting analysis of '{}' with prompt '{}' ({} chars)",
            document.filename(),
            prompt.title,
            prompt.prompt_text.len()
        );

        let request = InferenceRequest {
            instruction: prompt.prompt_text.clone(),
            media_type: document.media_type.clone(),
            document_base64: document.data_base64.clone(),
        };

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AnalysisError::Cancelled),
            opened = self.client.open_stream(request) => opened.map_err(AnalysisError::Open)?,
        };

        deliver(
            sink,
            ProgressEvent::Started {
                message: "Starting analysis...".to_string(),
            },
        );

        let mut section = String::new();
        let mut analysis = String::new();
        let mut fragments = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Analysis of '{}' cancelled after {} fragments", document.filename(), fragments);
                    return Err(AnalysisError::Cancelled);
                }
                next = stream.next() => next,
            };

            let fragment = match next {
                Some(Ok(fragment)) => fragment,
                Some(Err(e)) => {
                    warn!(
                        "Inference stream for '{}' failed after {} fragments: {}",
                        document.filename(),
                        fragments,
                        e
                    );
                    return Err(AnalysisError::Stream(e));
                }
                None => break,
            };

            fragments += 1;
            let classification = classify(&fragment, &section);
            if classification.section != section {
                debug!("Section started: {}", classification.section);
            }
            section = classification.section;
            for event in classification.events {
                deliver(sink, event);
            }
            analysis.push_str(&fragment);
        }

        deliver(
            sink,
            ProgressEvent::Completed {
                message: "Analysis complete".to_string(),
            },
        );
        info!(
            "Analysis of '{}' complete ({} fragments, {} chars)",
            document.filename(),
            fragments,
            analysis.len()
        );

        Ok(AnalysisResult {
            prompt_title: prompt.title.clone(),
            document_filename: document.filename().to_string(),
            analysis,
        })
    }
}

fn deliver(sink: &dyn ProgressSink, event: ProgressEvent) {
    if let Err(e) = sink.emit(&event) {
        warn!("Progress notification failed: {}", e);
    }
}
