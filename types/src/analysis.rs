//! Analysis progress events and results.

use serde::{Deserialize, Serialize};

/// Progress of a single analysis run, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The inference stream is open
    Started { message: String },
    /// A new section heading was detected in the stream
    SectionStarted { section: String, message: String },
    /// A fragment of model output, tagged with the section in effect
    ContentChunk { section: String, chunk: String },
    /// The inference stream ended normally
    Completed { message: String },
}

impl ProgressEvent {
    /// Get a human-readable description of the event.
    ///
    /// Content chunks are abbreviated to their first 120 characters.
    pub fn description(&self) -> String {
        match self {
            ProgressEvent::Started { message } => message.clone(),
            ProgressEvent::SectionStarted { message, .. } => message.clone(),
            ProgressEvent::ContentChunk { section, chunk } => {
                let preview: String = chunk.chars().take(120).collect();
                let label = if section.is_empty() { "unknown" } else { section.as_str() };
                format!("Chunk {}: {}", label, preview.trim())
            }
            ProgressEvent::Completed { message } => message.clone(),
        }
    }

    /// Whether this event ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Completed { .. })
    }
}

/// Final result of the `execute_analysis` tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub prompt_title: String,
    pub document_filename: String,
    pub analysis: String,
}
