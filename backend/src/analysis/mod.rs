//! Streaming analysis of documents.
//!
//! The orchestrator consumes the inference text stream, the classifier
//! detects section headings in each fragment, and progress is relayed
//! through a [`ProgressSink`].

pub mod classifier;
pub mod orchestrator;
pub mod sink;

pub use classifier::{classify, Classification};
pub use orchestrator::{AnalysisError, AnalysisOrchestrator};
pub use sink::{ProgressSink, SinkError};
