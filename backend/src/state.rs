//! Application state management.

use crate::analysis::AnalysisOrchestrator;
use crate::llm::InferenceClient;
use crate::storage::{DocumentStore, PromptStore};
use std::sync::Arc;

/// Shared application state: the catalogues and the analysis orchestrator.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    documents: Arc<dyn DocumentStore>,
    prompts: PromptStore,
    orchestrator: AnalysisOrchestrator,
}

impl AppState {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        prompts: PromptStore,
        inference: Arc<dyn InferenceClient>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                documents,
                prompts,
                orchestrator: AnalysisOrchestrator::new(inference),
            }),
        }
    }

    pub fn documents(&self) -> &dyn DocumentStore {
        self.inner.documents.as_ref()
    }

    pub fn prompts(&self) -> &PromptStore {
        &self.inner.prompts
    }

    pub fn orchestrator(&self) -> &AnalysisOrchestrator {
        &self.inner.orchestrator
    }
}
