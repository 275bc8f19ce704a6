//! JSON file-backed prompt library.

use super::Result;
use legal_mcp_types::{PromptDefinition, PromptLibrary, PromptSummary};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Prompt catalogue persisted as a single library document.
///
/// The library is read once by [`PromptStore::load`] and served from memory
/// afterwards. Additions are written to disk before they become visible.
pub struct PromptStore {
    path: PathBuf,
    prompts: RwLock<Vec<PromptDefinition>>,
}

impl PromptStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            prompts: RwLock::new(Vec::new()),
        }
    }

    /// Load the library from disk, replacing the in-memory copy.
    ///
    /// A missing or empty file is an empty library.
    pub async fn load(&self) -> Result<usize> {
        debug!("Loading prompt library from {:?}", self.path);

        let library = if !self.path.exists() {
            info!("Prompt library does not exist, starting with no prompts");
            PromptLibrary::default()
        } else {
            let contents = fs::read_to_string(&self.path).await?;
            if contents.trim().is_empty() {
                PromptLibrary::default()
            } else {
                serde_json::from_str(&contents)?
            }
        };

        let count = library.prompts.len();
        if count == 0 {
            warn!("No prompts loaded from {:?}", self.path);
        } else {
            info!("Loaded {} prompts from library", count);
        }

        *self.prompts.write().await = library.prompts;
        Ok(count)
    }

    /// List prompt summaries, optionally filtered by a search query.
    pub async fn list(&self, search: Option<&str>) -> Vec<PromptSummary> {
        let prompts = self.prompts.read().await;
        prompts
            .iter()
            .filter(|p| match search {
                Some(query) if !query.is_empty() => p.matches(query),
                _ => true,
            })
            .map(PromptSummary::from)
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<PromptDefinition> {
        let prompts = self.prompts.read().await;
        let found = prompts.iter().find(|p| p.id == id).cloned();
        debug!(
            "Prompt lookup {}: {}",
            id,
            if found.is_some() { "found" } else { "not found" }
        );
        found
    }

    /// Add a user-contributed prompt and persist the library.
    pub async fn add(
        &self,
        title: &str,
        prompt_text: &str,
        category: &str,
    ) -> Result<PromptDefinition> {
        let prompt = PromptDefinition::user(title, prompt_text, category);

        // Held across the write so concurrent additions serialize
        let mut prompts = self.prompts.write().await;
        let mut updated = prompts.clone();
        updated.push(prompt.clone());
        self.save(&updated).await?;
        *prompts = updated;

        info!("Added prompt {} ({})", prompt.id, prompt.title);
        Ok(prompt)
    }

    async fn save(&self, prompts: &[PromptDefinition]) -> Result<()> {
        debug!("Writing {} prompts to {:?}", prompts.len(), self.path);

        let library = PromptLibrary {
            prompts: prompts.to_vec(),
        };
        let json = serde_json::to_string_pretty(&library)?;

        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await?;
            }
        }

        // Write to temporary file first, then rename (atomic operation)
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, json).await?;
        fs::rename(&temp_path, &self.path).await?;

        Ok(())
    }
}
