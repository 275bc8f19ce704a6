//! Prompt catalogue types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreatedBy {
    /// Shipped with the curated library
    System,
    /// Added through the `add_prompt` tool
    User,
}

impl std::fmt::Display for CreatedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CreatedBy::System => write!(f, "system"),
            CreatedBy::User => write!(f, "user"),
        }
    }
}

/// A prompt in the library, including the instruction text sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDefinition {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub created_by: CreatedBy,
    /// RFC 3339 timestamp
    pub created_at: String,
    pub prompt_text: String,
}

impl PromptDefinition {
    /// Create a user-contributed prompt with a generated ID.
    pub fn user(
        title: impl Into<String>,
        prompt_text: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        let title = title.into();
        let id = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("prompt_{}", &id[..8]),
            description: format!("User-contributed prompt: {}", title),
            title,
            category: category.into(),
            created_by: CreatedBy::User,
            created_at: chrono::Utc::now().to_rfc3339(),
            prompt_text: prompt_text.into(),
        }
    }

    /// Case-insensitive match against title, description and category.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.title.to_lowercase().contains(&query)
            || self.description.to_lowercase().contains(&query)
            || self.category.to_lowercase().contains(&query)
    }
}

/// Catalogue listing entry (no prompt text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSummary {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
}

impl From<&PromptDefinition> for PromptSummary {
    fn from(prompt: &PromptDefinition) -> Self {
        Self {
            id: prompt.id.clone(),
            title: prompt.title.clone(),
            description: prompt.description.clone(),
            category: prompt.category.clone(),
        }
    }
}

/// On-disk prompt library format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptLibrary {
    #[serde(default)]
    pub prompts: Vec<PromptDefinition>,
}
