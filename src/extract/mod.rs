pub mod chat;
pub mod prompts;

pub use chat::ChatExtractor;
pub use prompts::PromptTemplates;

use crate::source::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unknown prompt type: {0}")]
    UnknownPromptType(String),

    #[error("no LLM API key configured")]
    MissingApiKey,

    #[error("LLM provider call failed: {0}")]
    Provider(String),

    #[error("invalid JSON response from model: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The reply parsed but lacks the list expected for the prompt type.
    #[error("response for '{prompt_type}' is missing a '{field}' list")]
    UnexpectedShape {
        prompt_type: String,
        field: String,
    },
}

/// Extracted items grouped by category (`todos`, `events`, `items`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractionResult {
    pub categories: BTreeMap<String, Vec<Value>>,
}

impl ExtractionResult {
    pub fn with_category(mut self, name: impl Into<String>, items: Vec<Value>) -> Self {
        self.categories.insert(name.into(), items);
        self
    }

    pub fn item_count(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }
}

/// Turns a batch of raw messages into categorized items for one prompt type.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        messages: &[Message],
        prompt_type: &str,
    ) -> Result<ExtractionResult, ExtractError>;
}
