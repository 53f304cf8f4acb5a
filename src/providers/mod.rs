//! LLM Provider: generates a structured response from a user message
//! plus history, with a bounded JSON repair loop shared by every backend.

pub mod gemini;
pub mod ollama;
pub mod repair;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DraftOut {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPlanOut {
    #[serde(default)]
    pub actions: Vec<serde_json::Value>,
}

/// The guaranteed-shape result of [`LlmProvider::generate_draft`]: on
/// success, `draft.content` and `assistant_message` are both non-empty.
#[derive(Debug, Clone)]
pub struct DraftResponse {
    pub assistant_message: String,
    pub draft: DraftOut,
    pub tool_plan: Option<ToolPlanOut>,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate_draft(&self, user_message: &str, history: &[ChatMessage]) -> anyhow::Result<DraftResponse>;
}
