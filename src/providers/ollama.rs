//! HTTP-to-local-engine backend (Ollama's `/api/generate`). Shares the
//! bounded repair loop with [`super::gemini`] instead of raising on the
//! first invalid response.

use super::{ChatMessage, DraftResponse, LlmProvider};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    system_prompt: String,
    repair_prompt: String,
    timeout: Duration,
    max_repair_attempts: u32,
}

impl OllamaProvider {
    pub fn new(base_url: String, model: String, system_prompt: String, repair_prompt: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            model,
            system_prompt,
            repair_prompt,
            timeout,
            max_repair_attempts: 2,
        }
    }

    async fn generate(&self, prompt: String) -> anyhow::Result<String> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url.trim_end_matches('/')))
            .json(&json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
                "options": { "temperature": 0.4 },
            }))
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = response.json().await?;
        Ok(body.get("response").and_then(|v| v.as_str()).unwrap_or_default().trim().to_string())
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn generate_draft(&self, user_message: &str, history: &[ChatMessage]) -> anyhow::Result<DraftResponse> {
        super::repair::generate_with_repair(
            &self.system_prompt,
            &self.repair_prompt,
            history,
            user_message,
            self.max_repair_attempts,
            |prompt| self.generate(prompt),
        )
        .await
    }
}
