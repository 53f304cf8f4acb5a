//! HTTP-to-hosted-engine backend (Google's Generative Language API),
//! grounded directly on the original assistant's Gemini client — this is
//! where the repair loop in [`super::repair`] was first established.

use super::{ChatMessage, DraftResponse, LlmProvider};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

const ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    system_prompt: String,
    repair_prompt: String,
    timeout: Duration,
    max_repair_attempts: u32,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String, system_prompt: String, repair_prompt: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            system_prompt,
            repair_prompt,
            timeout,
            max_repair_attempts: 2,
        }
    }

    async fn generate(&self, prompt: String) -> anyhow::Result<String> {
        let url = format!("{ENDPOINT}/{}:generateContent?key={}", self.model, self.api_key);
        let payload = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "temperature": 0.2,
            },
        });
        let response = self.client.post(url).json(&payload).timeout(self.timeout).send().await?.error_for_status()?;
        let body: serde_json::Value = response.json().await?;

        let texts: Vec<String> = body["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| parts.iter().filter_map(|p| p["text"].as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        Ok(texts.join("\n").trim().to_string())
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
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
