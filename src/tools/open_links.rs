//! `open_links` (LOW risk): opens each URL in the system default browser.

use crate::errors::{AppError, AppResult};
use crate::models::RiskTier;
use crate::tools::{Tool, parse_http_url};
use async_trait::async_trait;
use serde_json::{Value, json};

#[derive(Debug)]
pub struct OpenLinksTool;

#[async_trait]
impl Tool for OpenLinksTool {
    fn name(&self) -> &'static str {
        "open_links"
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Low
    }

    fn validate(&self, input: &Value) -> AppResult<Value> {
        let urls = input
            .get("urls")
            .and_then(Value::as_array)
            .ok_or_else(|| AppError::InvalidToolInput("open_links requires a urls array".into()))?;
        if urls.is_empty() || urls.len() > 20 {
            return Err(AppError::InvalidToolInput("urls must contain between 1 and 20 entries".into()));
        }
        let mut validated = Vec::with_capacity(urls.len());
        for u in urls {
            let raw = u.as_str().ok_or_else(|| AppError::InvalidToolInput("each url must be a string".into()))?;
            let parsed = parse_http_url(raw)
                .ok_or_else(|| AppError::InvalidToolInput(format!("not a valid http(s) url: {raw}")))?;
            validated.push(parsed.to_string());
        }
        Ok(json!({ "urls": validated }))
    }

    async fn run(&self, validated: Value) -> anyhow::Result<Value> {
        let urls = validated["urls"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("validated open_links input missing urls"))?;
        let mut opened = Vec::with_capacity(urls.len());
        for u in urls {
            let url = u.as_str().unwrap_or_default().to_string();
            let handle = url.clone();
            tokio::task::spawn_blocking(move || open::that(&handle)).await??;
            opened.push(url);
        }
        Ok(json!({ "opened": opened }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_urls() {
        let tool = OpenLinksTool;
        let err = tool.validate(&json!({"urls": []})).unwrap_err();
        assert!(matches!(err, AppError::InvalidToolInput(_)));
    }

    #[test]
    fn rejects_non_http_scheme() {
        let tool = OpenLinksTool;
        let err = tool.validate(&json!({"urls": ["file:///etc/passwd"]})).unwrap_err();
        assert!(matches!(err, AppError::InvalidToolInput(_)));
    }

    #[test]
    fn accepts_valid_urls() {
        let tool = OpenLinksTool;
        let validated = tool.validate(&json!({"urls": ["https://example.com/page"]})).unwrap();
        assert_eq!(validated["urls"][0], "https://example.com/page");
    }

    #[test]
    fn rejects_more_than_twenty_urls() {
        let tool = OpenLinksTool;
        let urls: Vec<Value> = (0..21).map(|i| json!(format!("https://example.com/{i}"))).collect();
        let err = tool.validate(&json!({"urls": urls})).unwrap_err();
        assert!(matches!(err, AppError::InvalidToolInput(_)));
    }
}
