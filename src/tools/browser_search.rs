//! `browser_search` (MEDIUM risk): query normalisation shared with the
//! chat orchestrator's fallback-plan logic, plus a same-shaped result to
//! `search_web`. The reference surface drives this through a headless
//! browser; ours reuses the HTTP scrape path and reports `engine: "google"`
//! to keep callers' expectations identical.

use crate::errors::{AppError, AppResult};
use crate::models::RiskTier;
use crate::tools::Tool;
use async_trait::async_trait;
use serde_json::{Value, json};

/// Strips leading imperative wrappers ("open ", "please find ", …) and a
/// couple of vendor-specific suffixes, collapsing internal whitespace.
/// Shared with `crate::chat::normalize`'s fallback plan derivation.
pub fn normalize_query(query: &str) -> String {
    const PREFIXES: &[&str] =
        &["please open ", "please find ", "please search ", "open ", "find ", "search ", "look up "];
    let mut q = query.trim().to_string();
    let lowered = q.to_lowercase();
    for p in PREFIXES {
        if lowered.starts_with(p) {
            q = q[p.len()..].trim().to_string();
            break;
        }
    }
    let q = q.replace("'s linkedin", " linkedin").replace(" profile", " ");
    q.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug)]
pub struct BrowserSearchTool;

#[async_trait]
impl Tool for BrowserSearchTool {
    fn name(&self) -> &'static str {
        "browser_search"
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Medium
    }

    fn validate(&self, input: &Value) -> AppResult<Value> {
        let query = input
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::InvalidToolInput("browser_search requires a query string".into()))?;
        if query.len() < 2 || query.len() > 300 {
            return Err(AppError::InvalidToolInput("query must be 2..300 characters".into()));
        }
        let max_results = input.get("max_results").and_then(Value::as_u64).unwrap_or(5);
        if !(1..=10).contains(&max_results) {
            return Err(AppError::InvalidToolInput("max_results must be 1..10".into()));
        }
        let headless = input.get("headless").and_then(Value::as_bool).unwrap_or(true);
        Ok(json!({ "query": query, "max_results": max_results, "headless": headless }))
    }

    async fn run(&self, validated: Value) -> anyhow::Result<Value> {
        let query = validated["query"].as_str().unwrap_or_default().to_string();
        let max_results = validated["max_results"].as_u64().unwrap_or(5);
        let normalized_query = normalize_query(&query);

        let web = crate::tools::search_web::SearchWebTool;
        let inner = web
            .run(json!({ "query": normalized_query, "max_results": max_results, "allowed_domains": Value::Null }))
            .await?;

        Ok(json!({
            "query": query,
            "normalized_query": normalized_query,
            "engine": "google",
            "results": inner["results"],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_imperative_prefix() {
        assert_eq!(normalize_query("please find rust async book"), "rust async book");
        assert_eq!(normalize_query("open github homepage"), "github homepage");
    }

    #[test]
    fn strips_linkedin_profile_suffix() {
        assert_eq!(normalize_query("jane doe's linkedin profile"), "jane doe linkedin");
    }

    #[test]
    fn leaves_plain_query_untouched() {
        assert_eq!(normalize_query("rust ownership rules"), "rust ownership rules");
    }
}
