//! `search_web` (LOW risk): scrapes Google's HTML results page for links,
//! same approach the original assistant used rather than a paid search API.

use crate::errors::{AppError, AppResult};
use crate::models::RiskTier;
use crate::tools::Tool;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use std::sync::OnceLock;
use url::Url;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

fn result_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"href="(/url\?q=[^"]+)""#).unwrap())
}

#[derive(Debug)]
pub struct SearchWebTool;

impl SearchWebTool {
    fn domain_allowed(&self, url: &str, allowed: Option<&[String]>) -> bool {
        let Some(allowed) = allowed else { return true };
        if allowed.is_empty() {
            return true;
        }
        let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)) else {
            return false;
        };
        let host = host.to_lowercase();
        let host = host.trim_end_matches('.');
        allowed.iter().any(|d| {
            let d = d.to_lowercase();
            let d = d.trim_end_matches('.');
            !d.is_empty() && (host == d || host.ends_with(&format!(".{d}")))
        })
    }

    fn extract_links(&self, html: &str) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut links = Vec::new();
        for caps in result_link_re().captures_iter(html) {
            let raw = &caps[1];
            let Ok(parsed) = Url::parse(&format!("https://www.google.com{raw}")) else { continue };
            let Some((_, target)) = parsed.query_pairs().find(|(k, _)| k == "q") else { continue };
            let target = target.into_owned();
            if !target.starts_with("http") || seen.contains(&target) {
                continue;
            }
            seen.insert(target.clone());
            links.push(target);
        }
        links
    }
}

#[async_trait]
impl Tool for SearchWebTool {
    fn name(&self) -> &'static str {
        "search_web"
    }

    fn risk(&self) -> RiskTier {
        RiskTier::Low
    }

    fn validate(&self, input: &Value) -> AppResult<Value> {
        let query = input
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::InvalidToolInput("search_web requires a query string".into()))?;
        if query.len() < 2 || query.len() > 300 {
            return Err(AppError::InvalidToolInput("query must be 2..300 characters".into()));
        }
        let max_results = input.get("max_results").and_then(Value::as_u64).unwrap_or(5);
        if !(1..=10).contains(&max_results) {
            return Err(AppError::InvalidToolInput("max_results must be 1..10".into()));
        }
        let allowed_domains = match input.get("allowed_domains") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => {
                if items.len() > 20 {
                    return Err(AppError::InvalidToolInput("allowed_domains accepts at most 20 entries".into()));
                }
                Some(
                    items
                        .iter()
                        .map(|v| v.as_str().map(str::to_string))
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(|| AppError::InvalidToolInput("allowed_domains entries must be strings".into()))?,
                )
            }
            Some(_) => return Err(AppError::InvalidToolInput("allowed_domains must be an array".into())),
        };
        Ok(json!({ "query": query, "max_results": max_results, "allowed_domains": allowed_domains }))
    }

    async fn run(&self, validated: Value) -> anyhow::Result<Value> {
        let query = validated["query"].as_str().unwrap_or_default().to_string();
        let max_results = validated["max_results"].as_u64().unwrap_or(5);
        let allowed_domains: Option<Vec<String>> = validated["allowed_domains"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect());

        let url = Url::parse_with_params(
            "https://www.google.com/search",
            &[
                ("q", query.as_str()),
                ("num", max_results.to_string().as_str()),
                ("hl", "en"),
                ("pws", "0"),
                ("safe", "active"),
            ],
        )?;

        let client = reqwest::Client::new();
        let body = client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .timeout(std::time::Duration::from_secs(15))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let mut results = Vec::new();
        for link in self.extract_links(&body) {
            if !self.domain_allowed(&link, allowed_domains.as_deref()) {
                continue;
            }
            let host = Url::parse(&link).ok().and_then(|u| u.host_str().map(str::to_string)).unwrap_or_else(|| link.clone());
            results.push(json!({ "title": host, "url": link }));
            if results.len() as u64 >= max_results {
                break;
            }
        }

        Ok(json!({ "query": query, "results": results }))
    }
}
