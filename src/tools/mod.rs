//! Tool Registry: name → descriptor, lookup and validation only. No
//! execution policy lives here — that is [`crate::execution`]'s job.

pub mod browser_automation;
pub mod browser_search;
pub mod open_links;
pub mod search_web;

use crate::errors::{AppError, AppResult};
use crate::models::RiskTier;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// A single tool: validates its own input shape and runs synchronously
/// from the caller's perspective (dispatch to a blocking task is the
/// execution service's concern).
#[async_trait]
pub trait Tool: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;
    fn risk(&self) -> RiskTier;
    /// Turns an untyped JSON object into a validated value, or fails with
    /// `INVALID_TOOL_INPUT`.
    fn validate(&self, input: &Value) -> AppResult<Value>;
    async fn run(&self, validated: Value) -> anyhow::Result<Value>;
}

/// Stateless name-keyed map. Tool instances may carry their own
/// configuration but the registry shares no mutable state across callers.
pub struct ToolRegistry {
    tools: HashMap<&'static str, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn get(&self, name: &str) -> AppResult<&dyn Tool> {
        self.tools
            .get(name)
            .map(|t| t.as_ref())
            .ok_or_else(|| AppError::NotFound(format!("Unknown tool: {name}")))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.keys().copied().collect()
    }

    /// The registry this binary ships with, wired with the four reference
    /// tools.
    pub fn default_registry() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(open_links::OpenLinksTool));
        registry.register(Box::new(search_web::SearchWebTool));
        registry.register(Box::new(browser_search::BrowserSearchTool));
        registry.register(Box::new(browser_automation::BrowserAutomationTool));
        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::default_registry()
    }
}

/// Shared URL sanitation: parses `s` and requires an http(s) scheme and a
/// host, returning the normalised string form. Used by both `open_links`
/// validation and `browser_automation`'s action-target validation.
pub fn parse_http_url(s: &str) -> Option<url::Url> {
    let parsed = url::Url::parse(s).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    if parsed.host_str().is_none() {
        return None;
    }
    Some(parsed)
}
