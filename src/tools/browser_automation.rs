//! `browser_automation` (HIGH risk): an ordered list of typed actions
//! against a page. `dry_run` (the default) returns the validated plan
//! without touching a browser — the only mode this binary executes, since
//! driving a real browser engine is outside this crate's scope (see
//! DESIGN.md).

use crate::errors::{AppError, AppResult};
use crate::models::RiskTier;
use crate::tools::{Tool, parse_http_url};
use async_trait::async_trait;
use serde_json::{Value, json};

const ACTION_TYPES: &[&str] = &["goto", "click", "fill", "press", "wait_for"];

fn validate_action(action: &Value) -> AppResult<Value> {
    let id = action
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty() && s.len() <= 64)
        .ok_or_else(|| AppError::InvalidToolInput("action requires a non-empty id (max 64 chars)".into()))?;
    let action_type = action
        .get("type")
        .and_then(Value::as_str)
        .filter(|t| ACTION_TYPES.contains(t))
        .ok_or_else(|| AppError::InvalidToolInput(format!("action type must be one of {ACTION_TYPES:?}")))?;
    let selector = action.get("selector").and_then(Value::as_str);
    let value = action.get("value").and_then(Value::as_str);
    let url = action.get("url").and_then(Value::as_str);
    let timeout_ms = action.get("timeout_ms").and_then(Value::as_u64).unwrap_or(10_000);
    if !(100..=120_000).contains(&timeout_ms) {
        return Err(AppError::InvalidToolInput("timeout_ms must be 100..120000".into()));
    }

    let mut url_out = None;
    if action_type == "goto" {
        let raw = url.ok_or_else(|| AppError::InvalidToolInput("goto action requires url".into()))?;
        let parsed = parse_http_url(raw).ok_or_else(|| AppError::InvalidToolInput(format!("invalid url: {raw}")))?;
        url_out = Some(parsed.to_string());
    }
    if matches!(action_type, "click" | "fill" | "wait_for") && selector.unwrap_or("").trim().is_empty() {
        return Err(AppError::InvalidToolInput(format!("{action_type} action requires selector")));
    }
    if matches!(action_type, "fill" | "press") && value.is_none() {
        return Err(AppError::InvalidToolInput(format!("{action_type} action requires value")));
    }

    Ok(json!({
        "id": id,
        "type": action_type,
        "selector": selector,
        "value": value,
        "url": url_out,
        "timeout_ms": timeout_ms,
    }))
}

#[derive(Debug)]
pub struct BrowserAutomationTool;

#[async_trait]
impl Tool for BrowserAutomationTool {
    fn name(&self) -> &'static str {
        "browser_automation"
    }

    fn risk(&self) -> RiskTier {
        RiskTier::High
    }

    fn validate(&self, input: &Value) -> AppResult<Value> {
        let start_url = match input.get("start_url") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => {
                let parsed =
                    parse_http_url(s).ok_or_else(|| AppError::InvalidToolInput(format!("invalid start_url: {s}")))?;
                Some(parsed.to_string())
            }
            Some(_) => return Err(AppError::InvalidToolInput("start_url must be a string".into())),
        };
        let actions = input
            .get("actions")
            .and_then(Value::as_array)
            .ok_or_else(|| AppError::InvalidToolInput("browser_automation requires an actions array".into()))?;
        if actions.is_empty() || actions.len() > 20 {
            return Err(AppError::InvalidToolInput("actions must contain between 1 and 20 entries".into()));
        }
        let validated_actions =
            actions.iter().map(validate_action).collect::<AppResult<Vec<_>>>()?;
        let headless = input.get("headless").and_then(Value::as_bool).unwrap_or(true);
        let dry_run = input.get("dry_run").and_then(Value::as_bool).unwrap_or(true);

        Ok(json!({
            "start_url": start_url,
            "actions": validated_actions,
            "headless": headless,
            "dry_run": dry_run,
        }))
    }

    async fn run(&self, validated: Value) -> anyhow::Result<Value> {
        if !validated["dry_run"].as_bool().unwrap_or(true) {
            anyhow::bail!("live browser automation is not available in this deployment; use dry_run");
        }
        Ok(json!({
            "dry_run": true,
            "start_url": validated["start_url"],
            "actions": validated["actions"],
        }))
    }
}
