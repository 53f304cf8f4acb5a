//! Execution Service: rechecks the approval's content-addressed
//! digests, enforces plan binding and risk policy, then runs one tool via
//! [`crate::tools::ToolRegistry`] and writes the audit row. Grounded on the
//! original `execution_service.py`.

use crate::canon;
use crate::errors::{AppError, AppResult};
use crate::models::{Execution, ExecutionStatus, RiskTier};
use crate::store::Store;
use crate::tools::ToolRegistry;
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;

pub struct ExecutionService {
    store: Arc<dyn Store>,
    tools: Arc<ToolRegistry>,
}

impl ExecutionService {
    pub fn new(store: Arc<dyn Store>, tools: Arc<ToolRegistry>) -> Self {
        Self { store, tools }
    }

    pub async fn execute(
        &self,
        approval_id: &str,
        tool_name: &str,
        tool_input: Value,
        confirmation: Option<Value>,
    ) -> AppResult<Execution> {
        let approval = self
            .store
            .get_approval(approval_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Approval {approval_id} not found")))?;
        let draft = self
            .store
            .get_draft(&approval.draft_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Draft {} not found", approval.draft_id)))?;

        if canon::sha256_text(&draft.content) != approval.draft_hash {
            return Err(AppError::PlanViolation("Draft content changed since approval".to_string()));
        }
        let current_toolplan_hash = draft.tool_plan.as_ref().map(|p| p.content_hash.clone());
        if current_toolplan_hash != approval.toolplan_hash {
            return Err(AppError::PlanViolation("Tool plan changed since approval".to_string()));
        }

        check_plan_binding(draft.tool_plan.as_ref().map(|p| p.json_canonical.as_str()), tool_name, &tool_input)?;

        let tool = self.tools.get(tool_name)?;
        enforce_risk_policy(tool.risk(), &tool_input, confirmation.as_ref())?;
        let validated = tool.validate(&tool_input)?;

        let (_, tool_input_hash) = canon::canonical_hash(&tool_input);
        let started_at = Utc::now();
        let request_json = canon::canonicalise_string(&json!({
            "tool_input": tool_input,
            "confirmation": confirmation,
            "tool_input_hash": tool_input_hash,
            "started_at": started_at.to_rfc3339(),
        }));
        let execution = self.store.create_execution(approval_id, tool_name, &request_json).await?;

        let clock = Instant::now();
        let run_result = tool.run(validated).await;
        let finished_at = Utc::now();
        let duration_ms = clock.elapsed().as_millis() as i64;
        let meta = json!({
            "started_at": started_at.to_rfc3339(),
            "finished_at": finished_at.to_rfc3339(),
            "duration_ms": duration_ms,
        });

        let (status, result_json) = match run_result {
            Ok(output) => {
                (ExecutionStatus::Succeeded, canon::canonicalise_string(&json!({ "output": output, "error": null, "meta": meta })))
            }
            Err(err) => {
                (ExecutionStatus::Failed, canon::canonicalise_string(&json!({ "output": null, "error": err.to_string(), "meta": meta })))
            }
        };

        self.store.finish_execution(&execution.id, status, &result_json).await
    }
}

/// `tool_input` must exactly match, under canonical comparison, the
/// `params` of at least one action in the frozen plan whose `tool` field
/// equals `tool_name`. With no plan, only `{}` is accepted.
fn check_plan_binding(plan_json: Option<&str>, tool_name: &str, tool_input: &Value) -> AppResult<()> {
    let Some(plan_json) = plan_json else {
        if tool_input.as_object().is_some_and(|o| o.is_empty()) {
            return Ok(());
        }
        return Err(AppError::PlanViolation("No tool plan exists for this draft".to_string()));
    };
    let plan: Value = serde_json::from_str(plan_json)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("stored tool plan is not valid JSON: {e}")))?;
    let (canonical_input, _) = canon::canonical_hash(tool_input);
    let actions = plan.get("actions").and_then(Value::as_array).cloned().unwrap_or_default();
    let matches = actions.iter().any(|action| {
        action.get("tool").and_then(Value::as_str) == Some(tool_name)
            && action.get("params").map(|p| canon::canonicalise_string(p) == canonical_input).unwrap_or(false)
    });
    if matches { Ok(()) } else { Err(AppError::PlanViolation("tool_input does not match the approved plan".to_string())) }
}

/// LOW needs nothing. MEDIUM/HIGH need a `confirmation` object; every
/// string `id` under `tool_input.actions` must appear in
/// `confirmation.approved_actions` (vacuously true with no actions). HIGH
/// additionally requires `confirmation.allow_high_risk == true`.
fn enforce_risk_policy(risk: RiskTier, tool_input: &Value, confirmation: Option<&Value>) -> AppResult<()> {
    if risk == RiskTier::Low {
        return Ok(());
    }
    let confirmation = confirmation
        .ok_or_else(|| AppError::ConfirmationRequired("This action requires confirmation".to_string()))?;
    let action_ids = extract_action_ids(tool_input);
    let approved: Vec<&str> = confirmation
        .get("approved_actions")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if !action_ids.iter().all(|id| approved.contains(&id.as_str())) {
        return Err(AppError::ConfirmationRequired("Not all actions were approved".to_string()));
    }
    if risk == RiskTier::High && confirmation.get("allow_high_risk").and_then(Value::as_bool) != Some(true) {
        return Err(AppError::ConfirmationRequired("High-risk actions require allow_high_risk".to_string()));
    }
    Ok(())
}

fn extract_action_ids(tool_input: &Value) -> Vec<String> {
    tool_input
        .get("actions")
        .and_then(Value::as_array)
        .map(|actions| actions.iter().filter_map(|a| a.get("id").and_then(Value::as_str).map(str::to_string)).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalService;
    use crate::store::sqlite::SqliteStore;

    async fn harness() -> (ExecutionService, ApprovalService, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let tools = Arc::new(ToolRegistry::default_registry());
        (ExecutionService::new(store.clone(), tools), ApprovalService::new(store.clone()), store)
    }

    #[tokio::test]
    async fn low_risk_tool_runs_without_confirmation() {
        let (exec, approval_svc, store) = harness().await;
        let conv = store.create_conversation("c").await.unwrap();
        let draft = store.create_draft(&conv.id, "t", "content").await.unwrap();
        let plan = json!({ "actions": [{ "tool": "open_links", "risk": "LOW", "params": { "urls": ["https://example.com/"] } }] });
        approval_svc.upsert_tool_plan(&draft.id, &plan).await.unwrap();
        let approval = approval_svc.approve(&draft.id).await.unwrap();

        let result = exec
            .execute(&approval.id, "open_links", json!({ "urls": ["https://example.com/"] }), None)
            .await
            .unwrap();
        // Whether the sandboxed test environment has a default browser to
        // hand off to is out of this test's control; what matters is that
        // policy checks passed and the row reached a terminal state.
        assert!(result.status.is_terminal());
    }

    #[tokio::test]
    async fn mismatched_tool_input_is_plan_violation() {
        let (exec, approval_svc, store) = harness().await;
        let conv = store.create_conversation("c").await.unwrap();
        let draft = store.create_draft(&conv.id, "t", "content").await.unwrap();
        let plan = json!({ "actions": [{ "tool": "open_links", "risk": "LOW", "params": { "urls": ["https://example.com/"] } }] });
        approval_svc.upsert_tool_plan(&draft.id, &plan).await.unwrap();
        let approval = approval_svc.approve(&draft.id).await.unwrap();

        let err = exec
            .execute(&approval.id, "open_links", json!({ "urls": ["https://evil.example/"] }), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PlanViolation(_)));
    }

    #[tokio::test]
    async fn medium_risk_without_confirmation_is_rejected() {
        let (exec, approval_svc, store) = harness().await;
        let conv = store.create_conversation("c").await.unwrap();
        let draft = store.create_draft(&conv.id, "t", "content").await.unwrap();
        let plan = json!({ "actions": [{ "tool": "browser_search", "risk": "MEDIUM", "params": { "query": "rust async" } }] });
        approval_svc.upsert_tool_plan(&draft.id, &plan).await.unwrap();
        let approval = approval_svc.approve(&draft.id).await.unwrap();

        let err = exec.execute(&approval.id, "browser_search", json!({ "query": "rust async" }), None).await.unwrap_err();
        assert!(matches!(err, AppError::ConfirmationRequired(_)));
    }

    #[tokio::test]
    async fn high_risk_requires_allow_high_risk_flag() {
        let (exec, approval_svc, store) = harness().await;
        let conv = store.create_conversation("c").await.unwrap();
        let draft = store.create_draft(&conv.id, "t", "content").await.unwrap();
        let input = json!({ "actions": [{ "id": "a1", "type": "goto", "url": "https://example.com" }] });
        let plan = json!({ "actions": [{ "tool": "browser_automation", "risk": "HIGH", "params": input.clone() }] });
        approval_svc.upsert_tool_plan(&draft.id, &plan).await.unwrap();
        let approval = approval_svc.approve(&draft.id).await.unwrap();

        let confirmation = json!({ "approved_actions": ["a1"] });
        let err = exec.execute(&approval.id, "browser_automation", input.clone(), Some(confirmation)).await.unwrap_err();
        assert!(matches!(err, AppError::ConfirmationRequired(_)));

        let confirmation = json!({ "approved_actions": ["a1"], "allow_high_risk": true });
        let result = exec.execute(&approval.id, "browser_automation", input, Some(confirmation)).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Succeeded);
    }

    #[tokio::test]
    async fn no_plan_only_accepts_empty_input() {
        let (exec, approval_svc, store) = harness().await;
        let conv = store.create_conversation("c").await.unwrap();
        let draft = store.create_draft(&conv.id, "t", "content").await.unwrap();
        let approval = approval_svc.approve(&draft.id).await.unwrap();

        let err = exec
            .execute(&approval.id, "open_links", json!({ "urls": ["https://example.com/"] }), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PlanViolation(_)));
    }
}
