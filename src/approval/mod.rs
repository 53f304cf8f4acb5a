//! Approval Service: owns the draft lifecycle's transition into
//! `APPROVED_LOCKED` and writes the content-addressed approval record.
//! Grounded on the original `approval_service.py`.

use crate::canon;
use crate::errors::{AppError, AppResult};
use crate::models::{Approval, DraftStatus, ToolPlan};
use crate::store::Store;
use serde_json::Value;
use std::sync::Arc;

pub struct ApprovalService {
    store: Arc<dyn Store>,
}

impl ApprovalService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Canonicalises `plan` and writes it as the draft's one-to-one
    /// `ToolPlan`, so `content_hash == SHA-256(json_canonical)` holds by
    /// construction. Fails unless the draft is `DRAFTING`.
    pub async fn upsert_tool_plan(&self, draft_id: &str, plan: &Value) -> AppResult<ToolPlan> {
        let draft = self
            .store
            .get_draft(draft_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Draft {draft_id} not found")))?;
        if draft.status != DraftStatus::Drafting {
            return Err(AppError::DraftLocked("Draft is locked".to_string()));
        }
        let (json_canonical, content_hash) = canon::canonical_hash(plan);
        self.store.upsert_tool_plan(draft_id, &json_canonical, &content_hash).await
    }

    /// Freezes the draft: computes `draft_hash`/`toolplan_hash` and writes
    /// the `Approval` row plus the `DRAFTING -> APPROVED_LOCKED` transition
    /// in one atomic operation, so a reader never observes an Approval for
    /// a still-mutable Draft.
    pub async fn approve(&self, draft_id: &str) -> AppResult<Approval> {
        let draft = self
            .store
            .get_draft(draft_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Draft {draft_id} not found")))?;
        if draft.status != DraftStatus::Drafting {
            return Err(AppError::DraftLocked("Draft already locked".to_string()));
        }
        let draft_hash = canon::sha256_text(&draft.content);
        let toolplan_hash = draft.tool_plan.as_ref().map(|p| p.content_hash.clone());
        self.store.approve_draft(draft_id, &draft_hash, toolplan_hash.as_deref()).await
    }
}
