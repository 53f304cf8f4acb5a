//! Persistence contract: interfaces only — the SQL layer itself is
//! an external collaborator. [`sqlite`] provides the concrete
//! implementation this binary ships with so the system is runnable end
//! to end.

pub mod sqlite;

use crate::errors::AppResult;
use crate::models::{Approval, Conversation, Draft, Execution, ExecutionStatus, Message, MessageRole, ToolPlan};
use async_trait::async_trait;

/// A page of conversations, newest first.
pub struct ConversationPage {
    pub items: Vec<Conversation>,
    pub total: i64,
}

/// Transactional upsert of a `ToolPlan` tied 1-1 to a `Draft`; single-row
/// get/update for `Draft`/`Approval`/`Execution`; ordered scans over
/// `Message` by conversation. No cross-conversation queries are required
/// by the core.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_conversation(&self, title: &str) -> AppResult<Conversation>;
    async fn get_conversation(&self, id: &str) -> AppResult<Option<Conversation>>;
    async fn list_conversations(&self, limit: i64, offset: i64) -> AppResult<ConversationPage>;
    /// Deletes a conversation and cascades to its messages and drafts (and
    /// their tool plans/approvals/executions).
    async fn delete_conversation(&self, id: &str) -> AppResult<bool>;

    async fn list_messages(&self, conversation_id: &str) -> AppResult<Vec<Message>>;
    async fn add_message(&self, conversation_id: &str, role: MessageRole, content: &str) -> AppResult<Message>;

    async fn create_draft(&self, conversation_id: &str, title: &str, content: &str) -> AppResult<Draft>;
    async fn get_draft(&self, id: &str) -> AppResult<Option<Draft>>;
    async fn latest_draft(&self, conversation_id: &str) -> AppResult<Option<Draft>>;
    /// Fails unless the draft is `DRAFTING`.
    async fn update_draft(&self, id: &str, title: Option<&str>, content: Option<&str>) -> AppResult<()>;
    /// Creates or overwrites the draft's one-to-one `ToolPlan`. Fails
    /// unless the draft is `DRAFTING`.
    async fn upsert_tool_plan(&self, draft_id: &str, json_canonical: &str, content_hash: &str) -> AppResult<ToolPlan>;

    /// Atomically creates the `Approval` row and transitions the draft to
    /// `APPROVED_LOCKED`. Fails if the draft is not `DRAFTING`.
    async fn approve_draft(&self, draft_id: &str, draft_hash: &str, toolplan_hash: Option<&str>) -> AppResult<Approval>;
    async fn get_approval(&self, id: &str) -> AppResult<Option<Approval>>;
    async fn list_approvals_with_executions(&self, conversation_id: &str) -> AppResult<Vec<(Approval, Vec<Execution>)>>;

    /// Creates an `Execution` row already in `RUNNING` (the reference flow
    /// never emits `PENDING`).
    async fn create_execution(&self, approval_id: &str, tool_name: &str, request_json: &str) -> AppResult<Execution>;
    /// Finalises a `RUNNING` execution to a terminal status. Terminal
    /// statuses never transition again.
    async fn finish_execution(&self, id: &str, status: ExecutionStatus, result_json: &str) -> AppResult<Execution>;
    async fn get_execution(&self, id: &str) -> AppResult<Option<Execution>>;
}
