//! Request/response bodies for the HTTP surface. Kept separate from the
//! domain models in [`crate::models`] since the wire shape (e.g. a
//! flattened `draft.type`) isn't identical to storage shape.

use crate::models::{Approval, Conversation, Draft, Execution, Message};
use crate::rag::RagHit;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub conversation_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub force_file_search: bool,
}

#[derive(Debug, Serialize)]
pub struct DraftDto {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub title: String,
    pub content: String,
    pub status: String,
}

impl From<&Draft> for DraftDto {
    fn from(d: &Draft) -> Self {
        Self { id: d.id.clone(), kind: "assistant", title: d.title.clone(), content: d.content.clone(), status: d.status.as_str().to_string() }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub conversation_id: String,
    pub assistant_message: String,
    pub draft: DraftDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_plan: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rag_hits: Option<Vec<RagHit>>,
    pub rag_permission_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rag_permission_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rag_suggested_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateDraftRequest {
    pub title: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct ApproveResponse {
    pub approval_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionRequest {
    pub approval_id: String,
    pub tool_name: String,
    #[serde(default = "default_tool_input")]
    pub tool_input: Value,
    pub confirmation: Option<Value>,
}

fn default_tool_input() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Serialize)]
pub struct ExecutionResponse {
    pub execution_id: String,
    pub status: String,
    pub result: Value,
}

impl From<&Execution> for ExecutionResponse {
    fn from(e: &Execution) -> Self {
        let result = serde_json::from_str(&e.result_json).unwrap_or(Value::Null);
        Self { execution_id: e.id.clone(), status: e.status.as_str().to_string(), result }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConversationsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct ConversationDto {
    pub id: String,
    pub title: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Conversation> for ConversationDto {
    fn from(c: &Conversation) -> Self {
        Self { id: c.id.clone(), title: c.title.clone(), created_at: c.created_at }
    }
}

#[derive(Debug, Serialize)]
pub struct ConversationPageDto {
    pub items: Vec<ConversationDto>,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct MessageDto {
    pub id: String,
    pub role: String,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Message> for MessageDto {
    fn from(m: &Message) -> Self {
        Self { id: m.id.clone(), role: m.role.as_str().to_string(), content: m.content.clone(), created_at: m.created_at }
    }
}

#[derive(Debug, Serialize)]
pub struct ConversationDetailDto {
    pub id: String,
    pub title: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub messages: Vec<MessageDto>,
    pub latest_draft: Option<DraftDto>,
}

#[derive(Debug, Serialize)]
pub struct ApprovalDto {
    pub id: String,
    pub draft_id: String,
    pub draft_hash: String,
    pub toolplan_hash: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Approval> for ApprovalDto {
    fn from(a: &Approval) -> Self {
        Self { id: a.id.clone(), draft_id: a.draft_id.clone(), draft_hash: a.draft_hash.clone(), toolplan_hash: a.toolplan_hash.clone(), created_at: a.created_at }
    }
}

#[derive(Debug, Serialize)]
pub struct AuditEntryDto {
    pub approval: ApprovalDto,
    pub executions: Vec<ExecutionResponse>,
}

#[derive(Debug, Deserialize)]
pub struct SetPermissionsRequest {
    pub roots: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct GrantPermissionRequest {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct PermissionsResponse {
    pub roots: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DrivesResponse {
    pub drives: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListDirsQuery {
    pub path: Option<String>,
    #[serde(default = "default_dirs_limit")]
    pub limit: usize,
}

fn default_dirs_limit() -> usize {
    300
}

#[derive(Debug, Serialize)]
pub struct DirsResponse {
    pub dirs: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct IndexRequest {
    pub roots: Option<Vec<String>>,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_max_files() -> usize {
    1500
}

#[derive(Debug, Deserialize)]
pub struct RagSearchRequest {
    pub query: String,
    #[serde(default = "default_search_top_k")]
    pub top_k: usize,
    pub roots: Option<Vec<String>>,
}

fn default_search_top_k() -> usize {
    4
}

#[derive(Debug, Serialize)]
pub struct RagSearchResponse {
    pub hits: Vec<RagHit>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub app_name: String,
    pub env: String,
    pub llm_provider: String,
    pub provider_present: bool,
}
