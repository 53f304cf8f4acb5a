//! Route handlers. Each one is a thin translation from [`super::dto`]
//! shapes to the service layer and back — no business logic lives here,
//! keeping handlers a dispatch layer over the domain services.

use super::AppState;
use super::dto::*;
use crate::chat::ChatTurnRequest;
use crate::errors::{AppError, AppResult};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

/// Runs a blocking RAG closure off the async executor, mirroring
/// `SqliteStore::with_conn`'s dispatch-to-`spawn_blocking` shape.
async fn rag_blocking<T, F>(f: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("blocking task panicked: {e}")))?
        .map_err(|e| AppError::InvalidRequest(e.to_string()))
}

pub async fn chat(State(state): State<AppState>, Json(body): Json<ChatRequest>) -> AppResult<Json<ChatResponse>> {
    let resp = state
        .chat
        .handle(ChatTurnRequest { conversation_id: body.conversation_id, message: body.message, force_file_search: body.force_file_search })
        .await?;
    Ok(Json(ChatResponse {
        conversation_id: resp.conversation_id,
        assistant_message: resp.assistant_message,
        draft: DraftDto::from(&resp.draft),
        tool_plan: resp.tool_plan,
        rag_hits: resp.rag_hits,
        rag_permission_required: resp.rag_permission_required,
        rag_permission_message: resp.rag_permission_message,
        rag_suggested_path: resp.rag_suggested_path,
    }))
}

pub async fn update_draft(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateDraftRequest>,
) -> AppResult<Json<OkResponse>> {
    let draft = state.store.get_draft(&id).await?.ok_or_else(|| AppError::NotFound(format!("Draft {id} not found")))?;
    if draft.status != crate::models::DraftStatus::Drafting {
        return Err(AppError::DraftLocked("Draft is locked".to_string()));
    }
    state.store.update_draft(&id, body.title.as_deref(), body.content.as_deref()).await?;
    Ok(Json(OkResponse { ok: true }))
}

pub async fn approve_draft(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<ApproveResponse>> {
    let approval = state.approvals.approve(&id).await?;
    Ok(Json(ApproveResponse { approval_id: approval.id }))
}

pub async fn create_execution(State(state): State<AppState>, Json(body): Json<ExecutionRequest>) -> AppResult<Json<ExecutionResponse>> {
    let execution = state.execution.execute(&body.approval_id, &body.tool_name, body.tool_input, body.confirmation).await?;
    Ok(Json(ExecutionResponse::from(&execution)))
}

pub async fn list_conversations(State(state): State<AppState>, Query(q): Query<ConversationsQuery>) -> AppResult<Json<ConversationPageDto>> {
    let limit = q.limit.clamp(1, 200);
    let offset = q.offset.max(0);
    let page = state.store.list_conversations(limit, offset).await?;
    Ok(Json(ConversationPageDto { items: page.items.iter().map(ConversationDto::from).collect(), total: page.total }))
}

pub async fn get_conversation(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<ConversationDetailDto>> {
    let conv = state.store.get_conversation(&id).await?.ok_or_else(|| AppError::NotFound(format!("Conversation {id} not found")))?;
    let messages = state.store.list_messages(&id).await?;
    let latest_draft = state.store.latest_draft(&id).await?;
    Ok(Json(ConversationDetailDto {
        id: conv.id,
        title: conv.title,
        created_at: conv.created_at,
        messages: messages.iter().map(MessageDto::from).collect(),
        latest_draft: latest_draft.as_ref().map(DraftDto::from),
    }))
}

pub async fn get_audit(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Vec<AuditEntryDto>>> {
    state.store.get_conversation(&id).await?.ok_or_else(|| AppError::NotFound(format!("Conversation {id} not found")))?;
    let entries = state.store.list_approvals_with_executions(&id).await?;
    Ok(Json(
        entries
            .iter()
            .map(|(approval, executions)| AuditEntryDto {
                approval: ApprovalDto::from(approval),
                executions: executions.iter().map(ExecutionResponse::from).collect(),
            })
            .collect(),
    ))
}

pub async fn get_permissions(State(state): State<AppState>) -> Json<PermissionsResponse> {
    Json(PermissionsResponse { roots: state.rag.list_permissions() })
}

pub async fn set_permissions(State(state): State<AppState>, Json(body): Json<SetPermissionsRequest>) -> AppResult<Json<PermissionsResponse>> {
    let roots = state.rag.set_permissions(&body.roots).map_err(|e| AppError::InvalidRequest(e.to_string()))?;
    Ok(Json(PermissionsResponse { roots }))
}

pub async fn grant_permission(State(state): State<AppState>, Json(body): Json<GrantPermissionRequest>) -> AppResult<Json<PermissionsResponse>> {
    let roots = state.rag.grant_permission(&body.path).map_err(|e| AppError::InvalidRequest(e.to_string()))?;
    Ok(Json(PermissionsResponse { roots }))
}

pub async fn revoke_permission(State(state): State<AppState>, Json(body): Json<GrantPermissionRequest>) -> AppResult<Json<PermissionsResponse>> {
    let roots = state.rag.revoke_permission(&body.path).map_err(|e| AppError::InvalidRequest(e.to_string()))?;
    Ok(Json(PermissionsResponse { roots }))
}

pub async fn drives(State(state): State<AppState>) -> Json<DrivesResponse> {
    Json(DrivesResponse { drives: state.rag.list_available_drives() })
}

pub async fn list_dirs(State(state): State<AppState>, Query(q): Query<ListDirsQuery>) -> AppResult<Json<DirsResponse>> {
    let rag = state.rag.clone();
    let path = q.path;
    let dirs = rag_blocking(move || rag.list_subdirs(path.as_deref(), q.limit)).await?;
    Ok(Json(DirsResponse { dirs }))
}

pub async fn rag_status(State(state): State<AppState>) -> Json<crate::rag::RagStatus> {
    Json(state.rag.status())
}

pub async fn rag_index(State(state): State<AppState>, Json(body): Json<IndexRequest>) -> AppResult<Json<crate::rag::RagStatus>> {
    let rag = state.rag.clone();
    let status = rag_blocking(move || rag.rebuild_index(body.roots.as_deref(), body.max_files)).await?;
    Ok(Json(status))
}

pub async fn rag_search(State(state): State<AppState>, Json(body): Json<RagSearchRequest>) -> AppResult<Json<RagSearchResponse>> {
    let rag = state.rag.clone();
    let hits = rag_blocking(move || rag.search(&body.query, body.top_k, body.roots.as_deref())).await?;
    Ok(Json(RagSearchResponse { hits }))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider_present = match state.settings.llm_provider.as_str() {
        "gemini" => state.settings.gemini_api_key.as_deref().is_some_and(|k| !k.is_empty()),
        _ => true,
    };
    Json(HealthResponse {
        app_name: state.settings.app_name.clone(),
        env: state.settings.env.clone(),
        llm_provider: state.settings.llm_provider.clone(),
        provider_present,
    })
}

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "detail": "Not found", "error_code": "NOT_FOUND" })))
}
