//! HTTP surface: an `axum::Router` over shared `AppState`, built around a
//! typed-`State` pattern.

pub mod dto;
mod handlers;

use crate::approval::ApprovalService;
use crate::chat::ChatOrchestrator;
use crate::config::Settings;
use crate::execution::ExecutionService;
use crate::providers::LlmProvider;
use crate::rag::RagService;
use crate::store::Store;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub chat: Arc<ChatOrchestrator>,
    pub approvals: Arc<ApprovalService>,
    pub execution: Arc<ExecutionService>,
    pub rag: Arc<RagService>,
    pub settings: Arc<Settings>,
}

pub fn build_router(store: Arc<dyn Store>, llm: Arc<dyn LlmProvider>, rag: Arc<RagService>, settings: Arc<Settings>) -> Router {
    let approvals = Arc::new(ApprovalService::new(store.clone()));
    let execution = Arc::new(ExecutionService::new(store.clone(), Arc::new(crate::tools::ToolRegistry::default_registry())));
    let chat = Arc::new(ChatOrchestrator::new(store.clone(), llm, rag.clone()));
    let state = AppState { store, chat, approvals, execution, rag, settings: settings.clone() };

    let cors = if settings.cors_origins.is_empty() {
        CorsLayer::new()
    } else {
        let origins: Vec<axum::http::HeaderValue> = settings.cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };

    Router::new()
        .route("/v1/chat", post(handlers::chat))
        .route("/v1/drafts/{id}/update", post(handlers::update_draft))
        .route("/v1/drafts/{id}/approve", post(handlers::approve_draft))
        .route("/v1/executions", post(handlers::create_execution))
        .route("/v1/conversations", get(handlers::list_conversations))
        .route("/v1/conversations/{id}", get(handlers::get_conversation))
        .route("/v1/conversations/{id}/audit", get(handlers::get_audit))
        .route("/v1/rag/permissions", get(handlers::get_permissions).post(handlers::set_permissions))
        .route("/v1/rag/permissions/grant", post(handlers::grant_permission))
        .route("/v1/rag/permissions/revoke", post(handlers::revoke_permission))
        .route("/v1/rag/drives", get(handlers::drives))
        .route("/v1/rag/list_dirs", get(handlers::list_dirs))
        .route("/v1/rag/status", get(handlers::rag_status))
        .route("/v1/rag/index", post(handlers::rag_index))
        .route("/v1/rag/search", post(handlers::rag_search))
        .route("/v1/health", get(handlers::health))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::PromptPack;
    use crate::providers::ollama::OllamaProvider;
    use crate::store::sqlite::SqliteStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> (Router, tempfile::TempDir) {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let dir = tempfile::tempdir().unwrap();
        let rag = Arc::new(RagService::new(dir.path(), 800, 100, 256).unwrap());
        let settings = Arc::new(Settings::default());
        let pack = PromptPack { system: "system".to_string(), repair: "repair".to_string() };
        let llm: Arc<dyn LlmProvider> = Arc::new(OllamaProvider::new(
            settings.ollama_base_url.clone(),
            settings.ollama_model.clone(),
            pack.system,
            pack.repair,
            std::time::Duration::from_secs(settings.llm_timeout_s),
        ));
        (build_router(store, llm, rag, settings), dir)
    }

    #[tokio::test]
    async fn health_endpoint_reports_configured_provider() {
        let (app, _dir) = router();
        let response = app.oneshot(Request::builder().uri("/v1/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_conversation_returns_404_envelope() {
        let (app, _dir) = router();
        let response =
            app.oneshot(Request::builder().uri("/v1/conversations/does-not-exist").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rag_status_reports_no_approved_roots_initially() {
        let (app, _dir) = router();
        let response = app.oneshot(Request::builder().uri("/v1/rag/status").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
