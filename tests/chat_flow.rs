//! End-to-end HTTP tests covering the draft -> approve -> execute pipeline
//! and the RAG permission-gate branch of the chat turn.

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use latchkey::config::Settings;
use latchkey::gateway::build_router;
use latchkey::prompts::PromptPack;
use latchkey::providers::{ChatMessage, DraftOut, DraftResponse, LlmProvider, ToolPlanOut};
use latchkey::rag::RagService;
use latchkey::store::Store;
use latchkey::store::sqlite::SqliteStore;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// Replays a fixed sequence of responses, one per call, so a test can
/// script exactly what each chat turn should produce.
struct ScriptedProvider {
    responses: Mutex<Vec<DraftResponse>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<DraftResponse>) -> Self {
        // Pop from the back, so push responses in call order.
        let mut responses = responses;
        responses.reverse();
        Self { responses: Mutex::new(responses) }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate_draft(&self, _user_message: &str, _history: &[ChatMessage]) -> anyhow::Result<DraftResponse> {
        self.responses.lock().unwrap().pop().ok_or_else(|| anyhow::anyhow!("scripted provider exhausted"))
    }
}

fn draft_response(title: &str, content: &str, assistant_message: &str, tool_plan: Option<Value>) -> DraftResponse {
    DraftResponse {
        assistant_message: assistant_message.to_string(),
        draft: DraftOut { title: title.to_string(), content: content.to_string() },
        tool_plan: tool_plan.map(|v| ToolPlanOut { actions: v.get("actions").and_then(Value::as_array).cloned().unwrap_or_default() }),
    }
}

fn test_app(provider: ScriptedProvider) -> (Router, tempfile::TempDir) {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let dir = tempfile::tempdir().unwrap();
    let rag = Arc::new(RagService::new(dir.path(), 800, 100, 256).unwrap());
    let settings = Arc::new(Settings::default());
    let llm: Arc<dyn LlmProvider> = Arc::new(provider);
    (build_router(store, llm, rag, settings), dir)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn chat_approve_execute_round_trip_succeeds() {
    let plan = json!({ "actions": [{ "tool": "open_links", "risk": "LOW", "params": { "urls": ["https://example.com/"] } }] });
    let (app, _dir) = test_app(ScriptedProvider::new(vec![draft_response(
        "Open the link",
        "Sure, opening https://example.com/ for you.",
        "Sure, opening it for you.",
        Some(plan),
    )]));

    let chat_req = json_request("POST", "/v1/chat", json!({ "message": "open https://example.com/" }));
    let response = app.clone().oneshot(chat_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let chat_body = body_json(response).await;

    let conversation_id = chat_body["conversation_id"].as_str().unwrap().to_string();
    let draft_id = chat_body["draft"]["id"].as_str().unwrap().to_string();
    assert_eq!(chat_body["draft"]["status"], "DRAFTING");
    assert!(chat_body["tool_plan"].is_object());

    let approve_req = Request::builder()
        .method("POST")
        .uri(format!("/v1/drafts/{draft_id}/approve"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(approve_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let approve_body = body_json(response).await;
    let approval_id = approve_body["approval_id"].as_str().unwrap().to_string();

    let exec_req = json_request(
        "POST",
        "/v1/executions",
        json!({ "approval_id": approval_id, "tool_name": "open_links", "tool_input": { "urls": ["https://example.com/"] } }),
    );
    let response = app.clone().oneshot(exec_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let exec_body = body_json(response).await;
    assert!(matches!(exec_body["status"].as_str().unwrap(), "SUCCEEDED" | "FAILED"));

    let audit_req = Request::builder().uri(format!("/v1/conversations/{conversation_id}/audit")).body(Body::empty()).unwrap();
    let response = app.oneshot(audit_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let audit_body = body_json(response).await;
    assert_eq!(audit_body.as_array().unwrap().len(), 1);
    assert_eq!(audit_body[0]["executions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn updating_a_locked_draft_conflicts() {
    let (app, _dir) =
        test_app(ScriptedProvider::new(vec![draft_response("Notes", "draft content", "Here are some notes.", None)]));

    let chat_req = json_request("POST", "/v1/chat", json!({ "message": "take some notes for me" }));
    let response = app.clone().oneshot(chat_req).await.unwrap();
    let chat_body = body_json(response).await;
    let draft_id = chat_body["draft"]["id"].as_str().unwrap().to_string();

    let approve_req = Request::builder().method("POST").uri(format!("/v1/drafts/{draft_id}/approve")).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(approve_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let update_req = json_request("POST", &format!("/v1/drafts/{draft_id}/update"), json!({ "content": "trying to edit after lock" }));
    let response = app.oneshot(update_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error_code"], "CONFLICT");
}

#[tokio::test]
async fn medium_risk_execution_requires_confirmation_then_succeeds() {
    let plan = json!({ "actions": [{ "tool": "browser_search", "risk": "MEDIUM", "params": { "query": "rust async runtimes" } }] });
    let (app, _dir) = test_app(ScriptedProvider::new(vec![draft_response(
        "Search the web",
        "I can look that up for you.",
        "I can look that up for you.",
        Some(plan),
    )]));

    let chat_req = json_request("POST", "/v1/chat", json!({ "message": "search the web for rust async runtimes" }));
    let response = app.clone().oneshot(chat_req).await.unwrap();
    let chat_body = body_json(response).await;
    let draft_id = chat_body["draft"]["id"].as_str().unwrap().to_string();

    let approve_req = Request::builder().method("POST").uri(format!("/v1/drafts/{draft_id}/approve")).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(approve_req).await.unwrap();
    let approval_id = body_json(response).await["approval_id"].as_str().unwrap().to_string();

    let exec_req = json_request(
        "POST",
        "/v1/executions",
        json!({ "approval_id": approval_id, "tool_name": "browser_search", "tool_input": { "query": "rust async runtimes" } }),
    );
    let response = app.clone().oneshot(exec_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error_code"], "CONFLICT");

    let exec_req = json_request(
        "POST",
        "/v1/executions",
        json!({
            "approval_id": approval_id,
            "tool_name": "browser_search",
            "tool_input": { "query": "rust async runtimes" },
            "confirmation": { "approved_actions": [] },
        }),
    );
    let response = app.oneshot(exec_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn file_find_without_granted_roots_short_circuits_with_permission_prompt() {
    let (app, _dir) = test_app(ScriptedProvider::new(vec![]));

    let chat_req = json_request("POST", "/v1/chat", json!({ "message": "find my vacation photos folder" }));
    let response = app.oneshot(chat_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["rag_permission_required"], true);
    assert!(body["rag_permission_message"].is_string());
    assert!(body["rag_suggested_path"].is_string());
}

#[tokio::test]
async fn rag_grant_index_and_search_round_trip() {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let rag_dir = tempfile::tempdir().unwrap();
    let docs_dir = tempfile::tempdir().unwrap();
    std::fs::write(docs_dir.path().join("runbook.md"), "This runbook explains how to rotate the database credentials safely.")
        .unwrap();

    let rag = Arc::new(RagService::new(rag_dir.path(), 800, 100, 256).unwrap());
    let settings = Arc::new(Settings::default());
    let llm: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::new(vec![]));
    let app = build_router(store, llm, rag, settings);

    let grant_req = json_request("POST", "/v1/rag/permissions/grant", json!({ "path": docs_dir.path().to_string_lossy() }));
    let response = app.clone().oneshot(grant_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let index_req = json_request("POST", "/v1/rag/index", json!({}));
    let response = app.clone().oneshot(index_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status_body = body_json(response).await;
    assert!(status_body["index_meta"]["chunks_indexed"].as_u64().unwrap() >= 1);

    let search_req = json_request("POST", "/v1/rag/search", json!({ "query": "rotate database credentials", "top_k": 3 }));
    let response = app.oneshot(search_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let search_body = body_json(response).await;
    let hits = search_body["hits"].as_array().unwrap();
    assert!(!hits.is_empty());
    assert!(hits[0]["path"].as_str().unwrap().contains("runbook.md"));
}

#[tokio::test]
async fn search_before_any_grant_returns_no_hits() {
    let (app, _dir) = test_app(ScriptedProvider::new(vec![]));
    let search_req = json_request("POST", "/v1/rag/search", json!({ "query": "anything" }));
    let response = app.oneshot(search_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["hits"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn granting_a_nonexistent_directory_is_rejected() {
    let (app, _dir) = test_app(ScriptedProvider::new(vec![]));
    let grant_req = json_request("POST", "/v1/rag/permissions/grant", json!({ "path": "/definitely/not/a/real/path" }));
    let response = app.oneshot(grant_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
