//! Chat Orchestrator: the single public entry point tying intent triage,
//! draft generation, plan persistence, and retrieval together. Grounded
//! on the original `chat.py` handler, extended with the RAG
//! permission-gate and intent-triage steps (not present in that earlier
//! revision, which predates retrieval).

pub mod intent;
pub mod normalize;

use crate::approval::ApprovalService;
use crate::errors::{AppError, AppResult};
use crate::models::{Draft, MessageRole};
use crate::providers::{ChatMessage, LlmProvider};
use crate::rag::RagService;
use crate::store::Store;
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

pub struct ChatTurnRequest {
    pub conversation_id: Option<String>,
    pub message: String,
    pub force_file_search: bool,
}

#[derive(Debug)]
pub struct ChatTurnResponse {
    pub conversation_id: String,
    pub assistant_message: String,
    pub draft: Draft,
    pub tool_plan: Option<Value>,
    pub rag_hits: Option<Vec<crate::rag::RagHit>>,
    pub rag_permission_required: bool,
    pub rag_permission_message: Option<String>,
    pub rag_suggested_path: Option<String>,
}

pub struct ChatOrchestrator {
    store: Arc<dyn Store>,
    approvals: ApprovalService,
    llm: Arc<dyn LlmProvider>,
    rag: Arc<RagService>,
}

const RETRIEVAL_TOP_K: usize = 4;
const FILE_FIND_TOP_K: usize = 8;
const FILE_FIND_MAX_SCAN: usize = 450_000;

/// Runs a blocking RAG closure off the async executor, mirroring
/// `SqliteStore::with_conn`'s dispatch-to-`spawn_blocking` shape.
async fn run_blocking<T, F>(f: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("blocking task panicked: {e}")))?;
    Ok(result?)
}

impl ChatOrchestrator {
    pub fn new(store: Arc<dyn Store>, llm: Arc<dyn LlmProvider>, rag: Arc<RagService>) -> Self {
        let approvals = ApprovalService::new(store.clone());
        Self { store, approvals, llm, rag }
    }

    #[instrument(skip(self, req), fields(conversation_id = req.conversation_id.as_deref()))]
    pub async fn handle(&self, req: ChatTurnRequest) -> AppResult<ChatTurnResponse> {
        // 1. Resolve or create the conversation.
        let conversation = match &req.conversation_id {
            Some(id) => self
                .store
                .get_conversation(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Conversation {id} not found")))?,
            None => self.store.create_conversation("New chat").await?,
        };

        // 2. Prior history, ascending.
        let history_rows = self.store.list_messages(&conversation.id).await?;
        let history: Vec<ChatMessage> =
            history_rows.iter().map(|m| ChatMessage { role: m.role.as_str().to_string(), content: m.content.clone() }).collect();

        // 3. Append the new user message.
        self.store.add_message(&conversation.id, MessageRole::User, &req.message).await?;

        // 4. Intent triage.
        let classified = intent::classify(&req.message, req.force_file_search);

        // 5. Permission gate.
        let allowed_roots = self.rag.list_permissions();
        if matches!(classified, intent::Intent::FileFind | intent::Intent::RetrievalAdjacent) {
            if allowed_roots.is_empty() {
                let home = dirs_home();
                return Ok(self.permission_required_response(
                    &conversation.id,
                    "I need permission to search your files before I can look for that. \
                     Grant access to a folder and ask me again."
                        .to_string(),
                    home,
                ));
            }
            if let Some(folder) = intent::detect_ungranted_folder_hint(&req.message, &allowed_roots) {
                return Ok(self.permission_required_response(
                    &conversation.id,
                    format!("I don't have access to your {folder} folder yet. Grant access and ask me again."),
                    folder,
                ));
            }
            if let Some(drive) = intent::detect_uncovered_drive_hint(&req.message, &allowed_roots) {
                return Ok(self.permission_required_response(
                    &conversation.id,
                    format!("I don't have access to the {drive} drive yet. Grant access and ask me again."),
                    drive,
                ));
            }
        }

        // 6. File-find branch.
        if classified == intent::Intent::FileFind {
            let rag = self.rag.clone();
            let query = req.message.clone();
            let hits = run_blocking(move || rag.find_files(&query, FILE_FIND_TOP_K, None, FILE_FIND_MAX_SCAN)).await?;
            let assistant_message = render_file_hits(&hits);
            let draft = self.store.create_draft(&conversation.id, "Search results", &assistant_message).await?;
            self.store.add_message(&conversation.id, MessageRole::Assistant, &assistant_message).await?;
            return Ok(ChatTurnResponse {
                conversation_id: conversation.id,
                assistant_message,
                draft,
                tool_plan: None,
                rag_hits: Some(hits),
                rag_permission_required: false,
                rag_permission_message: None,
                rag_suggested_path: None,
            });
        }

        // 7. Retrieval branch: inject local context, append a Sources footer.
        let mut llm_message = req.message.clone();
        let mut rag_hits = None;
        let mut sources_footer = String::new();
        if classified == intent::Intent::RetrievalAdjacent {
            let rag = self.rag.clone();
            let query = req.message.clone();
            let hits = run_blocking(move || rag.search(&query, RETRIEVAL_TOP_K, None)).await?;
            if !hits.is_empty() {
                llm_message = format!(
                    "Local document context:\n{}\n\nUser message: {}",
                    hits.iter().map(|h| format!("- {}: {}", h.path, h.snippet)).collect::<Vec<_>>().join("\n"),
                    req.message
                );
                let mut seen = std::collections::HashSet::new();
                let mut paths = Vec::new();
                for h in &hits {
                    if seen.insert(h.path.clone()) {
                        paths.push(h.path.clone());
                    }
                    if paths.len() == 4 {
                        break;
                    }
                }
                sources_footer = format!("\n\nSources: {}", paths.join(", "));
            }
            rag_hits = Some(hits);
        }

        // 8. Generate.
        let out = self
            .llm
            .generate_draft(&llm_message, &history)
            .await
            .map_err(|e| AppError::LlmFailed(e.to_string()))?;

        // 9. Assistant message.
        let mut assistant_message = normalize::assistant_from_draft(&out.draft.title, &out.draft.content);
        if !sources_footer.is_empty() {
            assistant_message.push_str(&sources_footer);
        }

        // 10. Persist the draft.
        let draft = self.store.create_draft(&conversation.id, &out.draft.title, &out.draft.content).await?;

        // 11. Tool-plan normalisation.
        let proposed = out.tool_plan.map(|p| serde_json::json!({ "actions": p.actions }));
        let mut tool_plan = normalize::normalize_tool_plan(&req.message, proposed.as_ref());

        // 12. Fallback plan.
        if !tool_plan.as_ref().is_some_and(normalize::has_actions) {
            let fallback = normalize::fallback_tool_plan(&req.message, &assistant_message);
            tool_plan = normalize::normalize_tool_plan(&req.message, fallback.as_ref());
        }

        // 13. Upsert plan, append assistant message, return.
        if let Some(plan) = tool_plan.as_ref().filter(|p| normalize::has_actions(p)) {
            self.approvals.upsert_tool_plan(&draft.id, plan).await?;
        }
        self.store.add_message(&conversation.id, MessageRole::Assistant, &assistant_message).await?;

        Ok(ChatTurnResponse {
            conversation_id: conversation.id,
            assistant_message,
            draft,
            tool_plan,
            rag_hits,
            rag_permission_required: false,
            rag_permission_message: None,
            rag_suggested_path: None,
        })
    }

    fn permission_required_response(&self, conversation_id: &str, message: String, suggested_path: String) -> ChatTurnResponse {
        ChatTurnResponse {
            conversation_id: conversation_id.to_string(),
            assistant_message: message.clone(),
            draft: placeholder_draft(conversation_id),
            tool_plan: None,
            rag_hits: None,
            rag_permission_required: true,
            rag_permission_message: Some(message),
            rag_suggested_path: Some(suggested_path),
        }
    }
}

/// The permission-gate short-circuit never reaches tool execution or
/// approval — there is no draft to approve yet — but the response shape
/// always carries one, so synthesize an un-persisted, already-drafting
/// stand-in.
fn placeholder_draft(conversation_id: &str) -> Draft {
    let now = chrono::Utc::now();
    Draft {
        id: crate::models::new_id(),
        conversation_id: conversation_id.to_string(),
        title: String::new(),
        content: String::new(),
        status: crate::models::DraftStatus::Drafting,
        tool_plan: None,
        created_at: now,
        updated_at: now,
    }
}

fn render_file_hits(hits: &[crate::rag::RagHit]) -> String {
    if hits.is_empty() {
        return "I couldn't find any matching files.".to_string();
    }
    let mut lines = vec!["Here's what I found:".to_string()];
    lines.extend(hits.iter().map(|h| format!("- {}", h.path)));
    lines.join("\n")
}

fn dirs_home() -> String {
    std::env::var("HOME").unwrap_or_else(|_| "/".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{DraftOut, DraftResponse};
    use crate::store::sqlite::SqliteStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct StubProvider {
        response: Mutex<Option<DraftResponse>>,
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        async fn generate_draft(&self, _user_message: &str, _history: &[ChatMessage]) -> anyhow::Result<DraftResponse> {
            self.response.lock().unwrap().take().ok_or_else(|| anyhow::anyhow!("stub exhausted"))
        }
    }

    fn stub(title: &str, content: &str) -> Arc<dyn LlmProvider> {
        Arc::new(StubProvider {
            response: Mutex::new(Some(DraftResponse {
                assistant_message: content.to_string(),
                draft: DraftOut { title: title.to_string(), content: content.to_string() },
                tool_plan: None,
            })),
        })
    }

    async fn orchestrator(llm: Arc<dyn LlmProvider>) -> (ChatOrchestrator, tempfile::TempDir) {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let dir = tempdir().unwrap();
        let rag = Arc::new(RagService::new(dir.path(), 800, 100, 256).unwrap());
        (ChatOrchestrator::new(store, llm, rag), dir)
    }

    #[tokio::test]
    async fn generic_turn_creates_conversation_and_draft() {
        let (orch, _dir) = orchestrator(stub("Answer", "The capital of France is Paris.")).await;
        let resp = orch
            .handle(ChatTurnRequest { conversation_id: None, message: "what is the capital of France?".to_string(), force_file_search: false })
            .await
            .unwrap();
        assert!(!resp.rag_permission_required);
        assert_eq!(resp.assistant_message, "The capital of France is Paris.");
        assert_eq!(resp.draft.content, "The capital of France is Paris.");
    }

    #[tokio::test]
    async fn file_find_without_permissions_short_circuits() {
        let (orch, _dir) = orchestrator(stub("unused", "unused")).await;
        let resp = orch
            .handle(ChatTurnRequest { conversation_id: None, message: "find my readme file".to_string(), force_file_search: false })
            .await
            .unwrap();
        assert!(resp.rag_permission_required);
        assert!(resp.rag_suggested_path.is_some());
    }

    #[tokio::test]
    async fn unknown_conversation_id_is_not_found() {
        let (orch, _dir) = orchestrator(stub("unused", "unused")).await;
        let err = orch
            .handle(ChatTurnRequest { conversation_id: Some("missing".to_string()), message: "hi".to_string(), force_file_search: false })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn fallback_plan_is_upserted_when_model_proposes_none() {
        let (orch, _dir) = orchestrator(stub("Links", "I'll open that for you.")).await;
        let resp = orch
            .handle(ChatTurnRequest {
                conversation_id: None,
                message: "please open https://example.com/report".to_string(),
                force_file_search: false,
            })
            .await
            .unwrap();
        let plan = resp.tool_plan.unwrap();
        assert_eq!(plan["actions"][0]["tool"], "open_links");
    }

    #[tokio::test]
    async fn force_file_search_bypasses_generic_classification() {
        let (orch, _dir) = orchestrator(stub("unused", "unused")).await;
        let resp = orch
            .handle(ChatTurnRequest { conversation_id: None, message: "what is 2+2".to_string(), force_file_search: true })
            .await
            .unwrap();
        assert!(resp.rag_permission_required);
    }
}
