//! `rusqlite`-backed implementation of the [`super::Store`] contract.
//!
//! A synchronous connection behind a mutex, with every call dispatched
//! through `tokio::task::spawn_blocking` so request tasks never block on
//! file I/O.

use crate::errors::{AppError, AppResult};
use crate::models::{
    Approval, Conversation, Draft, DraftStatus, Execution, ExecutionStatus, Message, MessageRole, ToolPlan, new_id,
};
use crate::store::{ConversationPage, Store};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn init_schema(conn: &Connection) -> anyhow::Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL DEFAULT 'New chat',
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
            CREATE TABLE IF NOT EXISTS drafts (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                title TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'DRAFTING',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_drafts_conversation ON drafts(conversation_id);
            CREATE TABLE IF NOT EXISTS tool_plans (
                id TEXT PRIMARY KEY,
                draft_id TEXT NOT NULL UNIQUE REFERENCES drafts(id) ON DELETE CASCADE,
                json_canonical TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS approvals (
                id TEXT PRIMARY KEY,
                draft_id TEXT NOT NULL REFERENCES drafts(id) ON DELETE CASCADE,
                draft_hash TEXT NOT NULL,
                toolplan_hash TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_approvals_draft ON approvals(draft_id);
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                approval_id TEXT NOT NULL REFERENCES approvals(id) ON DELETE CASCADE,
                tool_name TEXT NOT NULL,
                request_json TEXT NOT NULL,
                result_json TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'PENDING',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_executions_approval ON executions(approval_id);
            "#,
        )?;
        Ok(())
    }

    /// Run a blocking closure against the connection off the async
    /// executor.
    async fn with_conn<T, F>(&self, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            f(&guard)
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("blocking task panicked: {e}")))?
        .map_err(AppError::Internal)
    }
}

fn row_to_conversation(row: &rusqlite::Row) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get("id")?,
        title: row.get("title")?,
        created_at: row.get::<_, String>("created_at")?.parse().unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get("id")?,
        conversation_id: row.get("conversation_id")?,
        role: MessageRole::parse(&row.get::<_, String>("role")?),
        content: row.get("content")?,
        created_at: row.get::<_, String>("created_at")?.parse().unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_tool_plan(row: &rusqlite::Row) -> rusqlite::Result<ToolPlan> {
    Ok(ToolPlan {
        id: row.get("id")?,
        draft_id: row.get("draft_id")?,
        json_canonical: row.get("json_canonical")?,
        content_hash: row.get("content_hash")?,
        created_at: row.get::<_, String>("created_at")?.parse().unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_approval(row: &rusqlite::Row) -> rusqlite::Result<Approval> {
    Ok(Approval {
        id: row.get("id")?,
        draft_id: row.get("draft_id")?,
        draft_hash: row.get("draft_hash")?,
        toolplan_hash: row.get("toolplan_hash")?,
        created_at: row.get::<_, String>("created_at")?.parse().unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_execution(row: &rusqlite::Row) -> rusqlite::Result<Execution> {
    Ok(Execution {
        id: row.get("id")?,
        approval_id: row.get("approval_id")?,
        tool_name: row.get("tool_name")?,
        request_json: row.get("request_json")?,
        result_json: row.get("result_json")?,
        status: ExecutionStatus::parse(&row.get::<_, String>("status")?).unwrap_or(ExecutionStatus::Failed),
        created_at: row.get::<_, String>("created_at")?.parse().unwrap_or_else(|_| Utc::now()),
    })
}

fn load_draft(conn: &Connection, id: &str) -> anyhow::Result<Option<Draft>> {
    let draft = conn
        .query_row(
            "SELECT id, conversation_id, title, content, status, created_at, updated_at FROM drafts WHERE id = ?1",
            params![id],
            |row| {
                Ok(Draft {
                    id: row.get("id")?,
                    conversation_id: row.get("conversation_id")?,
                    title: row.get("title")?,
                    content: row.get("content")?,
                    status: DraftStatus::parse(&row.get::<_, String>("status")?).unwrap_or(DraftStatus::Drafting),
                    tool_plan: None,
                    created_at: row.get::<_, String>("created_at")?.parse().unwrap_or_else(|_| Utc::now()),
                    updated_at: row.get::<_, String>("updated_at")?.parse().unwrap_or_else(|_| Utc::now()),
                })
            },
        )
        .optional()?;
    let Some(mut draft) = draft else { return Ok(None) };
    draft.tool_plan = conn
        .query_row(
            "SELECT id, draft_id, json_canonical, content_hash, created_at FROM tool_plans WHERE draft_id = ?1",
            params![id],
            row_to_tool_plan,
        )
        .optional()?;
    Ok(Some(draft))
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_conversation(&self, title: &str) -> AppResult<Conversation> {
        let title = title.to_string();
        self.with_conn(move |conn| {
            let id = new_id();
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO conversations (id, title, created_at) VALUES (?1, ?2, ?3)",
                params![id, title, created_at.to_rfc3339()],
            )?;
            Ok(Conversation { id, title, created_at })
        })
        .await
    }

    async fn get_conversation(&self, id: &str) -> AppResult<Option<Conversation>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, title, created_at FROM conversations WHERE id = ?1",
                    params![id],
                    row_to_conversation,
                )
                .optional()?)
        })
        .await
    }

    async fn list_conversations(&self, limit: i64, offset: i64) -> AppResult<ConversationPage> {
        self.with_conn(move |conn| {
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM conversations", [], |r| r.get(0))?;
            let mut stmt = conn.prepare(
                "SELECT id, title, created_at FROM conversations ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
            )?;
            let items = stmt
                .query_map(params![limit, offset], row_to_conversation)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ConversationPage { items, total })
        })
        .await
    }

    async fn delete_conversation(&self, id: &str) -> AppResult<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let affected = conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
            Ok(affected > 0)
        })
        .await
    }

    async fn list_messages(&self, conversation_id: &str) -> AppResult<Vec<Message>> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, role, content, created_at FROM messages WHERE conversation_id = ?1 ORDER BY created_at ASC",
            )?;
            Ok(stmt
                .query_map(params![conversation_id], row_to_message)?
                .collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn add_message(&self, conversation_id: &str, role: MessageRole, content: &str) -> AppResult<Message> {
        let conversation_id = conversation_id.to_string();
        let content = content.to_string();
        self.with_conn(move |conn| {
            let id = new_id();
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO messages (id, conversation_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, conversation_id, role.as_str(), content, created_at.to_rfc3339()],
            )?;
            Ok(Message { id, conversation_id, role, content, created_at })
        })
        .await
    }

    async fn create_draft(&self, conversation_id: &str, title: &str, content: &str) -> AppResult<Draft> {
        let conversation_id = conversation_id.to_string();
        let title = title.to_string();
        let content = content.to_string();
        self.with_conn(move |conn| {
            let id = new_id();
            let now = Utc::now();
            conn.execute(
                "INSERT INTO drafts (id, conversation_id, title, content, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, 'DRAFTING', ?5, ?5)",
                params![id, conversation_id, title, content, now.to_rfc3339()],
            )?;
            Ok(Draft {
                id,
                conversation_id,
                title,
                content,
                status: DraftStatus::Drafting,
                tool_plan: None,
                created_at: now,
                updated_at: now,
            })
        })
        .await
    }

    async fn get_draft(&self, id: &str) -> AppResult<Option<Draft>> {
        let id = id.to_string();
        self.with_conn(move |conn| load_draft(conn, &id)).await
    }

    async fn latest_draft(&self, conversation_id: &str) -> AppResult<Option<Draft>> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let id: Option<String> = conn
                .query_row(
                    "SELECT id FROM drafts WHERE conversation_id = ?1 ORDER BY created_at DESC LIMIT 1",
                    params![conversation_id],
                    |r| r.get(0),
                )
                .optional()?;
            match id {
                Some(id) => load_draft(conn, &id),
                None => Ok(None),
            }
        })
        .await
    }

    async fn update_draft(&self, id: &str, title: Option<&str>, content: Option<&str>) -> AppResult<()> {
        let id = id.to_string();
        let title = title.map(|s| s.to_string());
        let content = content.map(|s| s.to_string());
        self.with_conn(move |conn| {
            let status: Option<String> = conn
                .query_row("SELECT status FROM drafts WHERE id = ?1", params![id], |r| r.get(0))
                .optional()?;
            let Some(status) = status else {
                anyhow::bail!(AppError::NotFound(format!("Draft {id} not found")));
            };
            if status != "DRAFTING" {
                anyhow::bail!(AppError::DraftLocked("Draft is locked".to_string()));
            }
            let now = Utc::now().to_rfc3339();
            if let Some(title) = &title {
                conn.execute("UPDATE drafts SET title = ?1, updated_at = ?2 WHERE id = ?3", params![title, now, id])?;
            }
            if let Some(content) = &content {
                conn.execute("UPDATE drafts SET content = ?1, updated_at = ?2 WHERE id = ?3", params![content, now, id])?;
            }
            Ok(())
        })
        .await
        .map_err(unwrap_app_error)
    }

    async fn upsert_tool_plan(&self, draft_id: &str, json_canonical: &str, content_hash: &str) -> AppResult<ToolPlan> {
        let draft_id = draft_id.to_string();
        let json_canonical = json_canonical.to_string();
        let content_hash = content_hash.to_string();
        self.with_conn(move |conn| {
            let status: Option<String> = conn
                .query_row("SELECT status FROM drafts WHERE id = ?1", params![draft_id], |r| r.get(0))
                .optional()?;
            let Some(status) = status else {
                anyhow::bail!(AppError::NotFound(format!("Draft {draft_id} not found")));
            };
            if status != "DRAFTING" {
                anyhow::bail!(AppError::DraftLocked("Draft is locked".to_string()));
            }
            let existing_id: Option<String> = conn
                .query_row("SELECT id FROM tool_plans WHERE draft_id = ?1", params![draft_id], |r| r.get(0))
                .optional()?;
            let now = Utc::now();
            let id = match existing_id {
                Some(id) => {
                    conn.execute(
                        "UPDATE tool_plans SET json_canonical = ?1, content_hash = ?2 WHERE id = ?3",
                        params![json_canonical, content_hash, id],
                    )?;
                    id
                }
                None => {
                    let id = new_id();
                    conn.execute(
                        "INSERT INTO tool_plans (id, draft_id, json_canonical, content_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![id, draft_id, json_canonical, content_hash, now.to_rfc3339()],
                    )?;
                    id
                }
            };
            Ok(ToolPlan { id, draft_id, json_canonical, content_hash, created_at: now })
        })
        .await
        .map_err(unwrap_app_error)
    }

    async fn approve_draft(&self, draft_id: &str, draft_hash: &str, toolplan_hash: Option<&str>) -> AppResult<Approval> {
        let draft_id = draft_id.to_string();
        let draft_hash = draft_hash.to_string();
        let toolplan_hash = toolplan_hash.map(|s| s.to_string());
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let status: Option<String> = tx
                .query_row("SELECT status FROM drafts WHERE id = ?1", params![draft_id], |r| r.get(0))
                .optional()?;
            let Some(status) = status else {
                anyhow::bail!(AppError::NotFound(format!("Draft {draft_id} not found")));
            };
            if status != "DRAFTING" {
                anyhow::bail!(AppError::DraftLocked("Draft already locked".to_string()));
            }
            let id = new_id();
            let created_at = Utc::now();
            tx.execute(
                "INSERT INTO approvals (id, draft_id, draft_hash, toolplan_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, draft_id, draft_hash, toolplan_hash, created_at.to_rfc3339()],
            )?;
            tx.execute("UPDATE drafts SET status = 'APPROVED_LOCKED', updated_at = ?2 WHERE id = ?1", params![draft_id, created_at.to_rfc3339()])?;
            tx.commit()?;
            Ok(Approval { id, draft_id, draft_hash, toolplan_hash, created_at })
        })
        .await
        .map_err(unwrap_app_error)
    }

    async fn get_approval(&self, id: &str) -> AppResult<Option<Approval>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, draft_id, draft_hash, toolplan_hash, created_at FROM approvals WHERE id = ?1",
                    params![id],
                    row_to_approval,
                )
                .optional()?)
        })
        .await
    }

    async fn list_approvals_with_executions(&self, conversation_id: &str) -> AppResult<Vec<(Approval, Vec<Execution>)>> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT a.id, a.draft_id, a.draft_hash, a.toolplan_hash, a.created_at FROM approvals a \
                 JOIN drafts d ON d.id = a.draft_id WHERE d.conversation_id = ?1 ORDER BY a.created_at ASC",
            )?;
            let approvals = stmt
                .query_map(params![conversation_id], row_to_approval)?
                .collect::<Result<Vec<_>, _>>()?;
            let mut out = Vec::with_capacity(approvals.len());
            for approval in approvals {
                let mut estmt = conn.prepare(
                    "SELECT id, approval_id, tool_name, request_json, result_json, status, created_at FROM executions WHERE approval_id = ?1 ORDER BY created_at ASC",
                )?;
                let executions = estmt
                    .query_map(params![approval.id], row_to_execution)?
                    .collect::<Result<Vec<_>, _>>()?;
                out.push((approval, executions));
            }
            Ok(out)
        })
        .await
    }

    async fn create_execution(&self, approval_id: &str, tool_name: &str, request_json: &str) -> AppResult<Execution> {
        let approval_id = approval_id.to_string();
        let tool_name = tool_name.to_string();
        let request_json = request_json.to_string();
        self.with_conn(move |conn| {
            let id = new_id();
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO executions (id, approval_id, tool_name, request_json, result_json, status, created_at) VALUES (?1, ?2, ?3, ?4, '{}', 'RUNNING', ?5)",
                params![id, approval_id, tool_name, request_json, created_at.to_rfc3339()],
            )?;
            Ok(Execution {
                id,
                approval_id,
                tool_name,
                request_json,
                result_json: "{}".to_string(),
                status: ExecutionStatus::Running,
                created_at,
            })
        })
        .await
    }

    async fn finish_execution(&self, id: &str, status: ExecutionStatus, result_json: &str) -> AppResult<Execution> {
        let id = id.to_string();
        let result_json = result_json.to_string();
        self.with_conn(move |conn| {
            let current: Option<String> = conn
                .query_row("SELECT status FROM executions WHERE id = ?1", params![id], |r| r.get(0))
                .optional()?;
            let Some(current) = current else {
                anyhow::bail!(AppError::NotFound(format!("Execution {id} not found")));
            };
            let current = ExecutionStatus::parse(&current).unwrap_or(ExecutionStatus::Failed);
            if current.is_terminal() {
                anyhow::bail!(AppError::Internal(anyhow::anyhow!("execution {id} is already terminal")));
            }
            conn.execute(
                "UPDATE executions SET status = ?1, result_json = ?2 WHERE id = ?3",
                params![status.as_str(), result_json, id],
            )?;
            conn.query_row(
                "SELECT id, approval_id, tool_name, request_json, result_json, status, created_at FROM executions WHERE id = ?1",
                params![id],
                row_to_execution,
            )
            .map_err(Into::into)
        })
        .await
        .map_err(unwrap_app_error)
    }

    async fn get_execution(&self, id: &str) -> AppResult<Option<Execution>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, approval_id, tool_name, request_json, result_json, status, created_at FROM executions WHERE id = ?1",
                    params![id],
                    row_to_execution,
                )
                .optional()?)
        })
        .await
    }
}

/// `with_conn` boxes domain errors inside `anyhow::Error` so the closure
/// signature stays uniform; unwrap them back into the precise `AppError`
/// variant the caller needs to see.
fn unwrap_app_error(err: AppError) -> AppError {
    if let AppError::Internal(inner) = &err {
        if let Some(app_err) = inner.downcast_ref::<AppError>() {
            return match app_err {
                AppError::NotFound(m) => AppError::NotFound(m.clone()),
                AppError::DraftLocked(m) => AppError::DraftLocked(m.clone()),
                AppError::PlanViolation(m) => AppError::PlanViolation(m.clone()),
                AppError::ConfirmationRequired(m) => AppError::ConfirmationRequired(m.clone()),
                AppError::InvalidToolInput(m) => AppError::InvalidToolInput(m.clone()),
                AppError::InvalidRequest(m) => AppError::InvalidRequest(m.clone()),
                AppError::ValidationError(m) => AppError::ValidationError(m.clone()),
                AppError::LlmFailed(m) => AppError::LlmFailed(m.clone()),
                AppError::Internal(_) => err,
            };
        }
    }
    err
}
