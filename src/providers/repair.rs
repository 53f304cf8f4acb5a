//! Shared prompt assembly, parsing, and bounded repair loop used by every
//! [`super::LlmProvider`] backend. Ported from the original assistant's
//! Gemini client, which is where this behaviour was first established;
//! the Ollama backend follows the identical contract.

use super::{ChatMessage, DraftOut, DraftResponse, ToolPlanOut};
use regex::Regex;
use std::future::Future;
use std::sync::OnceLock;

const MAX_HISTORY_MESSAGES: usize = 24;
const MAX_HISTORY_CHARS: usize = 1600;

const GENERAL_ASSISTANT_RULES: &str = "You are a contextual conversational AI assistant.\n\
Use conversation history to answer naturally across mixed tasks in one thread.\n\
When asked to draft/write content, produce strong draft.content.\n\
When asked a general question, answer directly in assistant_message and include a short supporting draft.\n\
Do not ask unnecessary clarifying questions.\n";

fn json_obj_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").unwrap())
}

fn leading_title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*(subject|title)\s*[:\-]\s*(.+?)\s*$").unwrap())
}

fn extract_first_json_object(text: &str) -> Option<&str> {
    json_obj_re().find(text).map(|m| m.as_str())
}

fn clip(s: &str, n: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= n {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(n).collect();
        format!("{truncated}...")
    }
}

fn safe_truncate(s: &str, n: usize) -> String {
    clip(s, n)
}

fn format_history(history: &[ChatMessage]) -> String {
    if history.is_empty() {
        return "(no prior messages)".to_string();
    }
    let start = history.len().saturating_sub(MAX_HISTORY_MESSAGES);
    let lines: Vec<String> = history[start..]
        .iter()
        .filter_map(|msg| {
            let role = match msg.role.trim().to_lowercase().as_str() {
                "user" | "assistant" => msg.role.trim().to_lowercase(),
                _ => "user".to_string(),
            };
            let content = clip(&msg.content, MAX_HISTORY_CHARS);
            if content.is_empty() { None } else { Some(format!("{role}: {content}")) }
        })
        .collect();
    if lines.is_empty() { "(no prior messages)".to_string() } else { lines.join("\n") }
}

fn synthesize_fallback_draft(assistant_message: &str) -> DraftOut {
    let title = "Conversation notes".to_string();
    let mut body = "Summary:\n- [Main point]\n- [Next step]\n".to_string();
    if !assistant_message.trim().is_empty() {
        body = format!("Assistant response:\n{}\n\n---\n\n{body}", assistant_message.trim());
    }
    DraftOut { title, content: body }
}

fn normalize_title_content(mut draft: DraftOut) -> DraftOut {
    let mut title = draft.title.trim().to_string();
    let lines: Vec<&str> = draft.content.lines().collect();
    let Some(first_idx) = lines.iter().position(|l| !l.trim().is_empty()) else {
        return draft;
    };
    let Some(caps) = leading_title_re().captures(lines[first_idx]) else {
        return draft;
    };
    let extracted = caps[2].trim().to_string();
    if extracted.is_empty() {
        return draft;
    }
    if title.is_empty() {
        title = extracted.clone();
    }
    if title.eq_ignore_ascii_case(&extracted) {
        let mut remainder: Vec<&str> =
            lines[..first_idx].iter().chain(lines[first_idx + 1..].iter()).copied().collect();
        while remainder.first().is_some_and(|l| l.trim().is_empty()) {
            remainder.remove(0);
        }
        draft.content = remainder.join("\n").trim().to_string();
    }
    draft.title = title;
    draft
}

fn recover_content_from_assistant_message(assistant_message: &str) -> String {
    let text = assistant_message.trim();
    if text.is_empty() {
        return String::new();
    }
    let lower = text.to_lowercase();
    const MARKERS: &[&str] = &["here it is:", "draft:", "linkedin post draft:"];
    let mut start = None;
    for marker in MARKERS {
        if let Some(idx) = lower.find(marker) {
            start = Some(idx + marker.len());
            break;
        }
    }
    match start {
        Some(idx) => text[idx..].trim().to_string(),
        None => text.to_string(),
    }
}

fn parse_draft_response(raw: &str) -> Option<DraftResponse> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let text = if trimmed.starts_with('{') && trimmed.ends_with('}') {
        trimmed.to_string()
    } else {
        extract_first_json_object(trimmed)?.to_string()
    };
    let obj: serde_json::Value = serde_json::from_str(&text).ok()?;
    let obj = obj.as_object()?;

    let assistant_message = obj.get("assistant_message").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let draft = obj
        .get("draft")
        .filter(|v| v.is_object())
        .and_then(|v| serde_json::from_value::<DraftOut>(v.clone()).ok());
    let tool_plan = obj
        .get("tool_plan")
        .filter(|v| v.is_object())
        .and_then(|v| serde_json::from_value::<ToolPlanOut>(v.clone()).ok());

    Some(DraftResponse { assistant_message, draft: draft.unwrap_or_default(), tool_plan })
}

/// Builds the initial prompt: system text, the fixed assistant rules, the
/// shaped history block, the user message, and a trailing JSON-only
/// instruction.
pub fn build_initial_prompt(system: &str, history: &[ChatMessage], user_message: &str) -> String {
    [
        system,
        GENERAL_ASSISTANT_RULES,
        "Conversation history:",
        &format_history(history),
        "User message:",
        user_message,
        "",
        "Return ONLY valid JSON with keys: assistant_message, draft, tool_plan.",
        "assistant_message must be non-empty and directly answer the latest user message.",
        "draft must be an object with non-empty content; title may be empty when not needed.",
        "tool_plan is optional; use null when no concrete tool actions are needed.",
    ]
    .join("\n\n")
}

fn build_repair_prompt(system: &str, repair_prompt: &str, history: &[ChatMessage], previous_output: &str, user_message: &str) -> String {
    [
        system,
        repair_prompt,
        GENERAL_ASSISTANT_RULES,
        "Conversation history:",
        &format_history(history),
        "The previous output was invalid because draft was null or empty.",
        "You MUST output JSON with a non-null draft object containing non-empty content.",
        "You MUST keep assistant_message non-empty and relevant to the latest user message.",
        "Previous output:",
        previous_output,
        "Original user message:",
        user_message,
    ]
    .join("\n\n")
}

/// Runs the full generate-parse-repair cycle against `generate`, a closure
/// that sends one prompt to the backend and returns its raw text response.
/// At most `max_repair_attempts + 1` calls are made; on exhaustion a
/// synthetic fallback draft is returned so the caller always sees a
/// non-empty draft.
pub async fn generate_with_repair<F, Fut>(
    system: &str,
    repair_prompt: &str,
    history: &[ChatMessage],
    user_message: &str,
    max_repair_attempts: u32,
    generate: F,
) -> anyhow::Result<DraftResponse>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = anyhow::Result<String>>,
{
    let mut prompt = build_initial_prompt(system, history, user_message);
    let mut last_parsed: Option<DraftResponse> = None;

    for attempt in 1..=(max_repair_attempts + 1) {
        let raw = generate(prompt.clone()).await?;
        let mut parsed = parse_draft_response(&raw);

        if let Some(resp) = parsed.as_mut() {
            if resp.draft.content.trim().is_empty() {
                resp.draft.content = recover_content_from_assistant_message(&resp.assistant_message);
            }
            if !resp.draft.content.trim().is_empty() {
                resp.draft = normalize_title_content(std::mem::take(&mut resp.draft));
                if resp.assistant_message.trim().is_empty() {
                    resp.assistant_message = clip(&resp.draft.content, 300);
                }
                return Ok(resp.clone());
            }
        }

        tracing::warn!(attempt, raw = %safe_truncate(&raw, 900), "llm output invalid: draft missing or empty");
        last_parsed = parsed;
        prompt = build_repair_prompt(system, repair_prompt, history, &raw, user_message);
    }

    let assistant_message = last_parsed.map(|p| p.assistant_message).unwrap_or_default();
    let assistant_message =
        if assistant_message.trim().is_empty() { "I can help with that.".to_string() } else { assistant_message.trim().to_string() };
    Ok(DraftResponse { draft: synthesize_fallback_draft(&assistant_message), assistant_message, tool_plan: None })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_parsed_draft_on_first_success() {
        let result = generate_with_repair("sys", "repair", &[], "hello", 2, |_| async {
            Ok(r#"{"assistant_message": "hi", "draft": {"title": "", "content": "body"}}"#.to_string())
        })
        .await
        .unwrap();
        assert_eq!(result.assistant_message, "hi");
        assert_eq!(result.draft.content, "body");
    }

    #[tokio::test]
    async fn recovers_content_from_assistant_message_marker() {
        let result = generate_with_repair("sys", "repair", &[], "hello", 2, |_| async {
            Ok(r#"{"assistant_message": "Here it is: the actual draft text", "draft": {"title": "", "content": ""}}"#
                .to_string())
        })
        .await
        .unwrap();
        assert_eq!(result.draft.content, "the actual draft text");
    }

    #[tokio::test]
    async fn falls_back_after_exhausting_repairs() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result = generate_with_repair("sys", "repair", &[], "hello", 1, |_| {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Ok("not json at all".to_string()) }
        })
        .await
        .unwrap();
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(result.draft.title, "Conversation notes");
        assert_eq!(result.assistant_message, "I can help with that.");
    }

    #[tokio::test]
    async fn extracts_first_json_object_from_surrounding_prose() {
        let result = generate_with_repair("sys", "repair", &[], "hello", 0, |_| async {
            Ok(r#"Sure, here you go: {"assistant_message": "ok", "draft": {"title": "", "content": "x"}} thanks"#
                .to_string())
        })
        .await
        .unwrap();
        assert_eq!(result.draft.content, "x");
    }

    #[test]
    fn title_promotion_strips_leading_title_line() {
        let draft = DraftOut { title: String::new(), content: "Title: My Post\nBody text here".to_string() };
        let normalized = normalize_title_content(draft);
        assert_eq!(normalized.title, "My Post");
        assert_eq!(normalized.content, "Body text here");
    }

    #[test]
    fn history_is_clipped_and_capped() {
        let history: Vec<ChatMessage> =
            (0..30).map(|i| ChatMessage { role: "user".into(), content: format!("msg {i}") }).collect();
        let formatted = format_history(&history);
        assert!(!formatted.contains("msg 0:"));
        assert!(formatted.contains("msg 29"));
    }
}
