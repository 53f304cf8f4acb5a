//! Tool-plan normalisation and fallback-plan synthesis, grounded on the
//! original `chat.py`'s `_normalize_tool_plan` / `_fallback_tool_plan`
//! family of helpers.

use serde_json::{Value, json};
use std::sync::OnceLock;

fn url_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)https?://[^\s)]+").unwrap())
}

/// Renders the assistant-visible text from a draft: prefer the body,
/// fall back to the title.
pub fn assistant_from_draft(title: &str, content: &str) -> String {
    let c = content.trim();
    if !c.is_empty() { c.to_string() } else { title.trim().to_string() }
}

const STRIP_PREFIXES: &[&str] =
    &["open ", "find ", "search ", "look up ", "please open ", "please find ", "please search "];

/// Strips a leading imperative ("open ", "please find ", ...), collapses
/// "'s linkedin" / " profile" hints that make poor search terms, and
/// normalises internal whitespace.
pub fn normalize_search_query(query: &str) -> String {
    let mut q = query.trim().to_string();
    let lowered = q.to_lowercase();
    for prefix in STRIP_PREFIXES {
        if lowered.starts_with(prefix) {
            q = q[prefix.len()..].trim().to_string();
            break;
        }
    }
    let q = q.replace("'s linkedin", " linkedin").replace(" profile", " ");
    q.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trims surrounding bracket/quote punctuation and trailing sentence
/// punctuation, then requires an `http(s)://host` URL.
pub fn sanitize_url(raw: &str) -> Option<String> {
    let s = raw.trim().trim_matches(|c: char| "<>[](){}\"'".contains(c));
    let s = s.trim_end_matches(|c: char| ".,;:!?".contains(c));
    if s.is_empty() {
        return None;
    }
    let parsed = url::Url::parse(s).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return None;
    }
    Some(s.to_string())
}

pub fn is_linkedin_profile_url(raw: &str) -> bool {
    let Ok(parsed) = url::Url::parse(raw) else { return false };
    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    let path = parsed.path().to_lowercase();
    host.contains("linkedin.com") && path.starts_with("/in/")
}

fn google_search_url(query: &str) -> String {
    let encoded: String = url::form_urlencoded::Serializer::new(String::new()).append_pair("q", query).finish();
    format!("https://www.google.com/search?{encoded}")
}

/// Sanitises every `open_links` action's URLs, dedupes and caps at 10, and
/// replaces model-guessed LinkedIn profile slugs with a search fallback
/// when the user supplied no explicit URL of their own.
pub fn normalize_tool_plan(user_message: &str, tool_plan: Option<&Value>) -> Option<Value> {
    let actions = tool_plan?.get("actions")?.as_array()?.clone();
    let user_has_explicit_url = url_re().is_match(user_message);
    let normalized_query = normalize_search_query(user_message);
    let mut has_browser_search = actions.iter().any(|a| a.get("tool").and_then(Value::as_str) == Some("browser_search"));

    let mut normalized_actions = Vec::new();
    for action in actions {
        let Some(obj) = action.as_object() else { continue };
        let tool = obj.get("tool").and_then(Value::as_str);
        let params = obj.get("params").and_then(Value::as_object);
        if tool == Some("open_links") {
            let Some(params) = params else { continue };
            let Some(urls) = params.get("urls").and_then(Value::as_array) else { continue };
            let mut sanitized = Vec::new();
            for u in urls {
                if let Some(s) = u.as_str().and_then(sanitize_url)
                    && !sanitized.contains(&s)
                {
                    sanitized.push(s);
                }
            }
            if sanitized.is_empty() {
                continue;
            }
            if !user_has_explicit_url && sanitized.iter().any(|u| is_linkedin_profile_url(u)) {
                if !normalized_query.is_empty() && !has_browser_search {
                    normalized_actions.push(json!({
                        "tool": "browser_search",
                        "params": { "query": normalized_query, "max_results": 5, "headless": true },
                    }));
                    has_browser_search = true;
                }
                if !normalized_query.is_empty() {
                    sanitized = vec![google_search_url(&normalized_query)];
                }
            }
            sanitized.truncate(10);
            normalized_actions.push(json!({ "tool": "open_links", "params": { "urls": sanitized } }));
            continue;
        }
        normalized_actions.push(Value::Object(obj.clone()));
    }

    if normalized_actions.is_empty() { None } else { Some(json!({ "actions": normalized_actions })) }
}

/// Derives a plan from the raw turn when the model proposed none: trust
/// URLs the user typed themselves before trusting anything it generated.
pub fn fallback_tool_plan(user_message: &str, assistant_message: &str) -> Option<Value> {
    let text = format!("{user_message}\n{assistant_message}").to_lowercase();
    let urls: Vec<String> = url_re().find_iter(user_message).map(|m| m.as_str().to_string()).collect();

    if !urls.is_empty() && (text.contains("open") || text.contains("browser") || text.contains("link")) {
        let mut unique = Vec::new();
        for u in urls {
            if !unique.contains(&u) {
                unique.push(u);
            }
        }
        unique.truncate(10);
        return Some(json!({ "actions": [{ "tool": "open_links", "params": { "urls": unique } }] }));
    }

    let wants_open = ["open", "find", "search", "profile", "page"].iter().any(|w| text.contains(w));
    let query = user_message.trim();
    if wants_open && !query.is_empty() {
        let normalized_query = normalize_search_query(query);
        let mut actions = vec![json!({
            "tool": "browser_search",
            "params": { "query": normalized_query, "max_results": 5, "headless": true },
        })];
        if ["open", "browser", "link"].iter().any(|w| text.contains(w)) {
            actions.push(json!({ "tool": "open_links", "params": { "urls": [google_search_url(&normalized_query)] } }));
        }
        return Some(json!({ "actions": actions }));
    }
    None
}

pub fn has_actions(plan: &Value) -> bool {
    plan.get("actions").and_then(Value::as_array).is_some_and(|a| !a.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_search_query_basic() {
        assert_eq!(normalize_search_query("  Open   the  report  "), "the report");
        assert_eq!(normalize_search_query("Find Jane's LinkedIn profile"), "Jane's LinkedIn");
    }

    #[test]
    fn sanitize_url_strips_punctuation_and_requires_scheme() {
        assert_eq!(sanitize_url("(https://example.com/page).").as_deref(), Some("https://example.com/page"));
        assert_eq!(sanitize_url("not a url"), None);
        assert_eq!(sanitize_url("ftp://example.com"), None);
    }

    #[test]
    fn linkedin_profile_detection() {
        assert!(is_linkedin_profile_url("https://www.linkedin.com/in/jane-doe"));
        assert!(!is_linkedin_profile_url("https://www.linkedin.com/company/acme"));
    }

    #[test]
    fn normalize_plan_substitutes_guessed_linkedin_profile() {
        let plan = json!({
            "actions": [{ "tool": "open_links", "params": { "urls": ["https://www.linkedin.com/in/guessed-slug"] } }]
        });
        let out = normalize_tool_plan("find Jane's LinkedIn profile", Some(&plan)).unwrap();
        let actions = out["actions"].as_array().unwrap();
        assert!(actions.iter().any(|a| a["tool"] == "browser_search"));
        let open = actions.iter().find(|a| a["tool"] == "open_links").unwrap();
        let urls = open["params"]["urls"].as_array().unwrap();
        assert!(urls[0].as_str().unwrap().starts_with("https://www.google.com/search?q="));
    }

    #[test]
    fn normalize_plan_keeps_explicit_user_supplied_linkedin_url() {
        let plan = json!({
            "actions": [{ "tool": "open_links", "params": { "urls": ["https://www.linkedin.com/in/jane-doe"] } }]
        });
        let out = normalize_tool_plan("open https://www.linkedin.com/in/jane-doe", Some(&plan)).unwrap();
        let urls = out["actions"][0]["params"]["urls"].as_array().unwrap();
        assert_eq!(urls[0], "https://www.linkedin.com/in/jane-doe");
    }

    #[test]
    fn normalize_plan_dedupes_and_caps_urls() {
        let urls: Vec<Value> = (0..15).map(|i| json!(format!("https://example.com/{i}"))).collect();
        let mut with_dupe = urls.clone();
        with_dupe.push(json!("https://example.com/0"));
        let plan = json!({ "actions": [{ "tool": "open_links", "params": { "urls": with_dupe } }] });
        let out = normalize_tool_plan("open some links", Some(&plan)).unwrap();
        assert_eq!(out["actions"][0]["params"]["urls"].as_array().unwrap().len(), 10);
    }

    #[test]
    fn fallback_plan_prefers_explicit_user_urls() {
        let plan = fallback_tool_plan("please open https://example.com/doc", "Sure, opening it now.").unwrap();
        assert_eq!(plan["actions"][0]["tool"], "open_links");
    }

    #[test]
    fn fallback_plan_proposes_browser_search_for_open_intent() {
        let plan = fallback_tool_plan("find Jane Doe's profile", "I'll look that up.").unwrap();
        let actions = plan["actions"].as_array().unwrap();
        assert_eq!(actions[0]["tool"], "browser_search");
    }

    #[test]
    fn fallback_plan_none_when_no_intent_detected() {
        assert!(fallback_tool_plan("what is the capital of France?", "Paris.").is_none());
    }
}
