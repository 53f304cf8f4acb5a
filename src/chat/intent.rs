//! Intent triage and the RAG permission gate. Not present in the
//! retained `chat.py` (an older revision without RAG); written in the
//! same procedural style as [`super::normalize`].

use std::sync::OnceLock;

const KNOWN_FILE_EXTENSIONS: &[&str] =
    &["pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "md", "csv", "jpg", "jpeg", "png", "gif", "mp4", "mp3", "zip"];

const FOLDER_HINTS: &[&str] = &["downloads", "documents", "desktop", "pictures", "photos", "music", "videos"];

fn readme_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)\breadme\b").unwrap())
}

fn find_for_about_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)\b(find|search|locate|lookup|look up)\b.*\b(for|about)\b").unwrap())
}

// Deliberately excludes "document"/"pdf": those nouns belong to the
// narrower retrieval-adjacent pattern below, since they point at content
// worth searching rather than a path worth locating.
fn find_file_noun_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?i)\b(find|search|locate|where)\b.*\b(file|files|folder|folders|photo|photos|picture|pictures)\b").unwrap()
    })
}

fn retrieval_adjacent_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)\b(find|search)\b.*\b(document|documents|pdf)\b").unwrap())
}

fn drive_hint_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)\b([a-z]):\\?\b").unwrap())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    FileFind,
    RetrievalAdjacent,
    Generic,
}

fn has_known_extension_token(message: &str) -> bool {
    let lowered = message.to_lowercase();
    KNOWN_FILE_EXTENSIONS.iter().any(|ext| {
        lowered.contains(&format!(".{ext}")) || lowered.split_whitespace().any(|w| w.trim_matches(|c: char| !c.is_alphanumeric()) == *ext)
    })
}

/// Classifies a user turn. `force_file_search` coerces `FileFind`
/// regardless of the heuristics below.
pub fn classify(message: &str, force_file_search: bool) -> Intent {
    if force_file_search {
        return Intent::FileFind;
    }
    if readme_re().is_match(message)
        || has_known_extension_token(message)
        || find_for_about_re().is_match(message)
        || find_file_noun_re().is_match(message)
    {
        return Intent::FileFind;
    }
    if retrieval_adjacent_re().is_match(message) {
        return Intent::RetrievalAdjacent;
    }
    Intent::Generic
}

/// The first folder name (e.g. "downloads") mentioned in `message` that
/// isn't already covered by an approved root.
pub fn detect_ungranted_folder_hint(message: &str, allowed_roots: &[String]) -> Option<String> {
    let lowered = message.to_lowercase();
    FOLDER_HINTS.iter().find(|hint| lowered.contains(*hint)).map(|hint| hint.to_string()).filter(|hint| {
        !allowed_roots.iter().any(|root| root.to_lowercase().contains(hint.as_str()))
    })
}

/// The first drive-letter hint (`D:`) in `message` not covered by an
/// approved root, normalised to `D:\`.
pub fn detect_uncovered_drive_hint(message: &str, allowed_roots: &[String]) -> Option<String> {
    for caps in drive_hint_re().captures_iter(message) {
        let drive = format!("{}:\\", caps[1].to_uppercase());
        if !allowed_roots.iter().any(|root| root.to_uppercase().starts_with(&drive)) {
            return Some(drive);
        }
    }
    None
}
