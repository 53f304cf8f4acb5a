//! Filename/path search (`find_files`): scores filesystem paths by token
//! overlap with the query rather than consulting the chunk index.

use super::MEDIA_EXTENSIONS;
use super::tokenize::{compact, query_stopwords, tokenize};
use regex::Regex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::OnceLock;

#[derive(Debug, Clone, serde::Serialize)]
pub struct RagHit {
    pub path: String,
    pub score: f32,
    pub snippet: String,
}

const DOC_EXTENSIONS: &[&str] = &[".pdf", ".doc", ".docx", ".txt", ".md"];
const IMAGE_WORDS: &[&str] = &["photo", "photos", "picture", "pictures", "image", "images"];
const DOC_WORDS: &[&str] = &["document", "documents", "pdf", "doc", "docx", "txt"];

fn drive_hint_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b([a-z]):\b").unwrap())
}

/// Windows drive-letter hints in the query (`D:`), each normalised to
/// `D:\`. No-op in practice on non-Windows roots, since none will match.
pub fn extract_drive_hints(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for caps in drive_hint_re().captures_iter(query) {
        let drive = format!("{}:\\", caps[1].to_uppercase());
        if seen.insert(drive.clone()) {
            out.push(drive);
        }
    }
    out
}

/// Scores every path under `roots` against `query`'s tokens and returns
/// the top `top_k` (clamped to [1,20]). `list_paths` abstracts the actual
/// filesystem walk so this function stays testable without touching disk
/// permission state.
pub fn find_files(
    query: &str,
    top_k: usize,
    roots: &[String],
    max_files_scan: usize,
    list_paths: impl FnOnce(&[String], usize) -> Vec<PathBuf>,
) -> anyhow::Result<Vec<RagHit>> {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return Ok(Vec::new());
    }

    let mut roots = roots.to_vec();
    let drive_hints = extract_drive_hints(query);
    if !drive_hints.is_empty() {
        roots.retain(|r| drive_hints.iter().any(|d| r.to_lowercase().starts_with(&d.to_lowercase())));
        if roots.is_empty() {
            return Ok(Vec::new());
        }
    }

    let stopwords = query_stopwords();
    let q_tokens: HashSet<String> =
        tokenize(&q).into_iter().filter(|t| t.len() >= 3 && !stopwords.contains(t.as_str()) && !t.chars().all(|c| c.is_ascii_digit())).collect();
    if q_tokens.is_empty() {
        return Ok(Vec::new());
    }
    let q_compact = compact(&q);
    let wants_images = IMAGE_WORDS.iter().any(|w| q.contains(w));
    let wants_docs = DOC_WORDS.iter().any(|w| q.contains(w));

    let mut scored = Vec::new();
    let mut relaxed = Vec::new();

    for path in list_paths(&roots, max_files_scan) {
        let path_str = path.to_string_lossy().to_string();
        let p = path_str.to_lowercase();
        let name = path.file_name().map(|n| n.to_string_lossy().to_lowercase()).unwrap_or_default();
        let ext = path.extension().map(|e| format!(".{}", e.to_string_lossy().to_lowercase())).unwrap_or_default();
        let path_tokens: HashSet<String> = tokenize(&p).into_iter().collect();
        let overlap = q_tokens.intersection(&path_tokens).count();
        let compact_path = compact(&p);
        let compact_overlap = q_tokens.iter().filter(|tok| {
            let ct = compact(tok);
            !ct.is_empty() && compact_path.contains(&ct)
        }).count();
        let overlap_total = overlap + compact_overlap;
        if overlap_total == 0 && !q_compact.is_empty() && !compact_path.contains(&q_compact) {
            continue;
        }
        let coverage = overlap_total as f32 / q_tokens.len().max(1) as f32;

        let mut score = overlap_total as f32;
        if wants_images && (MEDIA_EXTENSIONS.contains(&ext.as_str()) || ["\\pictures\\", "\\photos\\", "\\dcim\\"].iter().any(|seg| p.contains(seg))) {
            score += 2.0;
        }
        if wants_docs && DOC_EXTENSIONS.contains(&ext.as_str()) {
            score += 1.5;
        }
        if q.contains(&name) || q_tokens.iter().any(|tok| !tok.is_empty() && name.contains(tok.as_str())) {
            score += 1.0;
        }
        if !q_compact.is_empty() && compact_path.contains(&q_compact) {
            score += 1.2;
        }
        score += coverage;
        if path_str.len() < 140 {
            score += 0.2;
        }

        let hit = RagHit { path: path_str, score, snippet: format!("Matched path: {p}") };
        if coverage >= 0.34 {
            scored.push(hit);
        } else {
            relaxed.push(hit);
        }
    }

    let cap = top_k.clamp(1, 20);
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    if !scored.is_empty() {
        scored.truncate(cap);
        return Ok(scored);
    }
    relaxed.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    relaxed.truncate(cap);
    Ok(relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(_roots: &[String], _max: usize) -> Vec<PathBuf> {
        vec![
            PathBuf::from("/home/user/Documents/quarterly_report.pdf"),
            PathBuf::from("/home/user/Pictures/vacation.jpg"),
            PathBuf::from("/home/user/code/main.rs"),
        ]
    }

    #[test]
    fn finds_document_by_name_fragment() {
        let hits = find_files("quarterly report", 5, &["/home/user".to_string()], 1000, list).unwrap();
        assert_eq!(hits[0].path, "/home/user/Documents/quarterly_report.pdf");
    }

    #[test]
    fn image_words_boost_media_files() {
        let hits = find_files("find my vacation pictures", 5, &["/home/user".to_string()], 1000, list).unwrap();
        assert_eq!(hits[0].path, "/home/user/Pictures/vacation.jpg");
    }

    #[test]
    fn drive_hints_restrict_roots() {
        let hints = extract_drive_hints("find it on D: drive please");
        assert_eq!(hints, vec!["D:\\".to_string()]);
    }

    #[test]
    fn empty_query_returns_no_hits() {
        let hits = find_files("   ", 5, &["/home/user".to_string()], 1000, list).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn stopword_only_query_returns_no_hits() {
        let hits = find_files("find the file", 5, &["/home/user".to_string()], 1000, list).unwrap();
        assert!(hits.is_empty());
    }
}
