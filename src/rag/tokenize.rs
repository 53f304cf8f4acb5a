//! Tokenisation, hashed-token embeddings, and the query stopword list
//! shared by content search and filename search.

use regex::Regex;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-zA-Z0-9_]{2,}").unwrap())
}

pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    token_re().find_iter(&lowered).map(|m| m.as_str().to_string()).collect()
}

pub fn query_stopwords() -> &'static HashSet<&'static str> {
    static WORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    WORDS.get_or_init(|| {
        [
            "find", "search", "locate", "where", "is", "are", "the", "a", "an", "of", "for", "in", "on", "to", "my",
            "local", "pc", "computer", "disk", "drive", "file", "files", "folder", "folders", "directory", "document",
            "documents",
        ]
        .into_iter()
        .collect()
    })
}

/// Strips everything but lowercase ASCII letters and digits.
pub fn compact(s: &str) -> String {
    s.to_lowercase().chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// A stable string hash matching the role Python's salted `hash()` plays
/// here: any deterministic-within-a-process function would do, but we use
/// a fixed-seed FNV-1a so index rows stay queryable across restarts (the
/// original relies on `PYTHONHASHSEED` discipline to get the same
/// property operationally).
fn stable_hash(token: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    0x9e3779b97f4a7c15u64.hash(&mut hasher);
    token.hash(&mut hasher);
    hasher.finish()
}

fn normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

/// Deterministic hashed bag-of-tokens embedding, L2-normalised.
pub fn embed(text: &str, embedding_dim: usize) -> Vec<f32> {
    let mut vec = vec![0.0f32; embedding_dim];
    for tok in tokenize(text) {
        let idx = (stable_hash(&tok) as usize) % embedding_dim;
        vec[idx] += 1.0;
    }
    normalize(&mut vec);
    vec
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_lowercase_words_of_min_length_two() {
        assert_eq!(tokenize("Hello, World! a1 x"), vec!["hello", "world", "a1"]);
    }

    #[test]
    fn compact_strips_punctuation_and_spaces() {
        assert_eq!(compact("My Report (final).pdf"), "myreportfinalpdf");
    }

    #[test]
    fn embeddings_are_l2_normalised() {
        let v = embed("rust rust async runtime", 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5 || norm == 0.0);
    }

    #[test]
    fn identical_text_embeds_identically() {
        assert_eq!(embed("same text twice", 128), embed("same text twice", 128));
    }

    #[test]
    fn dot_product_of_identical_vectors_is_one() {
        let v = embed("content addressed approval pipeline", 128);
        assert!((dot(&v, &v) - 1.0).abs() < 1e-5);
    }
}
