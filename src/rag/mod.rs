//! Retrieval Index: permissioned enumeration of filesystem roots,
//! content chunking, hashed-token embeddings, token-overlap path search.
//! Grounded on the original `rag/service.py`; state lives under a
//! configured directory exactly as there (`permissions.json`,
//! `index.jsonl`, `index_meta.json`).

mod find_files;
mod tokenize;

pub use find_files::RagHit;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const ALLOWED_EXTENSIONS: &[&str] = &[
    ".txt", ".md", ".rst", ".json", ".csv", ".log", ".py", ".ts", ".tsx", ".js", ".jsx", ".java", ".go", ".rs", ".c",
    ".cpp", ".h", ".hpp", ".cs", ".sql", ".yaml", ".yml", ".toml", ".ini", ".xml", ".html", ".css", ".sh", ".ps1",
    ".bat",
];

pub const MEDIA_EXTENSIONS: &[&str] =
    &[".jpg", ".jpeg", ".png", ".gif", ".bmp", ".webp", ".tif", ".tiff", ".heic", ".mp4", ".mov", ".avi", ".mkv", ".webm"];

pub const IGNORED_DIRS: &[&str] =
    &[".git", ".hg", ".svn", "node_modules", ".venv", "venv", "__pycache__", ".idea", ".vscode", "dist", "build", "target", "coverage"];

const MAX_FILE_BYTES: u64 = 1_500_000;
const SNIPPET_CHARS: usize = 700;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PermissionRoot {
    path: String,
    granted_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PermissionsFile {
    #[serde(default)]
    roots: Vec<PermissionRoot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRow {
    pub id: String,
    pub path: String,
    pub mtime: f64,
    pub chunk_index: usize,
    pub snippet: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexMeta {
    pub roots: Vec<String>,
    pub files_indexed: usize,
    pub chunks_indexed: usize,
    pub indexed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RagStatus {
    pub approved_roots: Vec<String>,
    pub index_exists: bool,
    pub index_meta: IndexMeta,
}

/// Mutual exclusion around permission/index mutation: concurrent
/// `rebuild_index`/permission writes must serialise.
pub struct RagService {
    store_dir: PathBuf,
    chunk_size: usize,
    chunk_overlap: usize,
    embedding_dim: usize,
    write_lock: Mutex<()>,
}

impl RagService {
    pub fn new(store_dir: impl Into<PathBuf>, chunk_size: usize, chunk_overlap: usize, embedding_dim: usize) -> anyhow::Result<Self> {
        let store_dir = store_dir.into();
        std::fs::create_dir_all(&store_dir)?;
        let chunk_size = chunk_size.max(400);
        let chunk_overlap = chunk_overlap.clamp(50, chunk_size / 2);
        let embedding_dim = embedding_dim.max(128);
        Ok(Self { store_dir, chunk_size, chunk_overlap, embedding_dim, write_lock: Mutex::new(()) })
    }

    fn permissions_path(&self) -> PathBuf {
        self.store_dir.join("permissions.json")
    }
    fn index_path(&self) -> PathBuf {
        self.store_dir.join("index.jsonl")
    }
    fn meta_path(&self) -> PathBuf {
        self.store_dir.join("index_meta.json")
    }

    fn norm_path(path: &str) -> anyhow::Result<String> {
        let expanded = shellexpand_home(path);
        let p = Path::new(&expanded);
        let resolved = if p.exists() { std::fs::canonicalize(p)? } else { std::path::absolute(p)? };
        Ok(resolved.to_string_lossy().to_string())
    }

    fn load_permissions(&self) -> Vec<String> {
        let Ok(content) = std::fs::read_to_string(self.permissions_path()) else { return Vec::new() };
        let Ok(parsed) = serde_json::from_str::<PermissionsFile>(&content) else { return Vec::new() };
        let mut roots: Vec<String> = parsed
            .roots
            .into_iter()
            .filter_map(|r| Self::norm_path(&r.path).ok())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        roots.sort();
        roots
    }

    fn write_permissions(&self, roots: &[String]) -> anyhow::Result<()> {
        let file = PermissionsFile {
            roots: roots.iter().map(|p| PermissionRoot { path: p.clone(), granted_at: Utc::now().to_rfc3339() }).collect(),
        };
        std::fs::write(self.permissions_path(), serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    fn is_under_root(path: &str, root: &str) -> bool {
        let p = path.to_lowercase();
        let r = root.to_lowercase();
        let r = r.trim_end_matches(['\\', '/']);
        p == r || p.starts_with(&format!("{r}{}", std::path::MAIN_SEPARATOR))
    }

    pub fn list_permissions(&self) -> Vec<String> {
        self.load_permissions()
    }

    pub fn is_path_allowed(&self, path: &str) -> bool {
        let Ok(p) = Self::norm_path(path) else { return false };
        self.load_permissions().iter().any(|root| Self::is_under_root(&p, root))
    }

    /// Replaces the approved root set wholesale. Every path must exist and
    /// be a directory.
    pub fn set_permissions(&self, roots: &[String]) -> anyhow::Result<Vec<String>> {
        let _guard = self.write_lock.lock().unwrap();
        let mut cleaned = Vec::new();
        for root in roots {
            let p = Self::norm_path(root)?;
            if !Path::new(&p).is_dir() {
                anyhow::bail!("Path must be an existing directory: {root}");
            }
            if !cleaned.contains(&p) {
                cleaned.push(p);
            }
        }
        self.write_permissions(&cleaned)?;
        Ok(cleaned)
    }

    /// Idempotent grant of a single root.
    pub fn grant_permission(&self, path: &str) -> anyhow::Result<Vec<String>> {
        let _guard = self.write_lock.lock().unwrap();
        let root = Self::norm_path(path)?;
        if !Path::new(&root).is_dir() {
            anyhow::bail!("Permission path must be an existing directory");
        }
        let mut roots = self.load_permissions();
        if !roots.contains(&root) {
            roots.push(root);
        }
        roots.sort();
        self.write_permissions(&roots)?;
        Ok(roots)
    }

    pub fn revoke_permission(&self, path: &str) -> anyhow::Result<Vec<String>> {
        let _guard = self.write_lock.lock().unwrap();
        let root = Self::norm_path(path)?;
        let kept: Vec<String> = self.load_permissions().into_iter().filter(|p| p != &root).collect();
        self.write_permissions(&kept)?;
        Ok(kept)
    }

    pub fn list_available_drives(&self) -> Vec<String> {
        if cfg!(target_os = "windows") {
            ('A'..='Z')
                .map(|c| format!("{c}:\\"))
                .filter(|p| Path::new(p).exists())
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Immediate child directories of `path`, or available drives when
    /// `path` is empty.
    pub fn list_subdirs(&self, path: Option<&str>, limit: usize) -> anyhow::Result<Vec<String>> {
        let Some(path) = path.filter(|p| !p.is_empty()) else { return Ok(self.list_available_drives()) };
        let p = Self::norm_path(path)?;
        let p = Path::new(&p);
        if !p.is_dir() {
            anyhow::bail!("Path must be an existing directory");
        }
        let ignored: HashSet<&str> = IGNORED_DIRS.iter().copied().collect();
        let mut out = Vec::new();
        let Ok(entries) = std::fs::read_dir(p) else { return Ok(Vec::new()) };
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_lowercase();
            if ignored.contains(name.as_str()) {
                continue;
            }
            out.push(entry.path().to_string_lossy().to_string());
            if out.len() >= limit {
                break;
            }
        }
        out.sort();
        Ok(out)
    }

    fn has_allowed_extension(path: &Path) -> bool {
        path.extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
    }

    fn iter_files(roots: &[String], max_files: usize, require_allowed_ext: bool) -> Vec<PathBuf> {
        let ignored: HashSet<&str> = IGNORED_DIRS.iter().copied().collect();
        let mut out = Vec::new();
        'roots: for root in roots {
            let walker = walkdir::WalkDir::new(root).into_iter().filter_entry(|e| {
                !e.file_type().is_dir()
                    || e.file_name().to_str().map(|n| !ignored.contains(&n.to_lowercase().as_str())).unwrap_or(true)
            });
            for entry in walker.flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                if require_allowed_ext && !Self::has_allowed_extension(entry.path()) {
                    continue;
                }
                out.push(entry.path().to_path_buf());
                if out.len() >= max_files {
                    break 'roots;
                }
            }
        }
        out
    }

    fn read_text(path: &Path) -> String {
        let Ok(meta) = std::fs::metadata(path) else { return String::new() };
        if !meta.is_file() || meta.len() > MAX_FILE_BYTES {
            return String::new();
        }
        std::fs::read(path).map(|bytes| String::from_utf8_lossy(&bytes).to_string()).unwrap_or_default()
    }

    fn chunk_text(&self, text: &str) -> Vec<String> {
        let s = text.trim();
        if s.is_empty() {
            return Vec::new();
        }
        let chars: Vec<char> = s.chars().collect();
        if chars.len() <= self.chunk_size {
            return vec![s.to_string()];
        }
        let step = self.chunk_size - self.chunk_overlap;
        let mut out = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            let end = (i + self.chunk_size).min(chars.len());
            let chunk: String = chars[i..end].iter().collect::<String>().trim().to_string();
            if !chunk.is_empty() {
                out.push(chunk);
            }
            i += step;
        }
        out
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        tokenize::embed(text, self.embedding_dim)
    }

    /// Rewrites `index.jsonl` from the filesystem under `roots` (or every
    /// approved root), then rewrites `index_meta.json`. `roots`, if given,
    /// must each be an approved root.
    pub fn rebuild_index(&self, roots: Option<&[String]>, max_files: usize) -> anyhow::Result<RagStatus> {
        let _guard = self.write_lock.lock().unwrap();
        let allowed = self.load_permissions();
        let roots_to_use = match roots {
            Some(requested) => {
                let mut wanted = Vec::new();
                for r in requested {
                    let norm = Self::norm_path(r)?;
                    if !allowed.contains(&norm) {
                        anyhow::bail!("Root is not approved: {norm}");
                    }
                    wanted.push(norm);
                }
                wanted
            }
            None => allowed,
        };
        if roots_to_use.is_empty() {
            anyhow::bail!("No approved roots. Grant folder permission first.");
        }

        let mut rows = Vec::new();
        let mut files_indexed = 0usize;
        let mut chunks_indexed = 0usize;
        for path in Self::iter_files(&roots_to_use, max_files, true) {
            let text = Self::read_text(&path);
            let chunks = self.chunk_text(&text);
            if chunks.is_empty() {
                continue;
            }
            files_indexed += 1;
            let mtime = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            let path_str = path.to_string_lossy().to_string();
            for (idx, chunk) in chunks.iter().enumerate() {
                rows.push(IndexRow {
                    id: format!("{path_str}::{idx}"),
                    path: path_str.clone(),
                    mtime,
                    chunk_index: idx,
                    snippet: chunk.chars().take(SNIPPET_CHARS).collect(),
                    embedding: self.embed(chunk),
                });
            }
            chunks_indexed += chunks.len();
        }

        let tmp_path = self.index_path().with_extension("jsonl.tmp");
        {
            let mut body = String::new();
            for row in &rows {
                body.push_str(&serde_json::to_string(row)?);
                body.push('\n');
            }
            std::fs::write(&tmp_path, body)?;
        }
        std::fs::rename(&tmp_path, self.index_path())?;

        let meta = IndexMeta { roots: roots_to_use, files_indexed, chunks_indexed, indexed_at: Some(Utc::now()) };
        std::fs::write(self.meta_path(), serde_json::to_string_pretty(&meta)?)?;

        Ok(self.status())
    }

    fn load_rows(&self) -> Vec<IndexRow> {
        let Ok(content) = std::fs::read_to_string(self.index_path()) else { return Vec::new() };
        content.lines().filter_map(|line| serde_json::from_str(line.trim()).ok()).collect()
    }

    pub fn status(&self) -> RagStatus {
        let meta = std::fs::read_to_string(self.meta_path())
            .ok()
            .and_then(|c| serde_json::from_str(&c).ok())
            .unwrap_or_default();
        RagStatus { approved_roots: self.load_permissions(), index_exists: self.index_path().exists(), index_meta: meta }
    }

    /// Embeds `query`, scores every indexed chunk under the requested-or-
    /// approved roots by cosine similarity, discards non-positive scores,
    /// and returns the top `top_k` (clamped to [1,12]).
    pub fn search(&self, query: &str, top_k: usize, roots: Option<&[String]>) -> anyhow::Result<Vec<RagHit>> {
        let q = query.trim();
        if q.is_empty() {
            return Ok(Vec::new());
        }
        let allowed = self.load_permissions();
        let filtered_roots = match roots {
            Some(requested) => {
                let mut out = Vec::new();
                for r in requested {
                    let norm = Self::norm_path(r)?;
                    if !allowed.iter().any(|a| Self::is_under_root(&norm, a)) {
                        anyhow::bail!("Root is not approved: {norm}");
                    }
                    out.push(norm);
                }
                out
            }
            None => allowed,
        };
        if filtered_roots.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self.load_rows();
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let qvec = self.embed(q);
        let mut scored: Vec<RagHit> = rows
            .into_iter()
            .filter(|row| filtered_roots.iter().any(|r| Self::is_under_root(&row.path, r)))
            .filter_map(|row| {
                let score = tokenize::dot(&qvec, &row.embedding);
                if score <= 0.0 { None } else { Some(RagHit { path: row.path, score, snippet: row.snippet }) }
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k.clamp(1, 12));
        Ok(scored)
    }

    /// Filename/path search over the live filesystem. See
    /// [`find_files::find_files`] for the scoring algorithm.
    pub fn find_files(&self, query: &str, top_k: usize, roots: Option<&[String]>, max_files_scan: usize) -> anyhow::Result<Vec<RagHit>> {
        let allowed = self.load_permissions();
        let filtered_roots = match roots {
            Some(requested) => {
                let mut out = Vec::new();
                for r in requested {
                    let norm = Self::norm_path(r)?;
                    if !allowed.iter().any(|a| Self::is_under_root(&norm, a)) {
                        anyhow::bail!("Root is not approved: {norm}");
                    }
                    out.push(norm);
                }
                out
            }
            None => allowed,
        };
        if filtered_roots.is_empty() {
            return Ok(Vec::new());
        }
        find_files::find_files(query, top_k, &filtered_roots, max_files_scan, |roots, max| {
            Self::iter_files(roots, max, false)
        })
    }
}

fn shellexpand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            return format!("{}{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (RagService, tempfile::TempDir) {
        let store = tempfile::tempdir().unwrap();
        (RagService::new(store.path(), 1200, 200, 384).unwrap(), store)
    }

    #[test]
    fn grant_is_idempotent() {
        let (svc, _store) = service();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        let first = svc.grant_permission(&root).unwrap();
        let second = svc.grant_permission(&root).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn path_allowed_only_under_granted_root() {
        let (svc, _store) = service();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join("sub")).unwrap();
        svc.grant_permission(&root.to_string_lossy()).unwrap();
        assert!(svc.is_path_allowed(&root.join("sub").to_string_lossy()));
        assert!(!svc.is_path_allowed("/definitely/not/granted"));
    }

    #[test]
    fn revoke_removes_root() {
        let (svc, _store) = service();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        svc.grant_permission(&root).unwrap();
        let remaining = svc.revoke_permission(&root).unwrap();
        assert!(remaining.is_empty());
        assert!(!svc.is_path_allowed(&root));
    }

    #[test]
    fn rebuild_requires_approved_root() {
        let (svc, _store) = service();
        let dir = tempfile::tempdir().unwrap();
        let err = svc.rebuild_index(Some(&[dir.path().to_string_lossy().to_string()]), 100).unwrap_err();
        assert!(err.to_string().contains("not approved"));
    }

    #[test]
    fn rebuild_and_search_round_trip() {
        let (svc, _store) = service();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "The approval pipeline hashes every draft before locking.").unwrap();
        svc.grant_permission(&dir.path().to_string_lossy()).unwrap();
        let status = svc.rebuild_index(None, 1000).unwrap();
        assert_eq!(status.index_meta.files_indexed, 1);

        let hits = svc.search("approval pipeline hashing", 5, None).unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].path.ends_with("notes.md"));
    }

    #[test]
    fn search_without_permissions_returns_empty() {
        let (svc, _store) = service();
        let hits = svc.search("anything", 5, None).unwrap();
        assert!(hits.is_empty());
    }
}
