//! Process-wide configuration, loaded once into an immutable `Settings`
//! value at startup and handed to every service as a plain `Arc<Settings>`
//! (no global state — see the interface-driven dependency injection design
//! note).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_app_name() -> String {
    "latchkey".to_string()
}
fn default_env() -> String {
    "dev".to_string()
}
fn default_database_url() -> String {
    "latchkey.db".to_string()
}
fn default_llm_provider() -> String {
    "ollama".to_string()
}
fn default_ollama_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}
fn default_ollama_model() -> String {
    "qwen2.5:3b".to_string()
}
fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_llm_timeout_s() -> u64 {
    120
}
fn default_prompt_pack_dir() -> String {
    "prompt_pack".to_string()
}
fn default_rag_store_dir() -> String {
    ".latchkey/rag".to_string()
}
fn default_rag_chunk_size() -> usize {
    1200
}
fn default_rag_chunk_overlap() -> usize {
    200
}
fn default_rag_embedding_dim() -> usize {
    384
}

/// Immutable application settings, overridable by environment variables of
/// matching (upper-snake) name — e.g. `OLLAMA_MODEL` overrides
/// `ollama_model`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app_name: String,
    pub env: String,
    pub database_url: String,
    pub llm_provider: String,
    pub ollama_base_url: String,
    pub ollama_model: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub llm_timeout_s: u64,
    pub prompt_pack_dir: String,
    pub rag_store_dir: String,
    pub rag_chunk_size: usize,
    pub rag_chunk_overlap: usize,
    pub rag_embedding_dim: usize,
    /// Reserved for future remote-access auth; unused by the core today.
    pub api_key: Option<String>,
    pub cors_origins: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            env: default_env(),
            database_url: default_database_url(),
            llm_provider: default_llm_provider(),
            ollama_base_url: default_ollama_base_url(),
            ollama_model: default_ollama_model(),
            gemini_api_key: None,
            gemini_model: default_gemini_model(),
            llm_timeout_s: default_llm_timeout_s(),
            prompt_pack_dir: default_prompt_pack_dir(),
            rag_store_dir: default_rag_store_dir(),
            rag_chunk_size: default_rag_chunk_size(),
            rag_chunk_overlap: default_rag_chunk_overlap(),
            rag_embedding_dim: default_rag_embedding_dim(),
            api_key: None,
            cors_origins: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file, then apply environment
    /// variable overrides on top (env wins).
    pub fn load(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match config_path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("failed to read config from {}: {e}", path.display()))?;
                toml::from_str(&content)
                    .map_err(|e| anyhow::anyhow!("failed to parse config TOML from {}: {e}", path.display()))?
            }
            _ => Settings::default(),
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("APP_NAME") {
            self.app_name = v;
        }
        if let Ok(v) = std::env::var("ENV") {
            self.env = v;
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database_url = v;
        }
        if let Ok(v) = std::env::var("LLM_PROVIDER") {
            self.llm_provider = v;
        }
        if let Ok(v) = std::env::var("OLLAMA_BASE_URL") {
            self.ollama_base_url = v;
        }
        if let Ok(v) = std::env::var("OLLAMA_MODEL") {
            self.ollama_model = v;
        }
        if let Ok(v) = std::env::var("GEMINI_API_KEY") {
            self.gemini_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("GEMINI_MODEL") {
            self.gemini_model = v;
        }
        if let Ok(v) = std::env::var("LLM_TIMEOUT_S") {
            if let Ok(n) = v.parse() {
                self.llm_timeout_s = n;
            }
        }
        if let Ok(v) = std::env::var("PROMPT_PACK_DIR") {
            self.prompt_pack_dir = v;
        }
        if let Ok(v) = std::env::var("RAG_STORE_DIR") {
            self.rag_store_dir = v;
        }
        if let Ok(v) = std::env::var("RAG_CHUNK_SIZE") {
            if let Ok(n) = v.parse() {
                self.rag_chunk_size = n;
            }
        }
        if let Ok(v) = std::env::var("RAG_CHUNK_OVERLAP") {
            if let Ok(n) = v.parse() {
                self.rag_chunk_overlap = n;
            }
        }
        if let Ok(v) = std::env::var("RAG_EMBEDDING_DIM") {
            if let Ok(n) = v.parse() {
                self.rag_embedding_dim = n;
            }
        }
        if let Ok(v) = std::env::var("API_KEY") {
            self.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("CORS_ORIGINS") {
            self.cors_origins = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
    }

    pub fn prompt_pack_path(&self) -> PathBuf {
        PathBuf::from(&self.prompt_pack_dir)
    }

    pub fn rag_store_path(&self) -> PathBuf {
        PathBuf::from(&self.rag_store_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let s = Settings::default();
        assert_eq!(s.llm_provider, "ollama");
        assert_eq!(s.rag_chunk_size, 1200);
        assert_eq!(s.rag_chunk_overlap, 200);
        assert_eq!(s.rag_embedding_dim, 384);
        assert_eq!(s.llm_timeout_s, 120);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = Settings::load(Some(Path::new("/nonexistent/path.toml"))).unwrap();
        assert_eq!(settings.app_name, "latchkey");
    }

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "app_name = \"custom\"\nollama_model = \"llama3\"\n").unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.app_name, "custom");
        assert_eq!(settings.ollama_model, "llama3");
    }
}
