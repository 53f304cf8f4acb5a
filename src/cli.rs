//! Process entrypoint subcommands: a small `serve`/`doctor` surface,
//! since this crate has one long-running server and no background
//! schedulers.

use crate::config::Settings;
use crate::providers::LlmProvider;
use crate::providers::gemini::GeminiProvider;
use crate::providers::ollama::OllamaProvider;
use crate::prompts::PromptPack;
use crate::rag::RagService;
use crate::store::sqlite::SqliteStore;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "latchkey")]
#[command(about = "Local-first conversational assistant server")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Path to a TOML config file (optional; env vars always apply on top)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Bind address, e.g. 127.0.0.1:8080
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
    },
    /// Check configuration, prompt pack, database, and LLM provider reachability
    Doctor {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { config, bind } => serve(config, &bind).await,
        Commands::Doctor { config } => doctor(config).await,
    }
}

fn build_provider(settings: &Settings, pack: &PromptPack) -> Result<Arc<dyn LlmProvider>> {
    let timeout = Duration::from_secs(settings.llm_timeout_s);
    match settings.llm_provider.as_str() {
        "gemini" => {
            let api_key = settings.gemini_api_key.clone().context("GEMINI_API_KEY is required when LLM_PROVIDER=gemini")?;
            Ok(Arc::new(GeminiProvider::new(api_key, settings.gemini_model.clone(), pack.system.clone(), pack.repair.clone(), timeout)))
        }
        "ollama" => Ok(Arc::new(OllamaProvider::new(
            settings.ollama_base_url.clone(),
            settings.ollama_model.clone(),
            pack.system.clone(),
            pack.repair.clone(),
            timeout,
        ))),
        other => anyhow::bail!("unknown llm_provider: {other} (expected \"ollama\" or \"gemini\")"),
    }
}

async fn serve(config: Option<PathBuf>, bind: &str) -> Result<()> {
    let settings = Arc::new(Settings::load(config.as_deref())?);
    info!(provider = %settings.llm_provider, env = %settings.env, "starting latchkey");

    let pack = PromptPack::load(&settings.prompt_pack_path()).context("loading prompt pack")?;
    let llm = build_provider(&settings, &pack)?;

    let store: Arc<dyn crate::store::Store> = Arc::new(SqliteStore::open(&PathBuf::from(&settings.database_url)).context("opening store")?);
    let rag = Arc::new(
        RagService::new(settings.rag_store_path(), settings.rag_chunk_size, settings.rag_chunk_overlap, settings.rag_embedding_dim)
            .context("initialising retrieval index")?,
    );

    let router = crate::gateway::build_router(store, llm, rag, settings);
    let listener = tokio::net::TcpListener::bind(bind).await.with_context(|| format!("binding {bind}"))?;
    info!(%bind, "listening");
    axum::serve(listener, router).await.context("server error")
}

async fn doctor(config: Option<PathBuf>) -> Result<()> {
    let settings = Settings::load(config.as_deref())?;
    println!("app_name: {}", settings.app_name);
    println!("env: {}", settings.env);
    println!("llm_provider: {}", settings.llm_provider);

    match PromptPack::load(&settings.prompt_pack_path()) {
        Ok(_) => println!("prompt_pack: ok ({})", settings.prompt_pack_path().display()),
        Err(e) => println!("prompt_pack: FAILED ({e})"),
    }

    match &settings.llm_provider[..] {
        "gemini" => {
            let present = settings.gemini_api_key.as_deref().is_some_and(|k| !k.is_empty());
            println!("gemini_api_key: {}", if present { "present" } else { "MISSING" });
        }
        "ollama" => {
            let client = reqwest::Client::new();
            let url = format!("{}/api/tags", settings.ollama_base_url.trim_end_matches('/'));
            match client.get(&url).timeout(Duration::from_secs(3)).send().await {
                Ok(resp) if resp.status().is_success() => println!("ollama: reachable at {}", settings.ollama_base_url),
                Ok(resp) => println!("ollama: responded with {}", resp.status()),
                Err(e) => println!("ollama: unreachable ({e})"),
            }
        }
        other => println!("llm_provider: unrecognised value {other:?}"),
    }

    match SqliteStore::open(&PathBuf::from(&settings.database_url)) {
        Ok(_) => println!("database: ok ({})", settings.database_url),
        Err(e) => println!("database: FAILED ({e})"),
    }

    match RagService::new(settings.rag_store_path(), settings.rag_chunk_size, settings.rag_chunk_overlap, settings.rag_embedding_dim) {
        Ok(svc) => println!("rag_store: ok, {} approved root(s)", svc.list_permissions().len()),
        Err(e) => println!("rag_store: FAILED ({e})"),
    }

    Ok(())
}
