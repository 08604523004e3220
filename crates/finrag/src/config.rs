//! Configuration parsing and validation.
//!
//! finrag is configured with a TOML file (default `./config/finrag.toml`).
//! Every section except `[db]` is optional and every field has a default,
//! so a config can be as short as:
//!
//! ```toml
//! [db]
//! path = "./data/finrag.sqlite"
//! ```
//!
//! API keys are never stored in the file. Each section names the
//! environment variable holding its key; a `.env` file in the working
//! directory is loaded before the config is read.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use finrag_core::chunk::ChunkStrategy;
use finrag_core::search::{Fusion, GroupBy, MmrParams, SearchParams};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub finance: FinanceConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Local document collection to ingest.
#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default = "default_documents_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Binary files larger than this are skipped instead of extracted.
    #[serde(default = "default_max_extract_bytes")]
    pub max_extract_bytes: u64,
    /// Ingest on first retrieval when the index is empty.
    #[serde(default = "default_true")]
    pub auto_ingest: bool,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: default_documents_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_extract_bytes: default_max_extract_bytes(),
            auto_ingest: true,
        }
    }
}

fn default_documents_root() -> PathBuf {
    PathBuf::from("./PDFs")
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.pdf".to_string(),
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
        "**/*.docx".to_string(),
    ]
}
fn default_max_extract_bytes() -> u64 {
    50 * 1024 * 1024
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// `"recursive"` or `"paragraph"`.
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Paragraph strategy budget (≈4 chars per token).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Recursive strategy size, in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            max_tokens: default_max_tokens(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn strategy(&self) -> ChunkStrategy {
        match self.strategy.as_str() {
            "paragraph" => ChunkStrategy::Paragraph {
                max_tokens: self.max_tokens,
            },
            _ => ChunkStrategy::Recursive {
                chunk_size: self.chunk_size,
                chunk_overlap: self.chunk_overlap,
            },
        }
    }
}

fn default_strategy() -> String {
    "recursive".to_string()
}
fn default_max_tokens() -> usize {
    700
}
fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Vector list weight; the keyword list gets `1 - α`.
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    /// `"rrf"` or `"minmax"`.
    #[serde(default = "default_fusion")]
    pub fusion: String,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_keyword: i64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: i64,
    #[serde(default = "default_true")]
    pub mmr: bool,
    #[serde(default = "default_mmr_fetch_k")]
    pub mmr_fetch_k: i64,
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f64,
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: default_hybrid_alpha(),
            fusion: default_fusion(),
            rrf_k: default_rrf_k(),
            candidate_k_keyword: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
            mmr: true,
            mmr_fetch_k: default_mmr_fetch_k(),
            mmr_lambda: default_mmr_lambda(),
            final_limit: default_final_limit(),
        }
    }
}

impl RetrievalConfig {
    /// Core search parameters for the given result granularity.
    pub fn search_params(&self, group_by: GroupBy) -> Result<SearchParams> {
        Ok(SearchParams {
            hybrid_alpha: self.hybrid_alpha,
            candidate_k_keyword: self.candidate_k_keyword,
            candidate_k_vector: self.candidate_k_vector,
            final_limit: self.final_limit,
            fusion: self.fusion.parse::<Fusion>()?,
            rrf_k: self.rrf_k,
            mmr: self.mmr.then_some(MmrParams {
                fetch_k: self.mmr_fetch_k,
                lambda: self.mmr_lambda,
            }),
            group_by,
        })
    }
}

fn default_hybrid_alpha() -> f64 {
    0.5
}
fn default_fusion() -> String {
    "rrf".to_string()
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_candidate_k() -> i64 {
    5
}
fn default_mmr_fetch_k() -> i64 {
    10
}
fn default_mmr_lambda() -> f64 {
    0.5
}
fn default_final_limit() -> i64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"disabled"`, `"openai"`, `"ollama"`, or `"local"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible endpoint or Ollama host).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Name of the env var holding the API key.
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    /// Sampling temperature; provider default when unset.
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_llm_key_env(),
            temperature: None,
            max_retries: default_llm_retries(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_llm_model() -> String {
    "qwen/qwen3-32b".to_string()
}
fn default_llm_key_env() -> String {
    "GROQ_API_KEY".to_string()
}
fn default_llm_retries() -> u32 {
    3
}
fn default_llm_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// Maximum node transitions per question.
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
    /// Trailing messages rendered into each prompt.
    #[serde(default = "default_context_messages")]
    pub context_messages: usize,
    #[serde(default = "default_expand_temperature")]
    pub expand_temperature: f32,
    #[serde(default = "default_transcript_path")]
    pub transcript_path: PathBuf,
    /// Offset of transcript timestamps from UTC (330 = IST).
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            recursion_limit: default_recursion_limit(),
            context_messages: default_context_messages(),
            expand_temperature: default_expand_temperature(),
            transcript_path: default_transcript_path(),
            utc_offset_minutes: default_utc_offset_minutes(),
        }
    }
}

fn default_recursion_limit() -> usize {
    50
}
fn default_context_messages() -> usize {
    finrag_core::context::DEFAULT_CONTEXT_MESSAGES
}
fn default_expand_temperature() -> f32 {
    0.8
}
fn default_transcript_path() -> PathBuf {
    PathBuf::from("check_agent_log.json")
}
fn default_utc_offset_minutes() -> i32 {
    330
}

/// Web search (Serper) and Wikipedia lookup.
#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_serper_url")]
    pub serper_url: String,
    #[serde(default = "default_serper_key_env")]
    pub serper_api_key_env: String,
    /// Serper country code.
    #[serde(default = "default_gl")]
    pub gl: String,
    /// Serper time filter (`qdr:w` = past week).
    #[serde(default = "default_tbs")]
    pub tbs: String,
    /// MediaWiki API URL; `{lang}` is replaced by the language code.
    #[serde(default = "default_wiki_api")]
    pub wiki_api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            serper_url: default_serper_url(),
            serper_api_key_env: default_serper_key_env(),
            gl: default_gl(),
            tbs: default_tbs(),
            wiki_api_url: default_wiki_api(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_serper_url() -> String {
    "https://google.serper.dev/search".to_string()
}
fn default_serper_key_env() -> String {
    "SERPER_API_KEY".to_string()
}
fn default_gl() -> String {
    "in".to_string()
}
fn default_tbs() -> String {
    "qdr:w".to_string()
}
fn default_wiki_api() -> String {
    "https://{lang}.wikipedia.org/w/api.php".to_string()
}

/// Market data (Alpha Vantage).
#[derive(Debug, Deserialize, Clone)]
pub struct FinanceConfig {
    #[serde(default = "default_alphavantage_url")]
    pub alphavantage_url: String,
    #[serde(default = "default_alphavantage_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_finance_timeout")]
    pub timeout_secs: u64,
}

impl Default for FinanceConfig {
    fn default() -> Self {
        Self {
            alphavantage_url: default_alphavantage_url(),
            api_key_env: default_alphavantage_key_env(),
            timeout_secs: default_finance_timeout(),
        }
    }
}

fn default_alphavantage_url() -> String {
    "https://www.alphavantage.co/query".to_string()
}
fn default_alphavantage_key_env() -> String {
    "ALPHAVANTAGE_API_KEY".to_string()
}
fn default_finance_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Upper bound on a single `/ask` or tool call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}
fn default_request_timeout() -> u64 {
    300
}

impl Config {
    /// Defaults only, for commands that can run without a config file.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/finrag.sqlite"),
            },
            documents: DocumentsConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            agent: AgentConfig::default(),
            web: WebConfig::default(),
            finance: FinanceConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Read, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let chunking = &config.chunking;
    match chunking.strategy.as_str() {
        "recursive" | "paragraph" => {}
        other => bail!(
            "Unknown chunking strategy: '{}'. Must be recursive or paragraph.",
            other
        ),
    }
    if chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if chunking.chunk_overlap >= chunking.chunk_size {
        bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    let retrieval = &config.retrieval;
    if retrieval.final_limit < 1 {
        bail!("retrieval.final_limit must be >= 1");
    }
    if !(0.0..=1.0).contains(&retrieval.hybrid_alpha) {
        bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&retrieval.mmr_lambda) {
        bail!("retrieval.mmr_lambda must be in [0.0, 1.0]");
    }
    if retrieval.rrf_k <= 0.0 {
        bail!("retrieval.rrf_k must be > 0");
    }
    retrieval
        .fusion
        .parse::<Fusion>()
        .context("retrieval.fusion")?;

    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    // The local provider falls back to a bundled model and its known dims.
    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.is_none() {
            bail!(
                "embedding.dims must be set when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    if config.agent.recursion_limit < 1 {
        bail!("agent.recursion_limit must be >= 1");
    }

    Ok(())
}
