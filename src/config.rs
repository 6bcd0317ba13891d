//! Configuration: a TOML file plus secrets from the environment.
//!
//! The TOML file holds every tunable; secrets (bot token, API keys, CRM
//! webhook, admin token) are read from the process environment after an
//! optional `.env` file is loaded. Secrets never appear in the TOML file.

use anyhow::{Context, Result};
use consult_core::catalog::{default_services, Service, ServiceCatalog};
use consult_core::compose::ComposerSettings;
use consult_core::documents::{default_request_words, DocumentCatalog, DocumentEntry};
use consult_core::retrieve::RetrievalSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub crm: CrmConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub ingest: Option<IngestConfig>,
    #[serde(default)]
    pub rating: RatingConfig,
    #[serde(default)]
    pub documents: Option<DocumentsConfig>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_services")]
    pub services: Vec<Service>,
    #[serde(skip)]
    pub secrets: Secrets,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

// ============ Providers ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Ollama server URL, or the base of an OpenAI-compatible API.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            timeout_secs: default_embed_timeout(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_embed_timeout() -> u64 {
    30
}
fn default_max_input_chars() -> usize {
    consult_core::embedding::DEFAULT_MAX_INPUT_CHARS
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    /// Base URL of an OpenAI-compatible API.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: default_chat_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout(),
            url: None,
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_generation_timeout() -> u64 {
    60
}

// ============ Pipeline ============

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    #[serde(default = "default_context_chars")]
    pub context_chars: usize,
    #[serde(default = "default_memory_turns")]
    pub memory_turns: usize,
    #[serde(default = "default_prompt_chars")]
    pub prompt_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
            context_chars: default_context_chars(),
            memory_turns: default_memory_turns(),
            prompt_chars: default_prompt_chars(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_min_score() -> f32 {
    0.25
}
fn default_context_chars() -> usize {
    3000
}
fn default_memory_turns() -> usize {
    20
}
fn default_prompt_chars() -> usize {
    12_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_turns")]
    pub max_turns: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: default_memory_turns(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_chars")]
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_chunk_chars(),
        }
    }
}

fn default_chunk_chars() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct IntakeConfig {
    #[serde(default = "default_contact_attempts")]
    pub max_contact_attempts: u32,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_contact_attempts: default_contact_attempts(),
        }
    }
}

fn default_contact_attempts() -> u32 {
    3
}

// ============ Collaborators ============

#[derive(Debug, Deserialize, Clone)]
pub struct CrmConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_crm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            timeout_secs: default_crm_timeout(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl CrmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_crm_timeout() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Chats that receive new-lead notifications.
    #[serde(default)]
    pub manager_chat_ids: Vec<i64>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            poll_timeout_secs: default_poll_timeout(),
            request_timeout_secs: default_request_timeout(),
            manager_chat_ids: Vec::new(),
            api_base: default_api_base(),
        }
    }
}

fn default_poll_timeout() -> u64 {
    30
}
fn default_request_timeout() -> u64 {
    40
}
fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
        "**/*.pdf".to_string(),
        "**/*.docx".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct RatingConfig {
    /// Attach the 1-5 star keyboard to composed answers.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Files sent on request, matched by keyword.
#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    pub dir: PathBuf,
    #[serde(default = "default_request_words")]
    pub request_words: Vec<String>,
    #[serde(default)]
    pub files: Vec<DocumentEntry>,
}

impl DocumentsConfig {
    pub fn catalog(&self) -> DocumentCatalog {
        DocumentCatalog::new(self.files.clone(), self.request_words.clone())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

// ============ Secrets ============

/// Values read from the environment. Missing values disable the features
/// that need them; `serve` checks the ones it requires.
#[derive(Clone, Default)]
pub struct Secrets {
    pub telegram_bot_token: Option<String>,
    pub openai_api_key: Option<String>,
    pub bitrix_webhook_url: Option<String>,
    pub admin_token: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Secrets")
            .field("telegram_bot_token", &mask(&self.telegram_bot_token))
            .field("openai_api_key", &mask(&self.openai_api_key))
            .field("bitrix_webhook_url", &mask(&self.bitrix_webhook_url))
            .field("admin_token", &mask(&self.admin_token))
            .finish()
    }
}

impl Secrets {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            telegram_bot_token: var("TELEGRAM_BOT_TOKEN"),
            openai_api_key: var("OPENAI_API_KEY"),
            bitrix_webhook_url: var("BITRIX24_WEBHOOK_URL"),
            admin_token: var("ADMIN_TOKEN"),
        }
    }
}

// ============ Derived settings ============

impl Config {
    pub fn catalog(&self) -> ServiceCatalog {
        ServiceCatalog::new(self.services.clone())
    }

    pub fn retrieval_settings(&self) -> RetrievalSettings {
        RetrievalSettings {
            top_k: self.retrieval.top_k,
            min_score: self.retrieval.min_score,
            max_input_chars: self.embedding.max_input_chars,
        }
    }

    pub fn composer_settings(&self) -> ComposerSettings {
        ComposerSettings {
            context_chars: self.retrieval.context_chars,
            memory_turns: self.retrieval.memory_turns,
            prompt_chars: self.retrieval.prompt_chars,
        }
    }
}

/// Read, parse and validate the config file, then attach environment secrets.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;
    config.secrets = Secrets::from_env();
    Ok(config)
}

/// Parse and validate config text without touching the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.min_score) {
        anyhow::bail!("retrieval.min_score must be in [-1.0, 1.0]");
    }
    if config.memory.max_turns == 0 {
        anyhow::bail!("memory.max_turns must be > 0");
    }
    if config.retrieval.memory_turns > config.memory.max_turns {
        anyhow::bail!(
            "retrieval.memory_turns ({}) cannot exceed memory.max_turns ({})",
            config.retrieval.memory_turns,
            config.memory.max_turns
        );
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.generation.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    match config.crm.provider.as_str() {
        "disabled" | "bitrix" => {}
        other => anyhow::bail!("Unknown CRM provider: '{}'. Must be disabled or bitrix.", other),
    }
    if config.crm.max_attempts == 0 {
        anyhow::bail!("crm.max_attempts must be >= 1");
    }

    if config.intake.max_contact_attempts == 0 {
        anyhow::bail!("intake.max_contact_attempts must be >= 1");
    }

    if config.services.is_empty() {
        anyhow::bail!("at least one [[services]] entry is required");
    }
    let mut seen = std::collections::HashSet::new();
    for service in &config.services {
        if !seen.insert(service.code.as_str()) {
            anyhow::bail!("duplicate service code: '{}'", service.code);
        }
    }

    if let Some(documents) = &config.documents {
        for entry in &documents.files {
            if entry.keywords.is_empty() {
                anyhow::bail!("documents.files entry '{}' needs at least one keyword", entry.file);
            }
            let path = Path::new(&entry.file);
            if path.components().count() != 1 || path.is_absolute() {
                anyhow::bail!(
                    "documents.files entry '{}' must be a plain file name inside documents.dir",
                    entry.file
                );
            }
        }
    }

    Ok(config)
}
