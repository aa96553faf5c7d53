//! Configuration loading and validation for Flavia.
//!
//! Loads configuration from `~/.flavia/config.toml` (or the path in
//! `FLAVIA_CONFIG`), then applies the Azure OpenAI environment variables on
//! top. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.flavia/config.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Chat model deployment
    #[serde(default)]
    pub model: ModelConfig,

    /// Embedding deployment used by the knowledge base
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Orchestration loop behaviour
    #[serde(default)]
    pub agent: AgentConfig,

    /// Retrieval tool and knowledge index
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Live flood-warning feed
    #[serde(default)]
    pub flood: FloodConfig,

    /// Thread checkpoint storage
    #[serde(default)]
    pub checkpoints: CheckpointConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default = "default_chat_deployment")]
    pub deployment: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

fn default_chat_deployment() -> String {
    "gpt-4o".into()
}
fn default_api_version() -> String {
    "2024-10-21".into()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_model_timeout() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            deployment: default_chat_deployment(),
            api_version: default_api_version(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: None,
            timeout_secs: default_model_timeout(),
        }
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("endpoint", &self.endpoint)
            .field("deployment", &self.deployment)
            .field("api_version", &self.api_version)
            .field("api_key", &redact(&self.api_key))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Defaults to the chat endpoint when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Without a deployment the knowledge base ranks by keyword overlap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,
}

/// What happens when a turn exhausts `max_iterations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnIterationLimit {
    /// Close the turn with a fixed assistant message and checkpoint it.
    #[default]
    Answer,
    /// Fail the turn; nothing is checkpointed.
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model invocations allowed per user turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default)]
    pub on_iteration_limit: OnIterationLimit,

    #[serde(default = "default_true")]
    pub parallel_tool_calls: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_override: Option<String>,

    /// Characters held back per model invocation before forwarding to the
    /// caller. Lead-in prose shorter than this never reaches the caller when
    /// the invocation turns out to request tools. 0 forwards immediately.
    #[serde(default = "default_stream_holdback_chars")]
    pub stream_holdback_chars: usize,

    /// Capacity of the bounded event channel
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_true() -> bool {
    true
}
fn default_stream_buffer() -> usize {
    16
}
fn default_stream_holdback_chars() -> usize {
    DEFAULT_STREAM_HOLDBACK_CHARS
}

/// Default `agent.stream_holdback_chars`.
pub const DEFAULT_STREAM_HOLDBACK_CHARS: usize = 200;

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            on_iteration_limit: OnIterationLimit::default(),
            parallel_tool_calls: true,
            system_prompt_override: None,
            stream_holdback_chars: default_stream_holdback_chars(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,
}

fn default_top_k() -> usize {
    6
}
fn default_index_path() -> PathBuf {
    AppConfig::config_dir().join("knowledge").join("index.json")
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            index_path: default_index_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloodConfig {
    #[serde(default = "default_flood_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_flood_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_records")]
    pub max_records: usize,

    #[serde(default = "default_message_max_chars")]
    pub message_max_chars: usize,
}

fn default_flood_endpoint() -> String {
    "http://environment.data.gov.uk/flood-monitoring/id/floods".into()
}
fn default_flood_timeout() -> u64 {
    10
}
fn default_max_records() -> usize {
    10
}
fn default_message_max_chars() -> usize {
    200
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            endpoint: default_flood_endpoint(),
            timeout_secs: default_flood_timeout(),
            max_records: default_max_records(),
            message_max_chars: default_message_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub backend: CheckpointBackend,

    #[serde(default = "default_checkpoint_dir")]
    pub dir: PathBuf,
}

fn default_checkpoint_dir() -> PathBuf {
    AppConfig::config_dir().join("threads")
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: CheckpointBackend::default(),
            dir: default_checkpoint_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Thread used when a request carries no `thread_id`.
    ///
    /// Every such caller shares this one thread. Concurrent turns on it are
    /// last-write-wins: each turn saves the state it loaded plus its own
    /// messages, so one of two overlapping turns is lost from history.
    #[serde(default = "default_thread_id")]
    pub default_thread_id: String,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}
fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".into()]
}
fn default_thread_id() -> String {
    "default".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: default_allowed_origins(),
            default_thread_id: default_thread_id(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location, then apply environment
    /// variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("FLAVIA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"));
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides (highest priority). `lookup` is
    /// `std::env::var` in production.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(endpoint) = non_empty("AZURE_OPENAI_ENDPOINT_CHAT") {
            self.model.endpoint = Some(endpoint);
        }
        if let Some(deployment) = non_empty("AZURE_OPENAI_CHAT_DEPLOYMENT_NAME") {
            self.model.deployment = deployment;
        }
        if let Some(version) = non_empty("AZURE_OPENAI_API_VERSION") {
            self.model.api_version = version;
        }
        if let Some(key) = non_empty("AZURE_OPENAI_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Some(endpoint) = non_empty("AZURE_OPENAI_ENDPOINT_EMBEDDING") {
            self.embedding.endpoint = Some(endpoint);
        }
        if let Some(deployment) = non_empty("AZURE_OPENAI_EMBEDDING_DEPLOYMENT_NAME") {
            self.embedding.deployment = Some(deployment);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".flavia")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        if self.agent.stream_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "agent.stream_buffer must be at least 1".into(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.top_k must be at least 1".into(),
            ));
        }
        if self.flood.max_records == 0 || self.flood.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "flood.max_records and flood.timeout_secs must be positive".into(),
            ));
        }
        if self.gateway.default_thread_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "gateway.default_thread_id must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// The chat endpoint, or `MissingSetting` naming the variable to set.
    pub fn chat_endpoint(&self) -> Result<&str, ConfigError> {
        self.model
            .endpoint
            .as_deref()
            .ok_or(ConfigError::MissingSetting("AZURE_OPENAI_ENDPOINT_CHAT"))
    }

    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.model
            .api_key
            .as_deref()
            .ok_or(ConfigError::MissingSetting("AZURE_OPENAI_API_KEY"))
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Missing setting: set {0} or the matching config.toml entry")]
    MissingSetting(&'static str),
}
