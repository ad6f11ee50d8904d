
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::embeddings::splitter::SplitterConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub splitting: SplitterConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Which wire protocol a model service speaks
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Provider {
    #[default]
    #[serde(rename = "ollama")]
    Ollama,
    /// Any OpenAI-compatible API (OpenAI, Gemini's OpenAI endpoint, LM Studio, ...)
    #[serde(rename = "openai")]
    OpenAi,
}

impl fmt::Display for Provider {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::OpenAi => write!(f, "openai"),
        }
    }
}

/// Prompt template used to combine retrieved context with the question
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PromptStyle {
    #[default]
    Instruction,
    RetrievalQa,
}

impl fmt::Display for PromptStyle {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instruction => write!(f, "instruction"),
            Self::RetrievalQa => write!(f, "retrieval-qa"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: Provider,
    pub endpoint: String,
    pub model: String,
    pub batch_size: u32,
    pub concurrency: usize,
    pub api_key_env: Option<String>,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            endpoint: "http://localhost:11434".to_string(),
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            concurrency: 4,
            api_key_env: None,
            timeout_seconds: 30,
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Provider,
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_retries: u32,
    pub timeout_seconds: u64,
    pub api_key_env: Option<String>,
    pub max_context_tokens: usize,
    pub prompt_style: PromptStyle,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.2:latest".to_string(),
            temperature: 0.1,
            top_p: 0.95,
            max_retries: 2,
            timeout_seconds: 120,
            api_key_env: None,
            max_context_tokens: 8192,
            prompt_style: PromptStyle::Instruction,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub use_rag: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            use_rag: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionsConfig {
    pub retention_hours: u64,
    /// Defaults to `<config dir>/sessions`
    pub root: Option<PathBuf>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            retention_hours: 24,
            root: None,
        }
    }
}

impl SessionsConfig {
    #[inline]
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoaderConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("ask-docs/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_seconds: 30,
            max_retries: 2,
            retry_delay_seconds: 2,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid concurrency: {0} (must be between 1 and 32)")]
    InvalidConcurrency(usize),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid timeout: {0} (must be between 1 and 3600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid top_p: {0} (must be between 0.0 and 1.0)")]
    InvalidTopP(f32),
    #[error("Invalid context limit: {0} (must be between 256 and 2000000 tokens)")]
    InvalidContextLimit(usize),
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid chunk size: {0} (must be between 50 and 100000 characters)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid retention: {0} hours (must be at least 1)")]
    InvalidRetention(u64),
    #[error("Invalid environment variable name: {0}")]
    InvalidEnvVar(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Platform config directory for the application, e.g. `~/.config/ask-docs`
    #[inline]
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("ask-docs"))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        self.llm.validate()?;
        self.validate_retrieval_config()?;
        self.validate_splitting_config()?;
        self.validate_loader_config()?;

        if self.sessions.retention_hours == 0 {
            return Err(ConfigError::InvalidRetention(self.sessions.retention_hours));
        }

        Ok(())
    }

    fn validate_retrieval_config(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.retrieval.top_k) {
            return Err(ConfigError::InvalidTopK(self.retrieval.top_k));
        }
        Ok(())
    }

    fn validate_splitting_config(&self) -> Result<(), ConfigError> {
        let config = &self.splitting;

        if !(50..=100_000).contains(&config.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(config.chunk_size));
        }

        if config.chunk_overlap >= config.chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                config.chunk_overlap,
                config.chunk_size,
            ));
        }

        Ok(())
    }

    fn validate_loader_config(&self) -> Result<(), ConfigError> {
        validate_timeout(self.loader.timeout_seconds)
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Root directory under which every session gets its own directory
    #[inline]
    pub fn sessions_root(&self) -> PathBuf {
        self.sessions
            .root
            .clone()
            .unwrap_or_else(|| self.get_base_dir().join("sessions"))
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(&self.endpoint)?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(1..=32).contains(&self.concurrency) {
            return Err(ConfigError::InvalidConcurrency(self.concurrency));
        }

        validate_env_var(self.api_key_env.as_deref())?;
        validate_timeout(self.timeout_seconds)
    }

    #[inline]
    pub fn endpoint_url(&self, path: &str) -> Result<Url, ConfigError> {
        join_endpoint(&self.endpoint, path)
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn set_endpoint(&mut self, endpoint: String) -> Result<(), ConfigError> {
        validate_endpoint(&endpoint)?;
        self.endpoint = endpoint;
        Ok(())
    }

    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        if batch_size == 0 || batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }

    pub fn set_api_key_env(&mut self, var: Option<String>) -> Result<(), ConfigError> {
        validate_env_var(var.as_deref())?;
        self.api_key_env = var;
        Ok(())
    }
}

impl LlmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(&self.endpoint)?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ConfigError::InvalidTopP(self.top_p));
        }

        if !(256..=2_000_000).contains(&self.max_context_tokens) {
            return Err(ConfigError::InvalidContextLimit(self.max_context_tokens));
        }

        validate_env_var(self.api_key_env.as_deref())?;
        validate_timeout(self.timeout_seconds)
    }

    #[inline]
    pub fn endpoint_url(&self, path: &str) -> Result<Url, ConfigError> {
        join_endpoint(&self.endpoint, path)
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn set_endpoint(&mut self, endpoint: String) -> Result<(), ConfigError> {
        validate_endpoint(&endpoint)?;
        self.endpoint = endpoint;
        Ok(())
    }

    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    pub fn set_temperature(&mut self, temperature: f32) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidTemperature(temperature));
        }
        self.temperature = temperature;
        Ok(())
    }

    pub fn set_max_context_tokens(&mut self, tokens: usize) -> Result<(), ConfigError> {
        if !(256..=2_000_000).contains(&tokens) {
            return Err(ConfigError::InvalidContextLimit(tokens));
        }
        self.max_context_tokens = tokens;
        Ok(())
    }

    pub fn set_api_key_env(&mut self, var: Option<String>) -> Result<(), ConfigError> {
        validate_env_var(var.as_deref())?;
        self.api_key_env = var;
        Ok(())
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    let url = Url::parse(endpoint).map_err(|_| ConfigError::InvalidUrl(endpoint.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidProtocol(url.scheme().to_string()));
    }

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(endpoint.to_string()));
    }

    Ok(())
}

fn validate_timeout(seconds: u64) -> Result<(), ConfigError> {
    if !(1..=3600).contains(&seconds) {
        return Err(ConfigError::InvalidTimeout(seconds));
    }
    Ok(())
}

fn validate_env_var(var: Option<&str>) -> Result<(), ConfigError> {
    match var {
        Some(name)
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_') =>
        {
            Err(ConfigError::InvalidEnvVar(name.to_string()))
        }
        _ => Ok(()),
    }
}

/// Join a relative API path onto an endpoint, keeping any path the endpoint
/// already has (`https://host/v1` + `chat/completions` -> `https://host/v1/chat/completions`)
pub fn join_endpoint(endpoint: &str, path: &str) -> Result<Url, ConfigError> {
    let mut base =
        Url::parse(endpoint).map_err(|_| ConfigError::InvalidUrl(endpoint.to_string()))?;

    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }

    base.join(path.trim_start_matches('/'))
        .map_err(|_| ConfigError::InvalidUrl(format!("{endpoint} + {path}")))
}
