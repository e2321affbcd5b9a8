#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::ingest::chunking::ChunkingConfig;

pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Ollama embedding service settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub dimension: usize,
    pub batch_size: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "all-minilm".to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            batch_size: 16,
        }
    }
}

/// OpenAI-compatible chat completion settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub model: String,
    /// Model used for memory checkpoints
    pub summary_model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-3.5-turbo-16k".to_string(),
            summary_model: "gpt-3.5-turbo".to_string(),
            temperature: 0.5,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub preview_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            preview_chars: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryConfig {
    /// Number of buffered messages that triggers a summary checkpoint
    pub checkpoint_threshold: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            checkpoint_threshold: 6,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamGateMode {
    /// Forward every token (chat models do not echo the prompt)
    #[default]
    None,
    /// Suppress tokens until the prompt's answer separator has been echoed
    Separator,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChatConfig {
    pub answer_separator: String,
    pub stream_gate: StreamGateMode,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            answer_separator: "### Answer:".to_string(),
            stream_gate: StreamGateMode::None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStoreKind {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub session_timeout_minutes: u64,
    pub cookie_max_age_minutes: u64,
    pub session_store: SessionStoreKind,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            session_timeout_minutes: 30,
            cookie_max_age_minutes: 120,
            session_store: SessionStoreKind::Memory,
        }
    }
}

/// Locations of the corpus and its persisted index, relative paths resolve
/// against the configuration directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CorpusConfig {
    pub source_path: PathBuf,
    pub index_path: PathBuf,
    pub metadata_path: PathBuf,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from("knowledge_base.txt"),
            index_path: PathBuf::from("vector-db/knowledge.index"),
            metadata_path: PathBuf::from("chunks-metadata.json"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(usize),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid model timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid API key variable name: {0:?}")]
    InvalidApiKeyEnv(String),
    #[error("Invalid chunk size: {0} (must be between 100 and 8192)")]
    InvalidChunkSize(usize),
    #[error("Overlap ({0}) must be smaller than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid heading marker: {0:?} (cannot be blank)")]
    InvalidHeadingMarker(String),
    #[error("Section and subsection markers must differ (both {0:?})")]
    DuplicateHeadingMarkers(String),
    #[error("Invalid question pattern {0:?}: {1}")]
    InvalidQuestionPattern(String, String),
    #[error("Invalid top-k: {0} (must be between 1 and 50)")]
    InvalidTopK(usize),
    #[error("Invalid preview length: {0} (must be at least 20 characters)")]
    InvalidPreviewLength(usize),
    #[error("Invalid checkpoint threshold: {0} (must be between 2 and 100)")]
    InvalidCheckpointThreshold(usize),
    #[error("Invalid answer separator: {0:?} (cannot be blank)")]
    InvalidAnswerSeparator(String),
    #[error("Invalid session timeout: {0} minutes (must be at least 1)")]
    InvalidSessionTimeout(u64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
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

    /// Default configuration directory (`<platform config dir>/ragchat`)
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("ragchat"))
            .ok_or(ConfigError::DirectoryError)
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
        self.validate_chunking_config()?;
        self.validate_conversation_config()?;
        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if !(100..=8192).contains(&config.size) {
            return Err(ConfigError::InvalidChunkSize(config.size));
        }

        if config.overlap >= config.size {
            return Err(ConfigError::OverlapTooLarge(config.overlap, config.size));
        }

        for marker in [&config.section_marker, &config.subsection_marker] {
            if marker.trim().is_empty() {
                return Err(ConfigError::InvalidHeadingMarker(marker.clone()));
            }
        }

        if config.section_marker == config.subsection_marker {
            return Err(ConfigError::DuplicateHeadingMarkers(
                config.section_marker.clone(),
            ));
        }

        fancy_regex::Regex::new(&config.question_pattern).map_err(|e| {
            ConfigError::InvalidQuestionPattern(config.question_pattern.clone(), e.to_string())
        })?;

        Ok(())
    }

    fn validate_conversation_config(&self) -> Result<(), ConfigError> {
        if !(1..=50).contains(&self.retrieval.top_k) {
            return Err(ConfigError::InvalidTopK(self.retrieval.top_k));
        }

        if self.retrieval.preview_chars < 20 {
            return Err(ConfigError::InvalidPreviewLength(
                self.retrieval.preview_chars,
            ));
        }

        if !(2..=100).contains(&self.memory.checkpoint_threshold) {
            return Err(ConfigError::InvalidCheckpointThreshold(
                self.memory.checkpoint_threshold,
            ));
        }

        if self.chat.answer_separator.trim().is_empty() {
            return Err(ConfigError::InvalidAnswerSeparator(
                self.chat.answer_separator.clone(),
            ));
        }

        if self.server.session_timeout_minutes == 0 {
            return Err(ConfigError::InvalidSessionTimeout(
                self.server.session_timeout_minutes,
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    #[inline]
    pub fn embedding_url(&self) -> Result<Url, ConfigError> {
        self.embedding.embedding_url()
    }

    /// Path of the knowledge base text consumed by `ingest`
    #[inline]
    pub fn corpus_source_path(&self) -> PathBuf {
        self.resolve(&self.corpus.source_path)
    }

    #[inline]
    pub fn index_path(&self) -> PathBuf {
        self.resolve(&self.corpus.index_path)
    }

    #[inline]
    pub fn metadata_path(&self) -> PathBuf {
        self.resolve(&self.corpus.metadata_path)
    }

    /// Get the path for the SQLite session database
    #[inline]
    pub fn sessions_database_path(&self) -> PathBuf {
        self.get_base_dir().join("sessions.db")
    }

    #[inline]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.server.session_timeout_minutes * 60)
    }

    #[inline]
    pub fn cookie_max_age(&self) -> Duration {
        Duration::from_secs(self.server.cookie_max_age_minutes * 60)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.get_base_dir().join(path)
        }
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(64..=4096).contains(&self.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(self.dimension));
        }

        Ok(())
    }

    pub fn embedding_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let temp_config = EmbeddingConfig {
            host: host.clone(),
            ..self.clone()
        };
        temp_config.validate()?;
        self.host = host;
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    pub fn set_dimension(&mut self, dimension: usize) -> Result<(), ConfigError> {
        if !(64..=4096).contains(&dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }
        self.dimension = dimension;
        Ok(())
    }

    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        if batch_size == 0 || batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }
}

impl LlmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.base_url).map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.summary_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.summary_model.clone()));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        if !(1..=600).contains(&self.timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }

        if self.api_key_env.trim().is_empty() || self.api_key_env.contains('=') {
            return Err(ConfigError::InvalidApiKeyEnv(self.api_key_env.clone()));
        }

        Ok(())
    }

    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn set_base_url(&mut self, base_url: String) -> Result<(), ConfigError> {
        Url::parse(&base_url).map_err(|_| ConfigError::InvalidUrl(base_url.clone()))?;
        self.base_url = base_url;
        Ok(())
    }

    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    pub fn set_summary_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.summary_model = model;
        Ok(())
    }

    pub fn set_temperature(&mut self, temperature: f32) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidTemperature(temperature));
        }
        self.temperature = temperature;
        Ok(())
    }
}
