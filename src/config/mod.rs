// Configuration management module
// Handles TOML configuration for the embedding service, the language model,
// the conversation pipeline and the HTTP server

pub mod interactive;
pub mod settings;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    ChatConfig, Config, ConfigError, CorpusConfig, EmbeddingConfig, LlmConfig, MemoryConfig,
    RetrievalConfig, ServerConfig, SessionStoreKind, StreamGateMode,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
