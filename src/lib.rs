use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Corpus not built: {0}")]
    CorpusMissing(String),

    #[error("Corpus state inconsistent: {0}")]
    CorpusStateInconsistent(String),

    #[error("Empty corpus: {0}")]
    EmptyCorpus(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Language model error: {0}")]
    Llm(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Session expired")]
    SessionExpired,

    #[error("Session already has a request in flight")]
    SessionBusy,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod chat;
pub mod commands;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod memory;
pub mod retrieval;
pub mod server;
pub mod sessions;

#[cfg(test)]
mod testing;
