// Service context
// The process-wide service graph, built once and shared with every request

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::info;

use crate::{ChatError, Result};
use crate::chat::ConversationOrchestrator;
use crate::config::{Config, SessionStoreKind};
use crate::embeddings::{Embedder, OllamaEmbedder};
use crate::index::CorpusState;
use crate::llm::{LanguageModel, OpenAiChatClient};
use crate::memory::MemoryManager;
use crate::retrieval::Retriever;
use crate::sessions::{InMemorySessionStore, SessionManager, SessionStore, SqliteSessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub vector_store: bool,
    pub chain: bool,
}

/// Shared services. The retriever and orchestrator are built on first use so
/// the server can start before the corpus is loaded.
pub struct ServiceContext {
    config: Config,
    embedder: Arc<dyn Embedder>,
    chat_model: Arc<dyn LanguageModel>,
    summary_model: Arc<dyn LanguageModel>,
    sessions: Arc<SessionManager>,
    retriever: OnceCell<Arc<Retriever>>,
    orchestrator: OnceCell<ConversationOrchestrator>,
}

impl ServiceContext {
    #[inline]
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        chat_model: Arc<dyn LanguageModel>,
        summary_model: Arc<dyn LanguageModel>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            config,
            embedder,
            chat_model,
            summary_model,
            sessions,
            retriever: OnceCell::new(),
            orchestrator: OnceCell::new(),
        }
    }

    /// Wire up the production services described by `config`
    #[inline]
    pub async fn from_config(config: Config) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(&config.embedding)?);
        let chat_model: Arc<dyn LanguageModel> =
            Arc::new(OpenAiChatClient::new(&config.llm, &config.llm.model)?);
        let summary_model: Arc<dyn LanguageModel> = Arc::new(
            OpenAiChatClient::new(&config.llm, &config.llm.summary_model)?.with_temperature(0.0),
        );

        let store: Arc<dyn SessionStore> = match config.server.session_store {
            SessionStoreKind::Memory => Arc::new(InMemorySessionStore::new()),
            SessionStoreKind::Sqlite => {
                Arc::new(SqliteSessionStore::initialize_from_config_dir(config.get_base_dir()).await?)
            }
        };
        let sessions = Arc::new(SessionManager::new(
            store,
            config.session_timeout(),
            config.cookie_max_age(),
        ));

        Ok(Self::new(config, embedder, chat_model, summary_model, sessions))
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Load the corpus state and build the retriever, once
    #[inline]
    pub async fn retriever(&self) -> Result<Arc<Retriever>> {
        self.retriever
            .get_or_try_init(|| async {
                let index_path = self.config.index_path();
                let metadata_path = self.config.metadata_path();
                let corpus = tokio::task::spawn_blocking(move || {
                    CorpusState::load(&index_path, &metadata_path)
                })
                .await
                .map_err(|e| anyhow::anyhow!("corpus loading task failed: {}", e))??;

                info!("Loaded corpus state with {} passages", corpus.len());

                let retriever = Retriever::new(
                    Arc::new(corpus),
                    Arc::clone(&self.embedder),
                    &self.config.retrieval,
                )?;
                Ok::<_, ChatError>(Arc::new(retriever))
            })
            .await
            .cloned()
    }

    /// Build the conversation pipeline, once
    #[inline]
    pub async fn orchestrator(&self) -> Result<&ConversationOrchestrator> {
        self.orchestrator
            .get_or_try_init(|| async {
                let retriever = self.retriever().await?;
                let memory = Arc::new(MemoryManager::new(
                    Arc::clone(&self.summary_model),
                    self.config.memory.checkpoint_threshold,
                ));

                info!(
                    "Conversation pipeline ready ({} answering, {} summarizing)",
                    self.chat_model.model(),
                    self.summary_model.model()
                );

                Ok::<_, ChatError>(ConversationOrchestrator::new(
                    retriever,
                    Arc::clone(&self.chat_model),
                    memory,
                    Arc::clone(&self.sessions),
                    &self.config.chat,
                    self.config.llm.timeout(),
                ))
            })
            .await
    }

    #[inline]
    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "ok",
            vector_store: self.retriever.initialized(),
            chain: self.orchestrator.initialized(),
        }
    }
}
