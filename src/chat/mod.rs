// Chat module
// Orchestrates one conversational turn: retrieval, prompt, streaming, memory


pub mod filter;
pub mod prompt;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::config::ChatConfig;
use crate::llm::LanguageModel;
use crate::memory::{ConversationMemory, MemoryManager};
use crate::retrieval::Retriever;
use crate::sessions::{SessionLease, SessionManager};
use crate::{ChatError, Result};

pub use filter::{StreamFilter, StreamGate};
pub use prompt::build_prompt;

/// Text sent to the client when a turn fails mid-flight
pub const APOLOGY: &str =
    "\nI'm sorry, there was an error generating a response. Please try again.";

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Token(String),
    Error(String),
    End,
}

/// A started turn. Events arrive until `End`.
#[derive(Debug)]
pub struct ChatResponse {
    pub session_id: String,
    pub is_new_session: bool,
    pub events: ReceiverStream<ChatEvent>,
}

enum TurnOutcome {
    Completed(String),
    Disconnected,
}

#[derive(Clone)]
pub struct ConversationOrchestrator {
    retriever: Arc<Retriever>,
    model: Arc<dyn LanguageModel>,
    memory: Arc<MemoryManager>,
    sessions: Arc<SessionManager>,
    gate: StreamGate,
    separator: String,
    token_timeout: Duration,
}

impl ConversationOrchestrator {
    #[inline]
    pub fn new(
        retriever: Arc<Retriever>,
        model: Arc<dyn LanguageModel>,
        memory: Arc<MemoryManager>,
        sessions: Arc<SessionManager>,
        chat: &ChatConfig,
        token_timeout: Duration,
    ) -> Self {
        Self {
            retriever,
            model,
            memory,
            sessions,
            gate: StreamGate::from_config(chat),
            separator: chat.answer_separator.clone(),
            token_timeout,
        }
    }

    #[inline]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Start answering `question` in the caller's session.
    ///
    /// Request-level problems (blank question, expired or busy session) are
    /// returned before anything streams. Everything after that is reported
    /// through the event stream.
    #[inline]
    pub async fn respond(&self, session_id: Option<&str>, question: &str) -> Result<ChatResponse> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::InvalidRequest("Message is required".to_string()));
        }

        let lease = self.sessions.acquire(session_id).await?;
        let session_id = lease.id().to_string();
        let is_new_session = lease.is_new();

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let this = self.clone();
        let question = question.to_string();
        tokio::spawn(async move { this.run_turn(lease, question, tx).await });

        Ok(ChatResponse {
            session_id,
            is_new_session,
            events: ReceiverStream::new(rx),
        })
    }

    async fn run_turn(self, mut lease: SessionLease, question: String, tx: mpsc::Sender<ChatEvent>) {
        lease.session.touch();
        if let Err(e) = self.sessions.save(&lease.session).await {
            error!("Failed to persist session {}: {}", lease.id(), e);
            send_apology(&tx).await;
            return;
        }

        match self.stream_answer(&lease.session.memory, &question, &tx).await {
            Ok(TurnOutcome::Completed(answer)) => {
                if let Err(e) = self
                    .memory
                    .save_context(&mut lease.session.memory, &question, &answer)
                    .await
                {
                    warn!("Failed to update memory for session {}: {}", lease.id(), e);
                }

                lease.session.touch();
                if let Err(e) = self.sessions.save(&lease.session).await {
                    error!("Failed to persist session {}: {}", lease.id(), e);
                }

                debug!(
                    "Completed turn for session {} ({} chars)",
                    lease.id(),
                    answer.len()
                );
                // The client may already be gone; nothing left to do then.
                let _ = tx.send(ChatEvent::End).await;
            }
            Ok(TurnOutcome::Disconnected) => {
                info!(
                    "Client disconnected from session {}, discarding partial answer",
                    lease.id()
                );
            }
            Err(e) => {
                error!("Chat turn failed for session {}: {}", lease.id(), e);
                send_apology(&tx).await;
            }
        }
    }

    async fn stream_answer(
        &self,
        memory: &ConversationMemory,
        question: &str,
        tx: &mpsc::Sender<ChatEvent>,
    ) -> Result<TurnOutcome> {
        let results = self.retriever.retrieve(question).await?;
        let context = self.memory.get_context(memory);
        let prompt = build_prompt(&self.separator, &results, &context, question);

        debug!(
            "Prompt built from {} passages and {} recent messages",
            results.len(),
            context.recent_exchanges.len()
        );

        // Waiting on the model also ends when the client goes away
        let mut tokens = tokio::select! {
            () = tx.closed() => return Ok(TurnOutcome::Disconnected),
            started = tokio::time::timeout(self.token_timeout, self.model.stream(&prompt)) => {
                started.map_err(|_| self.timed_out("model did not start responding"))??
            }
        };
        let mut filter = StreamFilter::new(&self.gate);
        let mut answer = String::new();

        loop {
            let next = tokio::select! {
                () = tx.closed() => return Ok(TurnOutcome::Disconnected),
                next = tokio::time::timeout(self.token_timeout, tokens.next()) => {
                    next.map_err(|_| self.timed_out("no token received"))?
                }
            };

            let Some(token) = next else {
                break;
            };

            if let Some(text) = filter.push(&token?) {
                answer.push_str(&text);
                if tx.send(ChatEvent::Token(text)).await.is_err() {
                    return Ok(TurnOutcome::Disconnected);
                }
            }
        }

        if let Some(text) = filter.finish() {
            answer.push_str(&text);
            if tx.send(ChatEvent::Token(text)).await.is_err() {
                return Ok(TurnOutcome::Disconnected);
            }
        }

        Ok(TurnOutcome::Completed(answer))
    }

    fn timed_out(&self, what: &str) -> ChatError {
        ChatError::Llm(format!(
            "{} within {}s",
            what,
            self.token_timeout.as_secs_f32()
        ))
    }
}

async fn send_apology(tx: &mpsc::Sender<ChatEvent>) {
    if tx.send(ChatEvent::Error(APOLOGY.to_string())).await.is_ok() {
        let _ = tx.send(ChatEvent::End).await;
    }
}
