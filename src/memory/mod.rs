// Conversation memory module
// Rolling summary plus a window of recent messages, checkpointed by count


use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::Result;
use crate::ingest::chunking::estimate_token_count;
use crate::llm::LanguageModel;

/// Instruction given to the summarizer at every checkpoint
const SUMMARY_INSTRUCTION: &str = "You maintain a running summary of a conversation between a user and an AI assistant.

Update the existing summary with the new lines of conversation below.
- Preserve the user's core intent and every fact, name and figure mentioned so far.
- Merge the new information into the existing summary instead of replacing it.
- Avoid redundancy; do not repeat points already covered.

Return only the updated summary.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "User"),
            Self::Assistant => write!(f, "Assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[inline]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Per-session memory state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMemory {
    pub summary: String,
    pub recent: Vec<Message>,
}

impl ConversationMemory {
    #[inline]
    pub fn clear(&mut self) {
        self.summary.clear();
        self.recent.clear();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.summary.is_empty() && self.recent.is_empty()
    }
}

/// Snapshot of memory used to build a prompt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryContext {
    pub summary: String,
    pub recent_exchanges: Vec<Message>,
}

pub struct MemoryManager {
    summarizer: Arc<dyn LanguageModel>,
    checkpoint_threshold: usize,
}

impl MemoryManager {
    #[inline]
    pub fn new(summarizer: Arc<dyn LanguageModel>, checkpoint_threshold: usize) -> Self {
        Self {
            summarizer,
            checkpoint_threshold: checkpoint_threshold.max(1),
        }
    }

    #[inline]
    pub const fn checkpoint_threshold(&self) -> usize {
        self.checkpoint_threshold
    }

    #[inline]
    pub fn append(&self, memory: &mut ConversationMemory, role: Role, content: impl Into<String>) {
        memory.recent.push(Message::new(role, content));
    }

    /// Fold the buffered messages into the summary once the buffer reaches
    /// the threshold. Returns whether a checkpoint happened. On error or a
    /// blank summary the memory is left as it was.
    #[inline]
    pub async fn maybe_checkpoint(&self, memory: &mut ConversationMemory) -> Result<bool> {
        if memory.recent.len() < self.checkpoint_threshold {
            return Ok(false);
        }

        let prompt = summary_prompt(&memory.summary, &memory.recent);
        debug!(
            "Checkpointing {} messages (~{} tokens) with {}",
            memory.recent.len(),
            estimate_token_count(&prompt),
            self.summarizer.model()
        );

        let summary = self.summarizer.complete(&prompt).await?;
        let summary = summary.trim();

        if summary.is_empty() {
            warn!("Summarizer returned an empty summary, keeping buffered messages");
            return Ok(false);
        }

        memory.summary = summary.to_string();
        memory.recent.clear();

        info!(
            "Memory checkpoint complete, summary is ~{} tokens",
            estimate_token_count(&memory.summary)
        );
        Ok(true)
    }

    /// Record a completed exchange and checkpoint if needed. A failed
    /// checkpoint is logged and retried on the next exchange.
    #[inline]
    pub async fn save_context(
        &self,
        memory: &mut ConversationMemory,
        question: &str,
        answer: &str,
    ) -> Result<bool> {
        self.append(memory, Role::User, question);
        self.append(memory, Role::Assistant, answer);

        match self.maybe_checkpoint(memory).await {
            Ok(checkpointed) => Ok(checkpointed),
            Err(e) => {
                warn!("Memory checkpoint failed, keeping buffered messages: {}", e);
                Ok(false)
            }
        }
    }

    #[inline]
    pub fn get_context(&self, memory: &ConversationMemory) -> MemoryContext {
        MemoryContext {
            summary: memory.summary.clone(),
            recent_exchanges: memory.recent.clone(),
        }
    }
}

fn summary_prompt(prior_summary: &str, messages: &[Message]) -> String {
    let lines = messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .join("\n");

    let prior = if prior_summary.trim().is_empty() {
        "(none yet)"
    } else {
        prior_summary
    };

    format!(
        "{SUMMARY_INSTRUCTION}\n\nCurrent summary:\n{prior}\n\nNew lines of conversation:\n{lines}\n\nUpdated summary:"
    )
}
