// Test doubles shared by unit tests

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::embeddings::{Embedder, EmbeddingVector, normalize};
use crate::llm::{LanguageModel, TokenStream};
use crate::{ChatError, Result};

/// Deterministic bag-of-words embedder: each lowercase word is hashed into
/// a bucket, so texts sharing words land close together
pub struct KeywordEmbedder {
    dimension: usize,
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn keyword_vector(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0; dimension];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let bucket = word
            .to_lowercase()
            .bytes()
            .fold(17_usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize))
            % dimension;
        vector[bucket] += 1.0;
    }
    if vector.iter().all(|v| *v == 0.0) {
        vector[0] = 1.0;
    }
    normalize(&mut vector);
    vector
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model(&self) -> &str {
        "keyword"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(keyword_vector(text, self.dimension))
    }
}

/// Language model that replays scripted tokens and summaries
pub struct ScriptedModel {
    tokens: Vec<String>,
    fail_after: Option<usize>,
    summary: std::result::Result<String, String>,
    token_delay: Option<Duration>,
    start_delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
    completions: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| (*t).to_string()).collect(),
            fail_after: None,
            summary: Ok("summary".to_string()),
            token_delay: None,
            start_delay: None,
            prompts: Mutex::new(Vec::new()),
            completions: AtomicUsize::new(0),
        }
    }

    pub fn with_summary(mut self, summary: &str) -> Self {
        self.summary = Ok(summary.to_string());
        self
    }

    pub fn failing_summary(mut self) -> Self {
        self.summary = Err("summarizer unavailable".to_string());
        self
    }

    /// Emit `count` tokens, then fail the stream
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    /// Hold back the stream itself, as a provider that never sends headers
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt log lock").clone()
    }

    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.completions.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .expect("prompt log lock")
            .push(prompt.to_string());
        self.summary.clone().map_err(ChatError::Llm)
    }

    async fn stream(&self, prompt: &str) -> Result<TokenStream> {
        self.prompts
            .lock()
            .expect("prompt log lock")
            .push(prompt.to_string());

        if let Some(delay) = self.start_delay {
            tokio::time::sleep(delay).await;
        }

        let mut items: Vec<Result<String>> = match self.fail_after {
            Some(count) => self.tokens.iter().take(count).cloned().map(Ok).collect(),
            None => self.tokens.iter().cloned().map(Ok).collect(),
        };
        if self.fail_after.is_some() {
            items.push(Err(ChatError::Llm("scripted failure".to_string())));
        }

        let delay = self.token_delay;
        let stream = futures::stream::iter(items).then(move |item| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            item
        });

        Ok(Box::pin(stream))
    }
}
