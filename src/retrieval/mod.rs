// Retrieval module
// Top-k passage lookup over the loaded corpus state


use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embeddings::{Embedder, embed_checked};
use crate::index::CorpusState;
use crate::{ChatError, Result};

const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultMetadata {
    pub section: Option<String>,
    pub subsection: Option<String>,
    pub topic: Option<String>,
}

/// A retrieved passage, closest first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub id: usize,
    pub distance: f32,
    pub text: String,
    pub metadata: ResultMetadata,
}

pub struct Retriever {
    corpus: Arc<CorpusState>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
    preview_chars: usize,
}

impl Retriever {
    /// Pair a loaded corpus with the embedder that produced it
    #[inline]
    pub fn new(
        corpus: Arc<CorpusState>,
        embedder: Arc<dyn Embedder>,
        config: &RetrievalConfig,
    ) -> Result<Self> {
        if !corpus.is_empty() && corpus.dimension() != embedder.dimension() {
            return Err(ChatError::DimensionMismatch {
                expected: corpus.dimension(),
                actual: embedder.dimension(),
            });
        }

        Ok(Self {
            corpus,
            embedder,
            top_k: config.top_k,
            preview_chars: config.preview_chars,
        })
    }

    #[inline]
    pub fn corpus(&self) -> &CorpusState {
        &self.corpus
    }

    #[inline]
    pub async fn retrieve(&self, question: &str) -> Result<Vec<RetrievalResult>> {
        self.retrieve_with_k(question, self.top_k).await
    }

    #[inline]
    pub async fn retrieve_with_k(&self, question: &str, k: usize) -> Result<Vec<RetrievalResult>> {
        if self.corpus.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query = embed_checked(self.embedder.as_ref(), question).await?;
        let hits = self.corpus.search(&query, k)?;

        let results: Vec<RetrievalResult> = hits
            .into_iter()
            .filter_map(|hit| {
                let text = self.corpus.text(hit.id)?;
                let attributes = self.corpus.attributes(hit.id)?;
                Some(RetrievalResult {
                    id: hit.id,
                    distance: hit.distance,
                    text: truncate_preview(text, self.preview_chars),
                    metadata: ResultMetadata {
                        section: attributes.section.clone(),
                        subsection: attributes.subsection.clone(),
                        topic: attributes.topic.clone(),
                    },
                })
            })
            .collect();

        debug!(
            "Retrieved {} passages for question ({} chars)",
            results.len(),
            question.len()
        );

        Ok(results)
    }
}

/// Cut `text` to `max_chars` characters, marking the cut with an ellipsis
#[inline]
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}{}", &text[..byte_index], ELLIPSIS),
        None => text.to_string(),
    }
}
