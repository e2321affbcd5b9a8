// Ingestion module
// One-shot batch job turning the knowledge base into a persisted corpus state


pub mod chunking;

use std::fs;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embeddings::{Embedder, check_dimension};
use crate::index::CorpusState;
use crate::{ChatError, Result};

use chunking::{ChunkAttributes, chunk_corpus};

/// Statistics about an ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub chunks_created: usize,
    pub embeddings_generated: usize,
    pub chunks_skipped: usize,
}

/// A chunk waiting for its embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
    pub attributes: ChunkAttributes,
    pub text: String,
}

/// Chunk the configured knowledge base, embed it and save the corpus state
#[inline]
pub async fn ingest(config: &Config, embedder: &dyn Embedder) -> Result<IngestStats> {
    let source_path = config.corpus_source_path();
    info!("Ingesting knowledge base from {}", source_path.display());

    let raw_text = fs::read_to_string(&source_path).map_err(|e| {
        ChatError::CorpusMissing(format!(
            "cannot read knowledge base {}: {}",
            source_path.display(),
            e
        ))
    })?;

    let (state, stats) = build_corpus(&raw_text, config, embedder).await?;

    state.save(&config.index_path(), &config.metadata_path())?;

    info!(
        "Ingestion complete: {} chunks, {} embeddings, {} skipped",
        stats.chunks_created, stats.embeddings_generated, stats.chunks_skipped
    );
    Ok(stats)
}

/// Rebuild the index from the texts of an existing metadata file
#[inline]
pub async fn reindex(config: &Config, embedder: &dyn Embedder) -> Result<IngestStats> {
    let metadata_path = config.metadata_path();
    if !metadata_path.exists() {
        return Err(ChatError::CorpusMissing(format!(
            "no metadata at {}; run `ragchat ingest` first",
            metadata_path.display()
        )));
    }

    info!("Rebuilding index from {}", metadata_path.display());

    let metadata = CorpusState::load_metadata(&metadata_path)?;
    let entries: Vec<CorpusEntry> = metadata
        .metadata
        .into_iter()
        .zip(metadata.texts)
        .map(|(attributes, text)| CorpusEntry { attributes, text })
        .collect();

    let (state, stats) =
        embed_entries(entries, embedder, config.embedding.batch_size as usize).await?;

    state.save(&config.index_path(), &metadata_path)?;

    info!(
        "Reindex complete: {} embeddings, {} skipped",
        stats.embeddings_generated, stats.chunks_skipped
    );
    Ok(stats)
}

/// Chunk raw text and embed every chunk into a fresh corpus state
#[inline]
pub async fn build_corpus(
    raw_text: &str,
    config: &Config,
    embedder: &dyn Embedder,
) -> Result<(CorpusState, IngestStats)> {
    let chunks = chunk_corpus(raw_text, &config.chunking)?;
    if chunks.is_empty() {
        return Err(ChatError::EmptyCorpus(
            "no chunks were produced from the knowledge base".to_string(),
        ));
    }

    info!("Created {} chunks", chunks.len());

    let entries = chunks
        .into_iter()
        .map(|chunk| CorpusEntry {
            attributes: chunk.attributes(),
            text: chunk.text,
        })
        .collect();

    embed_entries(entries, embedder, config.embedding.batch_size as usize).await
}

/// Embed entries in batches, skipping any entry whose embedding fails or has
/// the wrong dimension
#[inline]
pub async fn embed_entries(
    entries: Vec<CorpusEntry>,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<(CorpusState, IngestStats)> {
    if entries.is_empty() {
        return Err(ChatError::EmptyCorpus("no chunks to embed".to_string()));
    }

    let mut state = CorpusState::new(embedder.dimension());
    let mut stats = IngestStats {
        chunks_created: entries.len(),
        ..IngestStats::default()
    };

    let bar = progress_bar(entries.len() as u64);

    for batch in entries.chunks(batch_size.max(1)) {
        let vectors = embed_batch_isolated(embedder, batch).await;

        for (entry, vector) in batch.iter().zip(vectors) {
            let Some(vector) = vector else {
                stats.chunks_skipped += 1;
                continue;
            };

            match state.push_entry(entry.attributes.clone(), entry.text.clone(), &vector) {
                Ok(id) => {
                    debug!("Indexed chunk {} ({} chars)", id, entry.text.len());
                    stats.embeddings_generated += 1;
                }
                Err(e) => {
                    warn!("Skipping chunk: {}", e);
                    stats.chunks_skipped += 1;
                }
            }
        }

        bar.inc(batch.len() as u64);
    }

    bar.finish_and_clear();

    if state.is_empty() {
        return Err(ChatError::EmptyCorpus(format!(
            "none of the {} chunks produced a valid embedding",
            stats.chunks_created
        )));
    }

    Ok((state, stats))
}

/// Embed a batch in one call, falling back to one call per entry so a single
/// bad input only loses itself
async fn embed_batch_isolated(
    embedder: &dyn Embedder,
    batch: &[CorpusEntry],
) -> Vec<Option<Vec<f32>>> {
    let texts: Vec<String> = batch.iter().map(|entry| entry.text.clone()).collect();

    match embedder.embed_batch(&texts).await {
        Ok(vectors) if vectors.len() == batch.len() => {
            return vectors
                .into_iter()
                .map(|vector| validate(vector, embedder.dimension()))
                .collect();
        }
        Ok(vectors) => warn!(
            "Batch embedding returned {} vectors for {} texts, retrying individually",
            vectors.len(),
            batch.len()
        ),
        Err(e) => warn!("Batch embedding failed, retrying individually: {}", e),
    }

    let mut vectors = Vec::with_capacity(batch.len());
    for text in &texts {
        match embedder.embed(text).await {
            Ok(vector) => vectors.push(validate(vector, embedder.dimension())),
            Err(e) => {
                warn!("Skipping chunk after embedding failure: {}", e);
                vectors.push(None);
            }
        }
    }
    vectors
}

fn validate(vector: Vec<f32>, dimension: usize) -> Option<Vec<f32>> {
    match check_dimension(&vector, dimension) {
        Ok(()) => Some(vector),
        Err(e) => {
            warn!("Skipping chunk: {}", e);
            None
        }
    }
}

fn progress_bar(len: u64) -> ProgressBar {
    if !console::user_attended_stderr() {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template("{bar:40} [{pos}/{len}] Embedding chunks") {
        bar.set_style(style);
    }
    bar
}
