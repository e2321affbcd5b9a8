use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, SessionStoreKind};
use crate::context::ServiceContext;
use crate::embeddings::{Embedder, OllamaEmbedder};
use crate::index::{CorpusState, CorpusStatus};
use crate::ingest::{self, IngestStats};
use crate::retrieval::Retriever;
use crate::server;

/// Build the corpus state from the configured knowledge base
#[inline]
pub async fn run_ingest(config: &Config) -> Result<()> {
    let embedder = connect_embedder(config).await?;

    println!(
        "📚 Ingesting {} with {}",
        config.corpus_source_path().display(),
        embedder.model()
    );

    let stats = ingest::ingest(config, &embedder)
        .await
        .context("Ingestion failed")?;

    print_stats(&stats);
    println!("   Index: {}", config.index_path().display());
    println!("   Metadata: {}", config.metadata_path().display());
    Ok(())
}

/// Regenerate the index from the texts already in the metadata file
#[inline]
pub async fn run_reindex(config: &Config) -> Result<()> {
    let embedder = connect_embedder(config).await?;

    println!(
        "🔄 Rebuilding index from {}",
        config.metadata_path().display()
    );

    let stats = ingest::reindex(config, &embedder)
        .await
        .context("Reindex failed")?;

    print_stats(&stats);
    Ok(())
}

/// Run a single retrieval query against the saved corpus
#[inline]
pub async fn search(config: &Config, query: &str, k: usize, json: bool) -> Result<()> {
    let corpus = CorpusState::load(&config.index_path(), &config.metadata_path())
        .context("Failed to load corpus state")?;
    info!("Loaded index with {} vectors", corpus.len());

    let embedder: Arc<dyn Embedder> = Arc::new(connect_embedder(config).await?);
    let retriever = Retriever::new(Arc::new(corpus), embedder, &config.retrieval)?;

    let results = retriever
        .retrieve_with_k(query, k)
        .await
        .context("Search failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    println!("🔍 Results for \"{}\" ({} found)", query, results.len());
    println!();
    for (rank, result) in results.iter().enumerate() {
        let heading = [
            result.metadata.section.as_deref(),
            result.metadata.subsection.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" > ");

        println!(
            "{}. [{}] distance {:.4} (chunk {})",
            rank + 1,
            heading,
            result.distance,
            result.id
        );
        println!("   {}", result.text.replace('\n', "\n   "));
        println!();
    }

    Ok(())
}

/// Start the HTTP chat server
#[inline]
pub async fn serve(config: Config) -> Result<()> {
    let context = ServiceContext::from_config(config)
        .await
        .context("Failed to initialize services")?;
    server::serve(Arc::new(context)).await
}

/// Print the state of the corpus files and the external services
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("📊 RAG Chat Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("📚 Corpus Status:");
    let index_path = config.index_path();
    let metadata_path = config.metadata_path();
    match CorpusStatus::inspect(&index_path, &metadata_path) {
        CorpusStatus::Missing => {
            println!("   ❌ Not built. Run 'ragchat ingest' to create it.");
        }
        CorpusStatus::IndexOnly => {
            println!(
                "   ⚠️  Index present but metadata missing: {}",
                metadata_path.display()
            );
            println!("   Run 'ragchat ingest' to rebuild both files.");
        }
        CorpusStatus::MetadataOnly => {
            println!(
                "   ⚠️  Metadata present but index missing: {}",
                index_path.display()
            );
            println!("   Run 'ragchat reindex' to regenerate the index.");
        }
        CorpusStatus::Present => match CorpusState::load(&index_path, &metadata_path) {
            Ok(state) => {
                println!("   ✅ Loaded: {} passages", state.len());
                println!("   🔢 Dimension: {}", state.dimension());
            }
            Err(e) => println!("   ❌ Failed to load: {}", e),
        },
    }

    println!();
    println!("🤖 Embedding Service:");
    match OllamaEmbedder::new(&config.embedding) {
        Ok(embedder) => match tokio::task::spawn_blocking(move || embedder.health_check()).await {
            Ok(Ok(())) => {
                println!(
                    "   ✅ Ollama: Connected ({}:{})",
                    config.embedding.host, config.embedding.port
                );
                println!("   📋 Model: {}", config.embedding.model);
                println!("   📦 Batch Size: {}", config.embedding.batch_size);
            }
            Ok(Err(e)) => println!("   ⚠️  Ollama: Unhealthy - {}", e),
            Err(e) => println!("   ❌ Ollama: Health check did not complete - {}", e),
        },
        Err(e) => println!("   ❌ Ollama: Invalid configuration - {}", e),
    }

    println!();
    println!("💬 Language Model:");
    println!("   🌐 Endpoint: {}", config.llm.base_url);
    println!("   📋 Chat Model: {}", config.llm.model);
    println!("   📝 Summary Model: {}", config.llm.summary_model);
    if config.llm.api_key().is_some() {
        println!("   ✅ API key found in {}", config.llm.api_key_env);
    } else {
        println!("   ⚠️  {} is not set", config.llm.api_key_env);
    }

    println!();
    println!("🍪 Sessions:");
    match config.server.session_store {
        SessionStoreKind::Memory => println!("   Store: in-memory"),
        SessionStoreKind::Sqlite => println!(
            "   Store: SQLite ({})",
            config.sessions_database_path().display()
        ),
    }
    println!(
        "   Idle Timeout: {} minutes",
        config.server.session_timeout_minutes
    );

    Ok(())
}

async fn connect_embedder(config: &Config) -> Result<OllamaEmbedder> {
    let embedder =
        OllamaEmbedder::new(&config.embedding).context("Failed to create embedding client")?;

    let probe = embedder.clone();
    let health = tokio::task::spawn_blocking(move || probe.health_check())
        .await
        .context("Embedding health check task failed")?;

    if let Err(e) = health {
        warn!("Embedding service health check failed: {}", e);
        return Err(e.context(format!(
            "Embedding service at {}:{} is not ready",
            config.embedding.host, config.embedding.port
        )));
    }

    Ok(embedder)
}

fn print_stats(stats: &IngestStats) {
    println!("✅ Done");
    println!("   Chunks created: {}", stats.chunks_created);
    println!("   Embeddings generated: {}", stats.embeddings_generated);
    if stats.chunks_skipped > 0 {
        println!("   ⚠️  Chunks skipped: {}", stats.chunks_skipped);
    }
}
