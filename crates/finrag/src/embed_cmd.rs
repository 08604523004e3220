//! `finrag embed pending|rebuild` and inline embedding during ingest.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use finrag_core::store::Store;

use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::models::{Chunk, Embedding};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::sqlite_store::SqliteStore;

/// A chunk that needs a (fresh) vector.
#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub hash: String,
}

impl From<&Chunk> for PendingChunk {
    fn from(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            text: chunk.text.clone(),
            hash: chunk.hash.clone(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EmbedTally {
    pub embedded: u64,
    pub failed: u64,
}

fn require_enabled(config: &Config) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    Ok(())
}

/// Embed chunks that have no vector or whose vector is stale.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    require_enabled(config)?;
    let provider = embedding::create_provider(&config.embedding)?;
    let store = SqliteStore::connect(config).await?;

    let pending = find_pending_chunks(store.pool(), provider.model_name(), limit).await?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  chunks needing embeddings: {}", pending.len());
        store.close().await;
        return Ok(());
    }

    println!("embed pending");
    if pending.is_empty() {
        println!("  all chunks up to date");
        store.close().await;
        return Ok(());
    }

    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);
    let tally = embed_batches(config, provider.as_ref(), &store, &pending, batch_size, progress).await?;

    println!("  total pending: {}", pending.len());
    println!("  embedded: {}", tally.embedded);
    println!("  failed: {}", tally.failed);

    store.close().await;
    Ok(())
}

/// Drop every stored vector and embed all chunks again.
pub async fn run_embed_rebuild(
    config: &Config,
    batch_size_override: Option<usize>,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    require_enabled(config)?;
    let provider = embedding::create_provider(&config.embedding)?;
    let store = SqliteStore::connect(config).await?;

    let mut tx = store.pool().begin().await?;
    sqlx::query("DELETE FROM chunk_vectors").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM embeddings").execute(&mut *tx).await?;
    tx.commit().await?;

    println!("embed rebuild");
    println!("  cleared existing embeddings");

    let all = find_pending_chunks(store.pool(), provider.model_name(), None).await?;
    if all.is_empty() {
        println!("  no chunks to embed");
        store.close().await;
        return Ok(());
    }

    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);
    let tally = embed_batches(config, provider.as_ref(), &store, &all, batch_size, progress).await?;

    println!("  total chunks: {}", all.len());
    println!("  embedded: {}", tally.embedded);
    println!("  failed: {}", tally.failed);

    store.close().await;
    Ok(())
}

/// Embed freshly written chunks during ingest.
///
/// Never fails: provider or storage errors are logged and the affected
/// chunks are reported as pending so `embed pending` can pick them up.
pub async fn embed_chunks_inline(
    config: &Config,
    provider: Option<&dyn EmbeddingProvider>,
    store: &dyn Store,
    chunks: &[Chunk],
) -> EmbedTally {
    let Some(provider) = provider else {
        return EmbedTally::default();
    };
    let items: Vec<PendingChunk> = chunks.iter().map(PendingChunk::from).collect();
    match embed_batches(
        config,
        provider,
        store,
        &items,
        config.embedding.batch_size,
        &crate::progress::NoProgress,
    )
    .await
    {
        Ok(tally) => tally,
        Err(e) => {
            tracing::warn!(error = %e, "failed to store embeddings");
            EmbedTally {
                embedded: 0,
                failed: items.len() as u64,
            }
        }
    }
}

/// Embed `items` in batches and store the vectors.
///
/// A failed provider call marks its batch as failed and moves on; a
/// storage error aborts.
async fn embed_batches(
    config: &Config,
    provider: &dyn EmbeddingProvider,
    store: &dyn Store,
    items: &[PendingChunk],
    batch_size: usize,
    progress: &dyn ProgressReporter,
) -> Result<EmbedTally> {
    let mut tally = EmbedTally::default();
    let total = items.len() as u64;

    for batch in items.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
        match embedding::embed_texts(provider, &config.embedding, &texts).await {
            Ok(vectors) => {
                for (item, vector) in batch.iter().zip(&vectors) {
                    let embedding = Embedding {
                        chunk_id: item.chunk_id.clone(),
                        document_id: item.document_id.clone(),
                        model: provider.model_name().to_string(),
                        dims: provider.dims(),
                        content_hash: item.hash.clone(),
                        vector: vector.clone(),
                    };
                    store.upsert_embedding(&embedding).await?;
                    tally.embedded += 1;
                }
                tally.failed += batch.len().saturating_sub(vectors.len()) as u64;
            }
            Err(e) => {
                tracing::warn!(error = %e, batch = batch.len(), "embedding batch failed");
                tally.failed += batch.len() as u64;
            }
        }
        progress.report(ProgressEvent::Embedding {
            n: tally.embedded + tally.failed,
            total,
        });
    }

    Ok(tally)
}

/// Chunks with no embedding for `model`, or whose text changed since.
pub async fn find_pending_chunks(
    pool: &SqlitePool,
    model: &str,
    limit: Option<usize>,
) -> Result<Vec<PendingChunk>> {
    let limit = limit.map(|l| l as i64).unwrap_or(-1);

    let rows = sqlx::query(
        r#"
        SELECT c.id AS chunk_id, c.document_id AS document_id, c.text AS text, c.hash AS hash
        FROM chunks c
        LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.model = ?
        WHERE e.chunk_id IS NULL OR e.hash != c.hash
        ORDER BY c.document_id, c.chunk_index
        LIMIT ?
        "#,
    )
    .bind(model)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| PendingChunk {
            chunk_id: row.get("chunk_id"),
            document_id: row.get("document_id"),
            text: row.get("text"),
            hash: row.get("hash"),
        })
        .collect())
}
