//! Ingestion pipeline: scan → filter → load/extract → upsert → chunk →
//! embed → checkpoint.
//!
//! Runs are incremental: the newest file mtime seen is stored as a
//! checkpoint and later runs skip files not modified since. `--full`
//! ignores the checkpoint. Inline embedding is best-effort; chunks that
//! fail to embed stay pending for `finrag embed pending`.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use finrag_core::store::Store;

use crate::config::Config;
use crate::embed_cmd;
use crate::embedding::{self, EmbeddingProvider};
use crate::loader::{self, DocumentFile, LoadError};
use crate::models::{Document, SourceItem};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Ignore the checkpoint and re-ingest every matching file.
    pub full: bool,
    pub dry_run: bool,
    /// Only files modified on or after this date (`YYYY-MM-DD`).
    pub since: Option<String>,
    /// Only files modified on or before this date (`YYYY-MM-DD`).
    pub until: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub fetched: u64,
    pub upserted: u64,
    pub chunks: u64,
    /// Files that could not be extracted (corrupt, unsupported, too large).
    pub skipped: u64,
    pub embedded: u64,
    pub pending: u64,
    pub checkpoint: i64,
    /// Dry runs only: chunks that would be written.
    pub estimated_chunks: u64,
}

impl IngestSummary {
    fn print(&self, config: &Config, dry_run: bool) {
        if dry_run {
            println!("ingest (dry-run)");
            println!("  items found: {}", self.fetched);
            println!("  estimated chunks: {}", self.estimated_chunks);
            println!("  extraction skipped: {}", self.skipped);
            return;
        }
        println!("ingest");
        println!("  fetched: {} items", self.fetched);
        println!("  upserted documents: {}", self.upserted);
        println!("  chunks written: {}", self.chunks);
        println!("  extraction skipped: {}", self.skipped);
        if config.embedding.is_enabled() {
            println!("  embeddings written: {}", self.embedded);
            println!("  embeddings pending: {}", self.pending);
        }
        println!("  checkpoint: {}", self.checkpoint);
        println!("ok");
    }
}

/// `finrag ingest`: ingest the documents root and print a summary.
pub async fn run_ingest(
    config: &Config,
    opts: &IngestOptions,
    progress: &dyn ProgressReporter,
) -> Result<IngestSummary> {
    let store = SqliteStore::connect(config).await?;
    let summary = ingest_documents(config, &store, opts, progress).await;
    store.close().await;
    let summary = summary?;
    summary.print(config, opts.dry_run);
    Ok(summary)
}

/// Ingest if nothing has been indexed yet. Returns whether ingest ran.
pub async fn ensure_indexed(config: &Config, store: &SqliteStore) -> Result<bool> {
    if store.chunk_count().await? > 0 {
        return Ok(false);
    }
    tracing::info!(root = %config.documents.root.display(), "index is empty, ingesting documents");
    let summary = ingest_documents(config, store, &IngestOptions::default(), &NoProgress).await?;
    tracing::info!(
        documents = summary.upserted,
        chunks = summary.chunks,
        skipped = summary.skipped,
        "auto-ingest finished"
    );
    Ok(true)
}

pub async fn ingest_documents(
    config: &Config,
    store: &SqliteStore,
    opts: &IngestOptions,
    progress: &dyn ProgressReporter,
) -> Result<IngestSummary> {
    let checkpoint = if opts.full {
        None
    } else {
        get_checkpoint(store.pool(), loader::SOURCE).await?
    };

    progress.report(ProgressEvent::Scanning {
        root: config.documents.root.display().to_string(),
    });
    let Selection { files, ceiling } =
        select_files(loader::scan_documents(&config.documents)?, checkpoint, opts)?;

    let mut summary = IngestSummary {
        fetched: files.len() as u64,
        checkpoint: checkpoint.unwrap_or(0),
        ..Default::default()
    };

    let strategy = config.chunking.strategy();

    if opts.dry_run {
        for file in &files {
            match loader::load_document(file, config.documents.max_extract_bytes) {
                Ok(item) => {
                    summary.estimated_chunks += strategy.chunk("dry-run", &item.body).len() as u64
                }
                Err(_) => summary.skipped += 1,
            }
        }
        return Ok(summary);
    }

    let provider: Option<Box<dyn EmbeddingProvider>> = if config.embedding.is_enabled() {
        match embedding::create_provider(&config.embedding) {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!(error = %e, "could not create embedding provider; chunks stay pending");
                None
            }
        }
    } else {
        None
    };

    let total = files.len() as u64;
    for (i, file) in files.iter().enumerate() {
        // The checkpoint covers every file seen, including skipped ones,
        // so a corrupt file is not retried until it changes.
        summary.checkpoint = summary.checkpoint.max(file.modified.timestamp());

        let item = match loader::load_document(file, config.documents.max_extract_bytes) {
            Ok(item) => item,
            Err(e) => {
                log_skip(file, &e);
                summary.skipped += 1;
                continue;
            }
        };

        let doc_id = store
            .upsert_document(&to_document(&item))
            .await
            .with_context(|| format!("failed to store {}", item.source_id))?;
        let chunks = strategy.chunk(&doc_id, &item.body);
        store.replace_chunks(&doc_id, &chunks, None).await?;

        summary.upserted += 1;
        summary.chunks += chunks.len() as u64;

        if config.embedding.is_enabled() {
            let tally =
                embed_cmd::embed_chunks_inline(config, provider.as_deref(), store, &chunks).await;
            summary.embedded += tally.embedded;
            summary.pending += chunks.len() as u64 - tally.embedded;
        }

        progress.report(ProgressEvent::Indexing {
            n: i as u64 + 1,
            total,
            current: file.relative.clone(),
        });
    }

    // Files cut by --limit must stay above the checkpoint for the next run.
    if let Some(ceiling) = ceiling {
        summary.checkpoint = summary.checkpoint.min(ceiling);
    }
    set_checkpoint(store.pool(), loader::SOURCE, summary.checkpoint).await?;
    Ok(summary)
}

fn log_skip(file: &DocumentFile, err: &LoadError) {
    tracing::warn!(file = %file.relative, error = %err, "extraction skipped");
}

#[derive(Debug)]
struct Selection {
    files: Vec<DocumentFile>,
    /// Highest checkpoint that still leaves every file cut by `--limit`
    /// eligible for the next incremental run.
    ceiling: Option<i64>,
}

/// Apply checkpoint, `--since`, `--until` and `--limit`, in that order.
///
/// Under `--limit` the oldest files go first, so the checkpoint only ever
/// advances over files that were actually processed.
fn select_files(
    mut files: Vec<DocumentFile>,
    checkpoint: Option<i64>,
    opts: &IngestOptions,
) -> Result<Selection> {
    if let Some(cp) = checkpoint {
        files.retain(|f| f.modified.timestamp() > cp);
    }
    if let Some(since) = opts.since.as_deref() {
        let since_ts = day_bound(since, 0, 0, 0)?;
        files.retain(|f| f.modified.timestamp() >= since_ts);
    }
    if let Some(until) = opts.until.as_deref() {
        let until_ts = day_bound(until, 23, 59, 59)?;
        files.retain(|f| f.modified.timestamp() <= until_ts);
    }
    let mut ceiling = None;
    if let Some(limit) = opts.limit.filter(|&l| l < files.len()) {
        files.sort_by(|a, b| {
            a.modified
                .cmp(&b.modified)
                .then_with(|| a.relative.cmp(&b.relative))
        });
        ceiling = files.get(limit).map(|f| f.modified.timestamp() - 1);
        files.truncate(limit);
    }
    Ok(Selection { files, ceiling })
}

fn day_bound(date: &str, h: u32, m: u32, s: u32) -> Result<i64> {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{date}', expected YYYY-MM-DD"))?;
    Ok(day
        .and_hms_opt(h, m, s)
        .context("invalid time of day")?
        .and_utc()
        .timestamp())
}

/// Normalize a loaded file into a [`Document`] with its dedup hash.
pub fn to_document(item: &SourceItem) -> Document {
    let mut hasher = Sha256::new();
    hasher.update(item.source.as_bytes());
    hasher.update(item.source_id.as_bytes());
    hasher.update(item.updated_at.timestamp().to_le_bytes());
    hasher.update(item.body.as_bytes());

    Document {
        id: Uuid::new_v4().to_string(),
        source: item.source.clone(),
        source_id: item.source_id.clone(),
        source_url: item.source_url.clone(),
        title: item.title.clone(),
        author: item.author.clone(),
        created_at: item.created_at.timestamp(),
        updated_at: item.updated_at.timestamp(),
        content_type: item.content_type.clone(),
        body: item.body.clone(),
        metadata_json: item.metadata_json.clone(),
        raw_json: item.raw_json.clone(),
        dedup_hash: format!("{:x}", hasher.finalize()),
    }
}

async fn get_checkpoint(pool: &SqlitePool, source: &str) -> Result<Option<i64>> {
    let cursor: Option<String> =
        sqlx::query_scalar("SELECT cursor FROM checkpoints WHERE source = ?")
            .bind(source)
            .fetch_optional(pool)
            .await?;
    Ok(cursor.and_then(|s| s.parse::<i64>().ok()))
}

async fn set_checkpoint(pool: &SqlitePool, source: &str, cursor: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO checkpoints (source, cursor, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(source) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
        "#,
    )
    .bind(source)
    .bind(cursor.to_string())
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use chrono::{TimeZone, Utc};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn file(name: &str, ts: i64) -> DocumentFile {
        DocumentFile {
            path: PathBuf::from(name),
            relative: name.to_string(),
            modified: Utc.timestamp_opt(ts, 0).unwrap(),
            size: 1,
        }
    }

    #[test]
    fn select_applies_checkpoint_dates_and_limit() {
        let day = 86_400;
        let files = vec![file("a", day), file("b", 2 * day), file("c", 3 * day + 10)];

        let all = select_files(files.clone(), None, &IngestOptions::default()).unwrap();
        assert_eq!(all.files.len(), 3);
        assert_eq!(all.ceiling, None);

        let after_cp = select_files(files.clone(), Some(day), &IngestOptions::default()).unwrap();
        assert_eq!(after_cp.files.len(), 2);

        let opts = IngestOptions {
            since: Some("1970-01-03".into()),
            until: Some("1970-01-04".into()),
            ..Default::default()
        };
        let windowed = select_files(files.clone(), None, &opts).unwrap();
        let names: Vec<_> = windowed.files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);

        let limited = IngestOptions {
            limit: Some(1),
            ..Default::default()
        };
        assert_eq!(select_files(files.clone(), None, &limited).unwrap().files.len(), 1);

        let bad = IngestOptions {
            since: Some("03/01/1970".into()),
            ..Default::default()
        };
        assert!(select_files(files, None, &bad).is_err());
    }

    #[test]
    fn limit_takes_oldest_files_and_caps_checkpoint() {
        let files = vec![file("a.md", 500), file("b.md", 100), file("c.md", 100)];
        let opts = IngestOptions {
            limit: Some(1),
            ..Default::default()
        };
        let picked = select_files(files, None, &opts).unwrap();
        let names: Vec<_> = picked.files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(names, vec!["b.md"]);
        // c.md shares b.md's mtime, so the checkpoint must stay below it.
        assert_eq!(picked.ceiling, Some(99));
    }

    #[tokio::test]
    async fn limited_runs_eventually_ingest_every_file() {
        let tmp = TempDir::new().unwrap();
        let docs = tmp.path().join("PDFs");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("alpha.md"), "# Alpha\n\nEquity fund.").unwrap();
        fs::write(docs.join("bravo.md"), "# Bravo\n\nDebt fund.").unwrap();
        let an_hour_ago = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(docs.join("bravo.md"))
            .unwrap()
            .set_modified(an_hour_ago)
            .unwrap();

        let mut config = Config::minimal();
        config.db.path = tmp.path().join("db.sqlite");
        config.documents.root = docs;
        let store = SqliteStore::connect(&config).await.unwrap();
        migrate::migrate_pool(store.pool()).await.unwrap();

        let one = IngestOptions {
            limit: Some(1),
            ..Default::default()
        };
        let first = ingest_documents(&config, &store, &one, &NoProgress).await.unwrap();
        assert_eq!(first.upserted, 1);

        let second = ingest_documents(&config, &store, &IngestOptions::default(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(second.upserted, 1, "the file left out by --limit must be picked up");

        let third = ingest_documents(&config, &store, &IngestOptions::default(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(third.fetched, 0);
        assert_eq!(store.chunk_count().await.unwrap(), 2);
    }

    #[test]
    fn dedup_hash_depends_on_body() {
        let item = |body: &str| SourceItem {
            source: "filesystem".into(),
            source_id: "a.md".into(),
            source_url: None,
            title: None,
            author: None,
            created_at: Utc.timestamp_opt(5, 0).unwrap(),
            updated_at: Utc.timestamp_opt(5, 0).unwrap(),
            content_type: "text/markdown".into(),
            body: body.into(),
            metadata_json: "{}".into(),
            raw_json: None,
        };
        let a = to_document(&item("one"));
        let b = to_document(&item("one"));
        let c = to_document(&item("two"));
        assert_eq!(a.dedup_hash, b.dedup_hash);
        assert_ne!(a.dedup_hash, c.dedup_hash);
        assert_eq!(a.updated_at, 5);
    }

    #[tokio::test]
    async fn ensure_indexed_runs_once() {
        let tmp = TempDir::new().unwrap();
        let docs = tmp.path().join("PDFs");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("fund.md"), "# Fund\n\nNAV rose.").unwrap();
        fs::write(docs.join("broken.pdf"), "not a pdf").unwrap();

        let mut config = Config::minimal();
        config.db.path = tmp.path().join("db.sqlite");
        config.documents.root = docs;
        let store = SqliteStore::connect(&config).await.unwrap();
        migrate::migrate_pool(store.pool()).await.unwrap();

        assert!(ensure_indexed(&config, &store).await.unwrap());
        assert_eq!(store.chunk_count().await.unwrap(), 1);
        assert!(!ensure_indexed(&config, &store).await.unwrap());

        let again = ingest_documents(&config, &store, &IngestOptions::default(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(again.fetched, 0, "checkpoint should skip unchanged files");

        let full = IngestOptions {
            full: true,
            ..Default::default()
        };
        let rerun = ingest_documents(&config, &store, &full, &NoProgress).await.unwrap();
        assert_eq!((rerun.upserted, rerun.skipped), (1, 1));
        assert_eq!(store.chunk_count().await.unwrap(), 1);
    }
}
