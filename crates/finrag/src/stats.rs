//! `finrag stats`: what is indexed and how much of it is embedded.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub documents: i64,
    pub chunks: i64,
    pub embedded: i64,
    /// Document counts per content type, largest first.
    pub by_type: Vec<(String, i64)>,
    /// When ingest last advanced its checkpoint.
    pub last_ingest: Option<i64>,
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<IndexStats> {
    let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await?;
    let embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(pool)
        .await?;

    let by_type = sqlx::query(
        "SELECT content_type, COUNT(*) AS n FROM documents GROUP BY content_type ORDER BY n DESC, content_type",
    )
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| (row.get("content_type"), row.get("n")))
    .collect();

    let last_ingest: Option<i64> = sqlx::query_scalar("SELECT MAX(updated_at) FROM checkpoints")
        .fetch_one(pool)
        .await?;

    Ok(IndexStats {
        documents,
        chunks,
        embedded,
        by_type,
        last_ingest,
    })
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await?;
    pool.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("finrag index");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Documents:   {}", stats.documents);
    println!("  Chunks:      {}", stats.chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.embedded,
        stats.chunks,
        percent(stats.embedded, stats.chunks)
    );
    println!(
        "  Last ingest: {}",
        stats
            .last_ingest
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );

    if !stats.by_type.is_empty() {
        println!();
        println!("  {:<72} {:>6}", "CONTENT TYPE", "DOCS");
        for (content_type, n) in &stats.by_type {
            println!("  {content_type:<72} {n:>6}");
        }
    }

    Ok(())
}

fn percent(part: i64, whole: i64) -> i64 {
    if whole > 0 {
        part * 100 / whole
    } else {
        0
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else if b < KB * KB * KB {
        format!("{:.1} MB", b / (KB * KB))
    } else {
        format!("{:.2} GB", b / (KB * KB * KB))
    }
}

fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    let plural = |n: i64, unit: &str| format!("{n} {unit}{} ago", if n == 1 { "" } else { "s" });
    match delta {
        d if d < 0 => finrag_core::search::format_ts_iso(ts),
        d if d < 60 => "just now".to_string(),
        d if d < 3600 => plural(d / 60, "min"),
        d if d < 86_400 => plural(d / 3600, "hour"),
        d if d < 86_400 * 30 => plural(d / 86_400, "day"),
        _ => finrag_core::search::format_ts_iso(ts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_and_percent_formatting() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(0, 0), 0);
    }

    #[test]
    fn relative_times() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86_400), "1 day ago");
    }

    #[tokio::test]
    async fn empty_index_stats() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = Config::minimal();
        config.db.path = tmp.path().join("s.sqlite");
        let pool = db::connect(&config).await.unwrap();
        crate::migrate::migrate_pool(&pool).await.unwrap();
        let stats = collect_stats(&pool).await.unwrap();
        assert_eq!(stats.documents, 0);
        assert!(stats.by_type.is_empty());
        assert_eq!(stats.last_ingest, None);
    }
}
