//! `finrag export`: dump every document and its chunks as pretty JSON.

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::config::Config;
use crate::db;

pub const DEFAULT_EXPORT_PATH: &str = "all_docs.json";

#[derive(Debug, Serialize)]
pub struct ExportedDocument {
    pub id: String,
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub content_type: String,
    pub updated_at: i64,
    pub metadata: serde_json::Value,
    pub chunks: Vec<ExportedChunk>,
}

#[derive(Debug, Serialize)]
pub struct ExportedChunk {
    pub id: String,
    pub chunk_index: i64,
    pub text: String,
}

pub async fn export_documents(pool: &SqlitePool) -> Result<Vec<ExportedDocument>> {
    let doc_rows = sqlx::query(
        "SELECT id, source, source_id, source_url, title, content_type, updated_at, metadata_json \
         FROM documents ORDER BY source_id",
    )
    .fetch_all(pool)
    .await?;

    let mut documents = Vec::with_capacity(doc_rows.len());
    for row in &doc_rows {
        let id: String = row.get("id");
        let chunks = sqlx::query(
            "SELECT id, chunk_index, text FROM chunks WHERE document_id = ? ORDER BY chunk_index",
        )
        .bind(&id)
        .fetch_all(pool)
        .await?
        .iter()
        .map(|c| ExportedChunk {
            id: c.get("id"),
            chunk_index: c.get("chunk_index"),
            text: c.get("text"),
        })
        .collect();

        let metadata_json: String = row.get("metadata_json");
        documents.push(ExportedDocument {
            id,
            source: row.get("source"),
            source_id: row.get("source_id"),
            source_url: row.get("source_url"),
            title: row.get("title"),
            content_type: row.get("content_type"),
            updated_at: row.get("updated_at"),
            metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
            chunks,
        });
    }
    Ok(documents)
}

/// Write the export to `output`, or to stdout when `output` is `-`.
pub async fn run_export(config: &Config, output: &Path) -> Result<()> {
    let pool = db::connect(config).await?;
    let documents = export_documents(&pool).await;
    pool.close().await;
    let documents = documents?;

    let json = serde_json::to_string_pretty(&documents)?;
    if output == Path::new("-") {
        println!("{json}");
        return Ok(());
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, &json)
        .with_context(|| format!("failed to write {}", output.display()))?;
    let chunks: usize = documents.iter().map(|d| d.chunks.len()).sum();
    println!(
        "exported {} documents, {} chunks to {}",
        documents.len(),
        chunks,
        output.display()
    );
    Ok(())
}
