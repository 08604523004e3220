//! `finrag get <id>`: print a stored document and its chunks.

use anyhow::{bail, Result};

use finrag_core::store::{DocumentResponse, Store};

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// Document not found by id.
#[derive(Debug, thiserror::Error)]
#[error("document not found: {0}")]
pub struct NotFound(pub String);

pub async fn get_document(config: &Config, id: &str) -> Result<DocumentResponse> {
    let store = SqliteStore::connect(config).await?;
    let result = store.get_document(id).await;
    store.close().await;

    match result? {
        Some(doc) => Ok(doc),
        None => Err(NotFound(id.to_string()).into()),
    }
}

pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("document id must not be empty");
    }
    let doc = get_document(config, id).await?;

    println!("--- Document ---");
    println!("id:           {}", doc.id);
    println!("title:        {}", doc.title.as_deref().unwrap_or("(untitled)"));
    println!("source:       {}", doc.source);
    println!("source_id:    {}", doc.source_id);
    if let Some(url) = &doc.source_url {
        println!("source_url:   {url}");
    }
    println!("updated_at:   {}", doc.updated_at);
    println!("content_type: {}", doc.content_type);
    println!("metadata:     {}", doc.metadata);
    println!();

    println!("--- Chunks ({}) ---", doc.chunks.len());
    for chunk in &doc.chunks {
        println!("[chunk {}]", chunk.index);
        println!("{}", chunk.text);
        println!();
    }

    Ok(())
}
