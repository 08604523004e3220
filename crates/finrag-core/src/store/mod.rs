//! Storage abstraction for finrag.
//!
//! The [`Store`] trait defines the storage operations the retrieval
//! pipeline needs. The SQLite backend lives in the app crate;
//! [`memory::InMemoryStore`] backs unit tests.
//!
//! Backends are shared across tool calls and server handlers, so they
//! must be `Send + Sync`.

pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{Chunk, Document, Embedding};

/// One retrieval hit from either index, before fusion.
///
/// Carries enough information for score fusion, MMR re-selection and
/// chunk-level results without additional DB round-trips.
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    /// Chunk UUID.
    pub chunk_id: String,
    /// Parent document UUID.
    pub document_id: String,
    /// Raw score from the backend (higher is better for both BM25 and cosine).
    pub raw_score: f64,
    /// Short excerpt shown in search listings.
    pub snippet: String,
    /// Full chunk text.
    pub text: String,
    /// Stored embedding; set only by vector search.
    pub vector: Option<Vec<f32>>,
}

/// A stored filing or factsheet with its body and ordered chunks.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub content_type: String,
    pub body: String,
    pub metadata: serde_json::Value,
    pub chunks: Vec<ChunkResponse>,
}

/// Chunk text at its position in the document.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkResponse {
    pub index: i64,
    pub text: String,
}

/// Document fields joined onto search hits.
#[derive(Debug, Clone)]
pub struct DocumentMetadata {
    pub id: String,
    pub title: Option<String>,
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub updated_at: i64,
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_document`](Store::upsert_document) | Write a document, keeping its id on re-ingest |
/// | [`replace_chunks`](Store::replace_chunks) | Swap in a fresh chunk set (and vectors) |
/// | [`upsert_embedding`](Store::upsert_embedding) | Attach one chunk vector |
/// | [`get_document`](Store::get_document) | Document plus chunks, for `get` |
/// | [`get_document_metadata`](Store::get_document_metadata) | Title and source for a hit |
/// | [`keyword_search`](Store::keyword_search) | BM25 over chunk text |
/// | [`vector_search`](Store::vector_search) | Cosine similarity over chunk vectors |
/// | [`chunk_count`](Store::chunk_count) | Size of the index |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update a document. Returns the stored document ID.
    async fn upsert_document(&self, doc: &Document) -> Result<String>;

    /// Drop the document's old chunks and write `chunks`; `vectors`, when
    /// given, line up with `chunks` by index.
    async fn replace_chunks(
        &self,
        doc_id: &str,
        chunks: &[Chunk],
        vectors: Option<&[Vec<f32>]>,
    ) -> Result<()>;

    /// Attach a vector to a chunk, tagged with the model and content hash
    /// used to detect staleness.
    async fn upsert_embedding(&self, embedding: &Embedding) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<DocumentResponse>>;

    async fn get_document_metadata(&self, id: &str) -> Result<Option<DocumentMetadata>>;

    /// Keyword search. Candidates are ordered best first.
    async fn keyword_search(
        &self,
        query: &str,
        limit: i64,
        source: Option<&str>,
        since: Option<&str>,
    ) -> Result<Vec<ChunkCandidate>>;

    /// Vector similarity search. Candidates are ordered best first and
    /// carry their stored vector.
    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: i64,
        source: Option<&str>,
        since: Option<&str>,
    ) -> Result<Vec<ChunkCandidate>>;

    async fn chunk_count(&self) -> Result<i64>;
}

/// Parse a `YYYY-MM-DD` filter into a Unix timestamp at UTC midnight.
pub fn parse_since(since: Option<&str>) -> Result<Option<i64>> {
    let Some(s) = since else {
        return Ok(None);
    };
    match NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        Ok(date) => Ok(date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())),
        Err(_) => bail!("invalid since date '{}': expected YYYY-MM-DD", s),
    }
}

/// Turn free text into an FTS5 expression: every alphanumeric token is
/// double-quoted and the tokens are OR-ed together.
///
/// Returns `None` when the text has no tokens.
///
/// ```rust
/// use finrag_core::store::fts_query;
///
/// assert_eq!(fts_query("What's NAV?").as_deref(), Some("\"what\" OR \"s\" OR \"nav\""));
/// assert_eq!(fts_query("?!"), None);
/// ```
pub fn fts_query(text: &str) -> Option<String> {
    let tokens = crate::bm25::tokenize(text);
    if tokens.is_empty() {
        return None;
    }
    Some(
        tokens
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Snippet of at most `max_chars` characters.
pub fn make_snippet(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_since_accepts_dates() {
        assert_eq!(parse_since(None).unwrap(), None);
        assert_eq!(parse_since(Some("1970-01-02")).unwrap(), Some(86_400));
        assert!(parse_since(Some("yesterday")).is_err());
    }

    #[test]
    fn fts_query_quotes_tokens() {
        assert_eq!(
            fts_query("sharpe OR \"ratio\"").as_deref(),
            Some("\"sharpe\" OR \"or\" OR \"ratio\"")
        );
        assert_eq!(fts_query("   "), None);
    }
}
