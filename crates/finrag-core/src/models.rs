//! Core data models shared by ingestion, storage, and retrieval.

use serde::{Deserialize, Serialize};

/// Normalized document as persisted by a [`Store`](crate::store::Store).
///
/// Timestamps are Unix seconds. `dedup_hash` covers source, source id,
/// modification time, and body so unchanged files can be recognized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub content_type: String,
    pub body: String,
    pub metadata_json: String,
    pub raw_json: Option<String>,
    pub dedup_hash: String,
}

/// A span of a document's body text: the unit of retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 hex digest of `text`.
    pub hash: String,
}

/// An embedding vector bound to the chunk it was computed from.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub chunk_id: String,
    pub document_id: String,
    pub model: String,
    pub dims: usize,
    /// Hash of the chunk text at embedding time; a mismatch marks the vector stale.
    pub content_hash: String,
    pub vector: Vec<f32>,
}

impl Embedding {
    /// Vector for a chunk; `dims` is taken from the vector itself.
    pub fn new(
        chunk_id: impl Into<String>,
        document_id: impl Into<String>,
        model: impl Into<String>,
        content_hash: impl Into<String>,
        vector: Vec<f32>,
    ) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            document_id: document_id.into(),
            model: model.into(),
            dims: vector.len(),
            content_hash: content_hash.into(),
            vector,
        }
    }
}

/// A user question together with the context retrieved for it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Query {
    pub text: String,
    pub context: Vec<crate::search::SearchResultItem>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            context: Vec::new(),
        }
    }
}
