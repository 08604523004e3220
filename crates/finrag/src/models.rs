//! Data models for the ingestion pipeline.
//!
//! [`Document`] and [`Chunk`] live in `finrag-core`; this module adds the
//! raw [`SourceItem`] produced by the document loader before normalization.

use chrono::{DateTime, Utc};

pub use finrag_core::models::{Chunk, Document, Embedding, Query};

/// A loaded file, before it is normalized into a [`Document`].
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub source: String,
    /// Path relative to the documents root.
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// MIME type of the original file; extracted text is always UTF-8.
    pub content_type: String,
    pub body: String,
    pub metadata_json: String,
    pub raw_json: Option<String>,
}
