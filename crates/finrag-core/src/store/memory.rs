//! In-memory [`Store`] implementation for tests.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Keyword search
//! ranks with Okapi BM25 over the stored chunks; vector search is
//! brute-force cosine similarity.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::bm25::Bm25Index;
use crate::embedding::cosine_similarity;
use crate::models::{Chunk, Document, Embedding};
use crate::search::format_ts_iso;

use super::{
    make_snippet, parse_since, ChunkCandidate, ChunkResponse, DocumentMetadata, DocumentResponse,
    Store,
};

const SNIPPET_CHARS: usize = 240;

struct StoredVector {
    chunk_id: String,
    document_id: String,
    vector: Vec<f32>,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    chunks: RwLock<Vec<Chunk>>,
    vectors: RwLock<Vec<StoredVector>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the document passes the source/since filters.
    fn doc_matches(
        docs: &HashMap<String, Document>,
        doc_id: &str,
        source: Option<&str>,
        since_ts: Option<i64>,
    ) -> bool {
        let Some(doc) = docs.get(doc_id) else {
            return false;
        };
        if let Some(src) = source {
            if doc.source != src {
                return false;
            }
        }
        if let Some(ts) = since_ts {
            if doc.updated_at < ts {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_document(&self, doc: &Document) -> Result<String> {
        let mut docs = write(&self.docs)?;
        // Same (source, source_id) keeps its original id.
        let existing = docs
            .values()
            .find(|d| d.source == doc.source && d.source_id == doc.source_id)
            .map(|d| d.id.clone());
        let id = existing.unwrap_or_else(|| doc.id.clone());
        let mut stored = doc.clone();
        stored.id = id.clone();
        docs.insert(id.clone(), stored);
        Ok(id)
    }

    async fn replace_chunks(
        &self,
        doc_id: &str,
        chunks: &[Chunk],
        vectors: Option<&[Vec<f32>]>,
    ) -> Result<()> {
        {
            let mut stored = write(&self.chunks)?;
            stored.retain(|c| c.document_id != doc_id);
            stored.extend(chunks.iter().cloned());
        }
        let mut stored_vecs = write(&self.vectors)?;
        stored_vecs.retain(|sv| sv.document_id != doc_id);
        if let Some(vecs) = vectors {
            for (c, v) in chunks.iter().zip(vecs.iter()) {
                stored_vecs.push(StoredVector {
                    chunk_id: c.id.clone(),
                    document_id: doc_id.to_string(),
                    vector: v.clone(),
                });
            }
        }
        Ok(())
    }

    async fn upsert_embedding(&self, embedding: &Embedding) -> Result<()> {
        let mut vecs = write(&self.vectors)?;
        vecs.retain(|sv| sv.chunk_id != embedding.chunk_id);
        vecs.push(StoredVector {
            chunk_id: embedding.chunk_id.clone(),
            document_id: embedding.document_id.clone(),
            vector: embedding.vector.clone(),
        });
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentResponse>> {
        let docs = read(&self.docs)?;
        let Some(doc) = docs.get(id) else {
            return Ok(None);
        };
        let mut chunks: Vec<ChunkResponse> = read(&self.chunks)?
            .iter()
            .filter(|c| c.document_id == id)
            .map(|c| ChunkResponse {
                index: c.chunk_index,
                text: c.text.clone(),
            })
            .collect();
        chunks.sort_by_key(|c| c.index);

        Ok(Some(DocumentResponse {
            id: doc.id.clone(),
            source: doc.source.clone(),
            source_id: doc.source_id.clone(),
            source_url: doc.source_url.clone(),
            title: doc.title.clone(),
            author: doc.author.clone(),
            created_at: format_ts_iso(doc.created_at),
            updated_at: format_ts_iso(doc.updated_at),
            content_type: doc.content_type.clone(),
            body: doc.body.clone(),
            metadata: serde_json::from_str(&doc.metadata_json)
                .unwrap_or_else(|_| serde_json::json!({})),
            chunks,
        }))
    }

    async fn get_document_metadata(&self, id: &str) -> Result<Option<DocumentMetadata>> {
        let docs = read(&self.docs)?;
        Ok(docs.get(id).map(|d| DocumentMetadata {
            id: d.id.clone(),
            title: d.title.clone(),
            source: d.source.clone(),
            source_id: d.source_id.clone(),
            source_url: d.source_url.clone(),
            updated_at: d.updated_at,
        }))
    }

    async fn keyword_search(
        &self,
        query: &str,
        limit: i64,
        source: Option<&str>,
        since: Option<&str>,
    ) -> Result<Vec<ChunkCandidate>> {
        let since_ts = parse_since(since)?;
        let docs = read(&self.docs)?;
        let chunks = read(&self.chunks)?;
        let eligible: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| Self::doc_matches(&docs, &c.document_id, source, since_ts))
            .collect();

        let texts: Vec<&str> = eligible.iter().map(|c| c.text.as_str()).collect();
        let index = Bm25Index::new(&texts);

        Ok(index
            .rank(query)
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(i, score)| {
                let c = eligible[i];
                ChunkCandidate {
                    chunk_id: c.id.clone(),
                    document_id: c.document_id.clone(),
                    raw_score: score,
                    snippet: make_snippet(&c.text, SNIPPET_CHARS),
                    text: c.text.clone(),
                    vector: None,
                }
            })
            .collect())
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: i64,
        source: Option<&str>,
        since: Option<&str>,
    ) -> Result<Vec<ChunkCandidate>> {
        let since_ts = parse_since(since)?;
        let docs = read(&self.docs)?;
        let chunks = read(&self.chunks)?;
        let vecs = read(&self.vectors)?;

        let mut candidates: Vec<ChunkCandidate> = vecs
            .iter()
            .filter(|sv| Self::doc_matches(&docs, &sv.document_id, source, since_ts))
            .filter_map(|sv| {
                let chunk = chunks.iter().find(|c| c.id == sv.chunk_id)?;
                Some(ChunkCandidate {
                    chunk_id: sv.chunk_id.clone(),
                    document_id: sv.document_id.clone(),
                    raw_score: cosine_similarity(query_vec, &sv.vector) as f64,
                    snippet: make_snippet(&chunk.text, SNIPPET_CHARS),
                    text: chunk.text.clone(),
                    vector: Some(sv.vector.clone()),
                })
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(limit.max(0) as usize);
        Ok(candidates)
    }

    async fn chunk_count(&self) -> Result<i64> {
        Ok(read(&self.chunks)?.len() as i64)
    }
}
