//! The SQLite index behind every search and agent tool.
//!
//! Schema: `documents`, `chunks`, `chunks_fts` (FTS5), `embeddings`
//! (per-chunk model + content hash) and `chunk_vectors` (f32 BLOBs).
//! Keyword search ranks with FTS5 `bm25()`; vector search is brute-force
//! cosine over every stored vector that passes the filters.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use finrag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use finrag_core::models::{Chunk, Document, Embedding};
use finrag_core::search::format_ts_iso;
use finrag_core::store::{
    fts_query, make_snippet, parse_since, ChunkCandidate, ChunkResponse, DocumentMetadata,
    DocumentResponse, Store,
};

use crate::config::Config;
use crate::db;

const SNIPPET_CHARS: usize = 240;

/// [`Store`] over the local SQLite index (FTS5 for keywords, BLOB vectors).
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database.
    pub async fn connect(config: &Config) -> Result<Self> {
        Ok(Self::new(db::connect(config).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn upsert_vector<'e, E>(executor: E, chunk_id: &str, doc_id: &str, vector: &[f32]) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO chunk_vectors (chunk_id, document_id, embedding)
        VALUES (?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            document_id = excluded.document_id,
            embedding = excluded.embedding
        "#,
    )
    .bind(chunk_id)
    .bind(doc_id)
    .bind(vec_to_blob(vector))
    .execute(executor)
    .await?;
    Ok(())
}

fn candidate_from_row(row: &SqliteRow, raw_score: f64, snippet: String) -> ChunkCandidate {
    ChunkCandidate {
        chunk_id: row.get("chunk_id"),
        document_id: row.get("document_id"),
        raw_score,
        snippet,
        text: row.get("text"),
        vector: None,
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_document(&self, doc: &Document) -> Result<String> {
        // Re-ingesting a file keeps its document id.
        let existing: Option<String> =
            sqlx::query_scalar("SELECT id FROM documents WHERE source = ? AND source_id = ?")
                .bind(&doc.source)
                .bind(&doc.source_id)
                .fetch_optional(&self.pool)
                .await?;
        let id = existing.unwrap_or_else(|| doc.id.clone());

        sqlx::query(
            r#"
            INSERT INTO documents (id, source, source_id, source_url, title, author,
                                   created_at, updated_at, content_type, body,
                                   metadata_json, raw_json, dedup_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source, source_id) DO UPDATE SET
                source_url = excluded.source_url,
                title = excluded.title,
                author = excluded.author,
                updated_at = excluded.updated_at,
                content_type = excluded.content_type,
                body = excluded.body,
                metadata_json = excluded.metadata_json,
                raw_json = excluded.raw_json,
                dedup_hash = excluded.dedup_hash
            "#,
        )
        .bind(&id)
        .bind(&doc.source)
        .bind(&doc.source_id)
        .bind(&doc.source_url)
        .bind(&doc.title)
        .bind(&doc.author)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .bind(&doc.content_type)
        .bind(&doc.body)
        .bind(&doc.metadata_json)
        .bind(&doc.raw_json)
        .bind(&doc.dedup_hash)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn replace_chunks(
        &self,
        doc_id: &str,
        chunks: &[Chunk],
        vectors: Option<&[Vec<f32>]>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for table in ["chunk_vectors", "embeddings"] {
            sqlx::query(&format!(
                "DELETE FROM {table} WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)"
            ))
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        for (i, chunk) in chunks.iter().enumerate() {
            sqlx::query(
                "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(doc_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
                .bind(&chunk.id)
                .bind(doc_id)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;

            if let Some(vec) = vectors.and_then(|v| v.get(i)) {
                upsert_vector(&mut *tx, &chunk.id, doc_id, vec).await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn upsert_embedding(&self, embedding: &Embedding) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO embeddings (chunk_id, model, dims, created_at, hash)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                created_at = excluded.created_at,
                hash = excluded.hash
            "#,
        )
        .bind(&embedding.chunk_id)
        .bind(&embedding.model)
        .bind(embedding.dims as i64)
        .bind(chrono::Utc::now().timestamp())
        .bind(&embedding.content_hash)
        .execute(&mut *tx)
        .await?;

        upsert_vector(
            &mut *tx,
            &embedding.chunk_id,
            &embedding.document_id,
            &embedding.vector,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentResponse>> {
        let Some(doc_row) = sqlx::query(
            "SELECT id, source, source_id, source_url, title, author, created_at, updated_at, content_type, body, metadata_json FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let metadata_json: String = doc_row.get("metadata_json");
        let metadata: serde_json::Value =
            serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({}));

        let chunks: Vec<ChunkResponse> = sqlx::query(
            "SELECT chunk_index, text FROM chunks WHERE document_id = ? ORDER BY chunk_index ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| ChunkResponse {
            index: row.get("chunk_index"),
            text: row.get("text"),
        })
        .collect();

        Ok(Some(DocumentResponse {
            id: doc_row.get("id"),
            source: doc_row.get("source"),
            source_id: doc_row.get("source_id"),
            source_url: doc_row.get("source_url"),
            title: doc_row.get("title"),
            author: doc_row.get("author"),
            created_at: format_ts_iso(doc_row.get("created_at")),
            updated_at: format_ts_iso(doc_row.get("updated_at")),
            content_type: doc_row.get("content_type"),
            body: doc_row.get("body"),
            metadata,
            chunks,
        }))
    }

    async fn get_document_metadata(&self, id: &str) -> Result<Option<DocumentMetadata>> {
        let row = sqlx::query(
            "SELECT id, title, source, source_id, updated_at, source_url FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| DocumentMetadata {
            id: r.get("id"),
            title: r.get("title"),
            source: r.get("source"),
            source_id: r.get("source_id"),
            source_url: r.get("source_url"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn keyword_search(
        &self,
        query: &str,
        limit: i64,
        source: Option<&str>,
        since: Option<&str>,
    ) -> Result<Vec<ChunkCandidate>> {
        let Some(match_expr) = fts_query(query) else {
            return Ok(Vec::new());
        };
        let since_ts = parse_since(since)?;

        let rows = sqlx::query(
            r#"
            SELECT chunks_fts.chunk_id AS chunk_id,
                   chunks_fts.document_id AS document_id,
                   chunks_fts.rank AS rank,
                   snippet(chunks_fts, 2, '>>>', '<<<', '...', 48) AS snippet,
                   c.text AS text
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            JOIN documents d ON d.id = chunks_fts.document_id
            WHERE chunks_fts MATCH ?
              AND (? IS NULL OR d.source = ?)
              AND (? IS NULL OR d.updated_at >= ?)
            ORDER BY chunks_fts.rank
            LIMIT ?
            "#,
        )
        .bind(&match_expr)
        .bind(source)
        .bind(source)
        .bind(since_ts)
        .bind(since_ts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        // FTS5 rank is lower-is-better; negate so higher is better.
        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                candidate_from_row(row, -rank, row.get("snippet"))
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

        let rows = sqlx::query(
            r#"
            SELECT cv.chunk_id AS chunk_id, cv.document_id AS document_id,
                   cv.embedding AS embedding, c.text AS text
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            JOIN documents d ON d.id = cv.document_id
            WHERE (? IS NULL OR d.source = ?)
              AND (? IS NULL OR d.updated_at >= ?)
            "#,
        )
        .bind(source)
        .bind(source)
        .bind(since_ts)
        .bind(since_ts)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<ChunkCandidate> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                let text: String = row.get("text");
                let mut cand = candidate_from_row(
                    row,
                    cosine_similarity(query_vec, &vector) as f64,
                    make_snippet(&text, SNIPPET_CHARS),
                );
                cand.vector = Some(vector);
                cand
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
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?)
    }
}
