//! Search engine with keyword, semantic, and hybrid retrieval modes.
//!
//! The core search algorithm operates entirely through the [`Store`] trait,
//! with no database or configuration dependencies. The calling application
//! is responsible for embedding queries, constructing [`SearchParams`],
//! and passing the appropriate store implementation.
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. Fetch `candidate_k_keyword` keyword candidates (BM25).
//! 2. Fetch vector candidates (cosine similarity). With MMR enabled,
//!    `fetch_k` candidates are fetched and `candidate_k_vector` of them are
//!    re-selected by Maximal Marginal Relevance.
//! 3. Fuse the two ranked lists:
//!    - [`Fusion::Rrf`]: `score = (1 - α) / (c + rank_k) + α / (c + rank_v)`
//!    - [`Fusion::MinMax`]: normalize both lists to `[0, 1]`, then
//!      `score = (1 - α) × keyword + α × semantic`.
//! 4. Group by document (MAX aggregation) or keep chunks.
//! 5. Sort by score (desc), updated_at (desc), id (asc).
//! 6. Truncate to `final_limit`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::Serialize;

use crate::embedding::mmr_select;
use crate::store::{ChunkCandidate, DocumentMetadata, Store};

/// How keyword and vector rankings are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fusion {
    /// Weighted reciprocal rank fusion.
    #[default]
    Rrf,
    /// Weighted sum of min-max normalized scores.
    MinMax,
}

impl FromStr for Fusion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rrf" => Ok(Fusion::Rrf),
            "minmax" | "linear" => Ok(Fusion::MinMax),
            other => bail!("Unknown fusion: {}. Use rrf or minmax.", other),
        }
    }
}

impl fmt::Display for Fusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fusion::Rrf => write!(f, "rrf"),
            Fusion::MinMax => write!(f, "minmax"),
        }
    }
}

/// Result granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupBy {
    /// One result per document, scored by its best chunk.
    #[default]
    Document,
    /// One result per chunk.
    Chunk,
}

impl FromStr for GroupBy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "document" => Ok(GroupBy::Document),
            "chunk" => Ok(GroupBy::Chunk),
            other => bail!("Unknown grouping: {}. Use document or chunk.", other),
        }
    }
}

/// Maximal Marginal Relevance settings for the vector list.
#[derive(Debug, Clone, Copy)]
pub struct MmrParams {
    /// Candidates fetched before re-selection.
    pub fetch_k: i64,
    /// Relevance/diversity trade-off; `1.0` is pure relevance.
    pub lambda: f64,
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Weight of the vector list; the keyword list gets `1 - α`.
    pub hybrid_alpha: f64,
    /// Number of keyword candidates to fetch.
    pub candidate_k_keyword: i64,
    /// Number of vector candidates kept.
    pub candidate_k_vector: i64,
    /// Maximum results to return.
    pub final_limit: i64,
    pub fusion: Fusion,
    /// RRF rank constant.
    pub rrf_k: f64,
    pub mmr: Option<MmrParams>,
    pub group_by: GroupBy,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            hybrid_alpha: 0.5,
            candidate_k_keyword: 20,
            candidate_k_vector: 5,
            final_limit: 5,
            fusion: Fusion::Rrf,
            rrf_k: 60.0,
            mmr: Some(MmrParams {
                fetch_k: 10,
                lambda: 0.5,
            }),
            group_by: GroupBy::Document,
        }
    }
}

/// Bundles all inputs for a single search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    /// Search query text.
    pub query: &'a str,
    /// Pre-computed query embedding (required for semantic/hybrid modes).
    pub query_vec: Option<&'a [f32]>,
    /// `"keyword"`, `"semantic"`, or `"hybrid"`.
    pub mode: &'a str,
    /// Only return results from this source.
    pub source_filter: Option<&'a str>,
    /// Only return documents updated on or after this date (`YYYY-MM-DD`).
    pub since: Option<&'a str>,
    pub params: SearchParams,
    /// If true, populate [`ScoreExplanation`] on each result.
    pub explain: bool,
}

/// A ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    /// Document UUID.
    pub id: String,
    /// Fused relevance score.
    pub score: f64,
    pub title: Option<String>,
    pub source: String,
    pub source_id: String,
    /// Last modification timestamp (ISO 8601).
    pub updated_at: String,
    /// Text excerpt from the best-matching chunk.
    pub snippet: String,
    pub source_url: Option<String>,
    /// Chunk UUID (chunk-grouped results only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    /// Full chunk text (chunk-grouped results only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Scoring breakdown (populated when `explain` is true).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<ScoreExplanation>,
}

/// Scoring breakdown for a search result.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreExplanation {
    /// Keyword contribution (normalized score for minmax, weighted
    /// reciprocal rank for rrf; 0.0 if absent from keyword candidates).
    pub keyword_score: f64,
    /// Vector contribution, same convention as `keyword_score`.
    pub semantic_score: f64,
    pub alpha: f64,
    pub fusion: String,
    pub keyword_candidates: usize,
    pub vector_candidates: usize,
}

/// A chunk after fusion.
#[derive(Debug, Clone)]
pub struct FusedChunk<'a> {
    pub candidate: &'a ChunkCandidate,
    pub score: f64,
    pub keyword_score: f64,
    pub semantic_score: f64,
}

/// Run a search against a [`Store`] backend.
///
/// This is the core search function that all frontends (CLI, HTTP, agent
/// tools) delegate to.
pub async fn search<S: Store + ?Sized>(
    store: &S,
    req: &SearchRequest<'_>,
) -> Result<Vec<SearchResultItem>> {
    if req.query.trim().is_empty() {
        return Ok(Vec::new());
    }

    match req.mode {
        "keyword" | "semantic" | "hybrid" => {}
        _ => bail!(
            "Unknown search mode: {}. Use keyword, semantic, or hybrid.",
            req.mode
        ),
    }

    let keyword_candidates = if req.mode == "keyword" || req.mode == "hybrid" {
        store
            .keyword_search(
                req.query,
                req.params.candidate_k_keyword,
                req.source_filter,
                req.since,
            )
            .await?
    } else {
        Vec::new()
    };

    let vector_candidates = if req.mode == "semantic" || req.mode == "hybrid" {
        let Some(qv) = req.query_vec else {
            bail!("query_vec is required for semantic/hybrid mode");
        };
        let fetch = match req.params.mmr {
            Some(mmr) => mmr.fetch_k.max(req.params.candidate_k_vector),
            None => req.params.candidate_k_vector,
        };
        let fetched = store
            .vector_search(qv, fetch, req.source_filter, req.since)
            .await?;
        match req.params.mmr {
            Some(mmr) => apply_mmr(
                qv,
                fetched,
                req.params.candidate_k_vector.max(0) as usize,
                mmr.lambda,
            ),
            None => fetched,
        }
    } else {
        Vec::new()
    };

    if keyword_candidates.is_empty() && vector_candidates.is_empty() {
        return Ok(Vec::new());
    }

    let alpha = match req.mode {
        "keyword" => 0.0,
        "semantic" => 1.0,
        _ => req.params.hybrid_alpha,
    };

    let fused = fuse(
        &keyword_candidates,
        &vector_candidates,
        req.params.fusion,
        alpha,
        req.params.rrf_k,
    );

    let explain_for = |f: &FusedChunk<'_>| {
        req.explain.then(|| ScoreExplanation {
            keyword_score: f.keyword_score,
            semantic_score: f.semantic_score,
            alpha,
            fusion: req.params.fusion.to_string(),
            keyword_candidates: keyword_candidates.len(),
            vector_candidates: vector_candidates.len(),
        })
    };

    let mut meta_cache: HashMap<String, Option<DocumentMetadata>> = HashMap::new();
    let mut results: Vec<SearchResultItem> = Vec::new();

    match req.params.group_by {
        GroupBy::Document => {
            // `fused` is sorted best first, so the first chunk seen per
            // document is its MAX.
            let mut seen: HashSet<&str> = HashSet::new();
            for f in &fused {
                let doc_id = f.candidate.document_id.as_str();
                if !seen.insert(doc_id) {
                    continue;
                }
                let Some(meta) = lookup_meta(store, &mut meta_cache, doc_id).await? else {
                    continue;
                };
                results.push(result_item(meta, f, None, explain_for(f)));
            }
        }
        GroupBy::Chunk => {
            for f in &fused {
                let Some(meta) =
                    lookup_meta(store, &mut meta_cache, &f.candidate.document_id).await?
                else {
                    continue;
                };
                results.push(result_item(meta, f, Some(f.candidate), explain_for(f)));
            }
        }
    }

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.updated_at.cmp(&a.updated_at))
            .then(a.id.cmp(&b.id))
            .then(a.chunk_id.cmp(&b.chunk_id))
    });

    results.truncate(req.params.final_limit.max(0) as usize);

    Ok(results)
}

async fn lookup_meta<S: Store + ?Sized>(
    store: &S,
    cache: &mut HashMap<String, Option<DocumentMetadata>>,
    doc_id: &str,
) -> Result<Option<DocumentMetadata>> {
    if let Some(hit) = cache.get(doc_id) {
        return Ok(hit.clone());
    }
    let meta = store.get_document_metadata(doc_id).await?;
    cache.insert(doc_id.to_string(), meta.clone());
    Ok(meta)
}

fn result_item(
    meta: DocumentMetadata,
    fused: &FusedChunk<'_>,
    chunk: Option<&ChunkCandidate>,
    explain: Option<ScoreExplanation>,
) -> SearchResultItem {
    SearchResultItem {
        id: meta.id,
        score: fused.score,
        title: meta.title,
        source: meta.source,
        source_id: meta.source_id,
        updated_at: format_ts_iso(meta.updated_at),
        snippet: fused.candidate.snippet.clone(),
        source_url: meta.source_url,
        chunk_id: chunk.map(|c| c.chunk_id.clone()),
        text: chunk.map(|c| c.text.clone()),
        explain,
    }
}

/// Re-select `k` vector candidates by MMR. Candidates without a stored
/// vector cannot be compared and are dropped.
fn apply_mmr(
    query_vec: &[f32],
    candidates: Vec<ChunkCandidate>,
    k: usize,
    lambda: f64,
) -> Vec<ChunkCandidate> {
    let with_vecs: Vec<ChunkCandidate> = candidates
        .into_iter()
        .filter(|c| c.vector.is_some())
        .collect();
    let vectors: Vec<Vec<f32>> = with_vecs
        .iter()
        .map(|c| c.vector.clone().unwrap_or_default())
        .collect();
    let picked = mmr_select(query_vec, &vectors, k, lambda as f32);

    let mut slots: Vec<Option<ChunkCandidate>> = with_vecs.into_iter().map(Some).collect();
    picked
        .into_iter()
        .filter_map(|i| slots.get_mut(i).and_then(Option::take))
        .collect()
}

/// Fuse keyword and vector rankings into one list sorted best first.
///
/// Chunks appearing in both lists are merged by chunk id. Ties keep
/// first-seen order, keyword list first.
pub fn fuse<'a>(
    keyword: &'a [ChunkCandidate],
    vector: &'a [ChunkCandidate],
    fusion: Fusion,
    alpha: f64,
    rrf_k: f64,
) -> Vec<FusedChunk<'a>> {
    let (kw_scores, vec_scores): (Vec<f64>, Vec<f64>) = match fusion {
        Fusion::Rrf => (
            rrf_contributions(keyword, 1.0 - alpha, rrf_k),
            rrf_contributions(vector, alpha, rrf_k),
        ),
        Fusion::MinMax => (
            normalize_scores(keyword).into_iter().map(|(_, s)| s).collect(),
            normalize_scores(vector).into_iter().map(|(_, s)| s).collect(),
        ),
    };

    let mut order: Vec<FusedChunk<'a>> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for (c, s) in keyword.iter().zip(kw_scores) {
        if index.contains_key(c.chunk_id.as_str()) {
            continue;
        }
        index.insert(c.chunk_id.as_str(), order.len());
        order.push(FusedChunk {
            candidate: c,
            score: 0.0,
            keyword_score: s,
            semantic_score: 0.0,
        });
    }
    for (c, s) in vector.iter().zip(vec_scores) {
        match index.get(c.chunk_id.as_str()) {
            Some(&i) => {
                if s > order[i].semantic_score {
                    order[i].semantic_score = s;
                }
            }
            None => {
                index.insert(c.chunk_id.as_str(), order.len());
                order.push(FusedChunk {
                    candidate: c,
                    score: 0.0,
                    keyword_score: 0.0,
                    semantic_score: s,
                });
            }
        }
    }

    for f in &mut order {
        f.score = match fusion {
            Fusion::Rrf => f.keyword_score + f.semantic_score,
            Fusion::MinMax => (1.0 - alpha) * f.keyword_score + alpha * f.semantic_score,
        };
    }

    // Stable sort keeps first-seen order on ties.
    order.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}

/// Weighted reciprocal rank fusion of a keyword and a vector list.
/// Returns `(chunk_id, score)` best first.
pub fn rrf_fuse(
    keyword: &[ChunkCandidate],
    vector: &[ChunkCandidate],
    alpha: f64,
    c: f64,
) -> Vec<(String, f64)> {
    fuse(keyword, vector, Fusion::Rrf, alpha, c)
        .into_iter()
        .map(|f| (f.candidate.chunk_id.clone(), f.score))
        .collect()
}

fn rrf_contributions(list: &[ChunkCandidate], weight: f64, c: f64) -> Vec<f64> {
    (0..list.len())
        .map(|i| weight / (c + (i + 1) as f64))
        .collect()
}

/// Format a Unix timestamp as ISO 8601.
pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalized to `1.0`.
pub fn normalize_scores(candidates: &[ChunkCandidate]) -> Vec<(&ChunkCandidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}
