//! Application-level search: config → embedding → [`finrag_core::search`].
//!
//! Shared by `finrag search`, the `search` and `hybrid_search` tools, and
//! `POST /tools/search`.

use anyhow::{bail, Result};

pub use finrag_core::search::{GroupBy, ScoreExplanation, SearchResultItem};
use finrag_core::search::{search, SearchRequest};

use crate::config::Config;
use crate::embedding;
use crate::sqlite_store::SqliteStore;

/// Per-call options layered over `[retrieval]`.
#[derive(Debug, Clone)]
pub struct SearchOptions<'a> {
    /// `"keyword"`, `"semantic"`, or `"hybrid"`.
    pub mode: &'a str,
    pub source: Option<&'a str>,
    pub since: Option<&'a str>,
    /// Overrides `retrieval.final_limit`.
    pub limit: Option<i64>,
    pub explain: bool,
    pub group_by: GroupBy,
}

impl Default for SearchOptions<'_> {
    fn default() -> Self {
        Self {
            mode: "keyword",
            source: None,
            since: None,
            limit: None,
            explain: false,
            group_by: GroupBy::Document,
        }
    }
}

/// Raised when a vector mode is requested without an embedding provider.
#[derive(Debug, thiserror::Error)]
#[error("Mode '{0}' requires embeddings. Set [embedding] provider in config.")]
pub struct EmbeddingsDisabled(pub String);

/// Search an open store.
pub async fn search_with_store(
    config: &Config,
    store: &SqliteStore,
    query: &str,
    opts: &SearchOptions<'_>,
) -> Result<Vec<SearchResultItem>> {
    match opts.mode {
        "keyword" | "semantic" | "hybrid" => {}
        other => bail!("Unknown search mode: {other}. Use keyword, semantic, or hybrid."),
    }
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    if opts.mode != "keyword" && !config.embedding.is_enabled() {
        return Err(EmbeddingsDisabled(opts.mode.to_string()).into());
    }

    let query_vec = if opts.mode == "keyword" {
        None
    } else {
        let provider = embedding::create_provider(&config.embedding)?;
        Some(embedding::embed_query(provider.as_ref(), &config.embedding, query).await?)
    };

    let mut params = config.retrieval.search_params(opts.group_by)?;
    if let Some(limit) = opts.limit {
        params.final_limit = limit;
    }

    let request = SearchRequest {
        query,
        query_vec: query_vec.as_deref(),
        mode: opts.mode,
        source_filter: opts.source,
        since: opts.since,
        params,
        explain: opts.explain,
    };
    search(store, &request).await
}

/// Connect, search, close.
pub async fn search_documents(
    config: &Config,
    query: &str,
    opts: &SearchOptions<'_>,
) -> Result<Vec<SearchResultItem>> {
    let store = SqliteStore::connect(config).await?;
    let results = search_with_store(config, &store, query, opts).await;
    store.close().await;
    results
}

/// `finrag search`: print ranked results to stdout.
pub async fn run_search(config: &Config, query: &str, opts: &SearchOptions<'_>) -> Result<()> {
    let results = search_documents(config, query, opts).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    if let Some(ex) = results.first().and_then(|r| r.explain.as_ref()) {
        println!(
            "Search: mode={}, fusion={}, alpha={:.2}, candidates: {} keyword + {} vector",
            opts.mode, ex.fusion, ex.alpha, ex.keyword_candidates, ex.vector_candidates
        );
        println!();
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} / {}",
            i + 1,
            result.score,
            result.source,
            result.title.as_deref().unwrap_or(&result.source_id)
        );
        if let Some(ex) = &result.explain {
            println!(
                "    scoring: keyword={:.4}  semantic={:.4}  -> {}={:.4}",
                ex.keyword_score, ex.semantic_score, ex.fusion, result.score
            );
        }
        println!("    updated: {}", result.updated_at);
        if let Some(url) = &result.source_url {
            println!("    url: {url}");
        }
        println!("    excerpt: \"{}\"", result.snippet.replace('\n', " ").trim());
        println!("    id: {}", result.id);
        println!();
    }

    Ok(())
}
