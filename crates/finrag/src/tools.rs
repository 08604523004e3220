//! Tools the agent (and `POST /tools/{name}`) can call.
//!
//! Every tool implements [`Tool`]: a name, a description, a JSON Schema for
//! its parameters, and an async `execute`. [`ToolRegistry`] holds them and
//! renders OpenAI function definitions for binding to the chat model.
//!
//! | Tool | Category |
//! |------|----------|
//! | `search`, `get` | retrieval (HTTP/CLI only) |
//! | `hybrid_search` | [`ToolCategory::Hybrid`] |
//! | `google_search`, `wiki_lookup` | [`ToolCategory::Web`] |
//! | `company_overview`, `sharpe_ratio`, `batting_average`, `capture_ratios`, `tracking_error`, `max_drawdown` | [`ToolCategory::Finance`] |

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use thiserror::Error;

use finrag_core::metrics;

use crate::config::Config;
use crate::get::get_document;
use crate::ingest;
use crate::migrate;
use crate::models::Query;
use crate::search::{search_documents, search_with_store, GroupBy, SearchOptions};
use crate::sqlite_store::SqliteStore;
use crate::web;

pub const HYBRID_TOOLS: &[&str] = &["hybrid_search"];
pub const WEB_TOOLS: &[&str] = &["google_search", "wiki_lookup"];
pub const FINANCE_TOOLS: &[&str] = &[
    "company_overview",
    "sharpe_ratio",
    "batting_average",
    "capture_ratios",
    "tracking_error",
    "max_drawdown",
];

/// Routing group of an agent tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    Hybrid,
    Web,
    Finance,
}

impl ToolCategory {
    pub fn of(name: &str) -> Option<Self> {
        if HYBRID_TOOLS.contains(&name) {
            Some(ToolCategory::Hybrid)
        } else if WEB_TOOLS.contains(&name) {
            Some(ToolCategory::Web)
        } else if FINANCE_TOOLS.contains(&name) {
            Some(ToolCategory::Finance)
        } else {
            None
        }
    }

    pub fn tools(&self) -> &'static [&'static str] {
        match self {
            ToolCategory::Hybrid => HYBRID_TOOLS,
            ToolCategory::Web => WEB_TOOLS,
            ToolCategory::Finance => FINANCE_TOOLS,
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Route segment in `POST /tools/{name}` and the function name shown
    /// to the model.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Marked `"builtin": true` in `GET /tools/list`.
    fn is_builtin(&self) -> bool {
        false
    }

    /// JSON Schema (`type: object`) for the parameters.
    fn parameters_schema(&self) -> Value;

    /// Run with parameters already checked by [`validate_params`].
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// What a tool can reach while executing.
#[derive(Clone)]
pub struct ToolContext {
    config: Arc<Config>,
}

impl ToolContext {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open the index, creating the schema if this is a fresh database.
    pub async fn open_store(&self) -> Result<SqliteStore> {
        let store = SqliteStore::connect(&self.config).await?;
        migrate::migrate_pool(store.pool()).await?;
        Ok(store)
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("no tool registered with name: {0}")]
    NotFound(String),
    #[error("invalid parameters: {0}")]
    InvalidParams(anyhow::Error),
    #[error("{0}")]
    Failed(anyhow::Error),
}

/// A required string parameter was missing or blank.
#[derive(Debug, Error)]
#[error("{0} must not be empty")]
pub struct EmptyParam(pub String);

/// OpenAI function definition for a tool.
pub fn definition(tool: &dyn Tool) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name(),
            "description": tool.description(),
            "parameters": tool.parameters_schema(),
        }
    })
}

/// Listing entry for `GET /tools/list` and `finrag tool list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub builtin: bool,
    pub parameters: Value,
}

impl From<&dyn Tool> for ToolInfo {
    fn from(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            builtin: tool.is_builtin(),
            parameters: tool.parameters_schema(),
        }
    }
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SearchTool));
        registry.register(Arc::new(GetTool));
        registry.register(Arc::new(HybridSearchTool));
        registry.register(Arc::new(GoogleSearchTool));
        registry.register(Arc::new(WikiLookupTool));
        registry.register(Arc::new(CompanyOverviewTool));
        for metric in Metric::ALL {
            registry.register(Arc::new(MetricTool(metric)));
        }
        registry
    }

    /// Add a tool; a tool with the same name is replaced.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// The named tools that are registered, in `names` order.
    pub fn subset(&self, names: &[&str]) -> ToolRegistry {
        ToolRegistry {
            tools: names
                .iter()
                .filter_map(|n| self.tools.iter().find(|t| t.name() == *n).cloned())
                .collect(),
        }
    }

    pub fn definitions(&self) -> Vec<Value> {
        self.tools.iter().map(|t| definition(t.as_ref())).collect()
    }

    pub fn infos(&self) -> Vec<ToolInfo> {
        self.tools.iter().map(|t| ToolInfo::from(t.as_ref())).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Look up, validate, and execute a tool.
    pub async fn call(&self, name: &str, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let tool = self
            .find(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        let params =
            validate_params(&tool.parameters_schema(), &params).map_err(ToolError::InvalidParams)?;
        tool.execute(params, ctx).await.map_err(ToolError::Failed)
    }
}

/// Check `params` against a tool schema and fill in defaults.
///
/// Checks required fields, top-level types, enum membership and the item
/// type of arrays. `null` or a missing object counts as `{}`.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let mut result: Map<String, Value> = match params {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => bail!("parameters must be a JSON object, got {}", json_type_name(other)),
    };

    let empty = Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !result.contains_key(field) {
                bail!("missing required parameter: {field}");
            }
        }
    }

    for (name, prop) in properties {
        let Some(value) = result.get(name) else {
            if let Some(default) = prop.get("default") {
                result.insert(name.clone(), default.clone());
            }
            continue;
        };

        if let Some(expected) = prop.get("type").and_then(Value::as_str) {
            if !type_matches(expected, value) {
                bail!(
                    "parameter '{name}' must be of type '{expected}', got {}",
                    json_type_name(value)
                );
            }
        }

        if let (Some(items), Some(item_type)) = (
            value.as_array(),
            prop.pointer("/items/type").and_then(Value::as_str),
        ) {
            if let Some(bad) = items.iter().find(|v| !type_matches(item_type, v)) {
                bail!(
                    "parameter '{name}' must contain only '{item_type}' items, got {}",
                    json_type_name(bad)
                );
            }
        }

        if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                let allowed: Vec<String> = allowed.iter().map(Value::to_string).collect();
                bail!(
                    "parameter '{name}' must be one of [{}], got {value}",
                    allowed.join(", ")
                );
            }
        }
    }

    Ok(Value::Object(result))
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    match params.get(key).and_then(Value::as_str).map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(EmptyParam(key.to_string()).into()),
    }
}

fn f64_list(params: &Value, key: &str) -> Result<Vec<f64>> {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_f64).collect())
        .ok_or_else(|| anyhow::anyhow!("{key} must be an array of numbers"))
}

// ── Retrieval ──────────────────────────────────────────────────────────

/// Document-level search over the index.
pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the indexed financial documents"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "mode": { "type": "string", "enum": ["keyword", "semantic", "hybrid"], "default": "keyword" },
                "limit": { "type": "integer", "description": "Max results", "default": 10 },
                "filters": {
                    "type": "object",
                    "properties": {
                        "source": { "type": "string" },
                        "since": { "type": "string", "description": "YYYY-MM-DD" }
                    }
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = required_str(&params, "query")?;
        let filter = |k: &str| params.pointer(&format!("/filters/{k}")).and_then(Value::as_str);
        let opts = SearchOptions {
            mode: params["mode"].as_str().unwrap_or("keyword"),
            source: filter("source"),
            since: filter("since"),
            limit: params["limit"].as_i64(),
            ..Default::default()
        };
        let results = search_documents(ctx.config(), query, &opts).await?;
        Ok(json!({ "results": results }))
    }
}

pub struct GetTool;

#[async_trait]
impl Tool for GetTool {
    fn name(&self) -> &str {
        "get"
    }

    fn description(&self) -> &str {
        "Retrieve an indexed document and its chunks by id"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string", "description": "Document UUID" } },
            "required": ["id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let id = required_str(&params, "id")?;
        Ok(serde_json::to_value(get_document(ctx.config(), id).await?)?)
    }
}

/// Chunk-level fused retrieval over the local document collection.
pub struct HybridSearchTool;

#[async_trait]
impl Tool for HybridSearchTool {
    fn name(&self) -> &str {
        "hybrid_search"
    }

    fn description(&self) -> &str {
        "Hybrid retrieval combining BM25 keyword search and vector search over the local \
         financial documents (PDFs, reports, factsheets). Returns the top-matching chunks \
         with their text and source metadata."
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Natural language query" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = required_str(&params, "query")?;
        let config = ctx.config();
        let store = ctx.open_store().await?;

        if config.documents.auto_ingest {
            if let Err(e) = ingest::ensure_indexed(config, &store).await {
                tracing::warn!(error = %e, "auto-ingest failed; searching the existing index");
            }
        }

        let mode = if config.embedding.is_enabled() {
            "hybrid"
        } else {
            "keyword"
        };
        let opts = SearchOptions {
            mode,
            group_by: GroupBy::Chunk,
            ..Default::default()
        };
        let results = search_with_store(config, &store, query, &opts).await;
        store.close().await;

        let mut retrieved = Query::new(query);
        retrieved.context = results?;
        Ok(Value::Array(
            retrieved
                .context
                .into_iter()
                .map(|r| {
                    json!({
                        "text": r.text.unwrap_or(r.snippet),
                        "document_id": r.id,
                        "source_id": r.source_id,
                        "title": r.title,
                        "score": r.score,
                    })
                })
                .collect(),
        ))
    }
}

// ── Web ────────────────────────────────────────────────────────────────

pub struct GoogleSearchTool;

#[async_trait]
impl Tool for GoogleSearchTool {
    fn name(&self) -> &str {
        "google_search"
    }

    fn description(&self) -> &str {
        "Web search via Serper for real-time news, latest prices and current facts."
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search string" },
                "num": { "type": "integer", "description": "Number of results", "default": web::DEFAULT_NUM_RESULTS }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = required_str(&params, "query")?;
        let num = params["num"].as_u64().unwrap_or(web::DEFAULT_NUM_RESULTS);
        web::google_search(&ctx.config().web, query, num).await
    }
}

pub struct WikiLookupTool;

#[async_trait]
impl Tool for WikiLookupTool {
    fn name(&self) -> &str {
        "wiki_lookup"
    }

    fn description(&self) -> &str {
        "Fetch the introduction of a Wikipedia page for historical or background context."
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "Wikipedia page title" },
                "language": { "type": "string", "description": "Language code (en, hi, fr)", "default": "en" }
            },
            "required": ["title"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let title = required_str(&params, "title")?;
        let language = params["language"].as_str().unwrap_or("en");
        Ok(web::wiki_lookup(&ctx.config().web, title, language).await)
    }
}

// ── Finance ────────────────────────────────────────────────────────────

pub struct CompanyOverviewTool;

#[async_trait]
impl Tool for CompanyOverviewTool {
    fn name(&self) -> &str {
        "company_overview"
    }

    fn description(&self) -> &str {
        "Company profile and key financial ratios for a stock ticker (Alpha Vantage): \
         market cap, P/E, PEG, dividends, margins, growth, analyst targets, 52-week range."
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": { "type": "string", "description": "Ticker, e.g. IBM or AAPL" }
            },
            "required": ["symbol"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let symbol = required_str(&params, "symbol")?;
        web::company_overview(&ctx.config().finance, symbol).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    SharpeRatio,
    BattingAverage,
    CaptureRatios,
    TrackingError,
    MaxDrawdown,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::SharpeRatio,
        Metric::BattingAverage,
        Metric::CaptureRatios,
        Metric::TrackingError,
        Metric::MaxDrawdown,
    ];
}

/// One of the portfolio metrics in [`finrag_core::metrics`].
pub struct MetricTool(pub Metric);

fn series(description: &str) -> Value {
    json!({ "type": "array", "items": { "type": "number" }, "description": description })
}

fn paired_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "port": series("Portfolio periodic returns"),
            "bench": series("Benchmark periodic returns, same length")
        },
        "required": ["port", "bench"]
    })
}

#[async_trait]
impl Tool for MetricTool {
    fn name(&self) -> &str {
        match self.0 {
            Metric::SharpeRatio => "sharpe_ratio",
            Metric::BattingAverage => "batting_average",
            Metric::CaptureRatios => "capture_ratios",
            Metric::TrackingError => "tracking_error",
            Metric::MaxDrawdown => "max_drawdown",
        }
    }

    fn description(&self) -> &str {
        match self.0 {
            Metric::SharpeRatio => {
                "Sharpe ratio of a return series: mean(returns - rf) / std(returns - rf)."
            }
            Metric::BattingAverage => {
                "Fraction of periods in which the portfolio beat the benchmark."
            }
            Metric::CaptureRatios => "Up- and down-market capture ratios against a benchmark.",
            Metric::TrackingError => "Standard deviation of active returns (port - bench).",
            Metric::MaxDrawdown => "Maximum peak-to-trough drawdown of a return series.",
        }
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        match self.0 {
            Metric::SharpeRatio => json!({
                "type": "object",
                "properties": {
                    "returns": series("Periodic portfolio returns"),
                    "risk_free_rate": { "type": "number", "description": "Periodic risk-free rate", "default": 0.0 }
                },
                "required": ["returns"]
            }),
            Metric::MaxDrawdown => json!({
                "type": "object",
                "properties": { "returns": series("Periodic portfolio returns") },
                "required": ["returns"]
            }),
            _ => paired_schema(),
        }
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let value = match self.0 {
            Metric::SharpeRatio => {
                let rf = params["risk_free_rate"].as_f64().unwrap_or(0.0);
                json!(metrics::sharpe_ratio(&f64_list(&params, "returns")?, rf)?)
            }
            Metric::MaxDrawdown => json!(metrics::max_drawdown(&f64_list(&params, "returns")?)?),
            paired => {
                let port = f64_list(&params, "port")?;
                let bench = f64_list(&params, "bench")?;
                match paired {
                    Metric::BattingAverage => json!(metrics::batting_average(&port, &bench)?),
                    Metric::CaptureRatios => json!(metrics::capture_ratios(&port, &bench)?),
                    _ => json!(metrics::tracking_error(&port, &bench)?),
                }
            }
        };
        Ok(value)
    }
}
