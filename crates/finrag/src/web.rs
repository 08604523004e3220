//! Outbound lookups used by the web and finance tools: Serper web search,
//! Wikipedia summaries, and Alpha Vantage company overviews.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};

use crate::config::{FinanceConfig, WebConfig};
use crate::http;

pub const DEFAULT_NUM_RESULTS: u64 = 20;

fn api_key(env_var: &str) -> Result<String> {
    std::env::var(env_var)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| anyhow!("Set {env_var} in your environment before calling this tool."))
}

/// Google search through Serper.
///
/// Returns the parsed JSON body, or the raw body as a string when the
/// response is not JSON. Non-success statuses are returned the same way so
/// the model can see what went wrong.
pub async fn google_search(config: &WebConfig, query: &str, num: u64) -> Result<Value> {
    let key = api_key(&config.serper_api_key_env)?;
    let client = http::client(config.timeout_secs)?;

    let response = client
        .post(&config.serper_url)
        .header("X-API-KEY", key)
        .json(&json!({
            "q": query,
            "gl": config.gl,
            "num": num,
            "tbs": config.tbs,
        }))
        .send()
        .await
        .with_context(|| format!("Serper request failed: {}", config.serper_url))?;

    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        tracing::warn!(%status, "Serper returned an error");
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

/// MediaWiki API URL for a language code.
pub fn wiki_api_url(config: &WebConfig, language: &str) -> String {
    config.wiki_api_url.replace("{lang}", language)
}

/// Intro summary of a Wikipedia page.
///
/// Never fails: a missing page or a transport error is reported in the
/// returned object as `{"exists": false, "error": ...}`.
pub async fn wiki_lookup(config: &WebConfig, title: &str, language: &str) -> Value {
    match fetch_wiki(config, title, language).await {
        Ok(Some(page)) => json!({
            "exists": true,
            "page_id": page.get("pageid"),
            "title": page.get("title"),
            "summary": page.get("extract"),
            "content_url": page.get("fullurl"),
        }),
        Ok(None) => json!({
            "exists": false,
            "error": format!("PageError: The page titled '{title}' does not exist."),
        }),
        Err(e) => json!({
            "exists": false,
            "error": format!("RequestError: {e}"),
        }),
    }
}

async fn fetch_wiki(config: &WebConfig, title: &str, language: &str) -> reqwest::Result<Option<Value>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    let data: Value = client
        .get(wiki_api_url(config, language))
        .query(&[
            ("action", "query"),
            ("format", "json"),
            ("prop", "extracts|info"),
            ("exintro", "1"),
            ("explaintext", "1"),
            ("inprop", "url"),
            ("titles", title),
        ])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let page = data
        .pointer("/query/pages")
        .and_then(Value::as_object)
        .and_then(|pages| pages.values().next())
        .cloned();
    Ok(page.filter(|p| p.get("missing").is_none() && p.get("invalid").is_none()))
}

/// Company overview and key ratios from Alpha Vantage.
pub async fn company_overview(config: &FinanceConfig, symbol: &str) -> Result<Value> {
    let key = api_key(&config.api_key_env)?;
    let client = http::client(config.timeout_secs)?;

    let data: Value = client
        .get(&config.alphavantage_url)
        .query(&[("function", "OVERVIEW"), ("symbol", symbol), ("apikey", &key)])
        .send()
        .await
        .context("Alpha Vantage request failed")?
        .error_for_status()?
        .json()
        .await
        .context("Alpha Vantage returned invalid JSON")?;
    Ok(data)
}
