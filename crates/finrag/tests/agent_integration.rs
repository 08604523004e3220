//! End-to-end orchestrator runs with a scripted chat model and local
//! stand-ins for Serper, Wikipedia and Alpha Vantage.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::Query;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;

use finrag::agent::{Orchestrator, ANSWER_QUERY};
use finrag::config::Config;
use finrag::llm::{ChatModel, ChatRequest, LlmResult};
use finrag_core::context::{Message, Role, ToolCall};

const SERPER_KEY_ENV: &str = "FINRAG_IT_SERPER_KEY";
const AV_KEY_ENV: &str = "FINRAG_IT_AV_KEY";

/// Replays canned replies in order and records every request.
struct ScriptedModel {
    replies: Mutex<VecDeque<Message>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    fn new(replies: Vec<Message>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: ChatRequest) -> LlmResult<Message> {
        self.requests.lock().unwrap().push(request);
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Message::ai("script exhausted")))
    }
}

fn call(id: &str, name: &str, args: Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: args,
    }
}

fn answer_flow(first: Message, answer: &str) -> Vec<Message> {
    vec![
        first,
        Message::ai("").with_tool_calls(vec![call("chk", ANSWER_QUERY, json!({}))]),
        Message::ai(format!("<think>drafting</think>\n{answer}")),
    ]
}

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn fake_apis() -> String {
    let app = Router::new()
        .route(
            "/search",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                Json(json!({
                    "searchParameters": body,
                    "key_ok": headers.get("x-api-key").map(|v| v == "serper-secret"),
                    "organic": [
                        { "title": "Nifty 50 closes at record high", "link": "https://news.example/nifty" }
                    ]
                }))
            }),
        )
        .route(
            "/{lang}/api.php",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                let title = q.get("titles").cloned().unwrap_or_default();
                if title == "No Such Index" {
                    Json(json!({ "query": { "pages": { "-1": { "title": title, "missing": "" } } } }))
                } else {
                    Json(json!({ "query": { "pages": { "4021": {
                        "pageid": 4021,
                        "title": title,
                        "extract": "The BSE SENSEX is a free-float market-weighted stock market index.",
                        "fullurl": "https://en.wikipedia.org/wiki/BSE_SENSEX"
                    } } } }))
                }
            }),
        )
        .route(
            "/query",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                Json(json!({
                    "Symbol": q.get("symbol"),
                    "Function": q.get("function"),
                    "KeyOk": q.get("apikey").map(|k| k == "av-secret"),
                    "PERatio": "22.4",
                    "DividendYield": "0.031"
                }))
            }),
        );
    spawn(app).await
}

fn config(tmp: &TempDir, api_base: &str) -> Arc<Config> {
    std::env::set_var(SERPER_KEY_ENV, "serper-secret");
    std::env::set_var(AV_KEY_ENV, "av-secret");

    let mut config = Config::minimal();
    config.db.path = tmp.path().join("finrag.sqlite");
    config.documents.root = tmp.path().join("PDFs");
    config.agent.transcript_path = tmp.path().join("check_agent_log.json");
    config.web.serper_url = format!("{api_base}/search");
    config.web.serper_api_key_env = SERPER_KEY_ENV.to_string();
    config.web.wiki_api_url = format!("{api_base}/{{lang}}/api.php");
    config.web.timeout_secs = 5;
    config.finance.alphavantage_url = format!("{api_base}/query");
    config.finance.api_key_env = AV_KEY_ENV.to_string();
    Arc::new(config)
}

fn tool_messages(messages: &[Message]) -> Vec<&Message> {
    messages.iter().filter(|m| m.role == Role::Tool).collect()
}

#[tokio::test]
async fn web_route_passes_serper_results_to_the_answer() {
    let tmp = TempDir::new().unwrap();
    let base = fake_apis().await;
    let model = ScriptedModel::new(answer_flow(
        Message::ai("Searching WebSearch").with_tool_calls(vec![call(
            "web1",
            "google_search",
            json!({"query": "Nifty 50 latest close"}),
        )]),
        "The Nifty 50 closed at a record high.",
    ));
    let agent = Orchestrator::new(config(&tmp, &base), model.clone());

    let out = agent.ask("What is the latest Nifty close?").await.unwrap();
    assert_eq!(out.answer, "The Nifty 50 closed at a record high.");
    assert_eq!(out.steps, 4);

    let tools = tool_messages(&out.messages);
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].tool_call_id.as_deref(), Some("web1"));
    let result: Value = serde_json::from_str(&tools[0].content).unwrap();
    assert_eq!(result["key_ok"], true);
    assert_eq!(result["searchParameters"]["q"], "Nifty 50 latest close");
    assert_eq!(result["searchParameters"]["num"], 20);
    assert_eq!(result["searchParameters"]["gl"], "in");

    let requests = model.requests.lock().unwrap();
    assert!(requests[2].messages[0]
        .content
        .contains("Nifty 50 closes at record high"));
}

#[tokio::test]
async fn wiki_route_reports_found_and_missing_pages() {
    let tmp = TempDir::new().unwrap();
    let base = fake_apis().await;
    let model = ScriptedModel::new(answer_flow(
        Message::ai("Searching Wikipedia").with_tool_calls(vec![
            call("w1", "wiki_lookup", json!({"title": "BSE SENSEX"})),
            call("w2", "wiki_lookup", json!({"title": "No Such Index", "language": "hi"})),
        ]),
        "Sensex is a market-weighted index.",
    ));
    let agent = Orchestrator::new(config(&tmp, &base), model);

    let out = agent.ask("wiki: what is the Sensex?").await.unwrap();
    let tools = tool_messages(&out.messages);
    assert_eq!(tools.len(), 2);

    let found: Value = serde_json::from_str(&tools[0].content).unwrap();
    assert_eq!(found["exists"], true);
    assert_eq!(found["page_id"], 4021);
    assert!(found["summary"].as_str().unwrap().contains("market-weighted"));

    let missing: Value = serde_json::from_str(&tools[1].content).unwrap();
    assert_eq!(missing["exists"], false);
    assert_eq!(
        missing["error"],
        "PageError: The page titled 'No Such Index' does not exist."
    );
}

#[tokio::test]
async fn finance_route_fetches_company_overview_and_metrics() {
    let tmp = TempDir::new().unwrap();
    let base = fake_apis().await;
    let model = ScriptedModel::new(answer_flow(
        Message::ai("Calling FinancialMetrics").with_tool_calls(vec![
            call("f1", "company_overview", json!({"symbol": "IBM"})),
            call(
                "f2",
                "tracking_error",
                json!({"port": [0.01, 0.02, 0.03], "bench": [0.01, 0.01, 0.01]}),
            ),
        ]),
        "IBM trades at 22.4x earnings.",
    ));
    let agent = Orchestrator::new(config(&tmp, &base), model);

    let out = agent.ask("IBM P/E and my tracking error?").await.unwrap();
    assert_eq!(out.answer, "IBM trades at 22.4x earnings.");

    let tools = tool_messages(&out.messages);
    let overview: Value = serde_json::from_str(&tools[0].content).unwrap();
    assert_eq!(overview["Symbol"], "IBM");
    assert_eq!(overview["Function"], "OVERVIEW");
    assert_eq!(overview["KeyOk"], true);

    let te: f64 = tools[1].content.parse().unwrap();
    assert!((te - 0.01).abs() < 1e-12, "tracking error was {te}");
}

#[tokio::test]
async fn tool_failures_are_reported_to_the_model() {
    let tmp = TempDir::new().unwrap();
    let base = fake_apis().await;
    let model = ScriptedModel::new(answer_flow(
        Message::ai("Calling FinancialMetrics").with_tool_calls(vec![call(
            "f1",
            "sharpe_ratio",
            json!({"returns": []}),
        )]),
        "Not enough data to compute a Sharpe ratio.",
    ));
    let agent = Orchestrator::new(config(&tmp, &base), model.clone());

    let out = agent.ask("Sharpe of nothing?").await.unwrap();
    let tools = tool_messages(&out.messages);
    assert!(tools[0].content.starts_with("Error: "), "{}", tools[0].content);
    assert!(tools[0].content.contains("need at least 2 observations"));

    let requests = model.requests.lock().unwrap();
    assert!(requests[1].messages[0].content.contains("Error: "));
}

#[tokio::test]
async fn hybrid_fallback_ingests_and_searches_local_documents() {
    let tmp = TempDir::new().unwrap();
    let base = fake_apis().await;
    let docs = tmp.path().join("PDFs");
    std::fs::create_dir_all(&docs).unwrap();
    std::fs::write(
        docs.join("midcap.md"),
        "# Midcap Opportunities Fund\n\nThe fund's exit load is 1 percent if redeemed within 365 days.",
    )
    .unwrap();
    std::fs::write(docs.join("liquid.md"), "Liquid fund with no lock-in period.").unwrap();

    let model = ScriptedModel::new(answer_flow(
        Message::ai("<think>local docs</think>Doing HybridSearch"),
        "The exit load is 1 percent within 365 days.",
    ));
    let agent = Orchestrator::new(config(&tmp, &base), model);

    let out = agent.ask("What is the exit load of the midcap fund?").await.unwrap();
    let tools = tool_messages(&out.messages);
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name.as_deref(), Some("hybrid_search"));

    let hits: Value = serde_json::from_str(&tools[0].content).unwrap();
    let hits = hits.as_array().unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0]["source_id"], "midcap.md");
    assert!(hits[0]["text"].as_str().unwrap().contains("exit load"));
}

#[tokio::test]
async fn transcript_records_every_model_turn() {
    let tmp = TempDir::new().unwrap();
    let base = fake_apis().await;
    let model = ScriptedModel::new(answer_flow(
        Message::ai("Moving to CheckAgent"),
        "Nothing further needed.",
    ));
    let cfg = config(&tmp, &base);
    let agent = Orchestrator::new(cfg.clone(), model);

    let out = agent.ask("thanks").await.unwrap();
    assert_eq!(out.steps, 3);

    let log: Value =
        serde_json::from_str(&std::fs::read_to_string(&cfg.agent.transcript_path).unwrap())
            .unwrap();
    let log = log.as_array().unwrap();
    assert_eq!(log.len(), 4);
    assert_eq!(log[0]["input_query"], "thanks");
    assert_eq!(log[1]["query_redirection_agent"]["content"], "Moving to CheckAgent");
    assert_eq!(
        log[2]["check_agent"]["tool_calls"][0]["name"],
        ANSWER_QUERY
    );
    assert!(log[3]["answer_query"]["content"]
        .as_str()
        .unwrap()
        .ends_with("Nothing further needed."));
    assert!(log.iter().all(|e| e["timestamp"]
        .as_str()
        .is_some_and(|t| t.ends_with("+05:30"))));
}
