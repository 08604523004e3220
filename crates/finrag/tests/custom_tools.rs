//! Tools implemented outside the crate plug into the registry and the
//! orchestrator like the built-ins do.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use finrag::agent::{Orchestrator, ANSWER_QUERY};
use finrag::config::Config;
use finrag::llm::{ChatModel, ChatRequest, LlmResult};
use finrag::tools::ToolError;
use finrag::{Tool, ToolContext, ToolRegistry};
use finrag_core::context::{Message, Role, ToolCall};

/// Offline stand-in for the Alpha Vantage overview.
struct StaticOverview;

#[async_trait]
impl Tool for StaticOverview {
    fn name(&self) -> &str {
        "company_overview"
    }

    fn description(&self) -> &str {
        "Company fundamentals from a fixed table"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": { "type": "string" },
                "fields": { "type": "array", "items": { "type": "string" }, "default": ["PERatio"] }
            },
            "required": ["symbol"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let symbol = params["symbol"].as_str().unwrap_or_default();
        if symbol != "TCS" {
            anyhow::bail!("unknown symbol: {symbol}");
        }
        Ok(json!({ "Symbol": "TCS", "PERatio": "29.8", "fields": params["fields"] }))
    }
}

fn config(tmp: &TempDir) -> Arc<Config> {
    let mut config = Config::minimal();
    config.db.path = tmp.path().join("finrag.sqlite");
    config.documents.root = tmp.path().join("PDFs");
    config.agent.transcript_path = tmp.path().join("log.json");
    Arc::new(config)
}

fn ctx(tmp: &TempDir) -> ToolContext {
    ToolContext::new(config(tmp))
}

#[tokio::test]
async fn registered_tool_replaces_builtin_of_same_name() {
    let tmp = TempDir::new().unwrap();
    let mut registry = ToolRegistry::with_builtins();
    let before = registry.len();
    registry.register(Arc::new(StaticOverview));
    assert_eq!(registry.len(), before);

    let info = registry
        .infos()
        .into_iter()
        .find(|i| i.name == "company_overview")
        .unwrap();
    assert!(!info.builtin);
    assert_eq!(info.description, "Company fundamentals from a fixed table");

    let out = registry
        .call("company_overview", json!({ "symbol": "TCS" }), &ctx(&tmp))
        .await
        .unwrap();
    assert_eq!(out["PERatio"], "29.8");
    assert_eq!(out["fields"], json!(["PERatio"]));
}

#[tokio::test]
async fn custom_tool_errors_are_classified() {
    let tmp = TempDir::new().unwrap();
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(StaticOverview));
    let ctx = ctx(&tmp);

    let err = registry
        .call("company_overview", json!({ "symbol": 42 }), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::InvalidParams(_)), "{err}");

    let err = registry
        .call("company_overview", json!({ "symbol": "XYZ" }), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::Failed(_)));
    assert!(err.to_string().contains("unknown symbol: XYZ"));

    let err = registry.call("sharpe_ratio", json!({}), &ctx).await.unwrap_err();
    assert!(matches!(err, ToolError::NotFound(_)));
}

struct FinanceScript {
    turn: Mutex<usize>,
    bound_tools: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl ChatModel for FinanceScript {
    async fn complete(&self, request: ChatRequest) -> LlmResult<Message> {
        let names = request
            .tools
            .iter()
            .filter_map(|t| t.pointer("/function/name").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        self.bound_tools.lock().unwrap().push(names);

        let mut turn = self.turn.lock().unwrap();
        *turn += 1;
        let call = |name: &str, args: Value| ToolCall {
            id: format!("t{turn}"),
            name: name.to_string(),
            arguments: args,
        };
        Ok(match *turn {
            1 => Message::ai("").with_tool_calls(vec![call(
                "company_overview",
                json!({ "symbol": "TCS" }),
            )]),
            2 => Message::ai("").with_tool_calls(vec![call(ANSWER_QUERY, json!({}))]),
            _ => Message::ai("TCS trades at 29.8 times earnings."),
        })
    }
}

#[tokio::test]
async fn orchestrator_uses_the_supplied_registry() {
    let tmp = TempDir::new().unwrap();
    let mut registry = ToolRegistry::with_builtins();
    registry.register(Arc::new(StaticOverview));

    let model = Arc::new(FinanceScript {
        turn: Mutex::new(0),
        bound_tools: Mutex::new(Vec::new()),
    });
    let agent = Orchestrator::with_registry(config(&tmp), model.clone(), registry);

    let out = agent.ask("What is the P/E of TCS?").await.unwrap();
    assert_eq!(out.answer, "TCS trades at 29.8 times earnings.");

    let tool_msg = out.messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_msg.content.contains("29.8"), "{}", tool_msg.content);

    let bound = model.bound_tools.lock().unwrap();
    assert!(bound[0].contains(&"company_overview".to_string()));
    assert_eq!(bound[1], vec!["expand_query", ANSWER_QUERY]);
}
