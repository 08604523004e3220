//! OpenAI-compatible chat-completions client.
//!
//! Works with any `/chat/completions` endpoint that speaks the OpenAI wire
//! format (Groq by default). Conversation [`Message`]s are converted to the
//! wire format on the way out, and the reply (content, reasoning, tool
//! calls) is converted back.
//!
//! The orchestrator only sees the [`ChatModel`] trait, so tests can script
//! responses without a network.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use finrag_core::context::{Message, Role, ToolCall};

use crate::config::LlmConfig;
use crate::http;

#[derive(Debug, Error)]
pub enum LlmError {
    /// Missing API key or unusable settings.
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Network error: {0}")]
    Network(String),
    /// Non-success response from the provider.
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Parse error: {0}")]
    Parse(String),
}

pub type LlmResult<T> = Result<T, LlmError>;

/// One chat-completion call.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    /// OpenAI function definitions (`{"type":"function","function":{...}}`).
    pub tools: Vec<Value>,
    /// Overrides the configured temperature.
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one completion and return the assistant message.
    async fn complete(&self, request: ChatRequest) -> LlmResult<Message>;
}

pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: Option<f32>,
    max_retries: u32,
}

impl OpenAiCompatClient {
    /// Build a client from `[llm]`, reading the key from `api_key_env`.
    pub fn from_config(config: &LlmConfig) -> LlmResult<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| LlmError::Config(format!("{} not set", config.api_key_env)))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Config(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, request: &ChatRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages.iter().map(to_wire).collect::<Vec<_>>(),
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.clone());
            body["tool_choice"] = json!("auto");
        }
        if let Some(t) = request.temperature.or(self.temperature) {
            body["temperature"] = json!(t);
        }
        body
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatClient {
    async fn complete(&self, request: ChatRequest) -> LlmResult<Message> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request);
        let start = Instant::now();
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(http::backoff_delay(attempt)).await;
            }

            let response = match self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!(error = %e, attempt, "chat request failed");
                    last_err = Some(LlmError::Network(e.to_string()));
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                let err = LlmError::Api {
                    status: status.as_u16(),
                    body: text,
                };
                if http::is_retryable(status) {
                    tracing::debug!(%status, attempt, "chat request will be retried");
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }

            let raw: Value = response
                .json()
                .await
                .map_err(|e| LlmError::Parse(e.to_string()))?;
            let message = parse_response(&raw)?;
            tracing::debug!(
                model = %self.model,
                duration_ms = start.elapsed().as_millis() as u64,
                tool_calls = message.tool_calls.len(),
                "chat completion"
            );
            return Ok(message);
        }

        Err(last_err.unwrap_or_else(|| LlmError::Network("no attempts made".into())))
    }
}

/// Convert a conversation message to the OpenAI wire shape.
pub fn to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::System => json!({ "role": "system", "content": msg.content }),
        Role::Human => json!({ "role": "user", "content": msg.content }),
        Role::Ai => {
            let mut m = json!({ "role": "assistant", "content": msg.content });
            if !msg.tool_calls.is_empty() {
                m["tool_calls"] = msg
                    .tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": { "name": c.name, "arguments": c.arguments.to_string() },
                        })
                    })
                    .collect();
            }
            m
        }
        Role::Tool => json!({
            "role": "tool",
            "content": msg.content,
            "tool_call_id": msg.tool_call_id.as_deref().unwrap_or_default(),
        }),
    }
}

/// Parse `choices[0].message` of a chat-completions response.
pub fn parse_response(raw: &Value) -> LlmResult<Message> {
    let message = raw
        .pointer("/choices/0/message")
        .ok_or_else(|| LlmError::Parse("response has no choices[0].message".into()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let mut out = Message::ai(content);

    if let Some(reasoning) = ["reasoning", "reasoning_content"]
        .iter()
        .find_map(|k| message.get(*k).and_then(Value::as_str))
        .filter(|r| !r.trim().is_empty())
    {
        out = out.with_reasoning(reasoning);
    }

    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        let parsed = calls
            .iter()
            .enumerate()
            .map(|(i, call)| parse_tool_call(i, call))
            .collect::<LlmResult<Vec<_>>>()?;
        out = out.with_tool_calls(parsed);
    }

    Ok(out)
}

fn parse_tool_call(index: usize, call: &Value) -> LlmResult<ToolCall> {
    let function = call
        .get("function")
        .ok_or_else(|| LlmError::Parse(format!("tool call {index} has no function")))?;
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| LlmError::Parse(format!("tool call {index} has no name")))?;

    // Arguments arrive as a JSON-encoded string; some providers send an object.
    let arguments = match function.get("arguments") {
        Some(Value::String(s)) if s.trim().is_empty() => json!({}),
        Some(Value::String(s)) => serde_json::from_str(s).map_err(|e| {
            LlmError::Parse(format!("arguments for '{name}' are not valid JSON: {e}"))
        })?,
        Some(other) => other.clone(),
        None => json!({}),
    };

    Ok(ToolCall {
        id: call
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("call_{index}")),
        name: name.to_string(),
        arguments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_reasoning_and_tool_calls() {
        let raw = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "reasoning": "user wants ratios",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "sharpe_ratio",
                            "arguments": "{\"returns\": [0.01, 0.02], \"risk_free_rate\": 0.0}"
                        }
                    }]
                }
            }]
        });
        let msg = parse_response(&raw).unwrap();
        assert_eq!(msg.role, Role::Ai);
        assert_eq!(msg.content, "");
        assert_eq!(msg.reasoning.as_deref(), Some("user wants ratios"));
        let call = msg.first_tool_call().unwrap();
        assert_eq!(call.name, "sharpe_ratio");
        assert_eq!(call.arguments["returns"], json!([0.01, 0.02]));
    }

    #[test]
    fn reasoning_content_alias_and_empty_arguments() {
        let raw = json!({
            "choices": [{ "message": {
                "content": "Moving to CheckAgent",
                "reasoning_content": "enough context",
                "tool_calls": [{ "function": { "name": "answer_query", "arguments": "" } }]
            }}]
        });
        let msg = parse_response(&raw).unwrap();
        assert_eq!(msg.reasoning.as_deref(), Some("enough context"));
        assert_eq!(msg.tool_calls[0].id, "call_0");
        assert_eq!(msg.tool_calls[0].arguments, json!({}));
    }

    #[test]
    fn malformed_responses_are_parse_errors() {
        assert!(matches!(parse_response(&json!({})), Err(LlmError::Parse(_))));
        let bad_args = json!({
            "choices": [{ "message": { "tool_calls": [
                { "function": { "name": "x", "arguments": "{not json" } }
            ]}}]
        });
        assert!(matches!(parse_response(&bad_args), Err(LlmError::Parse(_))));
    }

    #[test]
    fn wire_format_round_trips_tool_calls() {
        let ai = Message::ai("").with_tool_calls(vec![ToolCall {
            id: "c1".into(),
            name: "wiki_lookup".into(),
            arguments: json!({"title": "Nifty 50"}),
        }]);
        let wire = to_wire(&ai);
        assert_eq!(wire["role"], "assistant");
        assert_eq!(wire["tool_calls"][0]["function"]["arguments"], "{\"title\":\"Nifty 50\"}");

        let tool = to_wire(&Message::tool("{}", "c1", "wiki_lookup"));
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "c1");
        assert_eq!(to_wire(&Message::human("hi"))["role"], "user");
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let config = LlmConfig {
            api_key_env: "FINRAG_TEST_UNSET_KEY_VAR".into(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            OpenAiCompatClient::from_config(&config),
            Err(LlmError::Config(_))
        ));
    }
}
