//! Multi-step question answering over the tool set.
//!
//! The orchestrator is a small state machine. Each node asks the chat model
//! for one decision or runs the tools the model asked for:
//!
//! ```text
//!            ┌──────────────────────────────────────────┐
//!            ▼                                          │
//!   ┌──────────────┐  finance  ┌──────────────┐         │
//!   │   Redirect   │──────────▶│ FinanceTools │──┐      │
//!   │              │  web      ├──────────────┤  │      │
//!   │              │──────────▶│   WebTools   │──┤      │
//!   │              │  hybrid   ├──────────────┤  │      │
//!   │              │──────────▶│ HybridTools  │──┤      │
//!   └──────┬───────┘           └──────────────┘  ▼      │
//!          │ "CheckAgent"               ┌──────────┐    │
//!          └───────────────────────────▶│  Check   │    │
//!                                       └──┬────┬──┘    │
//!                                 answer   │    │ expand│
//!                               ┌──────────┘    └──▶ Expand
//!                               ▼
//!                           Answer ─▶ END
//! ```
//!
//! Every model response is appended to the transcript log.

use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;

use finrag_core::context::{get_context, remove_think, Message, Role, ToolCall};

use crate::config::Config;
use crate::llm::{ChatModel, ChatRequest, LlmError};
use crate::tools::{ToolCategory, ToolContext, ToolRegistry, FINANCE_TOOLS, HYBRID_TOOLS, WEB_TOOLS};
use crate::transcript;

const REDIRECT_PROMPT: &str = "\
You are a Retrieval-Augmented Generation orchestrator. Analyze the user's latest message, \
the conversation history, and any prior tool outputs to choose exactly one next action:

1. Calling FinancialMetrics: when the user supplies numeric series or asks for ratios, \
company fundamentals or portfolio analyses.
2. Searching Wikipedia: when the user mentions \"wiki\" or wants historical or contextual background.
3. Searching Web: when the user asks for \"latest\", \"current\", \"news\" or other real-time facts.
4. Doing Hybrid Search: as the fallback for questions about the local documents.
5. Return 'Moving to CheckAgent': when the existing conversation already holds the context needed.

Respond with exactly one of: Calling FinancialMetrics / Searching Wikipedia / \
Searching WebSearch / Doing HybridSearch / Moving to CheckAgent, and call the matching tool.

Here is the conversational History : {ctx}";

const CHECK_PROMPT: &str = "\
You are an intelligent orchestration assistant. Analyze the user's latest query, retrieved \
tool outputs, and conversation history to decide the next step:

1. Call \"expand_query\" if the query is ambiguous, factually incorrect, or missing key \
details (company names, dates), or the retrieved content does not address it.
2. Call \"answer_query\" if the retrieved content fully addresses the need.

Take help from this conversational history [{ctx}]";

const EXPAND_SYSTEM_PROMPT: &str = "\
You are a Financial Retrieval-Augmented Generation assistant. Your task is to produce exactly \
one search query that can retrieve context required for answering user query with precision. \
Use the full conversation context, including any silent reasoning and tool outputs, to fix \
conceptual errors and ensure maximal relevance.";

const EXPAND_HUMAN_PROMPT: &str = "\
RECENT CONVERSATION:
{ctx}

Identify gaps in the context for answering the user query, and create one optimized search \
query. Include or correct any relevant tickers, ISINs, and financial terminology with \
specificity only if their absence has resulted in incorrect retrieval or any tool failure. \
Return only the query string in question format, without explanations.";

const ANSWER_PROMPT: &str = "\
You are a knowledgeable assistant integrating tool outputs and conversation history. \
When crafting your answer:
- Be concise yet thorough; structure with headings or bullet points when helpful.
- Cite any tool or external data you used, and link to sources if available.
- If data is missing or incomplete, acknowledge it explicitly.
- Maintain accuracy and clarity; do not hallucinate.

Here is context required to answer the query [{ctx}]";

pub const EXPAND_QUERY: &str = "expand_query";
pub const ANSWER_QUERY: &str = "answer_query";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent exceeded the step limit of {0}")]
    StepLimit(usize),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("cannot expand a query without any conversation")]
    EmptyConversation,
    #[error("question must not be empty")]
    EmptyQuestion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Redirect,
    HybridTools,
    WebTools,
    FinanceTools,
    Check,
    Expand,
    Answer,
}

impl Node {
    fn tool_names(&self) -> &'static [&'static str] {
        match self {
            Node::HybridTools => HYBRID_TOOLS,
            Node::WebTools => WEB_TOOLS,
            Node::FinanceTools => FINANCE_TOOLS,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub answer: String,
    pub messages: Vec<Message>,
    /// Nodes visited, END excluded.
    pub steps: usize,
}

/// Where the redirect node sends the conversation after `msg`.
pub fn route_redirect(msg: &Message) -> Node {
    if let Some(call) = msg.first_tool_call() {
        match ToolCategory::of(&call.name) {
            Some(ToolCategory::Finance) => return Node::FinanceTools,
            Some(ToolCategory::Web) => return Node::WebTools,
            Some(ToolCategory::Hybrid) => return Node::HybridTools,
            None => {}
        }
    }
    if remove_think(&msg.content).contains("CheckAgent") {
        Node::Check
    } else {
        Node::HybridTools
    }
}

/// Where the check node sends the conversation after `msg`.
pub fn route_check(msg: &Message) -> Node {
    match msg.first_tool_call() {
        Some(call) if call.name == EXPAND_QUERY => Node::Expand,
        _ => Node::Answer,
    }
}

/// Tool definitions bound to the check node.
pub fn check_tool_definitions() -> Vec<Value> {
    let query = json!({
        "type": "object",
        "properties": {
            "query": { "type": "string", "description": "The user's query" }
        }
    });
    vec![
        json!({
            "type": "function",
            "function": {
                "name": EXPAND_QUERY,
                "description": "Rewrite the user's query into one precise search query when the \
                                retrieved context is insufficient or the query is ambiguous.",
                "parameters": query,
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": ANSWER_QUERY,
                "description": "Answer the user's query from the retrieved context.",
                "parameters": query,
            }
        }),
    ]
}

fn latest_question(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Human)
        .map(|m| m.content.as_str())
}

fn tool_output(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct Orchestrator {
    model: Arc<dyn ChatModel>,
    registry: ToolRegistry,
    ctx: ToolContext,
    config: Arc<Config>,
}

impl Orchestrator {
    pub fn new(config: Arc<Config>, model: Arc<dyn ChatModel>) -> Self {
        Self::with_registry(config, model, ToolRegistry::with_builtins())
    }

    pub fn with_registry(config: Arc<Config>, model: Arc<dyn ChatModel>, registry: ToolRegistry) -> Self {
        Self {
            model,
            registry,
            ctx: ToolContext::new(config.clone()),
            config,
        }
    }

    /// Answer one question from a fresh conversation.
    pub async fn ask(&self, question: &str) -> Result<AgentOutcome, AgentError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AgentError::EmptyQuestion);
        }
        self.log(json!({ "input_query": question })).await;
        self.run(vec![Message::human(question)]).await
    }

    /// Drive the state machine from `Redirect` until an answer is produced.
    pub async fn run(&self, mut messages: Vec<Message>) -> Result<AgentOutcome, AgentError> {
        let limit = self.config.agent.recursion_limit;
        let mut node = Node::Redirect;
        let mut steps = 0;

        loop {
            steps += 1;
            if steps > limit {
                return Err(AgentError::StepLimit(limit));
            }
            tracing::debug!(?node, step = steps, "agent step");

            node = match node {
                Node::Redirect => {
                    let msg = self.redirect(&messages).await?;
                    let next = route_redirect(&msg);
                    messages.push(msg);
                    next
                }
                Node::HybridTools | Node::WebTools | Node::FinanceTools => {
                    self.run_tools(node, &mut messages).await;
                    Node::Check
                }
                Node::Check => {
                    let msg = self.check(&messages).await?;
                    let next = route_check(&msg);
                    messages.push(msg);
                    next
                }
                Node::Expand => {
                    self.expand(&mut messages).await?;
                    Node::Redirect
                }
                Node::Answer => {
                    let msg = self.answer(&messages).await?;
                    let answer = remove_think(&msg.content).trim().to_string();
                    messages.push(msg);
                    return Ok(AgentOutcome {
                        answer,
                        messages,
                        steps,
                    });
                }
            };
        }
    }

    fn context(&self, messages: &[Message]) -> String {
        get_context(messages, self.config.agent.context_messages)
    }

    /// System prompt plus the latest question as the user turn.
    fn prompt(&self, template: &str, messages: &[Message]) -> Vec<Message> {
        let mut out = vec![Message::system(template.replace("{ctx}", &self.context(messages)))];
        if let Some(q) = latest_question(messages) {
            out.push(Message::human(q));
        }
        out
    }

    async fn redirect(&self, messages: &[Message]) -> Result<Message, AgentError> {
        let tools = self
            .registry
            .subset(&[HYBRID_TOOLS, WEB_TOOLS, FINANCE_TOOLS].concat())
            .definitions();
        let request = ChatRequest::new(self.prompt(REDIRECT_PROMPT, messages)).with_tools(tools);
        let msg = self.model.complete(request).await?;
        self.log_message("query_redirection_agent", &msg).await;
        Ok(msg)
    }

    async fn check(&self, messages: &[Message]) -> Result<Message, AgentError> {
        let request =
            ChatRequest::new(self.prompt(CHECK_PROMPT, messages)).with_tools(check_tool_definitions());
        let msg = self.model.complete(request).await?;
        self.log_message("check_agent", &msg).await;
        Ok(msg)
    }

    async fn expand(&self, messages: &mut Vec<Message>) -> Result<(), AgentError> {
        if messages.is_empty() {
            return Err(AgentError::EmptyConversation);
        }
        let request = ChatRequest::new(vec![
            Message::system(EXPAND_SYSTEM_PROMPT),
            Message::human(EXPAND_HUMAN_PROMPT.replace("{ctx}", &self.context(messages))),
        ])
        .with_temperature(self.config.agent.expand_temperature);
        let msg = self.model.complete(request).await?;
        self.log_message("expand_query", &msg).await;

        let expanded = remove_think(&msg.content).trim().to_string();
        let call_id = messages
            .last()
            .and_then(Message::first_tool_call)
            .filter(|c| c.name == EXPAND_QUERY)
            .map(|c| c.id.clone());
        if let Some(id) = call_id {
            messages.push(Message::tool(expanded.clone(), id, EXPAND_QUERY));
        }
        messages.push(Message::human(expanded));
        Ok(())
    }

    async fn answer(&self, messages: &[Message]) -> Result<Message, AgentError> {
        let request = ChatRequest::new(self.prompt(ANSWER_PROMPT, messages));
        let msg = self.model.complete(request).await?;
        self.log_message("answer_query", &msg).await;
        Ok(msg)
    }

    /// Execute the tool calls of the last AI message that belong to `node`.
    async fn run_tools(&self, node: Node, messages: &mut Vec<Message>) {
        let allowed = node.tool_names();
        let mut calls: Vec<ToolCall> = messages
            .last()
            .filter(|m| m.role == Role::Ai)
            .map(|m| m.tool_calls.clone())
            .unwrap_or_default();

        if node == Node::HybridTools && !calls.iter().any(|c| c.name == "hybrid_search") {
            let query = latest_question(messages).unwrap_or_default().to_string();
            calls = vec![ToolCall {
                id: "hybrid_fallback".to_string(),
                name: "hybrid_search".to_string(),
                arguments: json!({ "query": query }),
            }];
        }

        for call in calls {
            let content = if !allowed.contains(&call.name.as_str()) {
                format!("Error: tool '{}' is not available in this step", call.name)
            } else {
                match self
                    .registry
                    .call(&call.name, call.arguments.clone(), &self.ctx)
                    .await
                {
                    Ok(value) => tool_output(&value),
                    Err(e) => {
                        tracing::warn!(tool = %call.name, error = %e, "tool call failed");
                        format!("Error: {e}")
                    }
                }
            };
            messages.push(Message::tool(content, call.id, call.name));
        }
    }

    async fn log_message(&self, key: &str, msg: &Message) {
        let value = serde_json::to_value(msg).unwrap_or(Value::Null);
        self.log(json!({ key: value })).await;
    }

    async fn log(&self, item: Value) {
        let path = self.config.agent.transcript_path.clone();
        let offset = self.config.agent.utc_offset_minutes;
        let written = tokio::task::spawn_blocking(move || {
            transcript::append_to_response(vec![item], &path, offset)
        })
        .await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to append to transcript"),
            Err(e) => tracing::warn!(error = %e, "transcript task failed"),
        }
    }
}
