//! Conversation messages and the text views the agent prompts are built from.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::search::SearchResultItem;

/// Number of trailing messages rendered by default.
pub const DEFAULT_CONTEXT_MESSAGES: usize = 7;

static THINK_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>\n?").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Ai,
    Tool,
}

impl Role {
    pub fn speaker(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::Human => "Human",
            Role::Ai => "Ai",
            Role::Tool => "Tool",
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments (normally an object).
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool messages: the call being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For tool messages: the tool name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            reasoning: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Role::Human, content)
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(Role::Ai, content)
    }

    pub fn tool(
        content: impl Into<String>,
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let mut m = Self::new(Role::Tool, content);
        m.tool_call_id = Some(tool_call_id.into());
        m.name = Some(name.into());
        m
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// First requested tool call, if any.
    pub fn first_tool_call(&self) -> Option<&ToolCall> {
        self.tool_calls.first()
    }
}

/// Render the last `n` messages as plain text for a prompt.
///
/// ```rust
/// use finrag_core::context::{get_context, Message};
///
/// let msgs = vec![Message::human("What is NAV?"), Message::ai("")];
/// assert_eq!(
///     get_context(&msgs, 7),
///     "Human Content: What is NAV?\n\n---\n\nAi Content: <no content>"
/// );
/// ```
pub fn get_context(messages: &[Message], n: usize) -> String {
    let start = messages.len().saturating_sub(n);
    messages[start..]
        .iter()
        .map(render_message)
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

fn render_message(msg: &Message) -> String {
    let speaker = msg.role.speaker();
    let content = if msg.content.is_empty() {
        "<no content>"
    } else {
        msg.content.as_str()
    };
    let mut lines = vec![format!("{speaker} Content: {content}")];

    if let Some(reasoning) = msg.reasoning.as_deref().map(str::trim) {
        if !reasoning.is_empty() {
            lines.push(format!("{speaker} Reasoning: {reasoning}"));
        }
    }

    for call in &msg.tool_calls {
        lines.push(format!("Tool Call: {}({})", call.name, render_args(&call.arguments)));
    }

    lines.join("\n")
}

fn render_args(args: &Value) -> String {
    match args {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Strip `<think>…</think>` reasoning blocks (and one trailing newline each).
pub fn remove_think(text: &str) -> String {
    match THINK_BLOCK.as_ref() {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}

/// Render retrieved chunks as numbered context blocks.
pub fn format_retrieved(results: &[SearchResultItem]) -> String {
    if results.is_empty() {
        return "No relevant context found.".to_string();
    }
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let label = r.title.as_deref().unwrap_or(&r.source_id);
            let body = r.text.as_deref().unwrap_or(&r.snippet);
            format!(
                "[{}] {} ({}:{})\n{}",
                i + 1,
                label,
                r.source,
                r.source_id,
                body.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
