//! HTTP API over the tool registry and the agent.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/tools/list` | List all registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call a tool by name, body is its parameters |
//! | `POST` | `/ask` | Run the agent on `{"question": "..."}` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `embeddings_disabled` (400),
//! `timeout` (408), `tool_error` (500), `internal` (500), `llm_error` (502).
//!
//! All origins, methods, and headers are permitted.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};

use crate::agent::{AgentError, Orchestrator};
use crate::config::Config;
use crate::get::NotFound;
use crate::llm::{ChatModel, OpenAiCompatClient};
use crate::search::EmbeddingsDisabled;
use crate::tools::{EmptyParam, ToolContext, ToolError, ToolInfo, ToolRegistry};

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    tools: Arc<ToolRegistry>,
    /// `None` when no chat model is configured; `/ask` then fails with `llm_error`.
    agent: Option<Arc<Orchestrator>>,
}

/// Bind to `[server].bind` and serve until the process is stopped.
///
/// The chat model is built from `[llm]`. If that fails (usually a missing
/// API key) the server still starts and only `/ask` is unavailable.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let config = Arc::new(config.clone());

    let model: Option<Arc<dyn ChatModel>> = match OpenAiCompatClient::from_config(&config.llm) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!(error = %e, "chat model unavailable; /ask is disabled");
            None
        }
    };

    let app = router(config, model);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    println!("finrag server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the application router.
pub fn router(config: Arc<Config>, model: Option<Arc<dyn ChatModel>>) -> Router {
    let tools = ToolRegistry::with_builtins();
    let agent = model.map(|m| {
        Arc::new(Orchestrator::with_registry(
            config.clone(),
            m,
            tools.clone(),
        ))
    });
    let state = AppState {
        config,
        tools: Arc::new(tools),
        agent,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/ask", post(handle_ask))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn timeout_error(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::REQUEST_TIMEOUT, "timeout", message)
}

fn llm_error(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_GATEWAY, "llm_error", message)
}

fn is_timeout(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .is_some_and(reqwest::Error::is_timeout)
    })
}

/// Map a tool failure to a status, using the typed errors the tools raise.
fn classify_tool_error(tool_name: &str, err: ToolError) -> AppError {
    match err {
        ToolError::NotFound(name) => AppError::new(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no tool registered with name: {name}"),
        ),
        ToolError::InvalidParams(e) => bad_request(format!("{tool_name}: {e}")),
        ToolError::Failed(e) => {
            let message = format!("{tool_name}: {e:#}");
            if e.downcast_ref::<EmbeddingsDisabled>().is_some() {
                AppError::new(StatusCode::BAD_REQUEST, "embeddings_disabled", message)
            } else if e.downcast_ref::<NotFound>().is_some() {
                AppError::new(StatusCode::NOT_FOUND, "not_found", message)
            } else if e.downcast_ref::<EmptyParam>().is_some() {
                bad_request(message)
            } else if is_timeout(&e) {
                timeout_error(message)
            } else {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "tool_error", message)
            }
        }
    }
}

async fn with_deadline<T>(
    config: &Config,
    fut: impl Future<Output = Result<T, AppError>>,
) -> Result<T, AppError> {
    let secs = config.server.request_timeout_secs;
    tokio::time::timeout(Duration::from_secs(secs), fut)
        .await
        .unwrap_or_else(|_| Err(timeout_error(format!("request exceeded {secs}s"))))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.tools.infos(),
    })
}

// ============ POST /tools/{name} ============

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let ctx = ToolContext::new(state.config.clone());
    let result = with_deadline(&state.config, async {
        state
            .tools
            .call(&name, params, &ctx)
            .await
            .map_err(|e| classify_tool_error(&name, e))
    })
    .await?;
    Ok(Json(serde_json::json!({ "result": result })))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    steps: usize,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let agent = state
        .agent
        .clone()
        .ok_or_else(|| llm_error("no chat model configured; set the [llm] API key"))?;

    let outcome = with_deadline(&state.config, async {
        agent.ask(&req.question).await.map_err(|e| match e {
            AgentError::Llm(e) => llm_error(e.to_string()),
            AgentError::EmptyQuestion => bad_request(e.to_string()),
            other => AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", other.to_string()),
        })
    })
    .await?;

    Ok(Json(AskResponse {
        answer: outcome.answer,
        steps: outcome.steps,
    }))
}
