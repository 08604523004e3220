//! # finrag
//!
//! **Retrieval-augmented answers over a local collection of financial
//! documents, backed by web search, company fundamentals and portfolio
//! metrics.**
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌───────────┐
//! │  Documents  │──▶│  Pipeline   │──▶│  SQLite   │
//! │ PDF/DOCX/MD │   │ Chunk+Embed │   │ FTS5+Vec  │
//! └─────────────┘   └─────────────┘   └─────┬─────┘
//!                                           │ hybrid_search
//!      ┌──────────┐   ┌────────────┐   ┌────┴─────┐
//!      │ Web APIs │──▶│   Tools    │◀──│  Agent   │◀── CLI / HTTP
//!      │ Serper…  │   │ + metrics  │──▶│ (LLM)    │
//!      └──────────┘   └────────────┘   └──────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. [`loader`] walks the documents root and [`extract`] pulls text out of
//!    PDF and OOXML files.
//! 2. [`ingest`] turns each file into a [`models::Document`], chunks it, and
//!    writes documents, chunks and FTS rows through [`sqlite_store`].
//! 3. Chunks are embedded inline or later by [`embed_cmd`] using the
//!    configured [`embedding`] provider.
//! 4. [`search`] runs keyword, semantic or hybrid retrieval with RRF or
//!    weighted fusion and optional MMR.
//! 5. The [`agent`] routes each question through [`tools`] (hybrid search,
//!    [`web`] lookups, portfolio metrics), checks the retrieved context,
//!    expands the query when needed, and answers via [`llm`].
//!
//! ## Quick Start
//!
//! ```bash
//! finrag init
//! finrag ingest
//! finrag search "expense ratio" --mode hybrid
//! finrag ask "What is the expense ratio of the Bluechip fund?"
//! finrag serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | `SourceItem` plus the core document types |
//! | [`loader`] | Documents-root scanning and file loading |
//! | [`extract`] | Text extraction for PDF, DOCX, PPTX and XLSX |
//! | [`ingest`] | Ingestion pipeline with checkpoints |
//! | [`progress`] | Progress reporting on stderr |
//! | [`embedding`] | Embedding providers (fastembed, OpenAI, Ollama, disabled) |
//! | [`embed_cmd`] | `embed pending` and `embed rebuild` |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` |
//! | [`search`] | Search entry points over the store |
//! | [`get`] | Document retrieval by UUID |
//! | [`stats`] | Index statistics |
//! | [`export`] | JSON export of documents and chunks |
//! | [`llm`] | OpenAI-compatible chat client |
//! | [`web`] | Serper, Wikipedia and Alpha Vantage lookups |
//! | [`tools`] | `Tool` trait, registry and built-in tools |
//! | [`agent`] | Question-answering orchestrator |
//! | [`transcript`] | JSON log of agent exchanges |
//! | [`server`] | HTTP API (Axum) with CORS |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Idempotent schema migrations |
//! | [`http`] | Shared HTTP client and retry helpers |
//! | [`logging`] | `tracing` subscriber setup |

pub mod agent;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod export;
pub mod extract;
pub mod get;
pub mod http;
pub mod ingest;
pub mod llm;
pub mod loader;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod tools;
pub mod transcript;
pub mod web;

pub use finrag_core::store;
pub use models::SourceItem;
pub use tools::{Tool, ToolContext, ToolRegistry};
