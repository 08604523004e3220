//! # finrag core
//!
//! Storage-agnostic logic for finrag: data models, chunking, the store
//! abstraction, hybrid retrieval, conversation context rendering, and
//! portfolio metrics.
//!
//! This crate has no tokio, sqlx, filesystem I/O, or HTTP dependencies.
//! The `finrag` crate supplies the SQLite store, embedding providers, LLM
//! client, and agent.

pub mod bm25;
pub mod chunk;
pub mod context;
pub mod embedding;
pub mod metrics;
pub mod models;
pub mod search;
pub mod store;
