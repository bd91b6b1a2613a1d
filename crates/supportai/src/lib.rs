//! # SupportAI
//!
//! Backend for an embeddable AI support-chat widget.
//!
//! An operator registers an app, allowlists the domains that may embed it,
//! and uploads Markdown documentation. Host pages load `widget-loader.js`,
//! which mounts an iframe; the iframe talks to the domain-guarded widget API
//! and receives answers grounded in the app's knowledge base over SSE.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │  Markdown   │──▶│ Chunk+Embed  │──▶│  SQLite   │
//! │  (ingest)   │   │              │   │ FTS5+Vec  │
//! └─────────────┘   └──────────────┘   └─────┬─────┘
//!                                            │
//!                     ┌──────────────────────┤
//!                     ▼                      ▼
//!               ┌──────────┐          ┌─────────────┐
//!               │   CLI    │          │ Widget API  │──▶ Gemini
//!               │(supportai│          │ (axum, SSE) │
//!               └──────────┘          └─────────────┘
//! ```
//!
//! Domain types, the guard, ranking and the chat pipeline live in
//! [`supportai_core`]; this crate supplies the SQLite store, HTTP clients,
//! configuration and the server.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the store traits |
//! | [`apps`] | App registry operations |
//! | [`ingest`] | Markdown ingestion |
//! | [`embedding`] | OpenAI and Ollama embedders |
//! | [`llm`] | Gemini client |
//! | [`server`] | Widget HTTP server |
//! | [`commands`] | CLI command handlers |

pub mod apps;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod server;
pub mod sqlite_store;

pub use supportai_core;
