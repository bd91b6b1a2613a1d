//! # SupportAI Core
//!
//! Runtime-agnostic logic for the SupportAI widget backend: data models,
//! Markdown chunking, the domain guard, store traits, ranking strategies,
//! prompt assembly with fallbacks, conversation continuity, and the chat
//! pipeline.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. The
//! `supportai` crate supplies the SQLite store, the model and embedding
//! clients, and the Axum server.

pub mod chunk;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod guard;
pub mod lenient;
pub mod models;
pub mod pipeline;
pub mod search;
pub mod store;
