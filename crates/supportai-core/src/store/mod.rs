//! Storage abstraction for SupportAI.
//!
//! Three traits split storage by concern: [`AppStore`] (tenant registry),
//! [`KnowledgeStore`] (Markdown chunks), and [`ConversationStore`] (message
//! logs). A single backend usually implements all three; [`Stores`] bundles
//! them as trait objects so handlers receive their dependencies explicitly.
//!
//! Every query is scoped by app key. Cross-tenant isolation comes from that
//! scoping, not from locks.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{App, AppPatch, Conversation, KbChunk, Message, NewChunk, ScoredChunk};

/// Tenant registry.
#[async_trait]
pub trait AppStore: Send + Sync {
    /// Insert a new app. Fails if the app key already exists.
    async fn create_app(&self, app: &App) -> Result<()>;

    /// Look up an app by its public key.
    async fn find_app(&self, app_key: &str) -> Result<Option<App>>;

    /// All apps owned by `owner_id`, newest first.
    async fn list_apps(&self, owner_id: &str) -> Result<Vec<App>>;

    /// Apply an owner's settings patch. Returns the updated app, or `None`
    /// if no app has that key.
    async fn update_app(&self, app_key: &str, patch: &AppPatch) -> Result<Option<App>>;

    /// Delete the app record only.
    ///
    /// Chunks and conversations stored under the key are left in place;
    /// deletion does not cascade.
    async fn delete_app(&self, app_key: &str) -> Result<bool>;
}

/// Knowledge-base chunk storage and retrieval.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Replace every chunk stored for `app_key` + `source_file` with `chunks`.
    ///
    /// Returns the number of chunks written.
    async fn replace_chunks(
        &self,
        app_key: &str,
        source_file: &str,
        chunks: &[NewChunk],
    ) -> Result<usize>;

    /// Lexical relevance search over chunk titles and text.
    ///
    /// `terms` are already normalized (see [`crate::search::query_terms`]).
    async fn keyword_search(
        &self,
        app_key: &str,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>>;

    /// Cosine-similarity search over stored embeddings, discarding results
    /// scoring below `min_score`.
    async fn vector_search(
        &self,
        app_key: &str,
        query_vec: &[f32],
        min_score: f32,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>>;

    /// Stored chunks for an app, optionally restricted to one source file,
    /// in insertion order.
    async fn list_chunks(&self, app_key: &str, source_file: Option<&str>) -> Result<Vec<KbChunk>>;
}

/// Append-only conversation logs.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create an active conversation holding `initial` messages. Returns its id.
    async fn create_conversation(
        &self,
        app_key: &str,
        parent_origin: &str,
        initial: &[Message],
    ) -> Result<String>;

    /// True if `id` names an active conversation owned by `app_key`.
    async fn is_active(&self, id: &str, app_key: &str) -> Result<bool>;

    /// Mark an active conversation of `app_key` inactive. Returns false if
    /// there was nothing to close.
    async fn deactivate(&self, id: &str, app_key: &str) -> Result<bool>;

    /// Append `messages` in order as one atomic update, and record the
    /// activity time and origin. Only active conversations of `app_key` are
    /// touched; returns false otherwise.
    async fn append_messages(
        &self,
        id: &str,
        app_key: &str,
        parent_origin: &str,
        messages: &[Message],
    ) -> Result<bool>;

    /// Fetch a conversation with its full message log.
    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;
}

/// The storage dependencies of the widget API, injected by the entry point.
#[derive(Clone)]
pub struct Stores {
    pub apps: Arc<dyn AppStore>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub conversations: Arc<dyn ConversationStore>,
}

impl Stores {
    /// Use one backend for all three concerns.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: AppStore + KnowledgeStore + ConversationStore + 'static,
    {
        Self {
            apps: backend.clone(),
            knowledge: backend.clone(),
            conversations: backend,
        }
    }
}
