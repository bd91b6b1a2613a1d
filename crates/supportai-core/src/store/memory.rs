//! In-memory store implementing all three storage traits.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Keyword search is a
//! plain term-frequency count over title and text; vector search is
//! brute-force cosine similarity. Used by unit tests and the pipeline tests.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{now_ms, App, AppPatch, Conversation, KbChunk, Message, NewChunk, ScoredChunk};
use crate::search::sort_and_truncate;

use super::{AppStore, ConversationStore, KnowledgeStore};

/// In-memory store for tests.
pub struct InMemoryStore {
    apps: RwLock<HashMap<String, App>>,
    chunks: RwLock<Vec<KbChunk>>,
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            apps: RwLock::new(HashMap::new()),
            chunks: RwLock::new(Vec::new()),
            conversations: RwLock::new(HashMap::new()),
        }
    }

    /// Number of conversations ever created, active or not.
    pub fn conversation_count(&self) -> usize {
        self.conversations.read().map(|c| c.len()).unwrap_or(0)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn term_frequency(chunk: &KbChunk, terms: &[String]) -> usize {
    let haystack = format!("{} {}", chunk.title, chunk.text).to_lowercase();
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| terms.iter().any(|t| t == w))
        .count()
}

fn scored(chunk: &KbChunk, score: f64) -> ScoredChunk {
    ScoredChunk {
        id: chunk.id.clone(),
        title: chunk.title.clone(),
        text: chunk.text.clone(),
        source_file: chunk.source_file.clone(),
        score,
    }
}

#[async_trait]
impl AppStore for InMemoryStore {
    async fn create_app(&self, app: &App) -> Result<()> {
        let mut apps = write(&self.apps)?;
        if apps.contains_key(&app.app_key) {
            bail!("app key already exists: {}", app.app_key);
        }
        apps.insert(app.app_key.clone(), app.clone());
        Ok(())
    }

    async fn find_app(&self, app_key: &str) -> Result<Option<App>> {
        Ok(read(&self.apps)?.get(app_key).cloned())
    }

    async fn list_apps(&self, owner_id: &str) -> Result<Vec<App>> {
        let mut apps: Vec<App> = read(&self.apps)?
            .values()
            .filter(|a| a.owner_id == owner_id)
            .cloned()
            .collect();
        apps.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(apps)
    }

    async fn update_app(&self, app_key: &str, patch: &AppPatch) -> Result<Option<App>> {
        let mut apps = write(&self.apps)?;
        Ok(apps.get_mut(app_key).map(|app| {
            patch.apply(app);
            app.clone()
        }))
    }

    async fn delete_app(&self, app_key: &str) -> Result<bool> {
        Ok(write(&self.apps)?.remove(app_key).is_some())
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    async fn replace_chunks(
        &self,
        app_key: &str,
        source_file: &str,
        chunks: &[NewChunk],
    ) -> Result<usize> {
        let mut stored = write(&self.chunks)?;
        stored.retain(|c| !(c.app_key == app_key && c.source_file == source_file));
        let created_at = now_ms();
        for c in chunks {
            stored.push(KbChunk {
                id: uuid::Uuid::new_v4().to_string(),
                app_key: app_key.to_string(),
                title: c.title.clone(),
                text: c.text.clone(),
                source_file: source_file.to_string(),
                created_at,
                embedding: c.embedding.clone(),
            });
        }
        Ok(chunks.len())
    }

    async fn keyword_search(
        &self,
        app_key: &str,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let stored = read(&self.chunks)?;
        let mut results: Vec<ScoredChunk> = stored
            .iter()
            .filter(|c| c.app_key == app_key)
            .filter_map(|c| match term_frequency(c, terms) {
                0 => None,
                n => Some(scored(c, n as f64)),
            })
            .collect();
        sort_and_truncate(&mut results, limit);
        Ok(results)
    }

    async fn vector_search(
        &self,
        app_key: &str,
        query_vec: &[f32],
        min_score: f32,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let stored = read(&self.chunks)?;
        let mut results: Vec<ScoredChunk> = stored
            .iter()
            .filter(|c| c.app_key == app_key)
            .filter_map(|c| {
                let vec = c.embedding.as_ref()?;
                let score = cosine_similarity(query_vec, vec);
                (score >= min_score).then(|| scored(c, score as f64))
            })
            .collect();
        sort_and_truncate(&mut results, limit);
        Ok(results)
    }

    async fn list_chunks(&self, app_key: &str, source_file: Option<&str>) -> Result<Vec<KbChunk>> {
        let stored = read(&self.chunks)?;
        Ok(stored
            .iter()
            .filter(|c| c.app_key == app_key)
            .filter(|c| source_file.is_none_or(|f| c.source_file == f))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn create_conversation(
        &self,
        app_key: &str,
        parent_origin: &str,
        initial: &[Message],
    ) -> Result<String> {
        let now = now_ms();
        let id = uuid::Uuid::new_v4().to_string();
        let conv = Conversation {
            id: id.clone(),
            app_key: app_key.to_string(),
            parent_origin: parent_origin.to_string(),
            is_active: true,
            messages: initial.to_vec(),
            last_activity_at: now,
            created_at: now,
        };
        write(&self.conversations)?.insert(id.clone(), conv);
        Ok(id)
    }

    async fn is_active(&self, id: &str, app_key: &str) -> Result<bool> {
        Ok(read(&self.conversations)?
            .get(id)
            .is_some_and(|c| c.app_key == app_key && c.is_active))
    }

    async fn deactivate(&self, id: &str, app_key: &str) -> Result<bool> {
        let mut convs = write(&self.conversations)?;
        match convs.get_mut(id) {
            Some(c) if c.app_key == app_key && c.is_active => {
                c.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_messages(
        &self,
        id: &str,
        app_key: &str,
        parent_origin: &str,
        messages: &[Message],
    ) -> Result<bool> {
        let mut convs = write(&self.conversations)?;
        match convs.get_mut(id) {
            Some(c) if c.app_key == app_key && c.is_active => {
                c.messages.extend_from_slice(messages);
                c.parent_origin = parent_origin.to_string();
                c.last_activity_at = now_ms();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(read(&self.conversations)?.get(id).cloned())
    }
}
