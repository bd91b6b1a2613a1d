//! SQLite-backed store implementing [`AppStore`], [`KnowledgeStore`], and
//! [`ConversationStore`].
//!
//! Multi-statement writes (chunk replacement, message appends) run inside a
//! single transaction so readers never observe partial state.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use supportai_core::embedding::{cosine_similarity, decode_vector, encode_vector};
use supportai_core::models::{
    now_ms, App, AppPatch, Conversation, KbChunk, Message, NewChunk, ScoredChunk,
};
use supportai_core::search::sort_and_truncate;
use supportai_core::store::{AppStore, ConversationStore, KnowledgeStore};

/// SQLite implementation of the storage traits.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn app_from_row(row: &SqliteRow) -> Result<App> {
    let domains: String = row.get("allowed_domains");
    let theme: String = row.get("theme_json");
    let copy: String = row.get("copy_json");
    let enable_border: i64 = row.get("enable_border");
    Ok(App {
        app_key: row.get("app_key"),
        owner_id: row.get("owner_id"),
        name: row.get("name"),
        allowed_domains: serde_json::from_str(&domains).context("corrupt allowed_domains")?,
        theme: serde_json::from_str(&theme).context("corrupt theme_json")?,
        copy: serde_json::from_str(&copy).context("corrupt copy_json")?,
        enable_border: enable_border != 0,
        border_color: row.get("border_color"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn scored_from_row(row: &SqliteRow, score: f64) -> ScoredChunk {
    ScoredChunk {
        id: row.get("id"),
        title: row.get("title"),
        text: row.get("text"),
        source_file: row.get("source_file"),
        score,
    }
}

/// Build an FTS5 MATCH expression: each term quoted, OR-joined.
fn fts_match_expr(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[async_trait]
impl AppStore for SqliteStore {
    async fn create_app(&self, app: &App) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO apps (app_key, owner_id, name, allowed_domains, theme_json, copy_json,
                              enable_border, border_color, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&app.app_key)
        .bind(&app.owner_id)
        .bind(&app.name)
        .bind(serde_json::to_string(&app.allowed_domains)?)
        .bind(serde_json::to_string(&app.theme)?)
        .bind(serde_json::to_string(&app.copy)?)
        .bind(app.enable_border as i64)
        .bind(&app.border_color)
        .bind(app.created_at)
        .bind(app.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_app(&self, app_key: &str) -> Result<Option<App>> {
        let row = sqlx::query("SELECT * FROM apps WHERE app_key = ?")
            .bind(app_key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(app_from_row).transpose()
    }

    async fn list_apps(&self, owner_id: &str) -> Result<Vec<App>> {
        let rows = sqlx::query("SELECT * FROM apps WHERE owner_id = ? ORDER BY created_at DESC")
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(app_from_row).collect()
    }

    async fn update_app(&self, app_key: &str, patch: &AppPatch) -> Result<Option<App>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM apps WHERE app_key = ?")
            .bind(app_key)
            .fetch_optional(&mut *tx)
            .await?;
        let mut app = match row {
            Some(row) => app_from_row(&row)?,
            None => return Ok(None),
        };
        patch.apply(&mut app);

        sqlx::query(
            r#"
            UPDATE apps SET name = ?, allowed_domains = ?, theme_json = ?, copy_json = ?,
                            enable_border = ?, border_color = ?, updated_at = ?
            WHERE app_key = ?
            "#,
        )
        .bind(&app.name)
        .bind(serde_json::to_string(&app.allowed_domains)?)
        .bind(serde_json::to_string(&app.theme)?)
        .bind(serde_json::to_string(&app.copy)?)
        .bind(app.enable_border as i64)
        .bind(&app.border_color)
        .bind(app.updated_at)
        .bind(app_key)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(app))
    }

    async fn delete_app(&self, app_key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM apps WHERE app_key = ?")
            .bind(app_key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    async fn replace_chunks(
        &self,
        app_key: &str,
        source_file: &str,
        chunks: &[NewChunk],
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM kb_chunks_fts WHERE chunk_id IN \
             (SELECT id FROM kb_chunks WHERE app_key = ? AND source_file = ?)",
        )
        .bind(app_key)
        .bind(source_file)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM kb_chunks WHERE app_key = ? AND source_file = ?")
            .bind(app_key)
            .bind(source_file)
            .execute(&mut *tx)
            .await?;

        let created_at = now_ms();
        for chunk in chunks {
            let id = uuid::Uuid::new_v4().to_string();
            let blob = chunk.embedding.as_deref().map(encode_vector);

            sqlx::query(
                r#"
                INSERT INTO kb_chunks (id, app_key, source_file, title, text, embedding, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(app_key)
            .bind(source_file)
            .bind(&chunk.title)
            .bind(&chunk.text)
            .bind(blob)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO kb_chunks_fts (chunk_id, app_key, title, text) VALUES (?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(app_key)
            .bind(&chunk.title)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(chunks.len())
    }

    async fn keyword_search(
        &self,
        app_key: &str,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.title, c.text, c.source_file, kb_chunks_fts.rank AS rank
            FROM kb_chunks_fts
            JOIN kb_chunks c ON c.id = kb_chunks_fts.chunk_id
            WHERE kb_chunks_fts MATCH ? AND kb_chunks_fts.app_key = ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(fts_match_expr(terms))
        .bind(app_key)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        // bm25 ranks are negative, lower is better
        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                scored_from_row(row, -rank)
            })
            .collect())
    }

    async fn vector_search(
        &self,
        app_key: &str,
        query_vec: &[f32],
        min_score: f32,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, text, source_file, embedding
            FROM kb_chunks
            WHERE app_key = ? AND embedding IS NOT NULL
            "#,
        )
        .bind(app_key)
        .fetch_all(&self.pool)
        .await?;

        let mut results: Vec<ScoredChunk> = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let score = cosine_similarity(query_vec, &decode_vector(&blob));
                (score >= min_score).then(|| scored_from_row(row, score as f64))
            })
            .collect();

        sort_and_truncate(&mut results, limit);
        Ok(results)
    }

    async fn list_chunks(&self, app_key: &str, source_file: Option<&str>) -> Result<Vec<KbChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, app_key, title, text, source_file, embedding, created_at
            FROM kb_chunks
            WHERE app_key = ? AND (? IS NULL OR source_file = ?)
            ORDER BY seq ASC
            "#,
        )
        .bind(app_key)
        .bind(source_file)
        .bind(source_file)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Option<Vec<u8>> = row.get("embedding");
                KbChunk {
                    id: row.get("id"),
                    app_key: row.get("app_key"),
                    title: row.get("title"),
                    text: row.get("text"),
                    source_file: row.get("source_file"),
                    created_at: row.get("created_at"),
                    embedding: blob.as_deref().map(decode_vector),
                }
            })
            .collect())
    }
}

async fn insert_messages(
    conn: &mut sqlx::SqliteConnection,
    conversation_id: &str,
    messages: &[Message],
) -> Result<()> {
    for msg in messages {
        sqlx::query(
            r#"
            INSERT INTO messages (conversation_id, seq, id, role, text, ts)
            SELECT ?, COALESCE(MAX(seq), 0) + 1, ?, ?, ?, ?
            FROM messages WHERE conversation_id = ?
            "#,
        )
        .bind(conversation_id)
        .bind(&msg.id)
        .bind(msg.role.as_str())
        .bind(&msg.text)
        .bind(msg.ts)
        .bind(conversation_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn create_conversation(
        &self,
        app_key: &str,
        parent_origin: &str,
        initial: &[Message],
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO conversations (id, app_key, parent_origin, is_active, last_activity_at, created_at)
            VALUES (?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(app_key)
        .bind(parent_origin)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        insert_messages(&mut *tx, &id, initial).await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn is_active(&self, id: &str, app_key: &str) -> Result<bool> {
        let active: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM conversations WHERE id = ? AND app_key = ? AND is_active = 1",
        )
        .bind(id)
        .bind(app_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(active)
    }

    async fn deactivate(&self, id: &str, app_key: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE conversations SET is_active = 0 WHERE id = ? AND app_key = ? AND is_active = 1",
        )
        .bind(id)
        .bind(app_key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_messages(
        &self,
        id: &str,
        app_key: &str,
        parent_origin: &str,
        messages: &[Message],
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Taking the write lock first keeps concurrent appends serialized.
        let touched = sqlx::query(
            r#"
            UPDATE conversations SET last_activity_at = ?, parent_origin = ?
            WHERE id = ? AND app_key = ? AND is_active = 1
            "#,
        )
        .bind(now_ms())
        .bind(parent_origin)
        .bind(id)
        .bind(app_key)
        .execute(&mut *tx)
        .await?;

        if touched.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_messages(&mut *tx, id, messages).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, app_key, parent_origin, is_active, last_activity_at, created_at \
             FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let message_rows = sqlx::query(
            "SELECT id, role, text, ts FROM messages WHERE conversation_id = ? ORDER BY seq ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let messages = message_rows
            .iter()
            .map(|r| {
                let role: String = r.get("role");
                Ok(Message {
                    id: r.get("id"),
                    role: role.parse()?,
                    text: r.get("text"),
                    ts: r.get("ts"),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let is_active: i64 = row.get("is_active");
        Ok(Some(Conversation {
            id: row.get("id"),
            app_key: row.get("app_key"),
            parent_origin: row.get("parent_origin"),
            is_active: is_active != 0,
            messages,
            last_activity_at: row.get("last_activity_at"),
            created_at: row.get("created_at"),
        }))
    }
}
