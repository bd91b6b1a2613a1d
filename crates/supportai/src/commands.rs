//! Handlers for the operator CLI.
//!
//! Each `run_*` function backs one `supportai` subcommand and prints its
//! result to stdout. They bypass the domain guard: the operator owns the
//! database.

use anyhow::{bail, Result};
use chrono::{TimeZone, Utc};
use std::path::Path;

use supportai_core::models::{App, AppPatch, CopyText, Theme};
use supportai_core::store::{AppStore, ConversationStore};

use crate::apps;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::ingest::ingest_markdown;
use crate::server::build_ranker;
use crate::sqlite_store::SqliteStore;

/// Optional widget settings accepted by `app update`.
#[derive(Debug, Default, Clone)]
pub struct AppSettings {
    pub name: Option<String>,
    pub domains: Option<Vec<String>>,
    pub primary: Option<String>,
    pub background: Option<String>,
    pub panel: Option<String>,
    pub text: Option<String>,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub placeholder: Option<String>,
    pub enable_border: Option<bool>,
    pub border_color: Option<String>,
}

impl AppSettings {
    /// Merge these settings over `current` into a patch.
    pub fn into_patch(self, current: &App) -> AppPatch {
        let theme_changed = self.primary.is_some()
            || self.background.is_some()
            || self.panel.is_some()
            || self.text.is_some();
        let theme = theme_changed.then(|| Theme {
            primary: self.primary.unwrap_or_else(|| current.theme.primary.clone()),
            background: self
                .background
                .unwrap_or_else(|| current.theme.background.clone()),
            panel: self.panel.unwrap_or_else(|| current.theme.panel.clone()),
            text: self.text.unwrap_or_else(|| current.theme.text.clone()),
        });

        let copy_changed =
            self.title.is_some() || self.subtitle.is_some() || self.placeholder.is_some();
        let copy = copy_changed.then(|| CopyText {
            title: self.title.unwrap_or_else(|| current.copy.title.clone()),
            subtitle: self.subtitle.unwrap_or_else(|| current.copy.subtitle.clone()),
            placeholder: self
                .placeholder
                .unwrap_or_else(|| current.copy.placeholder.clone()),
        });

        AppPatch {
            name: self.name,
            allowed_domains: self.domains,
            theme,
            copy,
            enable_border: self.enable_border,
            border_color: self.border_color,
        }
    }
}

fn format_ts(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn print_app(app: &App) {
    println!("{}  {}", app.app_key, app.name);
    println!("  owner:    {}", app.owner_id);
    if app.allowed_domains.is_empty() {
        println!("  domains:  (none: every origin is refused)");
    } else {
        println!("  domains:  {}", app.allowed_domains.join(", "));
    }
    println!(
        "  theme:    primary={} background={} panel={} text={}",
        app.theme.primary, app.theme.background, app.theme.panel, app.theme.text
    );
    println!(
        "  copy:     \"{}\" / \"{}\" / \"{}\"",
        app.copy.title, app.copy.subtitle, app.copy.placeholder
    );
    println!(
        "  border:   {} ({})",
        if app.enable_border { "on" } else { "off" },
        app.border_color
    );
    println!("  updated:  {}", format_ts(app.updated_at));
}

pub async fn run_app_create(
    store: &SqliteStore,
    owner: &str,
    name: &str,
    domains: &[String],
) -> Result<()> {
    let app = apps::create_app(store, owner, name, domains).await?;
    println!("Created app {}", app.app_key);
    print_app(&app);
    Ok(())
}

pub async fn run_app_list(store: &SqliteStore, owner: &str) -> Result<()> {
    let list = store.list_apps(owner).await?;
    if list.is_empty() {
        println!("No apps for owner '{}'.", owner);
        return Ok(());
    }
    println!("{:<30} {:<24} DOMAINS", "APP KEY", "NAME");
    for app in &list {
        println!(
            "{:<30} {:<24} {}",
            app.app_key,
            app.name,
            app.allowed_domains.join(",")
        );
    }
    Ok(())
}

pub async fn run_app_show(store: &SqliteStore, app_key: &str) -> Result<()> {
    match store.find_app(app_key).await? {
        Some(app) => {
            print_app(&app);
            Ok(())
        }
        None => bail!("no app with key '{}'", app_key),
    }
}

pub async fn run_app_set_domains(
    store: &SqliteStore,
    app_key: &str,
    domains: &[String],
) -> Result<()> {
    let app = apps::set_domains(store, app_key, domains).await?;
    println!("Allowed domains for {}: {}", app.app_key, app.allowed_domains.join(", "));
    Ok(())
}

pub async fn run_app_update(
    store: &SqliteStore,
    app_key: &str,
    settings: AppSettings,
) -> Result<()> {
    let current = match store.find_app(app_key).await? {
        Some(app) => app,
        None => bail!("no app with key '{}'", app_key),
    };
    let patch = settings.into_patch(&current);
    let app = apps::update_app(store, app_key, &patch).await?;
    println!("Updated app {}", app.app_key);
    print_app(&app);
    Ok(())
}

pub async fn run_app_delete(store: &SqliteStore, app_key: &str) -> Result<()> {
    if store.delete_app(app_key).await? {
        println!("Deleted app {} (knowledge base and conversations kept).", app_key);
        Ok(())
    } else {
        bail!("no app with key '{}'", app_key)
    }
}

pub async fn run_ingest(
    config: &Config,
    store: &SqliteStore,
    app_key: &str,
    file: &Path,
) -> Result<()> {
    if store.find_app(app_key).await?.is_none() {
        bail!("no app with key '{}'", app_key);
    }
    let content = std::fs::read_to_string(file)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", file.display(), e))?;
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(crate::ingest::DEFAULT_FILENAME);

    let embedder = create_embedder(&config.embedding)?;
    let outcome = ingest_markdown(
        store,
        embedder.as_deref(),
        config.chunking.max_chars,
        app_key,
        filename,
        &content,
    )
    .await?;

    println!(
        "Ingested {} into {}: {} chunks stored, {} embedded.",
        filename, app_key, outcome.chunks_stored, outcome.chunks_embedded
    );
    Ok(())
}

pub async fn run_search(
    config: &Config,
    store: &SqliteStore,
    app_key: &str,
    query: &str,
    limit: Option<usize>,
) -> Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let ranker = build_ranker(&config.retrieval, embedder)?;
    let hits = ranker
        .rank(
            store,
            app_key,
            query,
            limit.unwrap_or(config.retrieval.limit),
        )
        .await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} ({})",
            i + 1,
            hit.score,
            hit.title,
            hit.source_file
        );
        let preview: String = hit.text.chars().take(160).collect();
        println!("    {}", preview.replace('\n', " "));
    }
    Ok(())
}

pub async fn run_conversation(store: &SqliteStore, id: &str) -> Result<()> {
    let conv = match store.get_conversation(id).await? {
        Some(c) => c,
        None => bail!("conversation not found: {}", id),
    };
    println!(
        "Conversation {} (app {}, origin {}, {})",
        conv.id,
        conv.app_key,
        conv.parent_origin,
        if conv.is_active { "active" } else { "closed" }
    );
    for msg in &conv.messages {
        println!("[{}] {}: {}", format_ts(msg.ts), msg.role.as_str(), msg.text);
    }
    Ok(())
}
