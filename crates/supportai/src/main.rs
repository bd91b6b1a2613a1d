//! # SupportAI CLI (`supportai`)
//!
//! Operator interface for the SupportAI widget backend: database setup, app
//! registry, knowledge-base ingestion, search, and the widget server.
//!
//! ## Usage
//!
//! ```bash
//! supportai --config ./config/supportai.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `supportai init` | Create the SQLite database and run schema migrations |
//! | `supportai serve` | Start the widget HTTP server |
//! | `supportai app create <name>` | Register an app and print its key |
//! | `supportai app list` | List an owner's apps |
//! | `supportai app show <key>` | Show an app's settings |
//! | `supportai app set-domains <key> <domains>...` | Replace the domain allowlist |
//! | `supportai app update <key>` | Change name, theme, copy or border |
//! | `supportai app delete <key>` | Delete an app (data is kept) |
//! | `supportai ingest <key> <file>` | Chunk and store a Markdown file |
//! | `supportai search <key> "<query>"` | Rank knowledge-base chunks |
//! | `supportai conversation <id>` | Print a conversation transcript |
//!
//! ## Examples
//!
//! ```bash
//! supportai init
//! supportai app create "Docs" --domains example.com,www.example.com
//! supportai ingest app_0123456789abcdef01234567 ./docs/faq.md
//! supportai serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use supportai::commands::{self, AppSettings};
use supportai::sqlite_store::SqliteStore;
use supportai::{config, db, migrate, server};

/// SupportAI: an embeddable support-chat widget backed by your own docs.
#[derive(Parser)]
#[command(
    name = "supportai",
    about = "SupportAI: embeddable AI support-chat widget backend",
    version,
    long_about = "SupportAI registers widget apps with per-app domain allowlists, ingests \
    Markdown documentation into a per-app knowledge base, and serves a domain-guarded \
    widget API that streams grounded answers over Server-Sent Events."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/supportai.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Start the widget HTTP server.
    ///
    /// Runs migrations first, then serves until Ctrl-C or SIGTERM.
    Serve,

    /// Manage widget apps.
    App {
        #[command(subcommand)]
        action: AppAction,
    },

    /// Ingest a Markdown file into an app's knowledge base.
    ///
    /// Re-ingesting the same filename replaces its previous chunks.
    Ingest {
        /// App key that owns the knowledge base.
        app_key: String,
        /// Markdown file to ingest. Its file name becomes the chunk source.
        file: PathBuf,
    },

    /// Search an app's knowledge base with the configured ranker.
    Search {
        app_key: String,
        query: String,
        /// Maximum number of results (defaults to `[retrieval].limit`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print a stored conversation.
    Conversation {
        /// Conversation ID.
        id: String,
    },
}

#[derive(Subcommand)]
enum AppAction {
    /// Register a new app with default theme and copy.
    Create {
        /// Display name.
        name: String,
        /// Allowed domains, comma- or space-separated. URLs are accepted.
        #[arg(long, value_delimiter = ',')]
        domains: Vec<String>,
        #[arg(long, default_value = "local")]
        owner: String,
    },

    /// List apps belonging to an owner.
    List {
        #[arg(long, default_value = "local")]
        owner: String,
    },

    /// Show one app.
    Show { app_key: String },

    /// Replace an app's allowed domains.
    SetDomains {
        app_key: String,
        /// New allowlist. An empty list refuses every origin.
        domains: Vec<String>,
    },

    /// Update widget settings. Unspecified fields are left unchanged.
    Update {
        app_key: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_delimiter = ',')]
        domains: Option<Vec<String>>,
        #[arg(long)]
        primary: Option<String>,
        #[arg(long)]
        background: Option<String>,
        #[arg(long)]
        panel: Option<String>,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        subtitle: Option<String>,
        #[arg(long)]
        placeholder: Option<String>,
        #[arg(long)]
        enable_border: Option<bool>,
        #[arg(long)]
        border_color: Option<String>,
    },

    /// Delete an app. Its chunks and conversations are kept.
    Delete { app_key: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("supportai=info,tower_http=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let pool = db::connect(&cfg).await?;

    let result = run(cli.command, &cfg, pool.clone()).await;
    pool.close().await;
    result
}

async fn run(command: Commands, cfg: &config::Config, pool: sqlx::SqlitePool) -> anyhow::Result<()> {
    match command {
        Commands::Init => {
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
            return Ok(());
        }
        Commands::Serve => {
            migrate::run_migrations(&pool).await?;
            return server::run_server(cfg, pool).await;
        }
        _ => {}
    }

    let store = SqliteStore::new(pool);
    match command {
        Commands::Init | Commands::Serve => unreachable!(),
        Commands::App { action } => match action {
            AppAction::Create {
                name,
                domains,
                owner,
            } => commands::run_app_create(&store, &owner, &name, &domains).await,
            AppAction::List { owner } => commands::run_app_list(&store, &owner).await,
            AppAction::Show { app_key } => commands::run_app_show(&store, &app_key).await,
            AppAction::SetDomains { app_key, domains } => {
                commands::run_app_set_domains(&store, &app_key, &domains).await
            }
            AppAction::Update {
                app_key,
                name,
                domains,
                primary,
                background,
                panel,
                text,
                title,
                subtitle,
                placeholder,
                enable_border,
                border_color,
            } => {
                let settings = AppSettings {
                    name,
                    domains,
                    primary,
                    background,
                    panel,
                    text,
                    title,
                    subtitle,
                    placeholder,
                    enable_border,
                    border_color,
                };
                commands::run_app_update(&store, &app_key, settings).await
            }
            AppAction::Delete { app_key } => commands::run_app_delete(&store, &app_key).await,
        },
        Commands::Ingest { app_key, file } => {
            commands::run_ingest(cfg, &store, &app_key, &file).await
        }
        Commands::Search {
            app_key,
            query,
            limit,
        } => commands::run_search(cfg, &store, &app_key, &query, limit).await,
        Commands::Conversation { id } => commands::run_conversation(&store, &id).await,
    }
}
