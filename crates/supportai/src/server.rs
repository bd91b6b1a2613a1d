//! Widget HTTP server.
//!
//! Serves the widget API consumed by the embedded iframe, plus the loader
//! script and iframe page themselves.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/widget-config` | Theme and copy for a guarded widget |
//! | `POST` | `/chat` | One chat turn, streamed as SSE |
//! | `POST` | `/conversations/new` | Close the current conversation, open a new one |
//! | `GET`  | `/conversations/{id}` | Conversation with its messages |
//! | `POST` | `/kb/ingest` | Chunk and store a Markdown document |
//! | `POST` | `/kb/search` | Guarded knowledge-base search |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/widget-loader.js` | Host-page loader script |
//! | `GET`  | `/embed` | Widget iframe page |
//!
//! # Error Contract
//!
//! ```json
//! { "error": "DOMAIN_NOT_ALLOWED", "message": "...", "host": "evil.com", "allowedDomains": ["example.com"] }
//! ```
//!
//! Malformed JSON bodies are treated as empty objects, and a field of the
//! wrong type is treated as absent (see [`supportai_core::lenient`]). Both
//! surface as the matching missing-field code rather than a framework
//! rejection.
//!
//! # SSE frames
//!
//! `POST /chat` answers `start {conversationId}`, then one `token {token}`
//! per space-separated word with `[server].token_delay_ms` between tokens,
//! then `done {}`. The exchange is persisted before the first frame.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted: the widget runs inside
//! third-party pages.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use supportai_core::embedding::Embedder;
use supportai_core::error::WidgetError;
use supportai_core::generate::LanguageModel;
use supportai_core::guard::{origin_of, GuardError};
use supportai_core::lenient;
use supportai_core::models::{Message, ScoredChunk};
use supportai_core::pipeline::{reply_tokens, ChatRequest, NewConversationRequest, WidgetService};
use supportai_core::search::{ChunkRanker, LexicalRanker, VectorRanker};
use supportai_core::store::Stores;

use crate::config::{Config, RetrievalConfig};
use crate::embedding::create_embedder;
use crate::ingest::{ingest_markdown, DEFAULT_FILENAME};
use crate::llm::create_model;
use crate::sqlite_store::SqliteStore;

const LOADER_JS: &str = include_str!("../assets/widget-loader.js");
const EMBED_HTML: &str = include_str!("../assets/embed.html");

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    service: WidgetService,
    embedder: Option<Arc<dyn Embedder>>,
}

impl AppState {
    /// Wire the widget service from its injected dependencies.
    pub fn new(
        config: Config,
        stores: Stores,
        model: Option<Arc<dyn LanguageModel>>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> anyhow::Result<Self> {
        let ranker = build_ranker(&config.retrieval, embedder.clone())?;
        let service = WidgetService::new(
            stores,
            ranker,
            model,
            config.generation.options(),
            config.retrieval.limit,
        );
        Ok(Self {
            config: Arc::new(config),
            service,
            embedder,
        })
    }
}

/// Select the ranking strategy named by `[retrieval].strategy`.
pub fn build_ranker(
    retrieval: &RetrievalConfig,
    embedder: Option<Arc<dyn Embedder>>,
) -> anyhow::Result<Arc<dyn ChunkRanker>> {
    match retrieval.strategy.as_str() {
        "lexical" => Ok(Arc::new(LexicalRanker)),
        "vector" => {
            let embedder = embedder.ok_or_else(|| {
                anyhow::anyhow!("retrieval.strategy 'vector' requires an embedding provider")
            })?;
            Ok(Arc::new(VectorRanker::new(embedder, retrieval.min_score)))
        }
        other => anyhow::bail!("Unknown retrieval strategy: '{}'", other),
    }
}

/// Build the router with all widget routes, CORS, and request tracing.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/widget-config", get(handle_widget_config))
        .route("/chat", post(handle_chat))
        .route("/conversations/new", post(handle_new_conversation))
        .route("/conversations/", get(handle_missing_conversation_id))
        .route("/conversations/{id}", get(handle_get_conversation))
        .route("/kb/ingest", post(handle_ingest))
        .route("/kb/search", post(handle_search))
        .route("/health", get(handle_health))
        .route("/widget-loader.js", get(handle_loader))
        .route("/embed", get(handle_embed))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the widget server on `[server].bind` and run until Ctrl-C or SIGTERM.
///
/// The pool is owned by the caller, which closes it after this returns.
pub async fn run_server(config: &Config, pool: SqlitePool) -> anyhow::Result<()> {
    let stores = Stores::from_backend(Arc::new(SqliteStore::new(pool)));
    let embedder = create_embedder(&config.embedding)?;
    let model = create_model(&config.generation)?;
    let state = AppState::new(config.clone(), stores, model, embedder)?;

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(
        bind = %config.server.bind,
        strategy = %config.retrieval.strategy,
        "SupportAI widget server listening"
    );
    println!("SupportAI server listening on http://{}", config.server.bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

// ============ Error response ============

/// Internal error type that converts into an Axum HTTP response.
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({
            "error": self.code,
            "message": self.message,
        });
        if let (Some(serde_json::Value::Object(extra)), Some(obj)) =
            (self.details, body.as_object_mut())
        {
            obj.extend(extra);
        }
        (self.status, Json(body)).into_response()
    }
}

/// How guard refusals map to HTTP statuses for an endpoint.
#[derive(Clone, Copy)]
enum GuardStatus {
    /// Every refusal is 403.
    Forbidden,
    /// 404 unknown key, 400 missing origin, 403 disallowed host.
    Specific,
}

fn widget_error(err: WidgetError, guard_status: GuardStatus) -> AppError {
    let code = err.code();
    let (status, details) = match &err {
        WidgetError::MissingAppKey
        | WidgetError::MissingMessages
        | WidgetError::EmptyUserMessage
        | WidgetError::MissingContent
        | WidgetError::MissingQuery
        | WidgetError::MissingId => (StatusCode::BAD_REQUEST, None),
        WidgetError::NotFound(_) => (StatusCode::NOT_FOUND, None),
        WidgetError::Guard(guard) => {
            let status = match (guard_status, guard) {
                (GuardStatus::Forbidden, _) => StatusCode::FORBIDDEN,
                (GuardStatus::Specific, GuardError::InvalidAppKey(_)) => StatusCode::NOT_FOUND,
                (GuardStatus::Specific, GuardError::MissingParentOrigin) => StatusCode::BAD_REQUEST,
                (GuardStatus::Specific, GuardError::DomainNotAllowed { .. }) => {
                    StatusCode::FORBIDDEN
                }
            };
            let details = match guard {
                GuardError::DomainNotAllowed { host, allowed } => Some(serde_json::json!({
                    "host": host,
                    "allowedDomains": allowed,
                })),
                _ => None,
            };
            (status, details)
        }
        WidgetError::Storage(e) => {
            tracing::error!("storage error: {:#}", e);
            return AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code,
                message: "internal error".to_string(),
                details: None,
            };
        }
    };
    if status == StatusCode::FORBIDDEN {
        tracing::warn!(code, "widget request refused: {}", err);
    }
    AppError {
        status,
        code,
        message: err.to_string(),
        details,
    }
}

/// Parse a JSON body leniently: anything unparsable becomes `T::default()`.
fn lenient_body<T: DeserializeOwned + Default>(body: &Bytes) -> T {
    serde_json::from_slice(body).unwrap_or_default()
}

fn trimmed(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("").trim()
}

// ============ GET /widget-config ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WidgetConfigQuery {
    app_key: Option<String>,
    parent_origin: Option<String>,
}

async fn handle_widget_config(
    State(state): State<AppState>,
    Query(query): Query<WidgetConfigQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let mut parent_origin = trimmed(&query.parent_origin).to_string();
    if parent_origin.is_empty() {
        parent_origin = headers
            .get(header::REFERER)
            .and_then(|v| v.to_str().ok())
            .and_then(origin_of)
            .unwrap_or_default();
    }

    let config = state
        .service
        .widget_config(query.app_key.as_deref(), &parent_origin)
        .await
        .map_err(|e| widget_error(e, GuardStatus::Specific))?;

    Ok((
        [(header::CACHE_CONTROL, "no-store")],
        Json(config),
    )
        .into_response())
}

// ============ POST /chat ============

async fn handle_chat(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let req: ChatRequest = lenient_body(&body);
    let turn = state
        .service
        .chat_turn(req)
        .await
        .map_err(|e| widget_error(e, GuardStatus::Forbidden))?;

    let mut frames = Vec::new();
    frames.push(
        Event::default()
            .event("start")
            .data(serde_json::json!({ "conversationId": turn.conversation_id }).to_string()),
    );
    for token in reply_tokens(&turn.reply) {
        frames.push(
            Event::default()
                .event("token")
                .data(serde_json::json!({ "token": token }).to_string()),
        );
    }
    frames.push(Event::default().event("done").data("{}"));

    // pause after each token frame
    let delay = Duration::from_millis(state.config.server.token_delay_ms);
    let stream = stream::iter(frames)
        .enumerate()
        .then(move |(i, event)| async move {
            if i > 1 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, Infallible>(event)
        });

    Ok(Sse::new(stream))
}

// ============ Conversations ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewConversationResponse {
    conversation_id: String,
}

async fn handle_new_conversation(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<NewConversationResponse>, AppError> {
    let req: NewConversationRequest = lenient_body(&body);
    let conversation_id = state
        .service
        .new_conversation(req)
        .await
        .map_err(|e| widget_error(e, GuardStatus::Forbidden))?;
    Ok(Json(NewConversationResponse { conversation_id }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConversationResponse {
    conversation_id: String,
    app_key: String,
    messages: Vec<Message>,
}

async fn handle_get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationResponse>, AppError> {
    let conv = state
        .service
        .conversation(&id)
        .await
        .map_err(|e| widget_error(e, GuardStatus::Forbidden))?;
    Ok(Json(ConversationResponse {
        conversation_id: conv.id,
        app_key: conv.app_key,
        messages: conv.messages,
    }))
}

async fn handle_missing_conversation_id() -> AppError {
    widget_error(WidgetError::MissingId, GuardStatus::Forbidden)
}

// ============ Knowledge base ============

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct IngestRequest {
    #[serde(default, deserialize_with = "lenient::string")]
    app_key: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    parent_origin: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    filename: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    content: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestResponse {
    ok: bool,
    chunks_stored: usize,
}

async fn handle_ingest(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<IngestResponse>, AppError> {
    let req: IngestRequest = lenient_body(&body);
    let forbidden = |e| widget_error(e, GuardStatus::Forbidden);

    if trimmed(&req.app_key).is_empty() {
        return Err(forbidden(WidgetError::MissingAppKey));
    }
    let content = req.content.as_deref().unwrap_or("");
    if content.trim().is_empty() {
        return Err(forbidden(WidgetError::MissingContent));
    }
    let app = state
        .service
        .authorize(req.app_key.as_deref(), trimmed(&req.parent_origin))
        .await
        .map_err(forbidden)?;

    let filename = match trimmed(&req.filename) {
        "" => DEFAULT_FILENAME,
        f => f,
    };

    let outcome = ingest_markdown(
        state.service.stores().knowledge.as_ref(),
        state.embedder.as_deref(),
        state.config.chunking.max_chars,
        &app.app_key,
        filename,
        content,
    )
    .await
    .map_err(|e| forbidden(WidgetError::Storage(e)))?;

    Ok(Json(IngestResponse {
        ok: true,
        chunks_stored: outcome.chunks_stored,
    }))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    #[serde(default, deserialize_with = "lenient::string")]
    app_key: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    parent_origin: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    query: Option<String>,
}

#[derive(Serialize)]
struct SearchResponse {
    chunks: Vec<ScoredChunk>,
}

async fn handle_search(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SearchResponse>, AppError> {
    let req: SearchRequest = lenient_body(&body);
    let chunks = state
        .service
        .search(
            req.app_key.as_deref(),
            trimmed(&req.parent_origin),
            req.query.as_deref(),
        )
        .await
        .map_err(|e| widget_error(e, GuardStatus::Forbidden))?;
    Ok(Json(SearchResponse { chunks }))
}

// ============ Static assets and health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_loader() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "application/javascript; charset=utf-8"),
            (header::CACHE_CONTROL, "public, max-age=300"),
        ],
        LOADER_JS,
    )
}

async fn handle_embed() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        EMBED_HTML,
    )
}
