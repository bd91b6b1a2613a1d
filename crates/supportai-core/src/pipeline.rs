//! Widget-facing operations: config lookup, chat turns, conversation reset,
//! conversation fetch, and guarded knowledge-base search.
//!
//! [`WidgetService`] owns every dependency a request needs (stores, ranker,
//! optional language model) and runs the chat state machine:
//!
//! ```text
//! validate -> resolve conversation -> latest user message -> retrieve chunks
//!          -> generate reply -> persist pair -> (caller streams tokens)
//! ```
//!
//! All validation, including the domain guard, completes before any
//! conversation is created. Persistence completes before the caller starts
//! streaming, so a client disconnect never loses a turn.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::conversation::{record_exchange, resolve_conversation, start_new_conversation};
use crate::error::{WidgetError, WidgetResult};
use crate::generate::{generate_reply, GenerateInput, GenerationOptions, LanguageModel, SourceRef};
use crate::guard::authorize;
use crate::lenient;
use crate::models::{now_ms, App, Conversation, Message, Role, ScoredChunk, WidgetConfig};
use crate::search::ChunkRanker;
use crate::store::Stores;

/// One message as sent by the widget. Fields are lenient; validation
/// happens in [`WidgetService::chat_turn`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncomingMessage {
    #[serde(default, deserialize_with = "lenient::string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub ts: Option<i64>,
}

/// Body of `POST /chat`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default, deserialize_with = "lenient::string")]
    pub app_key: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub parent_origin: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub conversation_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub messages: Option<Vec<IncomingMessage>>,
}

/// Body of `POST /conversations/new`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversationRequest {
    #[serde(default, deserialize_with = "lenient::string")]
    pub app_key: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub parent_origin: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub current_conversation_id: Option<String>,
}

/// Outcome of a chat turn, already persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub conversation_id: String,
    pub reply: String,
    pub sources: Vec<SourceRef>,
}

/// Split a reply into stream tokens: one per space-separated part, with the
/// separator re-attached to every token except the last. Concatenating the
/// tokens reproduces `reply`.
pub fn reply_tokens(reply: &str) -> Vec<String> {
    let parts: Vec<&str> = reply.split(' ').collect();
    let last = parts.len() - 1;
    parts
        .iter()
        .enumerate()
        .map(|(i, p)| if i == last { p.to_string() } else { format!("{} ", p) })
        .collect()
}

fn required(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Clone)]
pub struct WidgetService {
    stores: Stores,
    ranker: Arc<dyn ChunkRanker>,
    model: Option<Arc<dyn LanguageModel>>,
    options: GenerationOptions,
    retrieval_limit: usize,
}

impl WidgetService {
    pub fn new(
        stores: Stores,
        ranker: Arc<dyn ChunkRanker>,
        model: Option<Arc<dyn LanguageModel>>,
        options: GenerationOptions,
        retrieval_limit: usize,
    ) -> Self {
        Self {
            stores,
            ranker,
            model,
            options,
            retrieval_limit,
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Look up `app_key` and run the domain guard against `parent_origin`.
    pub async fn authorize(&self, app_key: Option<&str>, parent_origin: &str) -> WidgetResult<App> {
        let app_key = required(app_key).ok_or(WidgetError::MissingAppKey)?;
        let app = self.stores.apps.find_app(app_key).await?;
        let app = authorize(app_key, app.as_ref(), parent_origin)?;
        Ok(app.clone())
    }

    /// Public theme and copy for a guarded widget.
    pub async fn widget_config(
        &self,
        app_key: Option<&str>,
        parent_origin: &str,
    ) -> WidgetResult<WidgetConfig> {
        let app = self.authorize(app_key, parent_origin).await?;
        Ok(WidgetConfig::from(&app))
    }

    /// Run one chat turn up to and including persistence.
    pub async fn chat_turn(&self, req: ChatRequest) -> WidgetResult<ChatTurn> {
        let app_key = required(req.app_key.as_deref()).ok_or(WidgetError::MissingAppKey)?;
        let messages = req
            .messages
            .as_deref()
            .filter(|m| !m.is_empty())
            .ok_or(WidgetError::MissingMessages)?;
        let parent_origin = req.parent_origin.as_deref().unwrap_or("").trim();
        let app = self.authorize(Some(app_key), parent_origin).await?;

        let latest = messages
            .iter()
            .rev()
            .find(|m| m.role.as_deref() == Some(Role::User.as_str()))
            .ok_or(WidgetError::EmptyUserMessage)?;
        let query = required(latest.text.as_deref()).ok_or(WidgetError::EmptyUserMessage)?;

        let conv = resolve_conversation(
            self.stores.conversations.as_ref(),
            &app.app_key,
            parent_origin,
            req.conversation_id.as_deref(),
        )
        .await?;

        let history = self
            .stores
            .conversations
            .get_conversation(&conv.id)
            .await?
            .map(|c| c.messages)
            .unwrap_or_default();

        let sources: Vec<ScoredChunk> = self
            .ranker
            .rank(
                self.stores.knowledge.as_ref(),
                &app.app_key,
                query,
                self.retrieval_limit,
            )
            .await?;
        tracing::debug!(
            app_key = %app.app_key,
            ranker = self.ranker.name(),
            hits = sources.len(),
            "retrieved knowledge-base chunks"
        );

        let generated = generate_reply(
            self.model.as_deref(),
            &self.options,
            GenerateInput {
                query,
                sources: &sources,
                history: &history,
            },
        )
        .await;

        let user = Message {
            id: required(latest.id.as_deref())
                .map(String::from)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            role: Role::User,
            text: latest.text.clone().unwrap_or_default(),
            ts: latest.ts.unwrap_or_else(now_ms),
        };
        let bot = Message::new(Role::Bot, generated.reply.clone());

        let conversations = self.stores.conversations.as_ref();
        let mut conversation_id = conv.id;
        let appended = record_exchange(
            conversations,
            &conversation_id,
            &app.app_key,
            parent_origin,
            Some(user.clone()),
            bot.clone(),
        )
        .await?;
        if !appended {
            // closed mid-turn ("new chat" from another tab): record in a fresh one
            let fresh = resolve_conversation(conversations, &app.app_key, parent_origin, None).await?;
            tracing::warn!(
                closed = %conversation_id,
                conversation_id = %fresh.id,
                "conversation closed during turn; recording exchange in a new conversation"
            );
            conversation_id = fresh.id;
            let recorded = record_exchange(
                conversations,
                &conversation_id,
                &app.app_key,
                parent_origin,
                Some(user),
                bot,
            )
            .await?;
            if !recorded {
                return Err(WidgetError::Storage(anyhow::anyhow!(
                    "conversation {} closed before the exchange could be recorded",
                    conversation_id
                )));
            }
        }

        tracing::info!(
            app_key = %app.app_key,
            conversation_id = %conversation_id,
            kind = ?generated.kind,
            fallback = ?generated.fallback,
            "chat turn complete"
        );

        Ok(ChatTurn {
            conversation_id,
            reply: generated.reply,
            sources: generated.used_sources,
        })
    }

    /// Close the caller's current conversation and open a fresh one.
    pub async fn new_conversation(&self, req: NewConversationRequest) -> WidgetResult<String> {
        let parent_origin = req.parent_origin.as_deref().unwrap_or("").trim();
        let app = self.authorize(req.app_key.as_deref(), parent_origin).await?;
        let id = start_new_conversation(
            self.stores.conversations.as_ref(),
            &app.app_key,
            parent_origin,
            req.current_conversation_id.as_deref(),
        )
        .await?;
        Ok(id)
    }

    /// Fetch a conversation with its messages. Not guarded; the id is the capability.
    pub async fn conversation(&self, id: &str) -> WidgetResult<Conversation> {
        let id = required(Some(id)).ok_or(WidgetError::MissingId)?;
        self.stores
            .conversations
            .get_conversation(id)
            .await?
            .ok_or_else(|| WidgetError::NotFound(id.to_string()))
    }

    /// Guarded knowledge-base search using the configured ranker.
    pub async fn search(
        &self,
        app_key: Option<&str>,
        parent_origin: &str,
        query: Option<&str>,
    ) -> WidgetResult<Vec<ScoredChunk>> {
        let app_key = required(app_key).ok_or(WidgetError::MissingAppKey)?;
        let query = required(query).ok_or(WidgetError::MissingQuery)?;
        let app = self.authorize(Some(app_key), parent_origin).await?;
        let hits = self
            .ranker
            .rank(
                self.stores.knowledge.as_ref(),
                &app.app_key,
                query,
                self.retrieval_limit,
            )
            .await?;
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::WELCOME_MESSAGE;
    use crate::models::{CopyText, NewChunk, Theme, DEFAULT_BORDER_COLOR};
    use crate::search::LexicalRanker;
    use crate::store::memory::InMemoryStore;
    use crate::store::{AppStore, ConversationStore, KnowledgeStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    const ORIGIN: &str = "https://widget.test";

    #[derive(Default)]
    struct RecordingModel {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for RecordingModel {
        fn model_name(&self) -> &str {
            "recording"
        }

        async fn generate(&self, prompt: &str, _: &GenerationOptions) -> anyhow::Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("Run the installer and follow the prompts.".to_string())
        }
    }

    async fn setup(model: Option<Arc<dyn LanguageModel>>) -> (Arc<InMemoryStore>, WidgetService) {
        let store = Arc::new(InMemoryStore::new());
        store
            .create_app(&App {
                app_key: "app_demo".into(),
                owner_id: "owner".into(),
                name: "Demo".into(),
                allowed_domains: vec!["widget.test".into()],
                theme: Theme::default(),
                copy: CopyText::default(),
                enable_border: false,
                border_color: DEFAULT_BORDER_COLOR.into(),
                created_at: 1,
                updated_at: 1,
            })
            .await
            .unwrap();
        store
            .replace_chunks(
                "app_demo",
                "guide.md",
                &[
                    NewChunk {
                        title: "guide.md • Install".into(),
                        text: "To install the app download the package.".into(),
                        embedding: None,
                    },
                    NewChunk {
                        title: "guide.md • Billing".into(),
                        text: "Invoices are sent monthly.".into(),
                        embedding: None,
                    },
                ],
            )
            .await
            .unwrap();
        let service = WidgetService::new(
            Stores::from_backend(store.clone()),
            Arc::new(LexicalRanker),
            model,
            GenerationOptions::default(),
            5,
        );
        (store, service)
    }

    fn user_message(text: &str) -> IncomingMessage {
        IncomingMessage {
            id: Some("client-msg-1".into()),
            role: Some("user".into()),
            text: Some(text.into()),
            ts: Some(42),
        }
    }

    fn chat(origin: &str, conversation_id: Option<&str>, text: &str) -> ChatRequest {
        ChatRequest {
            app_key: Some("app_demo".into()),
            parent_origin: Some(origin.into()),
            conversation_id: conversation_id.map(String::from),
            messages: Some(vec![user_message(text)]),
        }
    }

    #[test]
    fn test_reply_tokens() {
        assert_eq!(reply_tokens("Run the installer"), vec!["Run ", "the ", "installer"]);
        assert_eq!(reply_tokens("single"), vec!["single"]);
        let reply = "two  spaces here";
        assert_eq!(reply_tokens(reply).concat(), reply);
    }

    #[tokio::test]
    async fn test_chat_turn_persists_pair_after_welcome() {
        let model = Arc::new(RecordingModel::default());
        let (store, service) = setup(Some(model.clone())).await;

        let turn = service
            .chat_turn(chat(ORIGIN, None, "How do I install it?"))
            .await
            .unwrap();
        assert_eq!(turn.reply, "Run the installer and follow the prompts.");
        assert_eq!(turn.sources.len(), 1);
        assert_eq!(turn.sources[0].title, "guide.md • Install");

        let conv = store.get_conversation(&turn.conversation_id).await.unwrap().unwrap();
        assert_eq!(conv.messages.len(), 3);
        assert_eq!(conv.messages[0].text, WELCOME_MESSAGE);
        assert_eq!(conv.messages[1].id, "client-msg-1");
        assert_eq!(conv.messages[1].ts, 42);
        assert_eq!(conv.messages[2].role, Role::Bot);

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("--- Source 1: guide.md • Install [guide.md] ---"));
        assert!(!prompts[0].contains("Billing"));
        assert!(prompts[0].contains("Assistant: Hi! I'm your support assistant."));
    }

    #[tokio::test]
    async fn test_chat_turn_continues_conversation() {
        let (store, service) = setup(None).await;
        let first = service.chat_turn(chat(ORIGIN, None, "hello")).await.unwrap();
        let second = service
            .chat_turn(chat(ORIGIN, Some(&first.conversation_id), "thanks"))
            .await
            .unwrap();
        assert_eq!(first.conversation_id, second.conversation_id);
        let conv = store.get_conversation(&first.conversation_id).await.unwrap().unwrap();
        assert_eq!(conv.messages.len(), 5);
        assert_eq!(second.reply, "Goodbye! Feel free to reach out if you need anything else.");
    }

    #[tokio::test]
    async fn test_chat_validation_order() {
        let (_store, service) = setup(None).await;

        let mut req = chat(ORIGIN, None, "hi");
        req.app_key = Some("  ".into());
        assert_eq!(service.chat_turn(req).await.unwrap_err().code(), "MISSING_APP_KEY");

        let mut req = chat("https://evil.test", None, "hi");
        req.messages = Some(vec![]);
        assert_eq!(service.chat_turn(req).await.unwrap_err().code(), "MISSING_MESSAGES");

        let err = service
            .chat_turn(chat("https://evil.test", None, "   "))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DOMAIN_NOT_ALLOWED");

        let err = service.chat_turn(chat(ORIGIN, None, "   ")).await.unwrap_err();
        assert_eq!(err.code(), "EMPTY_USER_MESSAGE");

        let mut req = chat(ORIGIN, None, "hi");
        req.messages = Some(vec![IncomingMessage {
            role: Some("bot".into()),
            text: Some("hello".into()),
            ..Default::default()
        }]);
        assert_eq!(service.chat_turn(req).await.unwrap_err().code(), "EMPTY_USER_MESSAGE");
    }

    /// Closes the target conversation right before the first append, as a
    /// concurrent "new chat" would.
    struct ClosingConversations {
        inner: Arc<InMemoryStore>,
        closed: AtomicBool,
    }

    #[async_trait]
    impl ConversationStore for ClosingConversations {
        async fn create_conversation(
            &self,
            app_key: &str,
            parent_origin: &str,
            initial: &[Message],
        ) -> anyhow::Result<String> {
            self.inner.create_conversation(app_key, parent_origin, initial).await
        }

        async fn is_active(&self, id: &str, app_key: &str) -> anyhow::Result<bool> {
            self.inner.is_active(id, app_key).await
        }

        async fn deactivate(&self, id: &str, app_key: &str) -> anyhow::Result<bool> {
            self.inner.deactivate(id, app_key).await
        }

        async fn append_messages(
            &self,
            id: &str,
            app_key: &str,
            parent_origin: &str,
            messages: &[Message],
        ) -> anyhow::Result<bool> {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.inner.deactivate(id, app_key).await?;
            }
            self.inner.append_messages(id, app_key, parent_origin, messages).await
        }

        async fn get_conversation(&self, id: &str) -> anyhow::Result<Option<Conversation>> {
            self.inner.get_conversation(id).await
        }
    }

    #[tokio::test]
    async fn test_exchange_survives_conversation_closed_mid_turn() {
        let (store, _) = setup(None).await;
        let stores = Stores {
            apps: store.clone(),
            knowledge: store.clone(),
            conversations: Arc::new(ClosingConversations {
                inner: store.clone(),
                closed: AtomicBool::new(false),
            }),
        };
        let service = WidgetService::new(
            stores,
            Arc::new(LexicalRanker),
            None,
            GenerationOptions::default(),
            5,
        );

        let turn = service
            .chat_turn(chat(ORIGIN, None, "How do I install it?"))
            .await
            .unwrap();

        assert_eq!(store.conversation_count(), 2);
        let conv = store.get_conversation(&turn.conversation_id).await.unwrap().unwrap();
        assert!(conv.is_active);
        assert_eq!(conv.messages.len(), 3);
        assert_eq!(conv.messages[0].text, WELCOME_MESSAGE);
        assert_eq!(conv.messages[1].text, "How do I install it?");
        assert_eq!(conv.messages[2].text, turn.reply);
    }

    #[tokio::test]
    async fn test_rejected_chat_creates_no_conversation() {
        let (store, service) = setup(None).await;
        let before = store.list_chunks("app_demo", None).await.unwrap().len();
        for origin in ["https://evil.test", ""] {
            assert!(service.chat_turn(chat(origin, None, "install")).await.is_err());
        }
        assert_eq!(store.conversation_count(), 0);
        assert_eq!(store.list_chunks("app_demo", None).await.unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_new_conversation_and_fetch() {
        let (store, service) = setup(None).await;
        let first = service.chat_turn(chat(ORIGIN, None, "hello")).await.unwrap();

        let new_id = service
            .new_conversation(NewConversationRequest {
                app_key: Some("app_demo".into()),
                parent_origin: Some(ORIGIN.into()),
                current_conversation_id: Some(first.conversation_id.clone()),
            })
            .await
            .unwrap();
        assert_ne!(new_id, first.conversation_id);
        assert!(!store.is_active(&first.conversation_id, "app_demo").await.unwrap());

        let fetched = service.conversation(&new_id).await.unwrap();
        assert_eq!(fetched.messages.len(), 1);
        assert_eq!(service.conversation("").await.unwrap_err().code(), "MISSING_ID");
        assert_eq!(service.conversation("missing").await.unwrap_err().code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_widget_config_and_search() {
        let (_store, service) = setup(None).await;
        let cfg = service.widget_config(Some("app_demo"), ORIGIN).await.unwrap();
        assert_eq!(cfg.copy.title, "Support");
        assert_eq!(
            service.widget_config(Some("app_nope"), ORIGIN).await.unwrap_err().code(),
            "INVALID_APP_KEY"
        );
        assert_eq!(
            service.widget_config(None, ORIGIN).await.unwrap_err().code(),
            "MISSING_APP_KEY"
        );

        let hits = service
            .search(Some("app_demo"), ORIGIN, Some("invoices"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(
            service.search(Some("app_demo"), ORIGIN, Some(" ")).await.unwrap_err().code(),
            "MISSING_QUERY"
        );
    }
}
