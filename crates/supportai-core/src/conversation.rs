//! Conversation continuity across widget sessions.

use anyhow::Result;

use crate::models::{Message, Role};
use crate::store::ConversationStore;

/// First message of every conversation.
pub const WELCOME_MESSAGE: &str = "Hi! I'm your support assistant. \nHow can I help you today ?";

/// Result of [`resolve_conversation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConversation {
    pub id: String,
    /// True when a new conversation had to be created.
    pub created: bool,
}

async fn create_with_welcome(
    store: &dyn ConversationStore,
    app_key: &str,
    parent_origin: &str,
) -> Result<String> {
    let welcome = Message::new(Role::Bot, WELCOME_MESSAGE);
    store
        .create_conversation(app_key, parent_origin, &[welcome])
        .await
}

/// Continue `supplied_id` if it is an active conversation of `app_key`,
/// otherwise start a new one seeded with the welcome message.
pub async fn resolve_conversation(
    store: &dyn ConversationStore,
    app_key: &str,
    parent_origin: &str,
    supplied_id: Option<&str>,
) -> Result<ResolvedConversation> {
    if let Some(id) = supplied_id.map(str::trim).filter(|id| !id.is_empty()) {
        if store.is_active(id, app_key).await? {
            return Ok(ResolvedConversation {
                id: id.to_string(),
                created: false,
            });
        }
        tracing::debug!(conversation_id = id, app_key, "supplied conversation not active; starting new");
    }
    let id = create_with_welcome(store, app_key, parent_origin).await?;
    Ok(ResolvedConversation { id, created: true })
}

/// "New chat": close `current_id` (if it belongs to `app_key`) and open a
/// fresh conversation. Unknown or foreign ids are ignored.
pub async fn start_new_conversation(
    store: &dyn ConversationStore,
    app_key: &str,
    parent_origin: &str,
    current_id: Option<&str>,
) -> Result<String> {
    if let Some(id) = current_id.map(str::trim).filter(|id| !id.is_empty()) {
        store.deactivate(id, app_key).await?;
    }
    create_with_welcome(store, app_key, parent_origin).await
}

/// Append one exchange as a single atomic update: the user message (when
/// present) followed by the bot reply.
pub async fn record_exchange(
    store: &dyn ConversationStore,
    conversation_id: &str,
    app_key: &str,
    parent_origin: &str,
    user: Option<Message>,
    bot: Message,
) -> Result<bool> {
    let mut batch = Vec::with_capacity(2);
    batch.extend(user);
    batch.push(bot);
    store
        .append_messages(conversation_id, app_key, parent_origin, &batch)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    const ORIGIN: &str = "https://example.com";

    #[tokio::test]
    async fn test_resolve_creates_with_single_welcome() {
        let store = InMemoryStore::new();
        for supplied in [None, Some(""), Some("does-not-exist")] {
            let resolved = resolve_conversation(&store, "app_1", ORIGIN, supplied)
                .await
                .unwrap();
            assert!(resolved.created);
            let conv = store.get_conversation(&resolved.id).await.unwrap().unwrap();
            assert_eq!(conv.messages.len(), 1);
            assert_eq!(conv.messages[0].role, Role::Bot);
            assert_eq!(conv.messages[0].text, WELCOME_MESSAGE);
        }
    }

    #[tokio::test]
    async fn test_resolve_reuses_active_conversation() {
        let store = InMemoryStore::new();
        let first = resolve_conversation(&store, "app_1", ORIGIN, None).await.unwrap();
        let again = resolve_conversation(&store, "app_1", ORIGIN, Some(&first.id))
            .await
            .unwrap();
        assert_eq!(again.id, first.id);
        assert!(!again.created);
    }

    #[tokio::test]
    async fn test_resolve_ignores_other_apps_conversation() {
        let store = InMemoryStore::new();
        let theirs = resolve_conversation(&store, "app_other", ORIGIN, None)
            .await
            .unwrap();
        let mine = resolve_conversation(&store, "app_1", ORIGIN, Some(&theirs.id))
            .await
            .unwrap();
        assert_ne!(mine.id, theirs.id);
        assert!(mine.created);
    }

    #[tokio::test]
    async fn test_start_new_deactivates_current() {
        let store = InMemoryStore::new();
        let old = resolve_conversation(&store, "app_1", ORIGIN, None).await.unwrap();
        let new_id = start_new_conversation(&store, "app_1", ORIGIN, Some(&old.id))
            .await
            .unwrap();
        assert_ne!(new_id, old.id);
        assert!(!store.is_active(&old.id, "app_1").await.unwrap());
        assert!(store.is_active(&new_id, "app_1").await.unwrap());

        // unknown current id is a no-op
        start_new_conversation(&store, "app_1", ORIGIN, Some("nope"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_record_exchange_appends_pair() {
        let store = InMemoryStore::new();
        let conv = resolve_conversation(&store, "app_1", ORIGIN, None).await.unwrap();
        let ok = record_exchange(
            &store,
            &conv.id,
            "app_1",
            "https://other.example.com",
            Some(Message::new(Role::User, "question")),
            Message::new(Role::Bot, "answer"),
        )
        .await
        .unwrap();
        assert!(ok);

        let stored = store.get_conversation(&conv.id).await.unwrap().unwrap();
        let roles: Vec<Role> = stored.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::Bot, Role::User, Role::Bot]);
        assert_eq!(stored.parent_origin, "https://other.example.com");
    }
}
