//! Core data models used throughout SupportAI.
//!
//! These types represent the apps, knowledge-base chunks, and conversations
//! that flow through the ingestion and chat pipelines. Field names serialize
//! in camelCase because the widget frontend consumes them directly.

use serde::{Deserialize, Serialize};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Widget color palette.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    pub primary: String,
    pub background: String,
    pub panel: String,
    pub text: String,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            primary: "#7C3AED".to_string(),
            background: "#0B1220".to_string(),
            panel: "#0B1220".to_string(),
            text: "#FFFFFF".to_string(),
        }
    }
}

/// User-facing strings rendered by the widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyText {
    pub title: String,
    pub subtitle: String,
    pub placeholder: String,
}

impl Default for CopyText {
    fn default() -> Self {
        Self {
            title: "Support".to_string(),
            subtitle: "Ask anything — I'm here to help.".to_string(),
            placeholder: "Type your question...".to_string(),
        }
    }
}

pub const DEFAULT_BORDER_COLOR: &str = "rgba(255,255,255,0.12)";

/// A tenant's configured widget instance.
///
/// `allowed_domains` is always stored in normalized form (see
/// [`crate::guard::normalize_domain`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    pub app_key: String,
    pub owner_id: String,
    pub name: String,
    pub allowed_domains: Vec<String>,
    pub theme: Theme,
    pub copy: CopyText,
    pub enable_border: bool,
    pub border_color: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Partial update applied to an [`App`] by its owner.
///
/// `None` leaves the field untouched. Domains are normalized before they are
/// written.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppPatch {
    pub name: Option<String>,
    pub allowed_domains: Option<Vec<String>>,
    pub theme: Option<Theme>,
    pub copy: Option<CopyText>,
    pub enable_border: Option<bool>,
    pub border_color: Option<String>,
}

impl AppPatch {
    /// Apply this patch to `app`, bumping `updated_at`.
    pub fn apply(&self, app: &mut App) {
        if let Some(name) = &self.name {
            app.name = name.trim().to_string();
        }
        if let Some(domains) = &self.allowed_domains {
            app.allowed_domains = crate::guard::parse_domains(domains);
        }
        if let Some(theme) = &self.theme {
            app.theme = theme.clone();
        }
        if let Some(copy) = &self.copy {
            app.copy = copy.clone();
        }
        if let Some(enable) = self.enable_border {
            app.enable_border = enable;
        }
        if let Some(color) = &self.border_color {
            app.border_color = color.clone();
        }
        app.updated_at = now_ms();
    }
}

/// Public widget configuration returned by `GET /widget-config`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetConfig {
    pub theme: Theme,
    pub copy: CopyText,
    pub enable_border: bool,
    pub border_color: String,
}

impl From<&App> for WidgetConfig {
    fn from(app: &App) -> Self {
        Self {
            theme: app.theme.clone(),
            copy: app.copy.clone(),
            enable_border: app.enable_border,
            border_color: app.border_color.clone(),
        }
    }
}

/// A titled section produced by the chunker, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub title: String,
    pub text: String,
}

/// A chunk ready to be written, with an optional embedding vector.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub title: String,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
}

/// A stored knowledge-base chunk.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KbChunk {
    pub id: String,
    pub app_key: String,
    pub title: String,
    pub text: String,
    pub source_file: String,
    pub created_at: i64,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

/// A chunk returned by a ranker, with its relevance score (higher is better).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChunk {
    pub id: String,
    pub title: String,
    pub text: String,
    pub source_file: String,
    pub score: f64,
}

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Bot => "bot",
        }
    }

    /// Label used when the role is rendered into a model prompt.
    pub fn prompt_label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Bot => "Assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "bot" => Ok(Role::Bot),
            other => anyhow::bail!("unknown message role: {}", other),
        }
    }
}

/// One message in a conversation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub ts: i64,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            ts: now_ms(),
        }
    }
}

/// A persisted conversation with its ordered message log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub app_key: String,
    pub parent_origin: String,
    pub is_active: bool,
    pub messages: Vec<Message>,
    pub last_activity_at: i64,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let msg = Message::new(Role::Bot, "hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "bot");
        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back.role, Role::Bot);
    }

    #[test]
    fn unknown_role_rejected() {
        assert!("assistant".parse::<Role>().is_err());
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
    }

    #[test]
    fn patch_normalizes_domains() {
        let mut app = App {
            app_key: "app_x".into(),
            owner_id: "o".into(),
            name: "Demo".into(),
            allowed_domains: vec![],
            theme: Theme::default(),
            copy: CopyText::default(),
            enable_border: false,
            border_color: DEFAULT_BORDER_COLOR.into(),
            created_at: 0,
            updated_at: 0,
        };
        let patch = AppPatch {
            allowed_domains: Some(vec!["https://Foo.COM/x".into(), "bar.io".into()]),
            enable_border: Some(true),
            ..Default::default()
        };
        patch.apply(&mut app);
        assert_eq!(app.allowed_domains, vec!["foo.com", "bar.io"]);
        assert!(app.enable_border);
        assert!(app.updated_at > 0);
    }
}
