//! Error taxonomy for widget-facing operations.
//!
//! Validation failures and guard refusals carry stable codes that the widget
//! renders verbatim. Storage failures wrap the underlying [`anyhow::Error`]
//! and are never downgraded.

use thiserror::Error;

use crate::guard::GuardError;

#[derive(Debug, Error)]
pub enum WidgetError {
    #[error("appKey is required")]
    MissingAppKey,
    #[error("messages must not be empty")]
    MissingMessages,
    #[error("the latest message has no user text")]
    EmptyUserMessage,
    #[error("content must not be empty")]
    MissingContent,
    #[error("query must not be empty")]
    MissingQuery,
    #[error("conversation id is required")]
    MissingId,
    #[error("conversation not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Guard(#[from] GuardError),
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl WidgetError {
    pub fn code(&self) -> &'static str {
        match self {
            WidgetError::MissingAppKey => "MISSING_APP_KEY",
            WidgetError::MissingMessages => "MISSING_MESSAGES",
            WidgetError::EmptyUserMessage => "EMPTY_USER_MESSAGE",
            WidgetError::MissingContent => "MISSING_CONTENT",
            WidgetError::MissingQuery => "MISSING_QUERY",
            WidgetError::MissingId => "MISSING_ID",
            WidgetError::NotFound(_) => "NOT_FOUND",
            WidgetError::Guard(g) => g.code(),
            WidgetError::Storage(_) => "INTERNAL",
        }
    }
}

pub type WidgetResult<T> = std::result::Result<T, WidgetError>;
