//! Conversation message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A retrieved source document.
///
/// Identity is the URL: two sources with the same URL are the same document
/// regardless of title. The title is the breadcrumb trail of the page,
/// joined with `" | "`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub title: String,
}

impl Source {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }
}

/// Message role within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Function,
}

/// One message in the transcript.
///
/// Assistant messages are mutated in place while their turn is streaming:
/// `content`, `run_id`, and `sources` are refreshed after every applied
/// patch batch. Messages are only ever appended to the session transcript,
/// never removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    /// Sanitized HTML for assistant messages, raw text for user messages.
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Run correlation id, used by the feedback and trace side channels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Retrieved sources in pre-deduplication order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call_name: Option<String>,
}

impl Message {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            run_id: None,
            sources: None,
            name: None,
            function_call_name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// One completed turn, replayed to the service as conversational context
/// for subsequent turns. Append-only; failed turns never produce one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub human: String,
    pub ai: String,
}
