//! Message model for owner-scoped conversations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::chat::core::ids::{MessageId, OwnerId};

/// Author role of a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Question typed by the owner.
    User,
    /// Reply from the model, welcome greeting, or failure notice.
    Assistant,
}

impl MessageRole {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            // Older records were written with "ai".
            "assistant" | "ai" => Ok(Self::Assistant),
            _ => Err(value.to_string()),
        }
    }
}

/// Fields supplied by the caller when appending a message.
///
/// Identifier, owner and timestamp are assigned by the store.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewMessage {
    /// Message text.
    pub text: String,
    /// Author role.
    pub role: MessageRole,
    /// User message this reply answers.
    pub reply_to: Option<MessageId>,
    /// Marks the auto-generated greeting.
    pub is_welcome_message: bool,
}

impl NewMessage {
    /// A question from the owner.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            role: MessageRole::User,
            reply_to: None,
            is_welcome_message: false,
        }
    }

    /// A model reply to `reply_to`.
    #[must_use]
    pub fn assistant_reply(text: impl Into<String>, reply_to: MessageId) -> Self {
        Self {
            text: text.into(),
            role: MessageRole::Assistant,
            reply_to: Some(reply_to),
            is_welcome_message: false,
        }
    }

    /// The per-owner greeting.
    #[must_use]
    pub fn welcome(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            role: MessageRole::Assistant,
            reply_to: None,
            is_welcome_message: true,
        }
    }
}

/// An immutable message as read back from the store.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned identifier.
    pub id: MessageId,
    /// Owning identity.
    pub owner_id: OwnerId,
    /// Message text.
    pub text: String,
    /// Author role.
    pub role: MessageRole,
    /// Store-assigned ordering key.
    pub timestamp: DateTime<Utc>,
    /// User message this reply answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    /// Marks the auto-generated greeting.
    #[serde(default)]
    pub is_welcome_message: bool,
}

impl Message {
    /// Build a local assistant notice that is shown but never persisted.
    ///
    /// `reply_to` names the question the notice reports on, if it was stored.
    #[must_use]
    pub fn local_notice(
        owner_id: OwnerId,
        text: impl Into<String>,
        reply_to: Option<MessageId>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            owner_id,
            text: text.into(),
            role: MessageRole::Assistant,
            timestamp: Utc::now(),
            reply_to,
            is_welcome_message: false,
        }
    }
}
