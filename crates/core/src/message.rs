//! Message domain types.
//!
//! Messages are the conversational part of a run's history: the caller's
//! input, the model's replies, and synthetic replies fabricated by a run
//! error handler.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions
    System,
}

/// Where a message came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    /// Produced by the model (or supplied by the caller as input).
    #[default]
    Model,
    /// Fabricated by a run error handler in place of a model answer.
    ErrorHandler,
}

/// A single message in a run's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Provenance of the message
    #[serde(default, skip_serializing_if = "is_model_source")]
    pub source: MessageSource,
}

fn is_model_source(source: &MessageSource) -> bool {
    *source == MessageSource::Model
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            source: MessageSource::Model,
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create an assistant message standing in for a model answer that an
    /// error handler synthesized.
    pub fn from_error_handler(content: impl Into<String>) -> Self {
        Self {
            source: MessageSource::ErrorHandler,
            ..Self::assistant(content)
        }
    }
}
