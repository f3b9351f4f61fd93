use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ContactId, ConversationId, MessageId};

/// Broad error category. None of these is fatal; callers log and move on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ViewErrorCategory {
    /// An id that is no longer (or was never) present.
    StaleReference,
    /// An entity reported a combination that cannot be applied.
    MalformedState,
    /// The requested action does not apply to the item.
    Unavailable,
}

/// Stable error payload for view-core operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ViewError {
    pub category: ViewErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    pub message: String,
}

impl ViewError {
    pub fn new(
        category: ViewErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn unknown_message(id: MessageId) -> Self {
        Self::new(
            ViewErrorCategory::StaleReference,
            "unknown_message",
            format!("message {id} is not present"),
        )
    }

    pub fn unknown_contact(id: ContactId) -> Self {
        Self::new(
            ViewErrorCategory::StaleReference,
            "unknown_contact",
            format!("contact {id} is not present"),
        )
    }

    pub fn unknown_conversation(id: ConversationId) -> Self {
        Self::new(
            ViewErrorCategory::StaleReference,
            "unknown_conversation",
            format!("conversation {id} is not present"),
        )
    }

    pub fn missing_attachment(id: MessageId) -> Self {
        Self::new(
            ViewErrorCategory::MalformedState,
            "missing_attachment",
            format!("message {id} has no attachment"),
        )
    }

    pub fn action_unavailable(id: MessageId, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ViewErrorCategory::Unavailable,
            "action_unavailable",
            format!("'{action}' does not apply to message {id}"),
        )
    }

    /// Stale references are expected under out-of-order notification.
    pub fn is_stale(&self) -> bool {
        self.category == ViewErrorCategory::StaleReference
    }
}
