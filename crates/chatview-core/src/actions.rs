//! User actions offered on a display item.

use serde::{Deserialize, Serialize};

use crate::types::{Message, MessageId};

/// Action the presentation layer can offer for one message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ItemAction {
    /// Ask the crypto collaborator to try decrypting again.
    RetryDecrypt,
    /// Ask the transport to download the attachment again.
    RetryAttachment,
    /// Copy a plain-text rendering of the message.
    Copy,
}

impl ItemAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RetryDecrypt => "retry_decrypt",
            Self::RetryAttachment => "retry_attachment",
            Self::Copy => "copy",
        }
    }
}

/// Transport/crypto collaborator receiving explicit retry requests.
///
/// Requests are fire-and-forget; results come back as mutations.
pub trait Transport {
    fn request_decrypt_retry(&self, id: MessageId);

    fn request_attachment_retry(&self, id: MessageId);
}

/// Result of performing an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The request was handed to the transport.
    Forwarded,
    /// Text to put on the clipboard.
    Copied(String),
}

/// Actions applicable to `message`, in menu order.
pub fn available_actions(message: &Message) -> Vec<ItemAction> {
    let mut actions = Vec::with_capacity(3);
    if message.is_inbound() {
        if message.coder.is_encrypted() {
            actions.push(ItemAction::RetryDecrypt);
        }
        if message
            .content
            .attachment
            .as_ref()
            .is_some_and(|attachment| !attachment.is_resolved())
        {
            actions.push(ItemAction::RetryAttachment);
        }
    }
    actions.push(ItemAction::Copy);
    actions
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        attachment::Attachment,
        types::{CoderStatus, EncryptionMode, MessageContent, SigningMode, Transmission},
    };

    fn inbound(coder: CoderStatus, attachment: Option<Attachment>) -> Message {
        let mut content = MessageContent::text("x");
        content.attachment = attachment;
        Message::inbound(
            Transmission::new(2, "bob@example.org"),
            content,
            coder,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            None,
        )
    }

    #[test]
    fn copy_is_always_available() {
        assert_eq!(
            available_actions(&inbound(CoderStatus::plain(), None)),
            vec![ItemAction::Copy]
        );
    }

    #[test]
    fn encrypted_inbound_with_pending_attachment_offers_both_retries() {
        let message = inbound(
            CoderStatus::new(EncryptionMode::Encrypted, SigningMode::None),
            Some(Attachment::pending(None)),
        );
        assert_eq!(
            available_actions(&message),
            vec![
                ItemAction::RetryDecrypt,
                ItemAction::RetryAttachment,
                ItemAction::Copy
            ]
        );
    }

    #[test]
    fn outbound_and_resolved_messages_offer_no_retries() {
        let mut message = inbound(
            CoderStatus::new(EncryptionMode::Encrypted, SigningMode::None),
            Some(Attachment::pending(None)),
        );
        message.direction = crate::types::Direction::Outbound;
        assert_eq!(available_actions(&message), vec![ItemAction::Copy]);

        let resolved = inbound(
            CoderStatus::plain(),
            Some(Attachment::local("/tmp/a.bin", None)),
        );
        assert_eq!(available_actions(&resolved), vec![ItemAction::Copy]);
    }
}
