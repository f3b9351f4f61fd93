use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attachment::Attachment;

/// Stable message identity, assigned monotonically by the store and never reused.
pub type MessageId = i64;
/// Stable contact identity.
pub type ContactId = i64;
/// Stable conversation identity.
pub type ConversationId = i64;

/// Which side of the conversation authored a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Received from a remote contact.
    Inbound,
    /// Written by the local user.
    Outbound,
}

/// Transport acknowledgement state of a message.
///
/// Expected to advance `Pending -> Sent -> (Delivered | Error)`, but nothing in
/// this crate enforces the order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DeliveryStatus {
    /// Queued locally, not yet accepted by the server.
    Pending,
    /// Accepted by the server.
    Sent,
    /// Acknowledged by the recipient.
    Delivered,
    /// Legacy stored value. Displayed exactly like `Delivered`.
    Received,
    /// The server reported a delivery error.
    Error,
    /// Stored value this build does not know about.
    #[serde(other)]
    Unknown,
}

impl DeliveryStatus {
    /// `true` for `Delivered` and its legacy alias `Received`.
    pub fn is_delivered(self) -> bool {
        matches!(self, Self::Delivered | Self::Received)
    }
}

/// Encryption axis of a message's coder status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EncryptionMode {
    /// Sent or received in plain text.
    None,
    /// Encrypted content that has not been decrypted (yet).
    Encrypted,
    /// Encrypted content that was decrypted successfully.
    Decrypted,
    #[serde(other)]
    Unknown,
}

impl EncryptionMode {
    pub const ALL: [Self; 4] = [Self::None, Self::Encrypted, Self::Decrypted, Self::Unknown];
}

/// Signing axis of a message's coder status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SigningMode {
    /// No signature present.
    None,
    /// Signed (by us, for outbound messages).
    Signed,
    /// Signature checked against the sender's key.
    Verified,
    #[serde(other)]
    Unknown,
}

impl SigningMode {
    pub const ALL: [Self; 4] = [Self::None, Self::Signed, Self::Verified, Self::Unknown];
}

/// Cryptographic handling applied to a message, as reported by the crypto collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoderStatus {
    pub encryption: EncryptionMode,
    pub signing: SigningMode,
    /// Human-readable security/decoding errors attached to the message.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl CoderStatus {
    pub fn new(encryption: EncryptionMode, signing: SigningMode) -> Self {
        Self {
            encryption,
            signing,
            errors: Vec::new(),
        }
    }

    /// Neither encrypted nor signed.
    pub fn plain() -> Self {
        Self::new(EncryptionMode::None, SigningMode::None)
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    /// Content is still ciphertext.
    pub fn is_encrypted(&self) -> bool {
        self.encryption == EncryptionMode::Encrypted
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl Default for CoderStatus {
    fn default() -> Self {
        Self::plain()
    }
}

/// One endpoint a message was sent to or received from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transmission {
    /// Remote contact of this endpoint.
    pub contact: ContactId,
    /// Full address used on the wire, for example `alice@example.org/phone`.
    pub address: String,
    /// When the endpoint acknowledged the message.
    pub received_at: Option<DateTime<Utc>>,
}

impl Transmission {
    pub fn new(contact: ContactId, address: impl Into<String>) -> Self {
        Self {
            contact,
            address: address.into(),
            received_at: None,
        }
    }
}

/// Body of a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MessageContent {
    pub text: String,
    /// Group-chat command annotation (for example a membership change).
    pub group_command: Option<String>,
    pub attachment: Option<Attachment>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Domain message as owned by the storage/protocol collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub direction: Direction,
    pub status: DeliveryStatus,
    pub coder: CoderStatus,
    /// Local creation (outbound) or arrival (inbound) time.
    pub created_at: DateTime<Utc>,
    /// Time stamped by the server, when known.
    pub server_at: Option<DateTime<Utc>>,
    /// Error text reported by the server, when any.
    pub server_error: Option<String>,
    pub content: MessageContent,
    pub transmissions: Vec<Transmission>,
}

impl Message {
    /// Outbound message to one contact, still pending.
    pub fn outbound(
        to: Transmission,
        content: MessageContent,
        coder: CoderStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            direction: Direction::Outbound,
            status: DeliveryStatus::Pending,
            coder,
            created_at,
            server_at: None,
            server_error: None,
            content,
            transmissions: vec![to],
        }
    }

    /// Inbound message from one contact.
    pub fn inbound(
        from: Transmission,
        content: MessageContent,
        coder: CoderStatus,
        created_at: DateTime<Utc>,
        server_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: 0,
            direction: Direction::Inbound,
            status: DeliveryStatus::Received,
            coder,
            created_at,
            server_at,
            server_error: None,
            content,
            transmissions: vec![from],
        }
    }

    pub fn is_inbound(&self) -> bool {
        self.direction == Direction::Inbound
    }

    /// Earliest acknowledgement reported by any transmission.
    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.transmissions
            .iter()
            .filter_map(|transmission| transmission.received_at)
            .min()
    }

    /// Sending endpoint of an inbound message.
    pub fn sender(&self) -> Option<&Transmission> {
        if self.is_inbound() {
            self.transmissions.first()
        } else {
            None
        }
    }
}

/// Reachability of a contact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Presence {
    #[default]
    Unknown,
    Available,
    Unavailable,
}

/// Remote party as known to the local address book.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub id: ContactId,
    /// Display name; may be empty.
    pub name: String,
    /// Bare or full address, for example `alice@example.org`.
    pub address: String,
    #[serde(default)]
    pub presence: Presence,
    /// Free-form status text published by the contact.
    pub status_text: Option<String>,
}

impl Contact {
    pub fn new(id: ContactId, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            address: address.into(),
            presence: Presence::Unknown,
            status_text: None,
        }
    }
}

/// What changed on an entity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DeltaKind {
    /// Availability of a contact.
    Presence,
    /// Displayed text (message body, contact display name).
    Text,
    /// Delivery or coder status.
    Status,
    /// Attachment download progress, file or preview.
    Attachment,
    /// Collection membership.
    Structural,
    /// Unspecified change; watchers refresh everything they derive.
    #[serde(other)]
    Unspecified,
}

/// Sub-entity a delta refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DeltaPayload {
    Message(MessageId),
    Contact(ContactId),
}

/// Typed change notification delivered to subscribers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Delta {
    pub kind: DeltaKind,
    pub payload: Option<DeltaPayload>,
}

impl Delta {
    pub fn new(kind: DeltaKind) -> Self {
        Self {
            kind,
            payload: None,
        }
    }

    pub fn unspecified() -> Self {
        Self::new(DeltaKind::Unspecified)
    }

    pub fn for_message(kind: DeltaKind, id: MessageId) -> Self {
        Self {
            kind,
            payload: Some(DeltaPayload::Message(id)),
        }
    }

    pub fn for_contact(kind: DeltaKind, id: ContactId) -> Self {
        Self {
            kind,
            payload: Some(DeltaPayload::Contact(id)),
        }
    }
}

/// State change produced off the owner thread and handed to it for application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Mutation {
    /// A message was stored in a conversation. The store assigns its id.
    MessageArrived {
        conversation: ConversationId,
        message: Message,
    },
    /// Delivery status reported by the server.
    Status {
        message: MessageId,
        status: DeliveryStatus,
    },
    /// Receipt from one endpoint.
    Receipt {
        message: MessageId,
        contact: ContactId,
        received_at: DateTime<Utc>,
    },
    /// Error text reported by the server.
    ServerError { message: MessageId, text: String },
    /// Decryption finished (successfully or not).
    Decrypted {
        message: MessageId,
        text: String,
        coder: CoderStatus,
    },
    /// Raw attachment download progress code.
    AttachmentProgress { message: MessageId, code: i32 },
    /// Attachment fully downloaded.
    AttachmentResolved { message: MessageId, path: PathBuf },
    /// Thumbnail for an attachment became available.
    PreviewReady { message: MessageId, path: PathBuf },
    /// Contact changed its display name.
    ContactRenamed { contact: ContactId, name: String },
    /// Contact availability changed.
    ContactPresence {
        contact: ContactId,
        presence: Presence,
        status_text: Option<String>,
    },
}

impl Mutation {
    /// Short stable name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageArrived { .. } => "message_arrived",
            Self::Status { .. } => "status",
            Self::Receipt { .. } => "receipt",
            Self::ServerError { .. } => "server_error",
            Self::Decrypted { .. } => "decrypted",
            Self::AttachmentProgress { .. } => "attachment_progress",
            Self::AttachmentResolved { .. } => "attachment_resolved",
            Self::PreviewReady { .. } => "preview_ready",
            Self::ContactRenamed { .. } => "contact_renamed",
            Self::ContactPresence { .. } => "contact_presence",
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
    }

    #[test]
    fn received_is_stored_distinctly_but_counts_as_delivered() {
        assert_ne!(DeliveryStatus::Received, DeliveryStatus::Delivered);
        assert!(DeliveryStatus::Received.is_delivered());
        assert!(DeliveryStatus::Delivered.is_delivered());
        assert!(!DeliveryStatus::Sent.is_delivered());
    }

    #[test]
    fn unknown_stored_values_deserialize_to_fallback_variants() {
        let status: DeliveryStatus = serde_json::from_str("\"Bounced\"").unwrap();
        assert_eq!(status, DeliveryStatus::Unknown);

        let mode: EncryptionMode = serde_json::from_str("\"Quantum\"").unwrap();
        assert_eq!(mode, EncryptionMode::Unknown);

        let kind: DeltaKind = serde_json::from_str("\"Typing\"").unwrap();
        assert_eq!(kind, DeltaKind::Unspecified);
    }

    #[test]
    fn delivered_at_uses_earliest_acknowledgement() {
        let mut message = Message::outbound(
            Transmission::new(1, "alice@example.org"),
            MessageContent::text("hi"),
            CoderStatus::plain(),
            at(0),
        );
        assert_eq!(message.delivered_at(), None);

        let mut second = Transmission::new(2, "bob@example.org");
        second.received_at = Some(at(9));
        message.transmissions.push(second);
        message.transmissions[0].received_at = Some(at(4));

        assert_eq!(message.delivered_at(), Some(at(4)));
    }

    #[test]
    fn sender_is_only_reported_for_inbound_messages() {
        let inbound = Message::inbound(
            Transmission::new(7, "carol@example.org/laptop"),
            MessageContent::text("yo"),
            CoderStatus::plain(),
            at(1),
            None,
        );
        assert_eq!(inbound.sender().map(|t| t.contact), Some(7));

        let outbound = Message::outbound(
            Transmission::new(7, "carol@example.org"),
            MessageContent::text("yo"),
            CoderStatus::plain(),
            at(1),
        );
        assert!(outbound.sender().is_none());
    }
}
