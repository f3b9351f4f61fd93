//! View-synchronization core for chat message lists.
//!
//! This crate keeps an ordered list of display items in sync with a
//! conversation, projects delivery and encryption status into display facts,
//! and tracks attachment download state. Everything below runs on a single
//! owner thread; other threads hand mutations over through [`channel`].

/// User actions offered on display items.
pub mod actions;
/// Attachment download state and its display projection.
pub mod attachment;
/// Hand-off queue from collaborator threads to the owner thread.
pub mod channel;
/// Display tuning values.
pub mod config;
/// Observable entities and the in-memory chat context.
pub mod context;
/// Stable view-core error types.
pub mod error;
/// Text helpers for bodies, sender labels, copy and search.
pub mod normalization;
/// Subscription and synchronous delta fan-out.
pub mod notify;
/// Delivery and encryption status projection.
pub mod status;
/// Display item synchronizer.
pub mod sync;
/// Domain types shared by collaborators and the view core.
pub mod types;

pub use actions::{ActionOutcome, ItemAction, Transport, available_actions};
pub use attachment::{Attachment, AttachmentLink, AttachmentView, DownloadProgress};
pub use channel::{HandoffError, HandoffSender, OwnerInbox, handoff};
pub use config::ViewConfig;
pub use context::{ChatContext, ContactEntity, Conversation, MessageEntity, MessageStore};
pub use error::{ViewError, ViewErrorCategory};
pub use normalization::{CharWidthMeasure, DisplayText, TextMeasure};
pub use notify::{Publisher, Subscription, SubscriptionId, Watcher};
pub use status::{CryptoIcon, SecurityLabel, StatusIcon, StatusProjection, TooltipLine};
pub use sync::{
    DisplayFacts, DisplayItem, ItemSynchronizer, Lifecycle, ReconcileReport, Refresh,
    SharedSynchronizer,
};
pub use types::{
    CoderStatus, Contact, ContactId, ConversationId, Delta, DeltaKind, DeltaPayload, DeliveryStatus,
    Direction, EncryptionMode, Message, MessageContent, MessageId, Mutation, Presence, SigningMode,
    Transmission,
};
