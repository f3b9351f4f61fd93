//! Observable domain entities and the owned context that holds them.
//!
//! Entities live on the owner thread (`Rc`/`RefCell`). Every mutator applies its
//! change, releases the borrow and then publishes exactly one delta.

use std::{
    cell::{Cell, Ref, RefCell},
    collections::HashMap,
    path::PathBuf,
    rc::Rc,
};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::{
    error::ViewError,
    notify::{Publisher, Subscription, Watcher},
    types::{
        CoderStatus, Contact, ContactId, ConversationId, Delta, DeltaKind, DeliveryStatus,
        Message, MessageId, Mutation, Presence,
    },
};

/// A message plus its watchers.
#[derive(Debug)]
pub struct MessageEntity {
    id: MessageId,
    message: RefCell<Message>,
    publisher: Publisher,
}

impl MessageEntity {
    pub fn new(message: Message) -> Rc<Self> {
        Rc::new(Self {
            id: message.id,
            message: RefCell::new(message),
            publisher: Publisher::new(),
        })
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Current state. Do not hold the guard across a mutation.
    pub fn message(&self) -> Ref<'_, Message> {
        self.message.borrow()
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn subscribe(&self, watcher: Rc<dyn Watcher>) -> Subscription {
        self.publisher.subscribe(watcher)
    }

    pub fn set_status(&self, status: DeliveryStatus) {
        self.mutate(DeltaKind::Status, |message| message.status = status);
    }

    /// Record an acknowledgement from `contact`. Returns `false` when no
    /// transmission targets that contact.
    pub fn record_receipt(&self, contact: ContactId, received_at: DateTime<Utc>) -> bool {
        let found = {
            let mut message = self.message.borrow_mut();
            match message
                .transmissions
                .iter_mut()
                .find(|transmission| transmission.contact == contact)
            {
                Some(transmission) => {
                    transmission.received_at = Some(received_at);
                    true
                }
                None => false,
            }
        };
        if found {
            self.publish(DeltaKind::Status);
        }
        found
    }

    pub fn set_server_error(&self, text: impl Into<String>) {
        let text = text.into();
        self.mutate(DeltaKind::Status, |message| message.server_error = Some(text));
    }

    pub fn set_text(&self, text: impl Into<String>) {
        let text = text.into();
        self.mutate(DeltaKind::Text, |message| message.content.text = text);
    }

    pub fn set_coder_status(&self, coder: CoderStatus) {
        self.mutate(DeltaKind::Status, |message| message.coder = coder);
    }

    /// Replace body and coder status in one step. Both text and status facts
    /// change, so the delta is unspecified.
    pub fn apply_decryption(&self, text: impl Into<String>, coder: CoderStatus) {
        let text = text.into();
        self.mutate(DeltaKind::Unspecified, |message| {
            message.content.text = text;
            message.coder = coder;
        });
    }

    /// Returns `false` when the message has no attachment.
    pub fn record_attachment_progress(&self, code: i32) -> bool {
        self.mutate_attachment(|attachment| attachment.record_progress(code))
    }

    pub fn resolve_attachment(&self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        self.mutate_attachment(|attachment| attachment.resolve(path))
    }

    pub fn set_attachment_preview(&self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        self.mutate_attachment(|attachment| attachment.set_preview(path))
    }

    fn mutate_attachment(&self, f: impl FnOnce(&mut crate::attachment::Attachment)) -> bool {
        let applied = {
            let mut message = self.message.borrow_mut();
            match message.content.attachment.as_mut() {
                Some(attachment) => {
                    f(attachment);
                    true
                }
                None => false,
            }
        };
        if applied {
            self.publish(DeltaKind::Attachment);
        }
        applied
    }

    fn mutate<R>(&self, kind: DeltaKind, f: impl FnOnce(&mut Message) -> R) -> R {
        let result = {
            let mut message = self.message.borrow_mut();
            f(&mut message)
        };
        self.publish(kind);
        result
    }

    fn publish(&self, kind: DeltaKind) {
        self.publisher.notify(&Delta::for_message(kind, self.id));
    }
}

/// A contact plus its watchers.
#[derive(Debug)]
pub struct ContactEntity {
    id: ContactId,
    contact: RefCell<Contact>,
    publisher: Publisher,
}

impl ContactEntity {
    pub fn new(contact: Contact) -> Rc<Self> {
        Rc::new(Self {
            id: contact.id,
            contact: RefCell::new(contact),
            publisher: Publisher::new(),
        })
    }

    pub fn id(&self) -> ContactId {
        self.id
    }

    pub fn contact(&self) -> Ref<'_, Contact> {
        self.contact.borrow()
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn subscribe(&self, watcher: Rc<dyn Watcher>) -> Subscription {
        self.publisher.subscribe(watcher)
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.contact.borrow_mut().name = name;
        self.publisher.notify(&Delta::for_contact(DeltaKind::Text, self.id));
    }

    pub fn set_presence(&self, presence: Presence, status_text: Option<String>) {
        {
            let mut contact = self.contact.borrow_mut();
            contact.presence = presence;
            if status_text.is_some() {
                contact.status_text = status_text;
            }
        }
        self.publisher.notify(&Delta::for_contact(DeltaKind::Presence, self.id));
    }
}

/// Ordered message collection of one chat.
#[derive(Debug)]
pub struct Conversation {
    id: ConversationId,
    messages: RefCell<Vec<Rc<MessageEntity>>>,
    read: Cell<bool>,
    publisher: Publisher,
}

impl Conversation {
    pub fn new(id: ConversationId) -> Rc<Self> {
        Rc::new(Self {
            id,
            messages: RefCell::new(Vec::new()),
            read: Cell::new(true),
            publisher: Publisher::new(),
        })
    }

    pub fn id(&self) -> ConversationId {
        self.id
    }

    /// Snapshot of the current messages, oldest first.
    pub fn messages(&self) -> Vec<Rc<MessageEntity>> {
        self.messages.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.borrow().is_empty()
    }

    pub fn is_read(&self) -> bool {
        self.read.get()
    }

    /// Returns `true` if the flag changed.
    pub fn mark_read(&self) -> bool {
        !self.read.replace(true)
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn subscribe(&self, watcher: Rc<dyn Watcher>) -> Subscription {
        self.publisher.subscribe(watcher)
    }

    fn push(&self, entity: Rc<MessageEntity>) {
        let inbound = entity.message().is_inbound();
        self.messages.borrow_mut().push(entity);
        if inbound {
            self.read.set(false);
        }
        self.publisher.notify(&Delta::new(DeltaKind::Structural));
    }
}

/// Storage/model collaborator as seen by the view core.
pub trait MessageStore {
    /// Ordered messages of a conversation; empty when unknown.
    fn messages(&self, conversation: ConversationId) -> Vec<Rc<MessageEntity>>;

    /// Mark a conversation read. Returns `true` if the flag changed.
    fn mark_read(&self, conversation: ConversationId) -> bool;

    fn message(&self, id: MessageId) -> Option<Rc<MessageEntity>>;

    fn contact(&self, id: ContactId) -> Option<Rc<ContactEntity>>;
}

/// In-memory owner of contacts, conversations and messages.
///
/// Passed explicitly to whatever needs it; there is no process-wide registry.
#[derive(Debug)]
pub struct ChatContext {
    contacts: RefCell<HashMap<ContactId, Rc<ContactEntity>>>,
    conversations: RefCell<HashMap<ConversationId, Rc<Conversation>>>,
    messages: RefCell<HashMap<MessageId, Rc<MessageEntity>>>,
    last_message_id: Cell<MessageId>,
}

impl Default for ChatContext {
    fn default() -> Self {
        Self {
            contacts: RefCell::new(HashMap::new()),
            conversations: RefCell::new(HashMap::new()),
            messages: RefCell::new(HashMap::new()),
            last_message_id: Cell::new(0),
        }
    }
}

impl ChatContext {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn add_contact(&self, contact: Contact) -> Rc<ContactEntity> {
        let entity = ContactEntity::new(contact);
        self.contacts
            .borrow_mut()
            .insert(entity.id(), Rc::clone(&entity));
        entity
    }

    /// Get or create a conversation.
    pub fn open_conversation(&self, id: ConversationId) -> Rc<Conversation> {
        Rc::clone(
            self.conversations
                .borrow_mut()
                .entry(id)
                .or_insert_with(|| Conversation::new(id)),
        )
    }

    pub fn conversation(&self, id: ConversationId) -> Option<Rc<Conversation>> {
        self.conversations.borrow().get(&id).cloned()
    }

    /// Store `message` at the end of `conversation`, assigning the next id.
    pub fn append_message(
        &self,
        conversation: ConversationId,
        mut message: Message,
    ) -> Result<Rc<MessageEntity>, ViewError> {
        let conversation = self
            .conversation(conversation)
            .ok_or_else(|| ViewError::unknown_conversation(conversation))?;

        let id = self.last_message_id.get() + 1;
        self.last_message_id.set(id);
        message.id = id;

        let entity = MessageEntity::new(message);
        self.messages.borrow_mut().insert(id, Rc::clone(&entity));
        debug!(message_id = id, conversation = conversation.id(), "message stored");
        conversation.push(Rc::clone(&entity));
        Ok(entity)
    }

    /// Apply a mutation handed over from another thread.
    ///
    /// Runs on the owner thread; watchers are notified synchronously.
    pub fn apply(&self, mutation: Mutation) -> Result<(), ViewError> {
        trace!(kind = mutation.kind(), "applying mutation");
        match mutation {
            Mutation::MessageArrived {
                conversation,
                message,
            } => self.append_message(conversation, message).map(|_| ()),
            Mutation::Status { message, status } => {
                self.require_message(message)?.set_status(status);
                Ok(())
            }
            Mutation::Receipt {
                message,
                contact,
                received_at,
            } => {
                if self
                    .require_message(message)?
                    .record_receipt(contact, received_at)
                {
                    Ok(())
                } else {
                    Err(ViewError::unknown_contact(contact))
                }
            }
            Mutation::ServerError { message, text } => {
                self.require_message(message)?.set_server_error(text);
                Ok(())
            }
            Mutation::Decrypted {
                message,
                text,
                coder,
            } => {
                self.require_message(message)?.apply_decryption(text, coder);
                Ok(())
            }
            Mutation::AttachmentProgress { message, code } => {
                let entity = self.require_message(message)?;
                entity
                    .record_attachment_progress(code)
                    .then_some(())
                    .ok_or_else(|| ViewError::missing_attachment(message))
            }
            Mutation::AttachmentResolved { message, path } => {
                let entity = self.require_message(message)?;
                entity
                    .resolve_attachment(path)
                    .then_some(())
                    .ok_or_else(|| ViewError::missing_attachment(message))
            }
            Mutation::PreviewReady { message, path } => {
                let entity = self.require_message(message)?;
                entity
                    .set_attachment_preview(path)
                    .then_some(())
                    .ok_or_else(|| ViewError::missing_attachment(message))
            }
            Mutation::ContactRenamed { contact, name } => {
                self.require_contact(contact)?.set_name(name);
                Ok(())
            }
            Mutation::ContactPresence {
                contact,
                presence,
                status_text,
            } => {
                self.require_contact(contact)?
                    .set_presence(presence, status_text);
                Ok(())
            }
        }
    }

    fn require_message(&self, id: MessageId) -> Result<Rc<MessageEntity>, ViewError> {
        self.message(id).ok_or_else(|| ViewError::unknown_message(id))
    }

    fn require_contact(&self, id: ContactId) -> Result<Rc<ContactEntity>, ViewError> {
        self.contact(id).ok_or_else(|| ViewError::unknown_contact(id))
    }
}

impl MessageStore for ChatContext {
    fn messages(&self, conversation: ConversationId) -> Vec<Rc<MessageEntity>> {
        self.conversation(conversation)
            .map(|conversation| conversation.messages())
            .unwrap_or_default()
    }

    fn mark_read(&self, conversation: ConversationId) -> bool {
        self.conversation(conversation)
            .is_some_and(|conversation| conversation.mark_read())
    }

    fn message(&self, id: MessageId) -> Option<Rc<MessageEntity>> {
        self.messages.borrow().get(&id).cloned()
    }

    fn contact(&self, id: ContactId) -> Option<Rc<ContactEntity>> {
        self.contacts.borrow().get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{
        attachment::Attachment,
        error::ViewErrorCategory,
        types::{EncryptionMode, MessageContent, SigningMode, Transmission},
    };

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
    }

    fn recorder() -> (Rc<RefCell<Vec<Delta>>>, Rc<dyn Watcher>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let watcher: Rc<dyn Watcher> = Rc::new(move |delta: &Delta| sink.borrow_mut().push(*delta));
        (seen, watcher)
    }

    fn setup() -> (Rc<ChatContext>, Rc<Conversation>) {
        let ctx = ChatContext::new();
        ctx.add_contact(Contact::new(1, "Alice", "alice@example.org"));
        let conversation = ctx.open_conversation(10);
        (ctx, conversation)
    }

    fn outbound() -> Message {
        Message::outbound(
            Transmission::new(1, "alice@example.org"),
            MessageContent::text("hello"),
            CoderStatus::plain(),
            at(0),
        )
    }

    #[test]
    fn assigns_monotonic_ids_and_publishes_structural_delta() {
        let (ctx, conversation) = setup();
        let (seen, watcher) = recorder();
        let _sub = conversation.subscribe(watcher);

        let first = ctx.append_message(10, outbound()).expect("append should work");
        let second = ctx.append_message(10, outbound()).expect("append should work");

        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        assert_eq!(conversation.len(), 2);
        assert_eq!(
            *seen.borrow(),
            vec![Delta::new(DeltaKind::Structural); 2]
        );
    }

    #[test]
    fn each_mutation_publishes_exactly_one_delta() {
        let (ctx, _) = setup();
        let entity = ctx.append_message(10, outbound()).expect("append should work");
        let (seen, watcher) = recorder();
        let _sub = entity.subscribe(watcher);

        entity.set_status(DeliveryStatus::Sent);
        entity.set_text("edited");
        assert!(entity.record_receipt(1, at(3)));
        entity.apply_decryption(
            "plain",
            CoderStatus::new(EncryptionMode::Decrypted, SigningMode::Signed),
        );

        let kinds: Vec<_> = seen.borrow().iter().map(|delta| delta.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DeltaKind::Status,
                DeltaKind::Text,
                DeltaKind::Status,
                DeltaKind::Unspecified
            ]
        );
        let expected = Some(crate::types::DeltaPayload::Message(1));
        assert!(seen.borrow().iter().all(|delta| delta.payload == expected));
    }

    #[test]
    fn attachment_mutations_without_attachment_do_not_publish() {
        let (ctx, _) = setup();
        let entity = ctx.append_message(10, outbound()).expect("append should work");
        let (seen, watcher) = recorder();
        let _sub = entity.subscribe(watcher);

        assert!(!entity.record_attachment_progress(-1));
        assert!(seen.borrow().is_empty());

        let err = ctx
            .apply(Mutation::AttachmentProgress {
                message: 1,
                code: -1,
            })
            .expect_err("missing attachment should be reported");
        assert_eq!(err.category, ViewErrorCategory::MalformedState);
    }

    #[test]
    fn stale_ids_are_reported_as_stale() {
        let (ctx, _) = setup();
        let err = ctx
            .apply(Mutation::Status {
                message: 99,
                status: DeliveryStatus::Sent,
            })
            .expect_err("unknown message should fail");
        assert!(err.is_stale());

        let err = ctx
            .apply(Mutation::ContactRenamed {
                contact: 42,
                name: "x".into(),
            })
            .expect_err("unknown contact should fail");
        assert!(err.is_stale());

        let err = ctx
            .append_message(77, outbound())
            .expect_err("unknown conversation should fail");
        assert_eq!(err.code, "unknown_conversation");
    }

    #[test]
    fn applies_attachment_mutations() {
        let (ctx, _) = setup();
        let mut message = outbound();
        message.content.attachment = Some(Attachment::pending(Some("image/jpeg".into())));
        let entity = ctx.append_message(10, message).expect("append should work");

        ctx.apply(Mutation::AttachmentProgress {
            message: 1,
            code: -3,
        })
        .expect("progress should apply");
        ctx.apply(Mutation::AttachmentResolved {
            message: 1,
            path: "/tmp/a.jpg".into(),
        })
        .expect("resolve should apply");

        let message = entity.message();
        let attachment = message.content.attachment.as_ref().expect("attachment");
        assert!(attachment.is_resolved());
        assert_eq!(attachment.progress_code, -3);
    }

    #[test]
    fn contact_rename_publishes_text_delta_with_contact_payload() {
        let (ctx, _) = setup();
        let contact = ctx.contact(1).expect("contact");
        let (seen, watcher) = recorder();
        let _sub = contact.subscribe(watcher);

        ctx.apply(Mutation::ContactRenamed {
            contact: 1,
            name: "Alice B.".into(),
        })
        .expect("rename should apply");

        assert_eq!(contact.contact().name, "Alice B.");
        assert_eq!(*seen.borrow(), vec![Delta::for_contact(DeltaKind::Text, 1)]);
    }

    #[test]
    fn inbound_message_marks_conversation_unread() {
        let (ctx, conversation) = setup();
        let inbound = Message::inbound(
            Transmission::new(1, "alice@example.org/phone"),
            MessageContent::text("hey"),
            CoderStatus::plain(),
            at(1),
            None,
        );
        ctx.append_message(10, inbound).expect("append should work");
        assert!(!conversation.is_read());
        assert!(ctx.mark_read(10));
        assert!(!ctx.mark_read(10));
    }
}
