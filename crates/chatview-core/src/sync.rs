//! Incremental synchronization of a conversation into display items.
//!
//! The synchronizer owns one [`DisplayItem`] per message id of its
//! conversation. Items start unmaterialized and compute their display facts on
//! first render; from then on they are kept current by the deltas their
//! message and contacts publish.

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    fmt,
    rc::{Rc, Weak},
};

use tracing::{debug, trace};

use crate::{
    actions::{ActionOutcome, ItemAction, Transport, available_actions},
    attachment::AttachmentView,
    config::ViewConfig,
    context::{Conversation, MessageEntity, MessageStore},
    error::ViewError,
    normalization::{self, DisplayText, TextMeasure},
    notify::{Subscription, Watcher},
    status::StatusProjection,
    types::{ContactId, ConversationId, Delta, DeltaKind, DeltaPayload, Message, MessageId},
};

/// Shared handle to a synchronizer. Watchers hold weak references to it.
pub type SharedSynchronizer = Rc<RefCell<ItemSynchronizer>>;

/// Whether an item has computed its display facts yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Unmaterialized,
    Materialized,
}

/// Cached, render-ready facts of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayFacts {
    /// Sender label, inbound messages only.
    pub from_label: Option<String>,
    pub text: DisplayText,
    pub status: StatusProjection,
    pub attachment: Option<AttachmentView>,
    /// Unclamped width the body would like to occupy.
    pub preferred_width: u32,
}

/// Which facts a delta refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Refresh {
    Nothing,
    FromLabel,
    Text,
    Status,
    Attachment,
    All,
}

impl Refresh {
    fn for_delta(delta: &Delta) -> Self {
        match delta.kind {
            DeltaKind::Presence | DeltaKind::Structural => Self::Nothing,
            DeltaKind::Text => match delta.payload {
                Some(DeltaPayload::Contact(_)) => Self::FromLabel,
                _ => Self::Text,
            },
            DeltaKind::Status => Self::Status,
            DeltaKind::Attachment => Self::Attachment,
            DeltaKind::Unspecified => Self::All,
        }
    }
}

/// Counts produced by one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: usize,
    pub removed: usize,
    pub retained: usize,
    /// Duplicate or invalid ids ignored.
    pub skipped: usize,
}

#[derive(Debug)]
enum ItemState {
    Unmaterialized,
    Materialized {
        facts: DisplayFacts,
        subscriptions: Vec<Subscription>,
    },
}

/// Presentation-side wrapper of one message.
#[derive(Debug)]
pub struct DisplayItem {
    serial: u64,
    entity: Rc<MessageEntity>,
    state: ItemState,
}

impl DisplayItem {
    fn new(serial: u64, entity: Rc<MessageEntity>) -> Self {
        Self {
            serial,
            entity,
            state: ItemState::Unmaterialized,
        }
    }

    pub fn id(&self) -> MessageId {
        self.entity.id()
    }

    /// Per-instance serial; stays the same for as long as the item survives reconciliation.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn entity(&self) -> &Rc<MessageEntity> {
        &self.entity
    }

    pub fn lifecycle(&self) -> Lifecycle {
        match self.state {
            ItemState::Unmaterialized => Lifecycle::Unmaterialized,
            ItemState::Materialized { .. } => Lifecycle::Materialized,
        }
    }

    pub fn facts(&self) -> Option<&DisplayFacts> {
        match &self.state {
            ItemState::Materialized { facts, .. } => Some(facts),
            ItemState::Unmaterialized => None,
        }
    }

    pub fn subscription_count(&self) -> usize {
        match &self.state {
            ItemState::Materialized { subscriptions, .. } => subscriptions.len(),
            ItemState::Unmaterialized => 0,
        }
    }

    /// Tear down the item. This is the only removal path; the subscriptions
    /// are dropped exactly once. Returns how many were released.
    pub fn release(self) -> usize {
        let released = self.subscription_count();
        trace!(message_id = self.id(), released, "display item released");
        released
    }

    fn rebind(&mut self, entity: Rc<MessageEntity>) {
        self.entity = entity;
        self.state = ItemState::Unmaterialized;
    }
}

/// Work a watcher could not hand to a busy synchronizer.
#[derive(Debug, Clone, Copy)]
enum Deferred {
    Item(MessageId, Delta),
    Membership,
}

type Backlog = Rc<RefCell<Vec<Deferred>>>;

/// Keeps a list of [`DisplayItem`]s in sync with one conversation.
pub struct ItemSynchronizer {
    handle: Weak<RefCell<ItemSynchronizer>>,
    store: Rc<dyn MessageStore>,
    conversation: Rc<Conversation>,
    config: ViewConfig,
    measure: Box<dyn TextMeasure>,
    items: Vec<DisplayItem>,
    positions: HashMap<MessageId, usize>,
    next_serial: u64,
    current: bool,
    backlog: Backlog,
    membership: Option<Subscription>,
}

impl ItemSynchronizer {
    /// Attach to `conversation` and reconcile its current messages.
    pub fn attach(
        store: Rc<dyn MessageStore>,
        conversation: Rc<Conversation>,
        config: ViewConfig,
    ) -> SharedSynchronizer {
        let measure = Box::new(config.default_measure());
        Self::attach_with_measure(store, conversation, config, measure)
    }

    pub fn attach_with_measure(
        store: Rc<dyn MessageStore>,
        conversation: Rc<Conversation>,
        config: ViewConfig,
        measure: Box<dyn TextMeasure>,
    ) -> SharedSynchronizer {
        let backlog: Backlog = Rc::new(RefCell::new(Vec::new()));
        let shared = Rc::new_cyclic(|handle| {
            RefCell::new(Self {
                handle: handle.clone(),
                store,
                conversation: Rc::clone(&conversation),
                config,
                measure,
                items: Vec::new(),
                positions: HashMap::new(),
                next_serial: 0,
                current: false,
                backlog: Rc::clone(&backlog),
                membership: None,
            })
        });

        let watcher: Rc<dyn Watcher> = Rc::new(MembershipWatcher {
            sync: Rc::downgrade(&shared),
            backlog,
        });
        let subscription = conversation.subscribe(watcher);
        {
            let mut sync = shared.borrow_mut();
            sync.membership = Some(subscription);
            let report = sync.sync_membership();
            debug!(
                conversation = conversation.id(),
                items = report.added,
                "synchronizer attached"
            );
        }
        shared
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation.id()
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    pub fn items(&self) -> &[DisplayItem] {
        &self.items
    }

    pub fn item(&self, id: MessageId) -> Option<&DisplayItem> {
        self.positions.get(&id).map(|&position| &self.items[position])
    }

    pub fn ids(&self) -> Vec<MessageId> {
        self.items.iter().map(DisplayItem::id).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_current(&self) -> bool {
        self.current
    }

    /// Mark this view as the one the user is looking at. Becoming current
    /// marks the conversation read.
    pub fn set_current(&mut self, current: bool) {
        self.current = current;
        if current {
            self.mark_read();
        }
    }

    /// Bring the display list in line with `current`.
    ///
    /// Items whose id persists are kept as-is; new ids get unmaterialized
    /// items; vanished ids are released. The final order follows `current`.
    pub fn reconcile(&mut self, current: &[Rc<MessageEntity>]) -> ReconcileReport {
        let mut previous: HashMap<MessageId, DisplayItem> = self
            .items
            .drain(..)
            .map(|item| (item.id(), item))
            .collect();
        let mut seen = HashSet::with_capacity(current.len());
        let mut next = Vec::with_capacity(current.len());
        let mut report = ReconcileReport::default();

        for entity in current {
            let id = entity.id();
            if id <= 0 || !seen.insert(id) {
                trace!(message_id = id, "skipping invalid or duplicate message id");
                report.skipped += 1;
                continue;
            }
            match previous.remove(&id) {
                Some(mut item) => {
                    if !Rc::ptr_eq(&item.entity, entity) {
                        trace!(message_id = id, "message instance replaced, rebinding item");
                        item.rebind(Rc::clone(entity));
                    }
                    report.retained += 1;
                    next.push(item);
                }
                None => {
                    self.next_serial += 1;
                    report.added += 1;
                    next.push(DisplayItem::new(self.next_serial, Rc::clone(entity)));
                }
            }
        }

        for (_, item) in previous {
            item.release();
            report.removed += 1;
        }

        self.positions = next
            .iter()
            .enumerate()
            .map(|(position, item)| (item.id(), position))
            .collect();
        self.items = next;

        if report.added > 0 || report.removed > 0 || report.skipped > 0 {
            debug!(
                conversation = self.conversation.id(),
                added = report.added,
                removed = report.removed,
                retained = report.retained,
                skipped = report.skipped,
                "display list reconciled"
            );
        }
        report
    }

    /// Reconcile against the conversation's current messages.
    pub fn sync_membership(&mut self) -> ReconcileReport {
        let current = self.store.messages(self.conversation.id());
        let report = self.reconcile(&current);
        if self.current {
            self.mark_read();
        }
        report
    }

    /// Refresh the facts a delta affects. No-op for ids without a
    /// materialized item; never creates one.
    pub fn apply_delta(&mut self, id: MessageId, delta: &Delta) -> Refresh {
        let Some(&position) = self.positions.get(&id) else {
            trace!(message_id = id, "delta for unknown item ignored");
            return Refresh::Nothing;
        };
        let refresh = Refresh::for_delta(delta);
        if refresh == Refresh::Nothing {
            return refresh;
        }

        let item = &mut self.items[position];
        let ItemState::Materialized { facts, .. } = &mut item.state else {
            trace!(message_id = id, "delta for unmaterialized item ignored");
            return Refresh::Nothing;
        };
        let projector = Projector {
            store: &*self.store,
            config: &self.config,
            measure: &*self.measure,
        };
        projector.refresh(&item.entity.message(), facts, refresh);
        trace!(message_id = id, ?refresh, "display facts refreshed");
        refresh
    }

    /// Compute facts and subscribe. Returns `false` if the item was already
    /// materialized or does not exist.
    pub fn materialize(&mut self, id: MessageId) -> bool {
        let Some(&position) = self.positions.get(&id) else {
            return false;
        };
        let item = &mut self.items[position];
        if item.lifecycle() == Lifecycle::Materialized {
            return false;
        }

        let projector = Projector {
            store: &*self.store,
            config: &self.config,
            measure: &*self.measure,
        };
        let (facts, contacts) = {
            let message = item.entity.message();
            (projector.facts(&message), distinct_contacts(&message))
        };

        let watcher: Rc<dyn Watcher> = Rc::new(ItemWatcher {
            sync: self.handle.clone(),
            backlog: Rc::clone(&self.backlog),
            id,
        });
        let mut subscriptions = vec![item.entity.subscribe(Rc::clone(&watcher))];
        subscriptions.extend(
            contacts
                .into_iter()
                .filter_map(|contact| self.store.contact(contact))
                .map(|contact| contact.subscribe(Rc::clone(&watcher))),
        );

        trace!(
            message_id = id,
            subscriptions = subscriptions.len(),
            "display item materialized"
        );
        item.state = ItemState::Materialized {
            facts,
            subscriptions,
        };
        true
    }

    /// Materialize on demand and return the content width for a list of
    /// `list_width` pixels.
    pub fn render(&mut self, id: MessageId, list_width: u32) -> Option<u32> {
        self.flush_backlog();
        self.materialize(id);
        let preferred = self.item(id)?.facts()?.preferred_width;
        Some(self.config.clamp_width(preferred, list_width))
    }

    /// Ids of items matching `query`, in display order.
    pub fn search(&self, query: &str) -> Vec<MessageId> {
        self.items
            .iter()
            .filter(|item| {
                let message = item.entity.message();
                let contacts: Vec<_> = message
                    .transmissions
                    .iter()
                    .filter_map(|transmission| self.store.contact(transmission.contact))
                    .collect();
                let contacts: Vec<_> = contacts.iter().map(|contact| contact.contact()).collect();
                normalization::matches_search(&message, contacts.iter().map(|c| &**c), query)
            })
            .map(DisplayItem::id)
            .collect()
    }

    pub fn actions(&self, id: MessageId) -> Result<Vec<ItemAction>, ViewError> {
        let item = self.item(id).ok_or_else(|| ViewError::unknown_message(id))?;
        Ok(available_actions(&item.entity.message()))
    }

    /// Run `action` on item `id`. Retries are forwarded to `transport`.
    pub fn perform(
        &mut self,
        id: MessageId,
        action: ItemAction,
        transport: &dyn Transport,
    ) -> Result<ActionOutcome, ViewError> {
        let entity = self
            .item(id)
            .map(|item| Rc::clone(&item.entity))
            .ok_or_else(|| ViewError::unknown_message(id))?;
        if !available_actions(&entity.message()).contains(&action) {
            return Err(ViewError::action_unavailable(id, action.as_str()));
        }

        let outcome = match action {
            ItemAction::RetryDecrypt => {
                transport.request_decrypt_retry(id);
                ActionOutcome::Forwarded
            }
            ItemAction::RetryAttachment => {
                transport.request_attachment_retry(id);
                ActionOutcome::Forwarded
            }
            ItemAction::Copy => {
                let projector = Projector {
                    store: &*self.store,
                    config: &self.config,
                    measure: &*self.measure,
                };
                let message = entity.message();
                let from = projector.from_label(&message);
                ActionOutcome::Copied(normalization::copy_text(
                    &message,
                    from.as_deref(),
                    &self.config.copy_time_format,
                ))
            }
        };
        debug!(message_id = id, action = action.as_str(), "item action performed");

        self.flush_backlog();
        Ok(outcome)
    }

    /// Apply deltas that arrived while this synchronizer was borrowed.
    pub fn flush_backlog(&mut self) -> usize {
        let pending = std::mem::take(&mut *self.backlog.borrow_mut());
        let count = pending.len();
        for deferred in pending {
            match deferred {
                Deferred::Item(id, delta) => {
                    self.apply_delta(id, &delta);
                }
                Deferred::Membership => {
                    self.sync_membership();
                }
            }
        }
        count
    }

    fn mark_read(&self) {
        if self.store.mark_read(self.conversation.id()) {
            debug!(conversation = self.conversation.id(), "conversation marked read");
        }
    }
}

impl fmt::Debug for ItemSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemSynchronizer")
            .field("conversation", &self.conversation.id())
            .field("items", &self.items.len())
            .field("current", &self.current)
            .finish()
    }
}

fn distinct_contacts(message: &Message) -> Vec<ContactId> {
    let mut contacts = Vec::new();
    for transmission in &message.transmissions {
        if !contacts.contains(&transmission.contact) {
            contacts.push(transmission.contact);
        }
    }
    contacts
}

/// Borrows the pieces of the synchronizer needed to derive facts, so the item
/// list can be borrowed mutably at the same time.
struct Projector<'a> {
    store: &'a dyn MessageStore,
    config: &'a ViewConfig,
    measure: &'a dyn TextMeasure,
}

impl Projector<'_> {
    fn facts(&self, message: &Message) -> DisplayFacts {
        let text = normalization::display_text(message);
        DisplayFacts {
            from_label: self.from_label(message),
            preferred_width: self.measure.preferred_width(&text.body),
            text,
            status: self.status(message),
            attachment: message
                .content
                .attachment
                .as_ref()
                .map(AttachmentView::project),
        }
    }

    fn refresh(&self, message: &Message, facts: &mut DisplayFacts, refresh: Refresh) {
        match refresh {
            Refresh::Nothing => {}
            Refresh::FromLabel => facts.from_label = self.from_label(message),
            Refresh::Text => {
                facts.text = normalization::display_text(message);
                facts.preferred_width = self.measure.preferred_width(&facts.text.body);
            }
            Refresh::Status => {
                facts.status = self.status(message);
                // coder status also decides whether the body is the placeholder
                if facts.text.placeholder != message.coder.is_encrypted() {
                    facts.text = normalization::display_text(message);
                    facts.preferred_width = self.measure.preferred_width(&facts.text.body);
                }
            }
            Refresh::Attachment => {
                facts.attachment = message
                    .content
                    .attachment
                    .as_ref()
                    .map(AttachmentView::project);
            }
            Refresh::All => *facts = self.facts(message),
        }
    }

    fn status(&self, message: &Message) -> StatusProjection {
        StatusProjection::project(message, &self.config.tooltip_time_format)
    }

    fn from_label(&self, message: &Message) -> Option<String> {
        let sender = message.sender()?;
        let contact = self.store.contact(sender.contact);
        let contact = contact.as_ref().map(|contact| contact.contact());
        Some(normalization::from_label(
            contact.as_deref(),
            &sender.address,
            self.config.from_label_max_len,
            self.config.from_label_keep,
        ))
    }
}

/// Forwards message and contact deltas to one item.
struct ItemWatcher {
    sync: Weak<RefCell<ItemSynchronizer>>,
    backlog: Backlog,
    id: MessageId,
}

impl Watcher for ItemWatcher {
    fn on_delta(&self, delta: &Delta) {
        let Some(sync) = self.sync.upgrade() else {
            return;
        };
        match sync.try_borrow_mut() {
            Ok(mut sync) => {
                sync.apply_delta(self.id, delta);
            }
            Err(_) => {
                trace!(message_id = self.id, "synchronizer busy, deferring delta");
                self.backlog
                    .borrow_mut()
                    .push(Deferred::Item(self.id, *delta));
            }
        }
    }
}

/// Reconciles on membership changes of the conversation.
struct MembershipWatcher {
    sync: Weak<RefCell<ItemSynchronizer>>,
    backlog: Backlog,
}

impl Watcher for MembershipWatcher {
    fn on_delta(&self, delta: &Delta) {
        if !matches!(delta.kind, DeltaKind::Structural | DeltaKind::Unspecified) {
            return;
        }
        let Some(sync) = self.sync.upgrade() else {
            return;
        };
        match sync.try_borrow_mut() {
            Ok(mut sync) => {
                sync.sync_membership();
            }
            Err(_) => {
                trace!("synchronizer busy, deferring membership sync");
                self.backlog.borrow_mut().push(Deferred::Membership);
            }
        }
    }
}
