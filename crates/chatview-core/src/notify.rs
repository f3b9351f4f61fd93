use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use tracing::trace;

use crate::types::Delta;

/// Receiver of deltas published by an entity.
///
/// Implementations must treat kinds they do not care about as no-ops.
pub trait Watcher {
    fn on_delta(&self, delta: &Delta);
}

impl<F> Watcher for F
where
    F: Fn(&Delta),
{
    fn on_delta(&self, delta: &Delta) {
        self(delta)
    }
}

/// Handle identifying one registration on a [`Publisher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    watchers: Vec<(SubscriptionId, Rc<dyn Watcher>)>,
}

impl Registry {
    fn contains(&self, id: SubscriptionId) -> bool {
        self.watchers.iter().any(|(existing, _)| *existing == id)
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.watchers.len();
        self.watchers.retain(|(existing, _)| *existing != id);
        self.watchers.len() != before
    }
}

/// Synchronous fan-out of deltas to the current watchers of one entity.
#[derive(Default)]
pub struct Publisher {
    registry: Rc<RefCell<Registry>>,
}

impl Publisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `watcher`. The registration lives as long as the returned guard.
    pub fn subscribe(&self, watcher: Rc<dyn Watcher>) -> Subscription {
        let mut registry = self.registry.borrow_mut();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry.watchers.push((id, watcher));
        Subscription {
            id,
            registry: Rc::downgrade(&self.registry),
            active: true,
        }
    }

    /// Remove a registration. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry.borrow_mut().remove(id)
    }

    /// Deliver `delta` to every watcher, in subscription order, on the caller's thread.
    ///
    /// Works on a snapshot of the watcher list: watchers may subscribe or
    /// unsubscribe from inside `on_delta`. A watcher removed during dispatch is
    /// not called afterwards; the remaining ones still are.
    pub fn notify(&self, delta: &Delta) {
        let snapshot: Vec<_> = self
            .registry
            .borrow()
            .watchers
            .iter()
            .map(|(id, watcher)| (*id, Rc::clone(watcher)))
            .collect();
        trace!(kind = ?delta.kind, watchers = snapshot.len(), "dispatching delta");

        for (id, watcher) in snapshot {
            if !self.registry.borrow().contains(id) {
                continue;
            }
            watcher.on_delta(delta);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.borrow().watchers.len()
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Registration guard. Dropping it (or calling [`Subscription::cancel`])
/// unsubscribes exactly once.
#[must_use = "dropping a Subscription unsubscribes immediately"]
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<RefCell<Registry>>,
    active: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Unsubscribe now. Returns `true` if a registration was removed.
    pub fn cancel(mut self) -> bool {
        self.release()
    }

    fn release(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.borrow_mut().remove(self.id))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("watchers", &self.watchers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::types::DeltaKind;

    fn counter() -> (Rc<Cell<usize>>, Rc<dyn Watcher>) {
        let hits = Rc::new(Cell::new(0));
        let seen = Rc::clone(&hits);
        let watcher: Rc<dyn Watcher> = Rc::new(move |_: &Delta| seen.set(seen.get() + 1));
        (hits, watcher)
    }

    #[test]
    fn delivers_each_delta_once_to_every_subscriber() {
        let publisher = Publisher::new();
        let (a_hits, a) = counter();
        let (b_hits, b) = counter();
        let _a = publisher.subscribe(a);
        let _b = publisher.subscribe(b);

        publisher.notify(&Delta::new(DeltaKind::Status));
        publisher.notify(&Delta::new(DeltaKind::Text));

        assert_eq!(a_hits.get(), 2);
        assert_eq!(b_hits.get(), 2);
    }

    #[test]
    fn dropping_the_guard_unsubscribes() {
        let publisher = Publisher::new();
        let (hits, watcher) = counter();
        let subscription = publisher.subscribe(watcher);
        assert_eq!(publisher.subscriber_count(), 1);

        drop(subscription);
        publisher.notify(&Delta::unspecified());

        assert_eq!(publisher.subscriber_count(), 0);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn cancel_reports_removal_only_once() {
        let publisher = Publisher::new();
        let (_, watcher) = counter();
        let subscription = publisher.subscribe(watcher);
        let id = subscription.id();

        assert!(subscription.cancel());
        assert!(!publisher.unsubscribe(id));
    }

    #[test]
    fn guard_outliving_publisher_is_harmless() {
        let publisher = Publisher::new();
        let (_, watcher) = counter();
        let subscription = publisher.subscribe(watcher);
        drop(publisher);
        assert!(!subscription.cancel());
    }

    #[test]
    fn unsubscribing_during_dispatch_does_not_skip_others() {
        let publisher = Rc::new(Publisher::new());
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let slot_in_watcher = Rc::clone(&slot);
        let first_hits = Rc::new(Cell::new(0));
        let first_seen = Rc::clone(&first_hits);
        let first: Rc<dyn Watcher> = Rc::new(move |_: &Delta| {
            first_seen.set(first_seen.get() + 1);
            // removes itself on first delivery
            slot_in_watcher.borrow_mut().take();
        });
        *slot.borrow_mut() = Some(publisher.subscribe(first));

        let (second_hits, second) = counter();
        let _second = publisher.subscribe(second);

        publisher.notify(&Delta::new(DeltaKind::Status));
        publisher.notify(&Delta::new(DeltaKind::Status));

        assert_eq!(first_hits.get(), 1);
        assert_eq!(second_hits.get(), 2);
        assert_eq!(publisher.subscriber_count(), 1);
    }

    #[test]
    fn watcher_removed_mid_dispatch_by_an_earlier_one_is_not_called() {
        let publisher = Publisher::new();
        let victim_slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let slot = Rc::clone(&victim_slot);
        let killer: Rc<dyn Watcher> = Rc::new(move |_: &Delta| {
            slot.borrow_mut().take();
        });
        let _killer = publisher.subscribe(killer);

        let (victim_hits, victim) = counter();
        *victim_slot.borrow_mut() = Some(publisher.subscribe(victim));

        publisher.notify(&Delta::unspecified());
        assert_eq!(victim_hits.get(), 0);
    }
}
