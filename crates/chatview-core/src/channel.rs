use std::{marker::PhantomData, rc::Rc};

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, trace, warn};

use crate::{context::ChatContext, types::Mutation};

/// Errors returned by hand-off queue operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandoffError {
    /// The owner thread dropped its inbox.
    #[error("owner inbox is closed")]
    InboxClosed,
    /// The bounded queue has no free slot.
    #[error("hand-off queue is full")]
    QueueFull,
}

/// Producer side of the hand-off queue. Cheap to clone, usable from any thread.
#[derive(Clone, Debug)]
pub struct HandoffSender {
    tx: mpsc::Sender<Mutation>,
}

impl HandoffSender {
    /// Queue one mutation, waiting for capacity.
    pub async fn post(&self, mutation: Mutation) -> Result<(), HandoffError> {
        self.tx
            .send(mutation)
            .await
            .map_err(|_| HandoffError::InboxClosed)
    }

    /// Queue one mutation without waiting.
    pub fn try_post(&self, mutation: Mutation) -> Result<(), HandoffError> {
        self.tx.try_send(mutation).map_err(|err| match err {
            TrySendError::Full(_) => HandoffError::QueueFull,
            TrySendError::Closed(_) => HandoffError::InboxClosed,
        })
    }

    /// Queue one mutation from a plain (non-async) thread.
    pub fn blocking_post(&self, mutation: Mutation) -> Result<(), HandoffError> {
        self.tx
            .blocking_send(mutation)
            .map_err(|_| HandoffError::InboxClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the hand-off queue, pinned to the owner thread.
#[derive(Debug)]
pub struct OwnerInbox {
    rx: mpsc::Receiver<Mutation>,
    // entities are `Rc`-based, so the inbox must not leave the owner thread
    _owner: PhantomData<Rc<()>>,
}

impl OwnerInbox {
    /// Apply every queued mutation to `context`. Returns how many were applied.
    ///
    /// Stale references are expected when mutations race with removals and are
    /// only traced; other failures are logged and skipped.
    pub fn drain(&mut self, context: &ChatContext) -> usize {
        let mut applied = 0;
        loop {
            match self.rx.try_recv() {
                Ok(mutation) => {
                    if apply_one(context, mutation) {
                        applied += 1;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    trace!("all hand-off senders dropped");
                    break;
                }
            }
        }
        if applied > 0 {
            debug!(applied, "drained hand-off queue");
        }
        applied
    }

    /// Wait for the next mutation. `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<Mutation> {
        self.rx.recv().await
    }

    /// Block the current thread until the next mutation arrives.
    ///
    /// Must not be called from inside an async runtime.
    pub fn blocking_next(&mut self) -> Option<Mutation> {
        self.rx.blocking_recv()
    }

    /// Apply a mutation obtained from [`OwnerInbox::next`] or
    /// [`OwnerInbox::blocking_next`].
    pub fn apply(&self, context: &ChatContext, mutation: Mutation) -> bool {
        apply_one(context, mutation)
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

fn apply_one(context: &ChatContext, mutation: Mutation) -> bool {
    let kind = mutation.kind();
    match context.apply(mutation) {
        Ok(()) => true,
        Err(err) if err.is_stale() => {
            trace!(kind, code = %err.code, "dropping mutation for stale reference");
            false
        }
        Err(err) => {
            warn!(kind, error = %err, "mutation could not be applied");
            false
        }
    }
}

/// Create a bounded hand-off queue.
pub fn handoff(capacity: usize) -> (HandoffSender, OwnerInbox) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        HandoffSender { tx },
        OwnerInbox {
            rx,
            _owner: PhantomData,
        },
    )
}
