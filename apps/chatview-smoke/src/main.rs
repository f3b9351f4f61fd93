//! Headless driver for `chatview-core`.
//!
//! A tokio runtime plays the network/crypto side and posts mutations through
//! the hand-off queue; the main thread owns the chat context and the
//! synchronizer, applies the mutations and renders every item.

mod config;
mod logging;

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    process::ExitCode,
    rc::Rc,
};

use chatview_core::{
    ActionOutcome, Attachment, ChatContext, CoderStatus, Contact, ContactId, ConversationId,
    DeliveryStatus, DisplayFacts, EncryptionMode, HandoffError, HandoffSender, ItemAction,
    ItemSynchronizer, Message, MessageContent, MessageId, MessageStore, Mutation, Presence,
    SigningMode, Transmission, Transport, handoff,
};
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::SmokeConfig;

const CONVERSATION: ConversationId = 1;
const ALICE: ContactId = 1;
const BOB: ContactId = 2;
const STALE_MESSAGE: MessageId = 9_999;

/// Retry requested by the user, served by the simulated transport.
#[derive(Debug, Clone, Copy)]
enum RetryRequest {
    Decrypt(MessageId),
    Attachment(MessageId),
}

struct SmokeTransport {
    tx: mpsc::UnboundedSender<RetryRequest>,
}

impl SmokeTransport {
    fn forward(&self, request: RetryRequest) {
        if self.tx.send(request).is_err() {
            warn!(?request, "retry worker is gone, request dropped");
        }
    }
}

impl Transport for SmokeTransport {
    fn request_decrypt_retry(&self, id: MessageId) {
        self.forward(RetryRequest::Decrypt(id));
    }

    fn request_attachment_retry(&self, id: MessageId) {
        self.forward(RetryRequest::Attachment(id));
    }
}

fn main() -> ExitCode {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("chatview-net")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to start tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let ctx = ChatContext::new();
    ctx.add_contact(Contact::new(ALICE, "Alice", "alice@example.org"));
    ctx.add_contact(Contact::new(
        BOB,
        "",
        "bob.with.a.rather.long.address@chat.example.org",
    ));
    let conversation = ctx.open_conversation(CONVERSATION);

    let store: Rc<dyn MessageStore> = ctx.clone();
    let sync = ItemSynchronizer::attach(store, conversation, config.view.clone());
    sync.borrow_mut().set_current(true);

    let (sender, mut inbox) = handoff(config.handoff_capacity);
    let (retry_tx, retry_rx) = mpsc::unbounded_channel();
    let transport = SmokeTransport { tx: retry_tx };

    let traffic = sender.clone();
    let count = config.message_count;
    let tick = config.tick;
    runtime.spawn(async move {
        if let Err(err) = simulate_traffic(traffic, count, tick).await {
            warn!(error = %err, "traffic simulation stopped early");
        }
    });
    runtime.spawn(serve_retries(sender, retry_rx));

    let mut rendered: HashMap<MessageId, DisplayFacts> = HashMap::new();
    let mut requested: HashSet<(MessageId, ItemAction)> = HashSet::new();
    let mut applied = 0;

    loop {
        let next =
            runtime.block_on(async { tokio::time::timeout(config.idle, inbox.next()).await });
        let Ok(Some(mutation)) = next else {
            debug!("hand-off queue idle, stopping");
            break;
        };
        if inbox.apply(&ctx, mutation) {
            applied += 1;
        }
        applied += inbox.drain(&ctx);

        let mut sync = sync.borrow_mut();
        for id in sync.ids() {
            if sync.render(id, config.list_width).is_none() {
                continue;
            }
            let Some(facts) = sync.item(id).and_then(|item| item.facts()).cloned() else {
                continue;
            };
            if rendered.get(&id) != Some(&facts) {
                log_facts(id, &facts);
                rendered.insert(id, facts);
            }

            let actions = match sync.actions(id) {
                Ok(actions) => actions,
                Err(err) => {
                    warn!(error = %err, "actions unavailable");
                    continue;
                }
            };
            for action in actions {
                if action == ItemAction::Copy || !requested.insert((id, action)) {
                    continue;
                }
                if let Err(err) = sync.perform(id, action, &transport) {
                    warn!(message_id = id, error = %err, "action failed");
                }
            }
        }
    }

    let mut sync = sync.borrow_mut();
    if let Some(first) = sync.ids().first().copied() {
        match sync.perform(first, ItemAction::Copy, &transport) {
            Ok(ActionOutcome::Copied(text)) => info!(message_id = first, %text, "copied"),
            Ok(ActionOutcome::Forwarded) => {}
            Err(err) => warn!(error = %err, "copy failed"),
        }
    }
    info!(
        items = sync.len(),
        applied,
        retries = requested.len(),
        search_hits = sync.search("alice").len(),
        read = ctx.conversation(CONVERSATION).is_some_and(|c| c.is_read()),
        "smoke run finished"
    );
    ExitCode::SUCCESS
}

fn log_facts(id: MessageId, facts: &DisplayFacts) {
    info!(
        message_id = id,
        from = facts.from_label.as_deref().unwrap_or("me"),
        text = %facts.text.body,
        icon = ?facts.status.icon,
        security = %facts.status.security,
        attachment = facts
            .attachment
            .as_ref()
            .and_then(|view| view.status_text.as_deref())
            .unwrap_or("-"),
        "item rendered"
    );
    debug!(message_id = id, tooltip = %facts.status.tooltip_text(), "item tooltip");
}

/// Post a scripted mix of inbound and outbound traffic.
async fn simulate_traffic(
    sender: HandoffSender,
    count: usize,
    tick: std::time::Duration,
) -> Result<(), HandoffError> {
    for index in 0..count {
        let id = MessageId::try_from(index + 1).unwrap_or(MessageId::MAX);
        let message = scripted_message(index);
        let inbound = message.is_inbound();
        let has_attachment = message.content.attachment.is_some();

        sender
            .post(Mutation::MessageArrived {
                conversation: CONVERSATION,
                message,
            })
            .await?;
        tokio::time::sleep(tick).await;

        if inbound {
            if has_attachment {
                sender
                    .post(Mutation::PreviewReady {
                        message: id,
                        path: PathBuf::from(format!("/tmp/chatview-smoke/thumb-{id}.png")),
                    })
                    .await?;
                sender
                    .post(Mutation::AttachmentProgress {
                        message: id,
                        code: -3,
                    })
                    .await?;
            }
            continue;
        }

        sender
            .post(Mutation::Status {
                message: id,
                status: DeliveryStatus::Sent,
            })
            .await?;
        tokio::time::sleep(tick).await;
        let receipt = if index % 5 == 4 {
            Mutation::ServerError {
                message: id,
                text: "recipient unavailable".to_owned(),
            }
        } else {
            Mutation::Receipt {
                message: id,
                contact: ALICE,
                received_at: Utc::now(),
            }
        };
        sender.post(receipt).await?;
    }

    sender
        .post(Mutation::ContactRenamed {
            contact: BOB,
            name: "Bob".to_owned(),
        })
        .await?;
    sender
        .post(Mutation::ContactPresence {
            contact: ALICE,
            presence: Presence::Available,
            status_text: Some("around".to_owned()),
        })
        .await?;
    // raced with a deletion on the server side
    sender
        .post(Mutation::Status {
            message: STALE_MESSAGE,
            status: DeliveryStatus::Delivered,
        })
        .await?;
    Ok(())
}

fn scripted_message(index: usize) -> Message {
    let now = Utc::now();
    match index % 4 {
        0 => Message::outbound(
            Transmission::new(ALICE, "alice@example.org"),
            MessageContent::text(format!("ping #{index}")),
            CoderStatus::new(EncryptionMode::Decrypted, SigningMode::Signed),
            now,
        ),
        1 => Message::inbound(
            Transmission::new(ALICE, "alice@example.org/phone"),
            MessageContent::text(format!("pong #{index}")),
            CoderStatus::new(EncryptionMode::Decrypted, SigningMode::Verified),
            now,
            Some(now),
        ),
        2 => Message::inbound(
            Transmission::new(BOB, "bob.with.a.rather.long.address@chat.example.org/laptop"),
            MessageContent::text("-----BEGIN PGP MESSAGE-----"),
            CoderStatus::new(EncryptionMode::Encrypted, SigningMode::None)
                .with_error("key not found"),
            now,
            Some(now),
        ),
        _ => {
            let mut content = MessageContent::text("");
            content.attachment = Some(Attachment::pending(Some("image/jpeg".to_owned())));
            Message::inbound(
                Transmission::new(BOB, "bob.with.a.rather.long.address@chat.example.org"),
                content,
                CoderStatus::plain(),
                now,
                None,
            )
        }
    }
}

/// Answer retry requests by posting the mutations a real transport would produce.
async fn serve_retries(sender: HandoffSender, mut rx: mpsc::UnboundedReceiver<RetryRequest>) {
    while let Some(request) = rx.recv().await {
        let mutation = match request {
            RetryRequest::Decrypt(id) => Mutation::Decrypted {
                message: id,
                text: format!("decrypted #{id}"),
                coder: CoderStatus::new(EncryptionMode::Decrypted, SigningMode::Verified),
            },
            RetryRequest::Attachment(id) => Mutation::AttachmentResolved {
                message: id,
                path: PathBuf::from(format!("/tmp/chatview-smoke/attachment-{id}.jpg")),
            },
        };
        debug!(?request, "serving retry");
        if sender.post(mutation).await.is_err() {
            break;
        }
    }
}
