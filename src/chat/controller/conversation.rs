//! Conversation controller: welcome, live view and the ask/answer cycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::controller::view::{ConversationView, SessionPhase};
use crate::chat::core::config::ConversationConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::{MessageId, OwnerId};
use crate::chat::core::message::{Message, NewMessage};
use crate::chat::store::{CancelToken, MessageStore, MessageSubscription, SubscriptionEvent};
use crate::llm::completion::CompletionResolver;

/// Why a submit did nothing.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// Question was empty or whitespace.
    EmptyText,
    /// Another question is still being answered.
    SendInFlight,
}

/// Result of one submit call.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Nothing was written.
    Ignored {
        /// Reason the submit was skipped.
        reason: IgnoreReason,
    },
    /// Question and answer were both persisted.
    Answered {
        /// Persisted user message.
        question_id: MessageId,
        /// Persisted assistant reply.
        answer_id: MessageId,
    },
    /// The cycle failed; a local notice was shown.
    Failed {
        /// User message, if it was persisted before the failure.
        question_id: Option<MessageId>,
        /// Text of the local notice.
        notice: String,
    },
}

struct Session {
    owner: OwnerId,
    cancel: CancelToken,
    pump: Option<JoinHandle<()>>,
}

impl Session {
    async fn close(self) {
        self.cancel.cancel();
        let Some(pump) = self.pump else {
            return;
        };
        if let Err(err) = pump.await {
            debug!(owner = %self.owner, ?err, "Snapshot pump ended abnormally");
        }
    }
}

/// Applies subscription events to the shared view.
#[derive(Clone)]
struct ViewPublisher {
    tx: Arc<watch::Sender<ConversationView>>,
}

impl ViewPublisher {
    fn on_update(&self, cancel: &CancelToken, snapshot: Vec<Message>) -> bool {
        self.tx.send_if_modified(|view| {
            if cancel.is_cancelled() {
                return false;
            }
            view.messages = snapshot;
            view.phase = SessionPhase::Ready;
            true
        })
    }

    fn on_error(&self, cancel: &CancelToken, err: &ChatError) -> bool {
        self.tx.send_if_modified(|view| {
            if cancel.is_cancelled() {
                return false;
            }
            warn!(owner = ?view.owner, %err, "Message subscription failed");
            view.phase = SessionPhase::Ready;
            true
        })
    }
}

/// Clears the in-flight flag and the draft when a submit ends, even if
/// the submitting future is dropped.
struct SendingGuard<'a> {
    sending: &'a AtomicBool,
    view: &'a watch::Sender<ConversationView>,
}

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        self.sending.store(false, Ordering::Release);
        self.view.send_modify(|view| {
            view.sending = false;
            view.draft.clear();
        });
    }
}

/// Drives one owner's conversation against a message store and a
/// completion service.
pub struct ConversationController {
    store: Arc<dyn MessageStore>,
    resolver: Arc<dyn CompletionResolver>,
    config: ConversationConfig,
    view: ViewPublisher,
    sending: AtomicBool,
    epoch: AtomicU64,
    session: Mutex<Option<Session>>,
}

impl ConversationController {
    /// Create an idle controller.
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        resolver: Arc<dyn CompletionResolver>,
        config: ConversationConfig,
    ) -> Self {
        let (tx, _) = watch::channel(ConversationView::default());
        Self {
            store,
            resolver,
            config,
            view: ViewPublisher { tx: Arc::new(tx) },
            sending: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            session: Mutex::new(None),
        }
    }

    /// Current view.
    #[must_use]
    pub fn view(&self) -> ConversationView {
        self.view.tx.borrow().clone()
    }

    /// Receiver notified on every view change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ConversationView> {
        self.view.tx.subscribe()
    }

    /// Wait until `check` holds or `timeout` elapses, then return the view.
    pub async fn settle(
        &self,
        timeout: Duration,
        check: impl FnMut(&ConversationView) -> bool + Send,
    ) -> ConversationView {
        let mut rx = self.watch();
        if tokio::time::timeout(timeout, rx.wait_for(check)).await.is_err() {
            debug!("View did not settle before timeout");
        }
        rx.borrow().clone()
    }

    /// Serial the next local notice will get.
    #[must_use]
    pub fn notice_serial(&self) -> u64 {
        self.view.tx.borrow().notice_serial
    }

    /// Number of live view receivers.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.view.tx.receiver_count()
    }

    /// Whether an ask/answer cycle is in flight.
    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::Acquire)
    }

    /// Owner of the active session, if any.
    pub async fn owner(&self) -> Option<OwnerId> {
        self.session.lock().await.as_ref().map(|s| s.owner.clone())
    }

    /// Start a session for `owner`, replacing any previous one.
    ///
    /// Ensures the welcome message, then subscribes. Store failures are
    /// logged and leave the session degraded but ready.
    pub async fn initialize(&self, owner: OwnerId) {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            previous.close().await;
        }

        self.epoch.fetch_add(1, Ordering::AcqRel);
        let sending = self.sending.load(Ordering::Acquire);
        let fresh = ConversationView::initializing(owner.clone(), sending);
        self.view.tx.send_modify(|view| {
            *view = ConversationView {
                notice_serial: view.notice_serial,
                ..fresh
            };
        });
        info!(owner = %owner, "Initializing conversation");

        self.ensure_welcome(&owner).await;

        match self.store.subscribe_user_messages(&owner).await {
            Ok(subscription) => {
                let cancel = subscription.cancel_token();
                let pump = tokio::spawn(pump_snapshots(
                    subscription,
                    cancel.clone(),
                    self.view.clone(),
                ));
                *session = Some(Session {
                    owner,
                    cancel,
                    pump: Some(pump),
                });
            }
            Err(err) => {
                let cancel = CancelToken::new();
                self.view.on_error(&cancel, &err);
                *session = Some(Session {
                    owner,
                    cancel,
                    pump: None,
                });
            }
        }
    }

    /// Identity-provider signal: follow the new owner, or go idle on `None`.
    pub async fn set_identity(&self, owner: Option<OwnerId>) {
        match owner {
            Some(owner) if self.owner().await.as_ref() != Some(&owner) => {
                self.initialize(owner).await;
            }
            Some(_) => {}
            None => self.shutdown().await,
        }
    }

    /// Cancel the subscription and return to idle.
    ///
    /// In-flight writes and completion calls may still finish; their
    /// outcome is not shown.
    pub async fn shutdown(&self) {
        let previous = self.session.lock().await.take();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if let Some(previous) = previous {
            info!(owner = %previous.owner, "Closing conversation");
            previous.close().await;
        }
        let sending = self.sending.load(Ordering::Acquire);
        self.view.tx.send_modify(|view| {
            *view = ConversationView {
                sending,
                notice_serial: view.notice_serial,
                ..ConversationView::default()
            };
        });
    }

    /// Update the pending input buffer.
    pub fn set_draft(&self, text: impl Into<String>) {
        let text = text.into();
        self.view.tx.send_modify(|view| view.draft = text);
    }

    /// Ask `question` on behalf of `owner`.
    ///
    /// Persists the question, asks the completion service and persists its
    /// reply with a link to the question. Any failure is shown as a local
    /// notice instead of being returned.
    pub async fn submit(&self, owner: &OwnerId, question: &str) -> SubmitOutcome {
        if question.trim().is_empty() {
            return SubmitOutcome::Ignored {
                reason: IgnoreReason::EmptyText,
            };
        }
        if self
            .sending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(owner = %owner, "Submit ignored while a send is in flight");
            return SubmitOutcome::Ignored {
                reason: IgnoreReason::SendInFlight,
            };
        }

        let _guard = SendingGuard {
            sending: &self.sending,
            view: &self.view.tx,
        };
        let epoch = self.epoch.load(Ordering::Acquire);
        self.view.tx.send_modify(|view| view.sending = true);

        let mut question_id = None;
        match self.ask(owner, question, &mut question_id).await {
            Ok((asked, answered)) => {
                info!(owner = %owner, answer_id = %answered, "Question answered");
                SubmitOutcome::Answered {
                    question_id: asked,
                    answer_id: answered,
                }
            }
            Err(err) => {
                warn!(owner = %owner, %err, "Submit failed");
                let notice = format!("Error: {err}");
                self.push_notice(owner, epoch, question_id, &notice);
                SubmitOutcome::Failed {
                    question_id,
                    notice,
                }
            }
        }
    }

    async fn ask(
        &self,
        owner: &OwnerId,
        question: &str,
        question_id: &mut Option<MessageId>,
    ) -> ChatResult<(MessageId, MessageId)> {
        let asked = self
            .store
            .append_message(owner, NewMessage::user(question))
            .await?;
        *question_id = Some(asked);

        let client = self.resolver.resolve().await?;
        let prompt = format!("{}{question}", self.config.prompt_prefix);
        debug!(owner = %owner, model = client.model_name(), "Requesting completion");
        let answer = client.generate(&prompt).await?;

        let answered = self
            .store
            .append_message(owner, NewMessage::assistant_reply(answer, asked))
            .await?;
        Ok((asked, answered))
    }

    async fn ensure_welcome(&self, owner: &OwnerId) {
        let existing = match self.store.query_user_messages(owner).await {
            Ok(existing) => existing,
            Err(err) => {
                warn!(owner = %owner, %err, "Could not read history");
                return;
            }
        };
        if !existing.is_empty() {
            return;
        }

        let welcome = NewMessage::welcome(self.config.welcome_text.clone());
        match self
            .store
            .ensure_message(owner, MessageId::welcome_for(owner), welcome)
            .await
        {
            Ok(true) => info!(owner = %owner, "Welcome message created"),
            Ok(false) => debug!(owner = %owner, "Welcome message already present"),
            Err(err) => warn!(owner = %owner, %err, "Could not create welcome message"),
        }
    }

    fn push_notice(
        &self,
        owner: &OwnerId,
        epoch: u64,
        question_id: Option<MessageId>,
        text: &str,
    ) {
        self.view.tx.send_if_modified(|view| {
            if self.epoch.load(Ordering::Acquire) != epoch || view.owner.as_ref() != Some(owner) {
                return false;
            }
            let mut notice = Message::local_notice(owner.clone(), text, question_id);
            // Store timestamps can run ahead of the wall clock.
            if let Some(last) = view.messages.last() {
                notice.timestamp = notice.timestamp.max(last.timestamp);
            }
            view.notices.push(notice);
            view.notice_serial += 1;
            true
        });
    }
}

async fn pump_snapshots(
    mut subscription: MessageSubscription,
    cancel: CancelToken,
    view: ViewPublisher,
) {
    while let Some(event) = subscription.next().await {
        match event {
            SubscriptionEvent::Snapshot(snapshot) => {
                debug!(owner = %subscription.owner(), count = snapshot.len(), "Snapshot received");
                if !view.on_update(&cancel, snapshot) {
                    break;
                }
            }
            SubscriptionEvent::Error(err) => {
                view.on_error(&cancel, &err);
                break;
            }
        }
    }
}
