//! Cancellable snapshot stream handed out by message subscriptions.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::chat::core::errors::ChatError;
use crate::chat::core::ids::OwnerId;
use crate::chat::core::message::Message;

/// One delivery from a live subscription.
#[derive(Debug)]
pub enum SubscriptionEvent {
    /// Full timestamp-ordered snapshot of the owner's messages.
    Snapshot(Vec<Message>),
    /// Terminal failure; no snapshot follows it.
    Error(ChatError),
}

/// Releases a subscription. Cloneable and idempotent.
#[derive(Clone, Debug)]
pub struct CancelToken {
    state: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Create a live token.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// Cancel the subscription. Returns `true` only for the call that cancelled it.
    pub fn cancel(&self) -> bool {
        !self.state.send_replace(true)
    }

    /// Whether `cancel` has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Consumer side of a live query over one owner's messages.
///
/// Dropping the subscription cancels it.
#[derive(Debug)]
pub struct MessageSubscription {
    owner: OwnerId,
    events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    cancel: CancelToken,
}

/// Producer side used by store implementations.
#[derive(Debug)]
pub struct SubscriptionSink {
    events: mpsc::UnboundedSender<SubscriptionEvent>,
    cancel: CancelToken,
}

impl MessageSubscription {
    /// Create a connected sink/subscription pair for `owner`.
    #[must_use]
    pub fn channel(owner: OwnerId) -> (SubscriptionSink, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancelToken::new();
        (
            SubscriptionSink {
                events: tx,
                cancel: cancel.clone(),
            },
            Self {
                owner,
                events: rx,
                cancel,
            },
        )
    }

    /// Owner this subscription is scoped to.
    #[must_use]
    pub const fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// Token that releases this subscription.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wait for the next event. `None` once cancelled or after the producer stops.
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            event = self.events.recv() => event,
        }
    }
}

impl Drop for MessageSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl SubscriptionSink {
    /// Deliver a snapshot. Returns `false` if the consumer is gone.
    pub fn snapshot(&self, messages: Vec<Message>) -> bool {
        if self.is_closed() {
            return false;
        }
        self.events
            .send(SubscriptionEvent::Snapshot(messages))
            .is_ok()
    }

    /// Deliver the terminal error and close the sink.
    pub fn fail(self, err: ChatError) {
        if !self.is_closed() {
            let _ = self.events.send(SubscriptionEvent::Error(err));
        }
    }

    /// Whether the consumer cancelled or dropped the subscription.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.events.is_closed()
    }

    /// Resolve once the consumer cancels or drops the subscription.
    pub async fn closed(&self) {
        tokio::select! {
            () = self.cancel.cancelled() => {}
            () = self.events.closed() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerId {
        OwnerId::new("owner-1").expect("valid owner")
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (sink, mut sub) = MessageSubscription::channel(owner());
        assert!(sink.snapshot(Vec::new()));
        assert!(sink.snapshot(vec![Message::local_notice(owner(), "a", None)]));

        assert!(matches!(sub.next().await, Some(SubscriptionEvent::Snapshot(s)) if s.is_empty()));
        assert!(matches!(sub.next().await, Some(SubscriptionEvent::Snapshot(s)) if s.len() == 1));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_ends_stream() {
        let (sink, mut sub) = MessageSubscription::channel(owner());
        let token = sub.cancel_token();

        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancelled());

        assert!(!sink.snapshot(Vec::new()));
        assert!(sink.is_closed());
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_error_is_terminal() {
        let (sink, mut sub) = MessageSubscription::channel(owner());
        sink.fail(ChatError::SubscriptionClosed);

        assert!(matches!(
            sub.next().await,
            Some(SubscriptionEvent::Error(ChatError::SubscriptionClosed))
        ));
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_closes_sink() {
        let (sink, sub) = MessageSubscription::channel(owner());
        drop(sub);
        sink.closed().await;
        assert!(sink.is_closed());
    }
}
