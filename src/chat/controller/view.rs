//! Observable conversation state consumed by the presentation layer.

use serde::Serialize;

use crate::chat::core::ids::OwnerId;
use crate::chat::core::message::Message;

/// Lifecycle of one owner session.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No identity, no subscription.
    #[default]
    Uninitialized,
    /// Welcome check and subscription in progress.
    Initializing,
    /// Subscription delivered its first snapshot or error.
    Ready,
}

/// Snapshot of everything the chat surface renders.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ConversationView {
    /// Owner of the active session.
    pub owner: Option<OwnerId>,
    /// Session phase.
    pub phase: SessionPhase,
    /// Last persisted snapshot, in store order.
    pub messages: Vec<Message>,
    /// Local failure notices that are never persisted.
    pub notices: Vec<Message>,
    /// An ask/answer cycle is in flight.
    pub sending: bool,
    /// Pending input buffer.
    pub draft: String,
    /// Notices pushed since the controller was created. The last entry of
    /// `notices` has serial `notice_serial - 1`.
    pub notice_serial: u64,
}

impl ConversationView {
    pub(crate) fn initializing(owner: OwnerId, sending: bool) -> Self {
        Self {
            owner: Some(owner),
            phase: SessionPhase::Initializing,
            sending,
            ..Self::default()
        }
    }

    /// Whether the subscription has gone live.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.phase == SessionPhase::Ready
    }

    /// Whether a question is awaiting its answer.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.sending
    }

    /// Messages in display order.
    ///
    /// Persisted messages keep the snapshot order. A notice that answers a
    /// question in the snapshot follows that question; any other notice is
    /// placed after every persisted message that is not newer than it.
    #[must_use]
    pub fn rendered(&self) -> Vec<&Message> {
        self.render(&self.notices)
    }

    /// Like [`rendered`](Self::rendered), keeping only notices whose serial
    /// is at least `since`.
    ///
    /// Passing the current `notice_serial` yields what a fresh page load
    /// shows: the persisted messages alone.
    #[must_use]
    pub fn rendered_since(&self, since: u64) -> Vec<&Message> {
        let pushed = self.notices.len();
        let older = usize::try_from(self.notice_serial.saturating_sub(since))
            .map_or(0, |newer| pushed.saturating_sub(newer));
        self.render(&self.notices[older..])
    }

    fn render<'a>(&'a self, notices: &'a [Message]) -> Vec<&'a Message> {
        let is_anchored = |notice: &Message| {
            notice
                .reply_to
                .is_some_and(|id| self.messages.iter().any(|m| m.id == id))
        };
        let (anchored, loose): (Vec<&Message>, Vec<&Message>) =
            notices.iter().partition(|n| is_anchored(n));

        let mut out = Vec::with_capacity(self.messages.len() + notices.len());
        let mut loose = loose.into_iter().peekable();
        for message in &self.messages {
            while let Some(notice) = loose.next_if(|n| n.timestamp < message.timestamp) {
                out.push(notice);
            }
            out.push(message);
            out.extend(
                anchored
                    .iter()
                    .copied()
                    .filter(|n| n.reply_to == Some(message.id)),
            );
        }
        out.extend(loose);
        out
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use super::*;
    use crate::chat::core::ids::MessageId;
    use crate::chat::core::message::MessageRole;

    fn owner() -> OwnerId {
        OwnerId::new("viewer").expect("owner")
    }

    fn persisted(text: &str, base: DateTime<Utc>, offset_ms: i64) -> Message {
        Message {
            id: MessageId::new(),
            owner_id: owner(),
            text: text.to_string(),
            role: MessageRole::User,
            timestamp: base + Duration::milliseconds(offset_ms),
            reply_to: None,
            is_welcome_message: false,
        }
    }

    #[test]
    fn test_rendered_keeps_snapshot_order_and_places_notices() {
        let base = Utc::now();
        let mut notice = Message::local_notice(owner(), "Error: boom", None);
        notice.timestamp = base + Duration::milliseconds(15);

        let view = ConversationView {
            messages: vec![
                persisted("first", base, 0),
                persisted("second", base, 10),
                persisted("third", base, 20),
            ],
            notices: vec![notice],
            ..ConversationView::initializing(owner(), false)
        };

        let texts: Vec<&str> = view.rendered().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["first", "second", "Error: boom", "third"]);
    }

    #[test]
    fn test_notice_follows_its_question_when_store_clock_runs_ahead() {
        let ahead = Utc::now() + Duration::hours(1);
        let question = persisted("will it work?", ahead, 10);
        let notice = Message::local_notice(owner(), "Error: quota", Some(question.id));
        let stray = Message::local_notice(owner(), "Error: offline", None);

        let view = ConversationView {
            messages: vec![
                persisted("elsewhere", ahead, 0),
                question,
                persisted("later", ahead, 20),
            ],
            notices: vec![notice, stray],
            notice_serial: 2,
            ..ConversationView::initializing(owner(), false)
        };

        let texts: Vec<&str> = view.rendered().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(
            texts,
            [
                "Error: offline",
                "elsewhere",
                "will it work?",
                "Error: quota",
                "later"
            ]
        );
    }

    #[test]
    fn test_rendered_since_skips_earlier_notices() {
        let base = Utc::now();
        let view = ConversationView {
            messages: vec![persisted("q", base, 0)],
            notices: vec![
                Message::local_notice(owner(), "Error: one", None),
                Message::local_notice(owner(), "Error: two", None),
            ],
            notice_serial: 7,
            ..ConversationView::initializing(owner(), false)
        };

        let texts = |since| -> Vec<String> {
            view.rendered_since(since)
                .iter()
                .map(|m| m.text.clone())
                .collect()
        };
        assert_eq!(texts(0), ["q", "Error: one", "Error: two"]);
        assert_eq!(texts(6), ["q", "Error: two"]);
        assert_eq!(texts(7), ["q"]);
        assert_eq!(texts(99), ["q"]);
    }

    #[test]
    fn test_flags() {
        let mut view = ConversationView::initializing(owner(), true);
        assert!(!view.is_ready());
        assert!(view.is_loading());
        view.phase = SessionPhase::Ready;
        view.sending = false;
        assert!(view.is_ready());
        assert!(!view.is_loading());
        assert!(view.rendered().is_empty());
    }
}
