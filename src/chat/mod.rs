//! Owner-scoped chat: message model, store adapter and conversation controller.

pub mod controller;
pub mod core;
pub mod store;

pub use controller::{ConversationController, ConversationView, SessionPhase, SubmitOutcome};
pub use self::core::{ChatConfig, ChatError, ChatResult, Message, MessageId, MessageRole, OwnerId};
pub use store::{MessageStore, SqliteMessageStore};
