//! Message store adapter: append, query and live subscription.

pub mod message_store;
pub mod sqlite;
pub mod subscription;

pub use message_store::{MessageStore, StoreFuture};
pub use sqlite::SqliteMessageStore;
pub use subscription::{CancelToken, MessageSubscription, SubscriptionEvent, SubscriptionSink};
