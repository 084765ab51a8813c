//! Store adapter contract for owner-scoped messages.

use std::future::Future;
use std::pin::Pin;

use crate::chat::core::errors::ChatResult;
use crate::chat::core::ids::{MessageId, OwnerId};
use crate::chat::core::message::{Message, NewMessage};
use crate::chat::store::subscription::MessageSubscription;

/// Boxed future type for message store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Append-only message log partitioned by owner.
///
/// Implementations assign ids and timestamps, never cache, and never
/// mutate or delete a stored message.
pub trait MessageStore: Send + Sync {
    /// Insert one message for `owner`; returns its store-assigned id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn append_message(
        &self,
        owner: &OwnerId,
        message: NewMessage,
    ) -> StoreFuture<'_, ChatResult<MessageId>>;

    /// Insert `message` under `id` unless a message with that id exists.
    ///
    /// Returns `true` if a row was written.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn ensure_message(
        &self,
        owner: &OwnerId,
        id: MessageId,
        message: NewMessage,
    ) -> StoreFuture<'_, ChatResult<bool>>;

    /// Point-in-time read of every message for `owner`, in no particular order.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn query_user_messages(&self, owner: &OwnerId) -> StoreFuture<'_, ChatResult<Vec<Message>>>;

    /// Register a live query; the subscription yields the full ordered
    /// snapshot now and after every change for `owner`.
    ///
    /// # Errors
    /// Returns an error if the listener cannot be registered.
    fn subscribe_user_messages(
        &self,
        owner: &OwnerId,
    ) -> StoreFuture<'_, ChatResult<MessageSubscription>>;
}
