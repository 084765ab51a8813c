//! Core chat types and identifiers.

pub mod config;
pub mod errors;
pub mod ids;
pub mod message;

pub use config::{ChatConfig, ConversationConfig, LlmConfig, ServerConfig, StorageConfig};
pub use errors::{ChatError, ChatResult};
pub use ids::{MessageId, OwnerId, OwnerIdError};
pub use message::{Message, MessageRole, NewMessage};
