//! Completion service access: client trait, Gemini backend, API key storage.

pub mod completion;
pub mod credentials;
pub mod gemini;

pub use completion::{CompletionClient, CompletionFuture, CompletionResolver, StaticResolver};
pub use credentials::{CredentialStore, SqliteCredentialStore};
pub use gemini::{GeminiClient, GeminiResolver};
