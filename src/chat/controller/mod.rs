//! Turn-taking controller and the view it publishes.

pub mod conversation;
pub mod view;

pub use conversation::{ConversationController, IgnoreReason, SubmitOutcome};
pub use view::{ConversationView, SessionPhase};
