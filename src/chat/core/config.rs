//! Configuration for the chat service.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::chat::core::errors::{ChatError, ChatResult};

/// Environment variable overriding the `SQLite` database path.
pub const DB_PATH_ENV: &str = "ASKBOX_DB_PATH";
/// Environment variable overriding the completion model name.
pub const MODEL_ENV: &str = "ASKBOX_MODEL";
/// Environment variable overriding the completion service base URL.
pub const LLM_URL_ENV: &str = "ASKBOX_LLM_URL";
/// Environment variable overriding the HTTP port.
pub const PORT_ENV: &str = "ASKBOX_PORT";
/// Environment variable carrying an API key to seed the credential store.
pub const API_KEY_ENV: &str = "ASKBOX_API_KEY";

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Storage settings.
    pub storage: StorageConfig,
    /// Completion model settings.
    pub llm: LlmConfig,
    /// Turn-taking settings.
    pub conversation: ConversationConfig,
    /// HTTP surface settings.
    pub server: ServerConfig,
}

impl ChatConfig {
    /// Defaults overlaid with `ASKBOX_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var(DB_PATH_ENV) {
            config.storage.sqlite_path = PathBuf::from(path);
        }
        if let Ok(model) = std::env::var(MODEL_ENV) {
            config.llm.model = model;
        }
        if let Ok(url) = std::env::var(LLM_URL_ENV) {
            config.llm.base_url = url;
        }
        if let Some(port) = std::env::var(PORT_ENV).ok().and_then(|p| p.parse().ok()) {
            config.server.port = port;
        }
        config
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        validate_table_name("storage.messages_table", &self.storage.messages_table)?;
        validate_table_name("storage.settings_table", &self.storage.settings_table)?;

        if self.storage.messages_table == self.storage.settings_table {
            return Err(ChatError::InvalidConfig(
                "storage.messages_table and storage.settings_table must differ".to_string(),
            ));
        }

        if self.llm.model.trim().is_empty() {
            return Err(ChatError::InvalidConfig(
                "llm.model must not be empty".to_string(),
            ));
        }

        if self.llm.timeout_seconds == 0 {
            return Err(ChatError::InvalidConfig(
                "llm.timeout_seconds must be > 0".to_string(),
            ));
        }

        Url::parse(&self.llm.base_url)?;

        if self.conversation.change_buffer == 0 {
            return Err(ChatError::InvalidConfig(
                "conversation.change_buffer must be > 0".to_string(),
            ));
        }

        if self.conversation.welcome_text.trim().is_empty() {
            return Err(ChatError::InvalidConfig(
                "conversation.welcome_text must not be empty".to_string(),
            ));
        }

        if self.server.session_idle_seconds == 0 || self.server.sweep_interval_seconds == 0 {
            return Err(ChatError::InvalidConfig(
                "server.session_idle_seconds and server.sweep_interval_seconds must be > 0"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_table_name(field: &str, name: &str) -> ChatResult<()> {
    let valid = !name.is_empty()
        && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        && !name.starts_with(|ch: char| ch.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(ChatError::InvalidConfig(format!(
            "{field} must be a plain SQL identifier, got {name:?}"
        )))
    }
}

/// Storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
    /// Message table name.
    pub messages_table: String,
    /// Device-local settings table (holds the API key).
    pub settings_table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("askbox.sqlite"),
            messages_table: "messages".to_string(),
            settings_table: "settings".to_string(),
        }
    }
}

/// Completion model settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Gemini model name.
    pub model: String,
    /// API base URL, without the `/models/...` suffix.
    pub base_url: String,
    /// Optional sampling temperature.
    pub temperature: Option<f64>,
    /// Optional output token cap.
    pub max_output_tokens: Option<u32>,
    /// Whole-request timeout.
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            temperature: None,
            max_output_tokens: None,
            timeout_seconds: 120,
        }
    }
}

/// Turn-taking settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Text of the per-owner greeting.
    pub welcome_text: String,
    /// Instruction prepended to every question sent to the model.
    pub prompt_prefix: String,
    /// Capacity of the store's change-notification channel.
    pub change_buffer: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            welcome_text:
                "Hello there! I'm here to help you with programming questions. Ask me anything!"
                    .to_string(),
            prompt_prefix: "You are a programming assistant. User question: ".to_string(),
            change_buffer: 256,
        }
    }
}

/// HTTP surface settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listening port.
    pub port: u16,
    /// Sessions unused for this long, with no open stream, are closed.
    pub session_idle_seconds: u64,
    /// Interval between idle-session sweeps.
    pub sweep_interval_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            session_idle_seconds: 300,
            sweep_interval_seconds: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ChatConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_unsafe_table_name() {
        let mut config = ChatConfig::default();
        config.storage.messages_table = "messages; DROP TABLE x".to_string();
        assert!(matches!(
            config.validate(),
            Err(ChatError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_bad_base_url_and_zero_values() {
        let mut config = ChatConfig::default();
        config.llm.base_url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(ChatError::Url(_))));

        let mut config = ChatConfig::default();
        config.llm.timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = ChatConfig::default();
        config.conversation.change_buffer = 0;
        assert!(config.validate().is_err());

        let mut config = ChatConfig::default();
        config.server.session_idle_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = ChatConfig::default();
        config.server.sweep_interval_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shared_table_names_rejected() {
        let mut config = ChatConfig::default();
        config.storage.settings_table = config.storage.messages_table.clone();
        assert!(config.validate().is_err());
    }
}
