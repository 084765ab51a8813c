//! Device-local storage for the completion service API key.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::chat::core::errors::{ChatError, ChatResult};

/// Boxed future type for credential operations.
pub type CredentialFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Settings key under which the API key is stored.
pub const API_KEY_SETTING: &str = "gemini_api_key";

/// Source of the single opaque API key.
pub trait CredentialStore: Send + Sync {
    /// Read the stored key, if any.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn load_api_key(&self) -> CredentialFuture<'_, ChatResult<Option<String>>>;

    /// Store or replace the key.
    ///
    /// # Errors
    /// Returns an error if the key is blank or storage access fails.
    fn save_api_key(&self, api_key: &str) -> CredentialFuture<'_, ChatResult<()>>;

    /// Forget the key.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn clear_api_key(&self) -> CredentialFuture<'_, ChatResult<()>>;
}

/// `SQLite` key/value settings table holding the API key.
pub struct SqliteCredentialStore {
    conn: Arc<Connection>,
    table: String,
}

impl SqliteCredentialStore {
    /// Initialize the settings table.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub async fn new(conn: Arc<Connection>, table: impl Into<String>) -> ChatResult<Self> {
        let table = table.into();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                )"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn load_api_key(&self) -> CredentialFuture<'_, ChatResult<Option<String>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let value = self
                .conn
                .call(move |conn| {
                    let value = conn
                        .query_row(
                            &format!("SELECT value FROM {table} WHERE key = ?1"),
                            rusqlite::params![API_KEY_SETTING],
                            |row| row.get::<_, String>(0),
                        )
                        .optional()?;
                    Ok(value)
                })
                .await?;
            Ok(value.filter(|key| !key.trim().is_empty()))
        })
    }

    fn save_api_key(&self, api_key: &str) -> CredentialFuture<'_, ChatResult<()>> {
        let api_key = api_key.trim().to_string();
        Box::pin(async move {
            if api_key.is_empty() {
                return Err(ChatError::InvalidConfig("api key must not be empty".to_string()));
            }
            let table = self.table.clone();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table} (key, value) VALUES (?1, ?2)
                             ON CONFLICT(key) DO UPDATE SET value = excluded.value"
                        ),
                        rusqlite::params![API_KEY_SETTING, api_key],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn clear_api_key(&self) -> CredentialFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            let table = self.table.clone();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!("DELETE FROM {table} WHERE key = ?1"),
                        rusqlite::params![API_KEY_SETTING],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }
}
