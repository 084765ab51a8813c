//! `SQLite` implementation of the message store.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_rusqlite::Connection;
use tracing::{debug, warn};

use crate::chat::core::config::ChatConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::{MessageId, OwnerId};
use crate::chat::core::message::{Message, MessageRole, NewMessage};
use crate::chat::store::message_store::{MessageStore, StoreFuture};
use crate::chat::store::subscription::{MessageSubscription, SubscriptionSink};

type RawRow = (String, i64, String, String, Option<String>, bool);

/// `SQLite`-backed message log with in-process change notifications.
pub struct SqliteMessageStore {
    conn: Arc<Connection>,
    table: String,
    changes: broadcast::Sender<OwnerId>,
}

impl SqliteMessageStore {
    /// Initialize the store on an open connection and create the table if needed.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub async fn new(
        conn: Arc<Connection>,
        table: impl Into<String>,
        change_buffer: usize,
    ) -> ChatResult<Self> {
        let table = table.into();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    ts INTEGER NOT NULL,
                    role TEXT NOT NULL,
                    text TEXT NOT NULL,
                    reply_to TEXT,
                    is_welcome INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS idx_{table_name}_owner_ts
                    ON {table_name} (owner_id, ts);"
            ))?;
            Ok(())
        })
        .await?;

        let (changes, _) = broadcast::channel(change_buffer.max(1));
        Ok(Self {
            conn,
            table,
            changes,
        })
    }

    /// Initialize from the storage and conversation sections of `config`.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub async fn from_config(conn: Arc<Connection>, config: &ChatConfig) -> ChatResult<Self> {
        Self::new(
            conn,
            config.storage.messages_table.clone(),
            config.conversation.change_buffer,
        )
        .await
    }

    async fn insert(
        &self,
        owner: &OwnerId,
        id: MessageId,
        message: NewMessage,
        if_absent: bool,
    ) -> ChatResult<bool> {
        if message.text.is_empty() {
            return Err(ChatError::InvalidMessage("text must not be empty".to_string()));
        }

        let table = self.table.clone();
        let owner_str = owner.to_string();
        let now_ms = Utc::now().timestamp_millis();

        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let last: Option<i64> = tx.query_row(
                    &format!("SELECT MAX(ts) FROM {table} WHERE owner_id = ?1"),
                    rusqlite::params![owner_str],
                    |row| row.get(0),
                )?;
                let ts = next_timestamp(now_ms, last);
                let verb = if if_absent { "INSERT OR IGNORE" } else { "INSERT" };
                let written = tx.execute(
                    &format!(
                        "{verb} INTO {table}
                        (id, owner_id, ts, role, text, reply_to, is_welcome)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                    ),
                    rusqlite::params![
                        id.to_string(),
                        owner_str,
                        ts,
                        message.role.as_str(),
                        message.text,
                        message.reply_to.map(|r| r.to_string()),
                        message.is_welcome_message
                    ],
                )?;
                tx.commit()?;
                Ok(written > 0)
            })
            .await?;

        if inserted {
            let _ = self.changes.send(owner.clone());
        }
        Ok(inserted)
    }
}

impl MessageStore for SqliteMessageStore {
    fn append_message(
        &self,
        owner: &OwnerId,
        message: NewMessage,
    ) -> StoreFuture<'_, ChatResult<MessageId>> {
        let owner = owner.clone();
        Box::pin(async move {
            let id = MessageId::new();
            self.insert(&owner, id, message, false).await?;
            Ok(id)
        })
    }

    fn ensure_message(
        &self,
        owner: &OwnerId,
        id: MessageId,
        message: NewMessage,
    ) -> StoreFuture<'_, ChatResult<bool>> {
        let owner = owner.clone();
        Box::pin(async move { self.insert(&owner, id, message, true).await })
    }

    fn query_user_messages(&self, owner: &OwnerId) -> StoreFuture<'_, ChatResult<Vec<Message>>> {
        let owner = owner.clone();
        Box::pin(async move { load_messages(&self.conn, &self.table, &owner, false).await })
    }

    fn subscribe_user_messages(
        &self,
        owner: &OwnerId,
    ) -> StoreFuture<'_, ChatResult<MessageSubscription>> {
        let owner = owner.clone();
        Box::pin(async move {
            // Subscribe before the first read so no append can slip between them.
            let changes = self.changes.subscribe();
            let (sink, subscription) = MessageSubscription::channel(owner.clone());
            let conn = Arc::clone(&self.conn);
            let table = self.table.clone();

            tokio::spawn(pump_snapshots(conn, table, owner, changes, sink));
            Ok(subscription)
        })
    }
}

async fn pump_snapshots(
    conn: Arc<Connection>,
    table: String,
    owner: OwnerId,
    mut changes: broadcast::Receiver<OwnerId>,
    sink: SubscriptionSink,
) {
    match load_messages(&conn, &table, &owner, true).await {
        Ok(snapshot) => {
            if !sink.snapshot(snapshot) {
                return;
            }
        }
        Err(err) => {
            warn!(owner = %owner, ?err, "Initial snapshot failed");
            sink.fail(err);
            return;
        }
    }

    loop {
        let received = tokio::select! {
            () = sink.closed() => break,
            received = changes.recv() => received,
        };

        match received {
            Ok(changed) if changed != owner => continue,
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => {
                sink.fail(ChatError::SubscriptionClosed);
                return;
            }
        }

        match load_messages(&conn, &table, &owner, true).await {
            Ok(snapshot) => {
                if !sink.snapshot(snapshot) {
                    break;
                }
            }
            Err(err) => {
                warn!(owner = %owner, ?err, "Snapshot refresh failed");
                sink.fail(err);
                return;
            }
        }
    }

    debug!(owner = %owner, "Message subscription released");
}

async fn load_messages(
    conn: &Connection,
    table: &str,
    owner: &OwnerId,
    ordered: bool,
) -> ChatResult<Vec<Message>> {
    let table = table.to_string();
    let owner_str = owner.to_string();
    let order = if ordered { "ORDER BY ts ASC, rowid ASC" } else { "" };

    let rows = conn
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, ts, role, text, reply_to, is_welcome
                 FROM {table}
                 WHERE owner_id = ?1
                 {order}"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![owner_str], |row| {
                    let id: String = row.get(0)?;
                    let ts: i64 = row.get(1)?;
                    let role: String = row.get(2)?;
                    let text: String = row.get(3)?;
                    let reply_to: Option<String> = row.get(4)?;
                    let is_welcome: bool = row.get(5)?;
                    Ok((id, ts, role, text, reply_to, is_welcome))
                })?
                .collect::<Result<Vec<RawRow>, rusqlite::Error>>()?;
            Ok(rows)
        })
        .await?;

    let mut messages = Vec::with_capacity(rows.len());
    for (id, ts, role, text, reply_to, is_welcome) in rows {
        let timestamp = Utc
            .timestamp_millis_opt(ts)
            .single()
            .ok_or_else(|| ChatError::InvalidMessage("invalid timestamp".to_string()))?;
        let role = MessageRole::from_str(&role)
            .map_err(|err| ChatError::InvalidMessage(format!("invalid role: {err}")))?;
        let reply_to = match reply_to {
            Some(raw) => Some(parse_message_id(&raw)?),
            None => None,
        };
        messages.push(Message {
            id: parse_message_id(&id)?,
            owner_id: owner.clone(),
            text,
            role,
            timestamp,
            reply_to,
            is_welcome_message: is_welcome,
        });
    }

    Ok(messages)
}

fn parse_message_id(raw: &str) -> ChatResult<MessageId> {
    raw.parse()
        .map_err(|err| ChatError::InvalidMessage(format!("invalid message id: {err}")))
}

/// Store timestamp: wall clock, bumped past the owner's last message.
const fn next_timestamp(now_ms: i64, last: Option<i64>) -> i64 {
    match last {
        Some(last) if last >= now_ms => last + 1,
        _ => now_ms,
    }
}
