//! Application state shared across all request handlers.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

use crate::chat::controller::ConversationController;
use crate::chat::core::config::ChatConfig;
use crate::chat::core::errors::ChatResult;
use crate::chat::core::ids::OwnerId;
use crate::chat::store::{MessageStore, SqliteMessageStore};
use crate::llm::completion::CompletionResolver;
use crate::llm::credentials::{CredentialStore, SqliteCredentialStore};
use crate::llm::gemini::GeminiResolver;

/// One owner's controller, built and initialized once.
struct SessionSlot {
    controller: OnceCell<Arc<ConversationController>>,
    last_used: Mutex<Instant>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            controller: OnceCell::new(),
            last_used: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    /// Nothing outside the map refers to this slot or its controller.
    fn is_evictable(self: &Arc<Self>, max_idle: Duration) -> bool {
        if Arc::strong_count(self) > 1 || self.idle_for() < max_idle {
            return false;
        }
        self.controller.get().is_none_or(|controller| {
            Arc::strong_count(controller) == 1
                && controller.watcher_count() == 0
                && !controller.is_sending()
        })
    }

    async fn close(&self) {
        if let Some(controller) = self.controller.get() {
            controller.set_identity(None).await;
        }
    }
}

/// Shared application state.
pub struct AppState {
    /// Runtime configuration.
    pub config: ChatConfig,
    /// Message log shared by every session.
    pub store: Arc<dyn MessageStore>,
    /// Device-local API key storage.
    pub credentials: Arc<dyn CredentialStore>,
    /// Completion client source handed to each controller.
    pub resolver: Arc<dyn CompletionResolver>,
    sessions: DashMap<OwnerId, Arc<SessionSlot>>,
}

impl AppState {
    /// Assemble state from already-built backends.
    #[must_use]
    pub fn new(
        config: ChatConfig,
        store: Arc<dyn MessageStore>,
        credentials: Arc<dyn CredentialStore>,
        resolver: Arc<dyn CompletionResolver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            credentials,
            resolver,
            sessions: DashMap::new(),
        })
    }

    /// Open the `SQLite` database named in `config` and build the default backends.
    ///
    /// # Errors
    /// Returns an error if the config is invalid or storage cannot be opened.
    pub async fn open(config: ChatConfig) -> ChatResult<Arc<Self>> {
        let conn = Arc::new(Connection::open(&config.storage.sqlite_path).await?);
        Self::with_connection(config, conn).await
    }

    /// Build the default backends on an open connection.
    ///
    /// # Errors
    /// Returns an error if the config is invalid or the schema cannot be created.
    pub async fn with_connection(
        config: ChatConfig,
        conn: Arc<Connection>,
    ) -> ChatResult<Arc<Self>> {
        config.validate()?;
        let store =
            Arc::new(SqliteMessageStore::from_config(Arc::clone(&conn), &config).await?);
        let credentials: Arc<dyn CredentialStore> = Arc::new(
            SqliteCredentialStore::new(conn, config.storage.settings_table.clone()).await?,
        );
        let resolver = Arc::new(GeminiResolver::new(
            Arc::clone(&credentials),
            config.llm.clone(),
        )?);
        Ok(Self::new(config, store, credentials, resolver))
    }

    /// Controller for `owner`, initialized on first use.
    ///
    /// Concurrent first requests for the same owner share one controller
    /// and all wait for its initialization.
    pub async fn session(&self, owner: &OwnerId) -> Arc<ConversationController> {
        let slot = Arc::clone(
            self.sessions
                .entry(owner.clone())
                .or_insert_with(|| Arc::new(SessionSlot::new()))
                .value(),
        );
        slot.touch();
        let controller = slot
            .controller
            .get_or_init(|| async move {
                let controller = Arc::new(ConversationController::new(
                    Arc::clone(&self.store),
                    Arc::clone(&self.resolver),
                    self.config.conversation.clone(),
                ));
                controller.set_identity(Some(owner.clone())).await;
                controller
            })
            .await;
        Arc::clone(controller)
    }

    /// End `owner`'s session. Returns `false` if none was active.
    pub async fn end_session(&self, owner: &OwnerId) -> bool {
        let Some((_, slot)) = self.sessions.remove(owner) else {
            return false;
        };
        slot.close().await;
        true
    }

    /// End every session.
    pub async fn close_all(&self) {
        let owners: Vec<OwnerId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        info!(sessions = owners.len(), "Closing conversation sessions");
        for owner in owners {
            self.end_session(&owner).await;
        }
    }

    /// Close sessions unused for at least `max_idle`.
    ///
    /// A session with an open stream, a request in progress or a question
    /// awaiting its answer is kept. Returns the number closed.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let owners: Vec<OwnerId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut evicted = 0;
        for owner in owners {
            let Some((_, slot)) = self
                .sessions
                .remove_if(&owner, |_, slot| slot.is_evictable(max_idle))
            else {
                continue;
            };
            debug!(owner = %owner, "Evicting idle session");
            slot.close().await;
            evicted += 1;
        }
        evicted
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
