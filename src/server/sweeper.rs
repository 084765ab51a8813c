//! Background worker that closes idle conversation sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::state::AppState;

/// Periodically evicts sessions nobody has used for a while.
pub struct SessionSweeper {
    state: Arc<AppState>,
    interval: Duration,
    max_idle: Duration,
    shutdown: Arc<Notify>,
}

impl SessionSweeper {
    /// Create a sweeper with explicit timings.
    #[must_use]
    pub fn new(state: Arc<AppState>, interval: Duration, max_idle: Duration) -> Self {
        Self {
            state,
            interval,
            max_idle,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Create a sweeper from the `server` section of the state's config.
    #[must_use]
    pub fn from_config(state: Arc<AppState>) -> Self {
        let interval = Duration::from_secs(state.config.server.sweep_interval_seconds);
        let max_idle = Duration::from_secs(state.config.server.session_idle_seconds);
        Self::new(state, interval, max_idle)
    }

    /// Notifier that stops the worker; use `notify_one`.
    #[must_use]
    pub fn shutdown_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Spawn the sweep loop as a tokio task.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(interval = ?self.interval, max_idle = ?self.max_idle, "Starting session sweeper");

        loop {
            tokio::select! {
                () = tokio::time::sleep(self.interval) => {
                    let evicted = self.state.evict_idle(self.max_idle).await;
                    if evicted > 0 {
                        info!(
                            evicted,
                            remaining = self.state.session_count(),
                            "Idle sessions closed"
                        );
                    } else {
                        debug!("Session sweep found nothing idle");
                    }
                }
                () = self.shutdown.notified() => {
                    info!("Session sweeper shutting down");
                    break;
                }
            }
        }
    }
}
