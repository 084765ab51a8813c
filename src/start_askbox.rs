//! Startup helpers for the askbox server.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;

use crate::chat::core::config::{API_KEY_ENV, ChatConfig};
use crate::server::{self, AppState};

/// Run the server until Ctrl-C.
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting askbox v{}", env!("CARGO_PKG_VERSION"));

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(serve(ChatConfig::from_env())) {
        tracing::error!("Server error: {e:#}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

async fn serve(config: ChatConfig) -> anyhow::Result<()> {
    let port = config.server.port;
    let state = initialize(config).await?;
    server::run_server(state, port)
        .await
        .map_err(|e| anyhow::anyhow!(e))
}

/// Open storage, seed the API key from the environment and build state.
///
/// # Errors
/// Returns an error if the config is invalid or storage cannot be opened.
pub async fn initialize(config: ChatConfig) -> anyhow::Result<Arc<AppState>> {
    tracing::info!(
        db = %config.storage.sqlite_path.display(),
        model = %config.llm.model,
        "Opening chat storage"
    );
    let state = AppState::open(config)
        .await
        .context("failed to create state")?;

    if let Some(api_key) = std::env::var(API_KEY_ENV)
        .ok()
        .filter(|key| !key.trim().is_empty())
    {
        state
            .credentials
            .save_api_key(&api_key)
            .await
            .context("failed to store API key")?;
        tracing::info!("API key loaded from {API_KEY_ENV}");
    }

    Ok(state)
}
