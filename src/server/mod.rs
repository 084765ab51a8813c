//! HTTP server for the chat API.
//!
//! Provides endpoints for:
//! - Reading and streaming an owner's conversation
//! - Submitting questions
//! - Managing the completion API key

pub mod routes;
pub mod state;
pub mod sweeper;

pub use routes::{OWNER_HEADER, create_router};
pub use state::AppState;
pub use sweeper::SessionSweeper;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Start the HTTP server.
///
/// # Errors
/// Returns an error if the server fails to start.
pub async fn run_server(
    state: Arc<AppState>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    run_server_with_shutdown(state, port, ctrl_c()).await
}

/// Start the HTTP server with graceful shutdown support.
///
/// Idle sessions are swept in the background. The server stops accepting
/// connections when `shutdown_signal` completes, then closes every
/// conversation session.
///
/// # Errors
/// Returns an error if the server fails to start.
pub async fn run_server_with_shutdown<F>(
    state: Arc<AppState>,
    port: u16,
    shutdown_signal: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app: Router = create_router(Arc::clone(&state))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Askbox server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let sweeper = SessionSweeper::from_config(Arc::clone(&state));
    let stop_sweeper = sweeper.shutdown_notifier();
    let sweeping = sweeper.spawn();

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await;

    stop_sweeper.notify_one();
    if let Err(err) = sweeping.await {
        warn!(?err, "Session sweeper ended abnormally");
    }
    state.close_all().await;
    served?;
    Ok(())
}

/// Resolves when the process receives Ctrl-C.
pub async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "Ctrl-C handler unavailable; running until killed");
        std::future::pending::<()>().await;
    }
}
