//! HTTP surface for the study task engine: router, access gate, error
//! envelope, and shared application state.

use std::sync::Arc;

use sti_core::{StiError, StiResult};
use sti_engine::AppConfig;

pub mod error;
pub mod gate;
pub mod rest;
pub mod state;

pub use rest::create_router;
pub use state::AppState;

/// Start the REST server and block until it exits.
pub async fn start_server(config: AppConfig) -> StiResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sti_server=debug,sti_storage=debug".parse().unwrap()),
        )
        .init();

    let bind_host = config.bind_host.clone();
    let port = config.port;
    let state = Arc::new(AppState::init(config)?);
    let app = create_router(state);

    tracing::info!("REST API listening on {bind_host}:{port}");
    let listener = tokio::net::TcpListener::bind(format!("{bind_host}:{port}"))
        .await
        .map_err(|e| StiError::Config(format!("cannot bind {bind_host}:{port}: {e}")))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| StiError::Internal(format!("server error: {e}")))?;
    Ok(())
}
