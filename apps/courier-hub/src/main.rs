use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use courier_hub::config::{self, ConfigError};
use courier_hub::store::FileStore;
use courier_hub::AppState;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env if present; env vars may also be set externally.
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = FileStore::from_env();
    let mut config = match config::load_or_init(&store) {
        Ok(config) => config,
        Err(e @ ConfigError::DefaultWritten(_)) => {
            tracing::warn!(path = %store.path().display(), "{e}");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            return ExitCode::FAILURE;
        }
    };
    config.apply_env();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(
        ws_path = %config.web_socket_path,
        queue_capacity = config.outbound_queue_capacity,
        recent_window = config.recent_window,
        "courier-hub configured"
    );

    let state = AppState::new(config);
    let app = Router::new()
        .merge(courier_hub::routes::router(&state))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(%addr, "courier-hub listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // Without a signal handler, run until killed.
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
