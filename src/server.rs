//! Listener setup and middleware

use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::{create_router, AppState};
use crate::config::ServerConfig;
use crate::errors::AppResult;
use crate::tracker::ChallengeTracker;

/// Router with request tracing and, optionally, permissive CORS for the mobile client
pub fn build_app(tracker: ChallengeTracker, enable_cors: bool) -> Router {
    let mut router = create_router(AppState::new(tracker)).layer(TraceLayer::new_for_http());

    if enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}

pub fn create_server(config: &ServerConfig) -> AppResult<(Router, SocketAddr)> {
    let tracker = ChallengeTracker::open(&config.database_path, &config.database_options())?;
    let addr = config.socket_addr()?;
    Ok((build_app(tracker, config.enable_cors), addr))
}

/// Run the API server until ctrl-c
pub async fn run_server(config: &ServerConfig) -> AppResult<()> {
    let (router, addr) = create_server(config)?;

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "challenge tracker listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("challenge tracker stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
