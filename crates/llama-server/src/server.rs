//! Server setup and routing.

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{handlers, state::AppState};

/// Create the API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/sessions", post(handlers::sessions::create_session))
        .route(
            "/v1/sessions/:handle",
            delete(handlers::sessions::release_session),
        )
        .route(
            "/v1/sessions/:handle/tokens",
            post(handlers::sessions::count_tokens),
        )
        .route(
            "/v1/sessions/:handle/template",
            post(handlers::sessions::apply_template),
        )
        .route("/v1/sessions/:handle/chat", post(handlers::generation::chat))
        .route(
            "/v1/sessions/:handle/completion",
            post(handlers::generation::completion),
        )
        .route("/health", get(handlers::health::handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until Ctrl-C. In-flight requests finish before returning.
pub async fn run_server(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
