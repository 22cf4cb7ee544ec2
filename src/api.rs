//! HTTP API: the chat endpoint the embedded widget talks to.

pub mod chat;
pub mod cors;
mod state;

pub use state::ApiState;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/chat", post(chat::chat_send))
        .route("/api/chat/history", get(chat::chat_history))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            cors::cors_middleware,
        ))
        .with_state(state)
}

/// Bind and serve until ctrl-c.
pub async fn serve(state: Arc<ApiState>) -> anyhow::Result<()> {
    let address = state.config.bind_address.clone();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(%address, "api listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
