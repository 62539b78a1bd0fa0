// src/server/mod.rs
// HTTP surface: turn submission, stream resumption, conversation management.

pub mod handlers;

use anyhow::Result;
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::chat::ChatService;
use crate::config::CONFIG;

/// API version, surfaced on every response
pub const API_VERSION: &str = "1.0";

#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
}

/// Create the router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static(crate::api::USER_ID_HEADER),
        ]);

    let version_header = SetResponseHeaderLayer::if_not_present(
        header::HeaderName::from_static("x-api-version"),
        HeaderValue::from_static(API_VERSION),
    );

    Router::new()
        .route("/api/status", get(handlers::status_handler))
        .route("/api/models", get(handlers::models_handler))
        .route(
            "/api/chat",
            post(handlers::chat_handler).delete(handlers::delete_chat_handler),
        )
        .route("/api/chat/stream/{stream_id}", get(handlers::resume_handler))
        .route("/api/chat/{id}/messages", get(handlers::messages_handler))
        .layer(version_header)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server until shutdown
pub async fn run(chat: Arc<ChatService>) -> Result<()> {
    let state = AppState { chat };
    let app = create_router(state);

    let addr = CONFIG.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr, "Server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
