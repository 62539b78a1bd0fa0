// src/server/handlers.rs
// Endpoint handlers. Stream responses carry an x-stream-id header so a
// client can reattach after a disconnect via the resume endpoint.

use axum::{
    extract::{Path, Query, State},
    http::{header::HeaderName, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;

use crate::api::{ChatError, ChatResult, Identity};
use crate::chat::types::TurnRequest;
use crate::config::CONFIG;
use crate::llm::chat_models;
use crate::stream::{EventStream, StreamRegistry};

use super::AppState;

pub const STREAM_ID_HEADER: &str = "x-stream-id";

/// Health check and status endpoint
pub async fn status_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "persistence": state.chat.persistence.enabled(),
        "resumable_streams": CONFIG.resumable_streams,
        "default_model": state.chat.models.default_model(),
        "max_steps": state.chat.max_steps,
    }))
}

/// Selectable model table
pub async fn models_handler() -> Json<Value> {
    Json(json!({ "models": chat_models() }))
}

/// Submit a turn. The response body is the outward event stream; the
/// x-stream-id header identifies it for later resumption.
pub async fn chat_handler(
    State(state): State<AppState>,
    identity: Identity,
    Json(request): Json<TurnRequest>,
) -> ChatResult<Response> {
    let stream_id = state.chat.submit_turn(&identity.user_id, request).await?;

    let events = state
        .chat
        .streams
        .attach(&stream_id, 0)
        .await
        .ok_or_else(|| ChatError::Internal("stream vanished before attach".into()))?;

    let mut response = sse_response(events).into_response();
    let header_value = HeaderValue::from_str(&stream_id)
        .map_err(|_| ChatError::Internal("unrepresentable stream id".into()))?;
    response
        .headers_mut()
        .insert(HeaderName::from_static(STREAM_ID_HEADER), header_value);
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct ResumeQuery {
    #[serde(default)]
    pub cursor: usize,
}

/// Reattach to a stream, replaying from the frame cursor and then following
/// live. 404 once the stream has been swept (or was never resumable).
pub async fn resume_handler(
    State(state): State<AppState>,
    _identity: Identity,
    Path(stream_id): Path<String>,
    Query(query): Query<ResumeQuery>,
) -> ChatResult<impl IntoResponse> {
    let events = state
        .chat
        .streams
        .attach(&stream_id, query.cursor)
        .await
        .ok_or_else(|| ChatError::NotFound(format!("stream not found: {}", stream_id)))?;

    Ok(sse_response(events))
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub id: String,
}

/// Delete a conversation by id. Only the owner may delete.
pub async fn delete_chat_handler(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<DeleteQuery>,
) -> ChatResult<Json<Value>> {
    state
        .chat
        .persistence
        .delete_conversation(&identity.user_id, &query.id)
        .await?;

    Ok(Json(json!({ "deleted": true, "id": query.id })))
}

/// Stored messages for a conversation, oldest first
pub async fn messages_handler(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> ChatResult<Json<Value>> {
    let messages = state
        .chat
        .persistence
        .list_messages(&identity.user_id, &id)
        .await?;

    Ok(Json(json!({ "id": id, "messages": messages })))
}

fn sse_response(
    mut events: EventStream,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    use futures::StreamExt;

    let stream = async_stream::stream! {
        while let Some(event) = events.next().await {
            match Event::default().json_data(&event) {
                Ok(frame) => yield Ok(frame),
                Err(e) => {
                    tracing::error!(error = %e, "Unserializable stream frame");
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
