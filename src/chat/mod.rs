// src/chat/mod.rs
// Turn orchestration: wires persistence, tool resolution, the step loop, and
// the outward stream together for one submitted turn.

pub mod merge;
pub mod persist;
pub mod prompt;
pub mod title;
pub mod turn;
pub mod types;

use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::{ChatError, ChatResult};
use crate::llm::{MessageRole, ProviderMessage, ProviderRegistry};
use crate::stream::StreamRegistry;
use crate::tools::ToolSessionManager;

use merge::merge_into;
use persist::PersistenceCoordinator;
use prompt::system_prompt;
use turn::StepLoop;
use types::{IncomingMessage, Message, MessagePart, Role, TurnRequest};

pub struct ChatService {
    pub models: Arc<ProviderRegistry>,
    pub tools: Arc<ToolSessionManager>,
    pub streams: Arc<dyn StreamRegistry>,
    pub persistence: Arc<PersistenceCoordinator>,
    pub max_steps: usize,
}

impl ChatService {
    /// Submit a turn: anchor the user message, resolve the tool surface,
    /// and start generation into a fresh stream. Returns the stream id the
    /// caller attaches to. Generation is detached from the caller; a client
    /// that disconnects can reattach and replay.
    pub async fn submit_turn(&self, user_id: &str, request: TurnRequest) -> ChatResult<String> {
        let latest = request
            .most_recent_user_message()
            .ok_or_else(|| ChatError::BadRequest("request contains no user message".into()))?;

        let user_message = stored_user_message(latest);
        self.persistence
            .record_user_turn(user_id, &request.id, &user_message)
            .await?;

        let (model, provider, options) = self.models.resolve(&request.selected_chat_model);
        let tools = self.tools.resolve(user_id, &request.id).await;

        let stream_id = Uuid::new_v4().to_string();
        let sink = self.streams.open(&stream_id).await;

        let system = system_prompt(&model);
        let history = provider_history(&request.messages);
        let step_loop = StepLoop::new(provider, model, options, tools, self.max_steps);

        let persistence = Arc::clone(&self.persistence);
        let conversation_id = request.id.clone();
        let task_stream_id = stream_id.clone();
        tokio::spawn(async move {
            let (tx, rx) = mpsc::channel(256);
            let merger = tokio::spawn(merge_into(rx, sink));
            let output = step_loop.run(system, history, tx).await;
            if let Err(e) = merger.await {
                tracing::error!(stream_id = %task_stream_id, error = %e, "Stream merger panicked");
            }

            // Post-generation save is best-effort; the client already has
            // the streamed answer
            if !output.messages.is_empty() {
                if let Err(e) = persistence
                    .record_assistant_turns(&conversation_id, &output.messages)
                    .await
                {
                    tracing::error!(conversation_id, error = %e, "Failed to store assistant messages");
                }
            }

            tracing::info!(
                conversation_id,
                stream_id = %task_stream_id,
                completed = output.completed,
                messages = output.messages.len(),
                input_tokens = output.usage.input_tokens,
                output_tokens = output.usage.output_tokens,
                "Turn finished"
            );
        });

        Ok(stream_id)
    }
}

/// Normalize an incoming user message into its stored form, keeping the
/// client-assigned id when present so optimistic UIs can correlate.
fn stored_user_message(incoming: &IncomingMessage) -> Message {
    let parts = if incoming.parts.is_empty() {
        vec![MessagePart::Text {
            text: incoming.content.clone().unwrap_or_default(),
        }]
    } else {
        incoming.parts.clone()
    };

    let mut message = Message::new(Role::User, parts);
    if let Some(id) = &incoming.id {
        message.id = id.clone();
    }
    message.attachments = incoming.attachments.clone();
    message
}

/// Flatten the submitted history into provider messages. Tool-role entries
/// from prior turns are skipped; their results already shaped the assistant
/// text that follows them.
fn provider_history(messages: &[IncomingMessage]) -> Vec<ProviderMessage> {
    messages
        .iter()
        .filter_map(|m| {
            let role = match m.role {
                Role::User => MessageRole::User,
                Role::Assistant => MessageRole::Assistant,
                Role::Tool => return None,
            };
            let text = m.text();
            if text.is_empty() {
                return None;
            }
            Some(ProviderMessage::text(role, text))
        })
        .collect()
}
