// src/chat/turn.rs
// The bounded generation loop for one turn. Each step streams one model
// invocation; tool calls emitted by the model are dispatched in emission
// order and their results appended to context before the next step. The loop
// stops when a step produces no tool calls or the step ceiling is reached.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::ChatError;
use crate::llm::{Provider, ProviderMessage, ProviderRequest, StreamEvent, ToolCallRequest};
use crate::tools::ToolExecutor;

use super::types::{Message, MessagePart, Role, Usage};

/// Events emitted by the loop, in turn order. Consumed by the merger, which
/// owns usage aggregation and terminal-frame emission.
#[derive(Debug, Clone)]
pub enum LoopEvent {
    MessageStart { message_id: String },
    TextDelta(String),
    ReasoningDelta(String),
    ToolCallStart {
        call_id: String,
        name: String,
    },
    ToolCallResult {
        call_id: String,
        name: String,
        success: bool,
        output: String,
        duration_ms: u64,
    },
    Usage(Usage),
    Completed,
    Failed { message: String },
}

/// What a finished turn produced. `messages` holds only fully produced
/// assistant messages; a step cut short by a model transport failure
/// contributes nothing.
#[derive(Debug)]
pub struct TurnOutput {
    pub completed: bool,
    pub messages: Vec<Message>,
    pub usage: Usage,
}

/// A tool call accumulated from the model stream, in emission order
struct PendingCall {
    call_id: String,
    name: String,
    arguments: String,
}

/// One step's accumulated model output
struct StepOutcome {
    text: String,
    reasoning: String,
    calls: Vec<PendingCall>,
    usage: Usage,
    error: Option<String>,
}

pub struct StepLoop {
    provider: Arc<dyn Provider>,
    model: String,
    options: Value,
    tools: Arc<dyn ToolExecutor>,
    max_steps: usize,
}

impl StepLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: String,
        options: Value,
        tools: Arc<dyn ToolExecutor>,
        max_steps: usize,
    ) -> Self {
        Self {
            provider,
            model,
            options,
            tools,
            max_steps,
        }
    }

    /// Run the turn to a terminal state, emitting events as they occur.
    /// Always ends with exactly one `Completed` or `Failed` event.
    pub async fn run(
        &self,
        system: String,
        mut history: Vec<ProviderMessage>,
        events: mpsc::Sender<LoopEvent>,
    ) -> TurnOutput {
        let definitions = self.tools.definitions();
        let mut messages: Vec<Message> = Vec::new();
        let mut usage = Usage::default();

        for step in 0..self.max_steps {
            let request = ProviderRequest {
                model: self.model.clone(),
                system: system.clone(),
                messages: history.clone(),
                tools: definitions.clone(),
                options: self.options.clone(),
            };

            let rx = match self.provider.stream_chat(request).await {
                Ok(rx) => rx,
                Err(e) => {
                    tracing::error!(step, error = %e, "Model invocation failed");
                    let _ = events
                        .send(LoopEvent::Failed {
                            message: ChatError::ModelTransport(e.to_string()).to_string(),
                        })
                        .await;
                    return TurnOutput {
                        completed: false,
                        messages,
                        usage,
                    };
                }
            };

            let message_id = Uuid::new_v4().to_string();
            let _ = events
                .send(LoopEvent::MessageStart {
                    message_id: message_id.clone(),
                })
                .await;

            let outcome = consume_stream(rx, &events).await;
            usage.add(outcome.usage);

            if let Some(error) = outcome.error {
                tracing::error!(step, error, "Model stream errored mid-step");
                let _ = events
                    .send(LoopEvent::Failed {
                        message: ChatError::ModelTransport(error).to_string(),
                    })
                    .await;
                return TurnOutput {
                    completed: false,
                    messages,
                    usage,
                };
            }

            let mut parts = Vec::new();
            if !outcome.reasoning.is_empty() {
                parts.push(MessagePart::Reasoning {
                    text: outcome.reasoning,
                });
            }
            if !outcome.text.is_empty() {
                parts.push(MessagePart::Text {
                    text: outcome.text.clone(),
                });
            }
            for call in &outcome.calls {
                parts.push(MessagePart::ToolCall {
                    call_id: call.call_id.clone(),
                    name: call.name.clone(),
                    arguments: parse_arguments(&call.arguments),
                });
            }

            // Final answer: the model issued no tool calls
            if outcome.calls.is_empty() {
                messages.push(assistant_message(message_id, parts));
                let _ = events.send(LoopEvent::Completed).await;
                return TurnOutput {
                    completed: true,
                    messages,
                    usage,
                };
            }

            // Ceiling reached with calls still pending: truncate, keeping
            // the output produced so far as the final assistant message
            if step + 1 == self.max_steps {
                tracing::warn!(step, calls = outcome.calls.len(), "Step ceiling reached with pending tool calls");
                messages.push(assistant_message(message_id, parts));
                let _ = events.send(LoopEvent::Completed).await;
                return TurnOutput {
                    completed: true,
                    messages,
                    usage,
                };
            }

            history.push(ProviderMessage::assistant_tool_calls(
                outcome.text,
                outcome
                    .calls
                    .iter()
                    .map(|c| ToolCallRequest {
                        call_id: c.call_id.clone(),
                        name: c.name.clone(),
                        arguments: c.arguments.clone(),
                    })
                    .collect(),
            ));

            // Dispatch in emission order; later calls may depend on earlier
            // results already being in context
            for call in &outcome.calls {
                let started = Instant::now();
                let result = self
                    .tools
                    .invoke(&call.name, &parse_arguments(&call.arguments))
                    .await;
                let duration_ms = started.elapsed().as_millis() as u64;

                let (success, output) = match result {
                    Ok(output) => (true, output),
                    Err(e) => {
                        tracing::warn!(tool = %call.name, error = %e, "Tool call failed");
                        (false, json!({ "error": e.to_string() }).to_string())
                    }
                };

                let _ = events
                    .send(LoopEvent::ToolCallResult {
                        call_id: call.call_id.clone(),
                        name: call.name.clone(),
                        success,
                        output: output.clone(),
                        duration_ms,
                    })
                    .await;

                parts.push(MessagePart::ToolResult {
                    call_id: call.call_id.clone(),
                    name: call.name.clone(),
                    success,
                    output: output.clone(),
                });

                history.push(ProviderMessage::tool_result(call.call_id.clone(), output));
            }

            messages.push(assistant_message(message_id, parts));
        }

        // Only reachable with a zero step ceiling
        let _ = events.send(LoopEvent::Completed).await;
        TurnOutput {
            completed: true,
            messages,
            usage,
        }
    }
}

fn assistant_message(id: String, parts: Vec<MessagePart>) -> Message {
    let mut message = Message::new(Role::Assistant, parts);
    message.id = id;
    message
}

fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| json!({ "_raw": raw }))
}

/// Drain one model stream, forwarding deltas and accumulating the step's
/// text, reasoning, tool calls, and usage.
async fn consume_stream(
    mut rx: mpsc::Receiver<StreamEvent>,
    events: &mpsc::Sender<LoopEvent>,
) -> StepOutcome {
    let mut outcome = StepOutcome {
        text: String::new(),
        reasoning: String::new(),
        calls: Vec::new(),
        usage: Usage::default(),
        error: None,
    };

    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::TextDelta(delta) => {
                outcome.text.push_str(&delta);
                let _ = events.send(LoopEvent::TextDelta(delta)).await;
            }
            StreamEvent::ReasoningDelta(delta) => {
                outcome.reasoning.push_str(&delta);
                let _ = events.send(LoopEvent::ReasoningDelta(delta)).await;
            }
            StreamEvent::FunctionCallStart { call_id, name } => {
                let _ = events
                    .send(LoopEvent::ToolCallStart {
                        call_id: call_id.clone(),
                        name: name.clone(),
                    })
                    .await;
                outcome.calls.push(PendingCall {
                    call_id,
                    name,
                    arguments: String::new(),
                });
            }
            StreamEvent::FunctionCallDelta {
                call_id,
                arguments_delta,
            } => {
                if let Some(call) = outcome.calls.iter_mut().rev().find(|c| c.call_id == call_id) {
                    call.arguments.push_str(&arguments_delta);
                }
            }
            StreamEvent::FunctionCallEnd { .. } => {}
            StreamEvent::Usage(u) => {
                outcome.usage.add(u);
                let _ = events.send(LoopEvent::Usage(u)).await;
            }
            StreamEvent::Error(message) => {
                outcome.error = Some(message);
                break;
            }
            StreamEvent::Done => break,
        }
    }

    outcome
}
