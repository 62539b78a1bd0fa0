// src/chat/merge.rs
// Converts the loop's event emissions into the outward frame sequence.
// Content frames keep their emission order; usage is aggregated and written
// at most once, after the last content frame; the stream always ends with
// exactly one terminal frame, even if the producer drops without one.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::stream::StreamSink;

use super::turn::LoopEvent;
use super::types::{ChatEvent, Usage};

pub async fn merge_into(mut rx: mpsc::Receiver<LoopEvent>, sink: Arc<dyn StreamSink>) {
    let mut usage = Usage::default();

    while let Some(event) = rx.recv().await {
        match event {
            LoopEvent::MessageStart { message_id } => {
                sink.append(ChatEvent::MessageStart { message_id }).await;
            }
            LoopEvent::TextDelta(delta) => {
                sink.append(ChatEvent::TextDelta { delta }).await;
            }
            LoopEvent::ReasoningDelta(delta) => {
                sink.append(ChatEvent::ReasoningDelta { delta }).await;
            }
            LoopEvent::ToolCallStart { call_id, name } => {
                sink.append(ChatEvent::ToolCallStart { call_id, name }).await;
            }
            LoopEvent::ToolCallResult {
                call_id,
                name,
                success,
                output,
                duration_ms,
            } => {
                sink.append(ChatEvent::ToolCallResult {
                    call_id,
                    name,
                    success,
                    output,
                    duration_ms,
                })
                .await;
            }
            LoopEvent::Usage(u) => usage.add(u),
            LoopEvent::Completed => {
                emit_usage(&sink, usage).await;
                sink.append(ChatEvent::Done).await;
                return;
            }
            LoopEvent::Failed { message } => {
                emit_usage(&sink, usage).await;
                sink.append(ChatEvent::Error { message }).await;
                return;
            }
        }
    }

    // Producer dropped without a terminal event; never leave the stream
    // open-ended
    tracing::error!("Turn producer dropped without a terminal event");
    emit_usage(&sink, usage).await;
    sink.append(ChatEvent::Error {
        message: "generation ended unexpectedly".into(),
    })
    .await;
}

async fn emit_usage(sink: &Arc<dyn StreamSink>, usage: Usage) {
    if !usage.is_zero() {
        sink.append(ChatEvent::Usage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            reasoning_tokens: usage.reasoning_tokens,
        })
        .await;
    }
}
