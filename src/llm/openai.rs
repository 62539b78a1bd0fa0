// src/llm/openai.rs
// OpenAI-compatible Chat Completions provider. All configured models route
// through one gateway endpoint; per-model options arrive in the request's
// opaque options bag. Uses SseDecoder for stream parsing.

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

use super::sse::SseDecoder;
use super::{MessageRole, Provider, ProviderRequest, StreamEvent};
use crate::chat::types::Usage;

pub struct OpenAiCompatProvider {
    client: HttpClient,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatProvider {
    pub fn new(base_url: String, api_key: String, timeout_secs: u64) -> Self {
        let client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| HttpClient::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Build the wire message list: system first, then the conversation with
    /// tool calls and tool results in native Chat Completions format.
    fn build_messages(request: &ProviderRequest) -> Vec<WireMessage> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        messages.push(WireMessage {
            role: "system".into(),
            content: Some(request.system.clone()),
            tool_calls: None,
            tool_call_id: None,
        });

        for msg in &request.messages {
            let tool_calls = if msg.tool_calls.is_empty() {
                None
            } else {
                Some(
                    msg.tool_calls
                        .iter()
                        .map(|c| WireToolCall {
                            id: c.call_id.clone(),
                            call_type: "function".into(),
                            function: WireToolCallFunction {
                                name: c.name.clone(),
                                arguments: c.arguments.clone(),
                            },
                        })
                        .collect(),
                )
            };

            messages.push(WireMessage {
                role: msg.role.as_str().into(),
                // The API rejects null content on plain messages; assistant
                // tool-call messages may omit it
                content: if msg.content.is_empty() && msg.role == MessageRole::Assistant {
                    None
                } else {
                    Some(msg.content.clone())
                },
                tool_calls,
                tool_call_id: msg.tool_call_id.clone(),
            });
        }

        messages
    }

    fn build_body(request: &ProviderRequest, stream: bool) -> CompletionRequest {
        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| WireTool {
                        tool_type: "function".into(),
                        function: WireFunction {
                            name: t.name.clone(),
                            description: Some(t.description.clone()),
                            parameters: t.parameters.clone(),
                        },
                    })
                    .collect(),
            )
        };

        CompletionRequest {
            model: request.model.clone(),
            messages: Self::build_messages(request),
            tools,
            stream,
            temperature: request.options.get("temperature").and_then(|v| v.as_f64()),
            reasoning_effort: request
                .options
                .get("reasoning_effort")
                .and_then(|v| v.as_str())
                .map(String::from),
        }
    }

    async fn send(&self, body: &CompletionRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|e| format!("(failed to read body: {})", e));
            anyhow::bail!("model gateway error {}: {}", status, text);
        }

        Ok(response)
    }

    /// Process the SSE body and forward events to the channel.
    ///
    /// Tracks multiple in-flight tool calls by index to handle interleaved
    /// streaming of parallel calls in one response.
    async fn process_sse_stream(response: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
        struct InFlightCall {
            id: String,
            name: String,
            started: bool,
        }

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut tool_calls: HashMap<usize, InFlightCall> = HashMap::new();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                    return;
                }
            };

            for frame in decoder.push(&chunk) {
                if frame.is_done() {
                    continue;
                }

                let chunk_data: StreamChunk = match frame.parse() {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::debug!(error = %e, "Skipping unparseable stream frame");
                        continue;
                    }
                };

                for choice in chunk_data.choices {
                    let delta = choice.delta;

                    if let Some(content) = delta.content {
                        if !content.is_empty() {
                            let _ = tx.send(StreamEvent::TextDelta(content)).await;
                        }
                    }

                    if let Some(reasoning) = delta.reasoning_content {
                        if !reasoning.is_empty() {
                            let _ = tx.send(StreamEvent::ReasoningDelta(reasoning)).await;
                        }
                    }

                    if let Some(delta_tool_calls) = delta.tool_calls {
                        for tc in delta_tool_calls {
                            let call = tool_calls.entry(tc.index).or_insert_with(|| InFlightCall {
                                id: String::new(),
                                name: String::new(),
                                started: false,
                            });

                            if let Some(ref id) = tc.id {
                                call.id = id.clone();
                            }
                            if let Some(ref func) = tc.function {
                                if let Some(ref name) = func.name {
                                    call.name = name.clone();
                                }
                            }

                            // Emit start once both id and name are known
                            if !call.started && !call.id.is_empty() && !call.name.is_empty() {
                                call.started = true;
                                let _ = tx
                                    .send(StreamEvent::FunctionCallStart {
                                        call_id: call.id.clone(),
                                        name: call.name.clone(),
                                    })
                                    .await;
                            }

                            if let Some(ref func) = tc.function {
                                if let Some(ref args) = func.arguments {
                                    if !args.is_empty() && call.started {
                                        let _ = tx
                                            .send(StreamEvent::FunctionCallDelta {
                                                call_id: call.id.clone(),
                                                arguments_delta: args.clone(),
                                            })
                                            .await;
                                    }
                                }
                            }
                        }
                    }

                    if choice.finish_reason.is_some() {
                        for (_, call) in tool_calls.drain() {
                            if call.started {
                                let _ = tx
                                    .send(StreamEvent::FunctionCallEnd { call_id: call.id })
                                    .await;
                            }
                        }
                    }
                }

                if let Some(usage) = chunk_data.usage {
                    let _ = tx
                        .send(StreamEvent::Usage(Usage {
                            input_tokens: usage.prompt_tokens,
                            output_tokens: usage.completion_tokens,
                            reasoning_tokens: usage.reasoning_tokens.unwrap_or(0),
                        }))
                        .await;
                }
            }
        }

        let _ = tx.send(StreamEvent::Done).await;
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &'static str {
        "openai-compat"
    }

    async fn stream_chat(&self, request: ProviderRequest) -> Result<mpsc::Receiver<StreamEvent>> {
        let body = Self::build_body(&request, true);
        let response = self.send(&body).await?;

        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(Self::process_sse_stream(response, tx));

        Ok(rx)
    }

    async fn complete(&self, request: ProviderRequest) -> Result<String> {
        let body = Self::build_body(&request, false);
        let response = self.send(&body).await?;

        let result: CompletionResponse = response.json().await?;
        let choice = result
            .choices
            .first()
            .ok_or_else(|| anyhow::anyhow!("no choices in response"))?;

        Ok(choice.message.content.clone().unwrap_or_default())
    }
}

// ============================================================================
// Wire types (Chat Completions format)
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireToolCallFunction,
}

#[derive(Debug, Serialize)]
struct WireToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    reasoning_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ProviderMessage, ToolCallRequest};
    use serde_json::json;

    fn request_with(messages: Vec<ProviderMessage>, options: serde_json::Value) -> ProviderRequest {
        ProviderRequest {
            model: "gpt-5".into(),
            system: "be helpful".into(),
            messages,
            tools: Vec::new(),
            options,
        }
    }

    #[test]
    fn test_build_messages_system_first() {
        let request = request_with(
            vec![ProviderMessage::text(MessageRole::User, "hello")],
            json!({}),
        );
        let messages = OpenAiCompatProvider::build_messages(&request);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[1].content.as_deref(), Some("hello"));
    }

    #[test]
    fn test_build_messages_tool_roundtrip() {
        let request = request_with(
            vec![
                ProviderMessage::text(MessageRole::User, "look this up"),
                ProviderMessage::assistant_tool_calls(
                    String::new(),
                    vec![ToolCallRequest {
                        call_id: "call_1".into(),
                        name: "search".into(),
                        arguments: "{\"q\":\"rust\"}".into(),
                    }],
                ),
                ProviderMessage::tool_result("call_1".into(), "result text".into()),
            ],
            json!({}),
        );
        let messages = OpenAiCompatProvider::build_messages(&request);

        // Assistant tool-call message omits empty content
        assert!(messages[2].content.is_none());
        assert_eq!(messages[2].tool_calls.as_ref().unwrap()[0].id, "call_1");
        // Tool result carries the call id
        assert_eq!(messages[3].role, "tool");
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_options_flow_into_body() {
        let request = request_with(
            vec![ProviderMessage::text(MessageRole::User, "hi")],
            json!({"temperature": 1, "reasoning_effort": "medium"}),
        );
        let body = OpenAiCompatProvider::build_body(&request, true);
        assert_eq!(body.temperature, Some(1.0));
        assert_eq!(body.reasoning_effort.as_deref(), Some("medium"));
        assert!(body.stream);
    }
}
