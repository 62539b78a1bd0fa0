// src/llm/mod.rs
// Model provider abstraction: a unified streaming interface plus an immutable
// model registry resolved once at process start and passed by reference into
// the generation loop.

mod openai;
pub mod sse;

pub use openai::OpenAiCompatProvider;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::chat::types::Usage;
use crate::config::TillerConfig;
use crate::tools::ToolDefinition;

// ============================================================================
// Provider request/event types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

/// A tool call as issued by the model (arguments are the raw JSON string the
/// model produced)
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

/// One message in the provider conversation
#[derive(Debug, Clone)]
pub struct ProviderMessage {
    pub role: MessageRole,
    pub content: String,
    /// Set on assistant messages that issued tool calls
    pub tool_calls: Vec<ToolCallRequest>,
    /// Set on tool messages carrying a result
    pub tool_call_id: Option<String>,
}

impl ProviderMessage {
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant_tool_calls(content: String, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: String, output: String) -> Self {
        Self {
            role: MessageRole::Tool,
            content: output,
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id),
        }
    }
}

/// A full model invocation: system prompt, conversation so far, tool catalog,
/// and the opaque provider-specific options bag.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ProviderMessage>,
    pub tools: Vec<ToolDefinition>,
    /// Provider-specific options (temperature, reasoning effort, ...) keyed
    /// by field name; contents are opaque to the loop.
    pub options: Value,
}

/// Incremental events from a streaming model invocation
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    ReasoningDelta(String),
    FunctionCallStart { call_id: String, name: String },
    FunctionCallDelta { call_id: String, arguments_delta: String },
    FunctionCallEnd { call_id: String },
    Usage(Usage),
    Error(String),
    Done,
}

// ============================================================================
// Provider trait
// ============================================================================

/// Unified provider trait for LLM backends
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name for logging and option resolution
    fn name(&self) -> &'static str;

    /// Create a streaming chat completion
    async fn stream_chat(&self, request: ProviderRequest) -> Result<mpsc::Receiver<StreamEvent>>;

    /// Create a non-streaming completion, returning the text of the first
    /// choice (used by the title collaborator)
    async fn complete(&self, request: ProviderRequest) -> Result<String>;
}

// ============================================================================
// Registry
// ============================================================================

/// One selectable model
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatModel {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

/// The model table exposed to clients
pub fn chat_models() -> Vec<ChatModel> {
    vec![
        ChatModel {
            id: "gemini-2.5-flash",
            name: "Gemini 2.5 Flash",
            description: "High performance, low cost model",
        },
        ChatModel {
            id: "gpt-5",
            name: "GPT-5",
            description: "Flagship GPT-5 model for complex tasks",
        },
        ChatModel {
            id: "gpt-5-mini",
            name: "GPT-5 Mini",
            description: "Compact GPT-5 for fast, efficient tasks",
        },
        ChatModel {
            id: "gpt-5-nano",
            name: "GPT-5 Nano",
            description: "Ultra-fast GPT-5 for lightweight operations",
        },
        ChatModel {
            id: "gpt-4o-mini",
            name: "GPT-4o Mini",
            description: "Small model for fast, lightweight tasks",
        },
        ChatModel {
            id: "gpt-4.1",
            name: "GPT-4.1",
            description: "Flagship model for complex tasks",
        },
        ChatModel {
            id: "claude-opus-4-0",
            name: "Claude Opus 4",
            description: "Highest level of intelligence and capability",
        },
        ChatModel {
            id: "claude-sonnet-4-0",
            name: "Claude Sonnet 4",
            description: "High intelligence and balanced performance",
        },
    ]
}

struct ModelEntry {
    provider: Arc<dyn Provider>,
    options: Value,
}

/// Immutable model-name -> provider mapping, built once at startup.
pub struct ProviderRegistry {
    models: HashMap<String, ModelEntry>,
    default_model: String,
}

impl ProviderRegistry {
    /// Build the registry from configuration. Every model in the table is
    /// routed through the OpenAI-compatible gateway.
    pub fn from_config(config: &TillerConfig) -> Self {
        let gateway: Arc<dyn Provider> = Arc::new(OpenAiCompatProvider::new(
            config.model_base_url.clone(),
            config.model_api_key.clone(),
            config.model_timeout_secs,
        ));

        let mut models = HashMap::new();
        for model in chat_models() {
            models.insert(
                model.id.to_string(),
                ModelEntry {
                    provider: gateway.clone(),
                    options: Self::options_for(model.id),
                },
            );
        }
        // Title and default models may not be in the selectable table
        for extra in [&config.title_model, &config.default_model] {
            models.entry(extra.clone()).or_insert_with(|| ModelEntry {
                provider: gateway.clone(),
                options: Self::options_for(extra),
            });
        }

        Self {
            models,
            default_model: config.default_model.clone(),
        }
    }

    /// Registry over explicit entries (tests swap in scripted providers)
    pub fn with_models(
        entries: Vec<(String, Arc<dyn Provider>, Value)>,
        default_model: String,
    ) -> Self {
        let models = entries
            .into_iter()
            .map(|(id, provider, options)| (id, ModelEntry { provider, options }))
            .collect();
        Self {
            models,
            default_model,
        }
    }

    /// Per-model provider options. OpenAI models pin temperature to 1; the
    /// gpt-5 family additionally gets a reasoning-effort hint.
    fn options_for(model: &str) -> Value {
        if model.starts_with("gpt-5") {
            json!({ "temperature": 1, "reasoning_effort": "medium" })
        } else if model.starts_with("gpt-") {
            json!({ "temperature": 1 })
        } else {
            json!({})
        }
    }

    /// Resolve a model selector to its provider and options. Unknown
    /// selectors fall back to the default model so a stale client keeps
    /// working after a model is retired.
    pub fn resolve(&self, model: &str) -> (String, Arc<dyn Provider>, Value) {
        if let Some(entry) = self.models.get(model) {
            return (model.to_string(), entry.provider.clone(), entry.options.clone());
        }
        tracing::warn!(model, fallback = %self.default_model, "Unknown model selector");
        let entry = self
            .models
            .get(&self.default_model)
            .expect("default model must be registered");
        (
            self.default_model.clone(),
            entry.provider.clone(),
            entry.options.clone(),
        )
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }
}
