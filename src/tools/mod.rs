// src/tools/mod.rs
// Remote tool-provider integration. A turn resolves its tool surface once,
// fetching the session token and catalog fresh from the provider, and the
// generation loop dispatches calls through the resulting executor. Provider
// failures degrade to an empty catalog instead of failing the turn.

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::api::ChatError;
use crate::config::TillerConfig;

// ============================================================================
// Catalog types
// ============================================================================

/// One invocable tool as advertised by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments
    pub parameters: Value,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),

    #[error("tool transport error: {0}")]
    Transport(String),

    #[error("tool provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("tool call timed out after {0}s")]
    Timeout(u64),
}

/// Tool dispatch surface for one turn. Definitions are fixed for the turn;
/// invocations go out to the provider.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Invoke a tool by name. Errors here are per-call and never fatal to
    /// the turn; the caller folds them into an error-bearing tool result.
    async fn invoke(&self, name: &str, arguments: &Value) -> Result<String, ToolError>;
}

/// The no-tools surface, used when the provider is unreachable or advertises
/// nothing.
pub struct EmptyExecutor;

#[async_trait]
impl ToolExecutor for EmptyExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }

    async fn invoke(&self, name: &str, _arguments: &Value) -> Result<String, ToolError> {
        Err(ToolError::Unknown(name.to_string()))
    }
}

// ============================================================================
// Session manager
// ============================================================================

/// Resolves the remote tool surface for a (user, conversation) pair.
///
/// The provider owns session state; this manager holds no cross-turn cache.
/// Lookup is a single best-effort attempt per turn, and session creation is
/// left to the provider on first invocation.
pub struct ToolSessionManager {
    client: HttpClient,
    base_url: String,
    invoke_timeout_secs: u64,
}

impl ToolSessionManager {
    pub fn new(base_url: String, provider_timeout_secs: u64, invoke_timeout_secs: u64) -> Self {
        let client = HttpClient::builder()
            .timeout(Duration::from_secs(provider_timeout_secs))
            .build()
            .unwrap_or_else(|_| HttpClient::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            invoke_timeout_secs,
        }
    }

    pub fn from_config(config: &TillerConfig) -> Self {
        Self::new(
            config.tool_provider_url.clone(),
            config.tool_provider_timeout_secs,
            config.tool_invoke_timeout_secs,
        )
    }

    /// Resolve the tool surface for a turn: look up any existing session
    /// token, then fetch the catalog fresh. Every provider failure lands on
    /// the empty executor so the turn proceeds tool-less.
    pub async fn resolve(&self, user_id: &str, conversation_id: &str) -> Arc<dyn ToolExecutor> {
        let session_id = self.lookup_session(user_id, conversation_id).await;

        match self.fetch_catalog(user_id, conversation_id, session_id.as_deref()).await {
            Ok(catalog) if !catalog.is_empty() => {
                tracing::debug!(
                    user_id,
                    conversation_id,
                    tools = catalog.len(),
                    session = session_id.is_some(),
                    "Resolved tool catalog"
                );
                Arc::new(RemoteToolExecutor {
                    client: self.client.clone(),
                    base_url: self.base_url.clone(),
                    user_id: user_id.to_string(),
                    conversation_id: conversation_id.to_string(),
                    session_id,
                    catalog,
                    invoke_timeout_secs: self.invoke_timeout_secs,
                })
            }
            Ok(_) => Arc::new(EmptyExecutor),
            Err(e) => {
                // Recovered locally: the turn proceeds tool-less, and the
                // taxonomy kind only reaches the log
                let reason = ChatError::ToolProviderUnavailable(e.to_string());
                tracing::warn!(user_id, conversation_id, error = %reason, "Proceeding without tools");
                Arc::new(EmptyExecutor)
            }
        }
    }

    /// Query the provider's session table for an existing token. Best-effort:
    /// any failure means no session, which the provider resolves by creating
    /// one on first invocation.
    async fn lookup_session(&self, user_id: &str, conversation_id: &str) -> Option<String> {
        let url = format!("{}/v1/{}/sessions", self.base_url, user_id);

        let response = match self.client.get(&url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::warn!(status = %r.status(), "Session lookup failed");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session lookup unreachable");
                return None;
            }
        };

        let body: Value = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "Session lookup body unparseable");
                return None;
            }
        };

        session_from_body(&body, conversation_id)
    }

    async fn fetch_catalog(
        &self,
        user_id: &str,
        conversation_id: &str,
        session_id: Option<&str>,
    ) -> Result<Vec<ToolDefinition>, ToolError> {
        let url = format!("{}/v1/{}/{}/tools", self.base_url, user_id, conversation_id);
        let mut request = self.client.get(&url);
        if let Some(session) = session_id {
            request = request.query(&[("session", session)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Provider { status, body });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))?;

        Ok(catalog_from_body(&body))
    }
}

/// Extract the session token for a conversation from the provider's session
/// table. The canonical shape wraps the table in an `mcpSessions` envelope;
/// older deployments return the bare table, which still works but logs a
/// deprecation warning.
fn session_from_body(body: &Value, conversation_id: &str) -> Option<String> {
    if let Some(token) = body
        .get("mcpSessions")
        .and_then(|s| s.get(conversation_id))
        .and_then(|v| v.as_str())
    {
        return Some(token.to_string());
    }

    if let Some(token) = body.get(conversation_id).and_then(|v| v.as_str()) {
        tracing::warn!(conversation_id, "Session table in deprecated bare-map shape");
        return Some(token.to_string());
    }

    None
}

/// Parse the catalog response. Entries missing a name are dropped; the
/// schema field is accepted under either `inputSchema` or `parameters`.
fn catalog_from_body(body: &Value) -> Vec<ToolDefinition> {
    let entries = match body.get("tools").and_then(|t| t.as_array()) {
        Some(list) => list,
        None => return Vec::new(),
    };

    entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?.to_string();
            let description = entry
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or_default()
                .to_string();
            let parameters = entry
                .get("inputSchema")
                .or_else(|| entry.get("parameters"))
                .cloned()
                .unwrap_or_else(|| serde_json::json!({ "type": "object", "properties": {} }));
            Some(ToolDefinition {
                name,
                description,
                parameters,
            })
        })
        .collect()
}

// ============================================================================
// Remote executor
// ============================================================================

/// Executor backed by the remote provider for one resolved turn
struct RemoteToolExecutor {
    client: HttpClient,
    base_url: String,
    user_id: String,
    conversation_id: String,
    session_id: Option<String>,
    catalog: Vec<ToolDefinition>,
    invoke_timeout_secs: u64,
}

#[async_trait]
impl ToolExecutor for RemoteToolExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.catalog.clone()
    }

    async fn invoke(&self, name: &str, arguments: &Value) -> Result<String, ToolError> {
        if !self.catalog.iter().any(|t| t.name == name) {
            return Err(ToolError::Unknown(name.to_string()));
        }

        let url = format!(
            "{}/v1/{}/{}/tools/{}",
            self.base_url, self.user_id, self.conversation_id, name
        );
        let mut request = self.client.post(&url).json(arguments);
        if let Some(ref session) = self.session_id {
            request = request.query(&[("session", session.as_str())]);
        }

        let send = async {
            let response = request
                .send()
                .await
                .map_err(|e| ToolError::Transport(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(ToolError::Provider { status, body });
            }

            response
                .text()
                .await
                .map_err(|e| ToolError::Transport(e.to_string()))
        };

        match tokio::time::timeout(Duration::from_secs(self.invoke_timeout_secs), send).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(self.invoke_timeout_secs)),
        }
    }
}
