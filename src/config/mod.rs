// src/config/mod.rs
// All tunables load from the environment (with .env support); defaults keep a
// dev instance working with zero configuration.

use once_cell::sync::Lazy;
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct TillerConfig {
    // ── Server
    pub host: String,
    pub port: u16,

    // ── Identity
    /// When true, requests without an x-user-id header run as the guest user.
    pub auth_disabled: bool,
    pub guest_user_id: String,

    // ── Persistence
    /// When false, the whole persistence layer becomes a no-op (ephemeral/demo mode).
    pub persistence_enabled: bool,
    pub database_url: String,
    pub sqlite_max_connections: u32,

    // ── Model provider (OpenAI-compatible gateway)
    pub model_base_url: String,
    pub model_api_key: String,
    pub default_model: String,
    pub title_model: String,
    pub model_timeout_secs: u64,

    // ── Tool provider
    pub tool_provider_url: String,
    pub tool_provider_timeout_secs: u64,
    pub tool_invoke_timeout_secs: u64,

    // ── Generation loop
    /// Hard ceiling on model invocations per turn.
    pub max_steps: usize,

    // ── Resumable streams
    pub resumable_streams: bool,
    pub stream_idle_timeout_secs: u64,

    // ── Logging
    pub log_level: String,
}

fn env_var_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(val) => {
            // Trim whitespace and strip inline comments before parsing
            let clean_val = val.split('#').next().unwrap_or("").trim();
            match clean_val.parse::<T>() {
                Ok(parsed) => parsed,
                Err(_) => {
                    eprintln!("Config: {} = '{}' (parse failed, using default)", key, val);
                    default
                }
            }
        }
        Err(_) => default,
    }
}

impl TillerConfig {
    pub fn from_env() -> Self {
        // .env is optional; plain environment variables win either way
        let _ = dotenvy::dotenv();

        Self {
            host: env_var_or("TILLER_HOST", "0.0.0.0".to_string()),
            port: env_var_or("TILLER_PORT", 3005),
            auth_disabled: env_var_or("TILLER_DISABLE_AUTH", false),
            guest_user_id: env_var_or("TILLER_GUEST_USER_ID", "local-dev-user".to_string()),
            persistence_enabled: env_var_or("TILLER_PERSISTENCE", true),
            database_url: env_var_or("DATABASE_URL", "sqlite:./tiller.db".to_string()),
            sqlite_max_connections: env_var_or("SQLITE_MAX_CONNECTIONS", 5),
            model_base_url: env_var_or(
                "MODEL_BASE_URL",
                "https://api.openai.com/v1".to_string(),
            ),
            model_api_key: env_var_or("MODEL_API_KEY", String::new()),
            default_model: env_var_or("TILLER_DEFAULT_MODEL", "claude-sonnet-4-0".to_string()),
            title_model: env_var_or("TILLER_TITLE_MODEL", "gpt-4o-mini".to_string()),
            model_timeout_secs: env_var_or("TILLER_MODEL_TIMEOUT", 300),
            tool_provider_url: env_var_or(
                "MCP_SERVER",
                "https://remote.mcp.pipedream.net".to_string(),
            ),
            tool_provider_timeout_secs: env_var_or("TILLER_TOOL_PROVIDER_TIMEOUT", 10),
            tool_invoke_timeout_secs: env_var_or("TILLER_TOOL_INVOKE_TIMEOUT", 60),
            max_steps: env_var_or("TILLER_MAX_STEPS", 20),
            resumable_streams: env_var_or("TILLER_RESUMABLE_STREAMS", true),
            stream_idle_timeout_secs: env_var_or("TILLER_STREAM_IDLE_TIMEOUT", 300),
            log_level: env_var_or("TILLER_LOG_LEVEL", "info".to_string()),
        }
    }

    /// Server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Global config instance - loaded once at startup
pub static CONFIG: Lazy<TillerConfig> = Lazy::new(TillerConfig::from_env);
