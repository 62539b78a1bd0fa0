// tests/test_helpers.rs
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::mpsc;

use tiller::chat::persist::PersistenceCoordinator;
use tiller::chat::title::TitleGenerator;
use tiller::chat::ChatService;
use tiller::llm::{Provider, ProviderRegistry, ProviderRequest, StreamEvent};
use tiller::stream::InMemoryStreamRegistry;
use tiller::tools::ToolSessionManager;

/// A connection-refused address, so tool resolution degrades to no tools
pub const UNREACHABLE_TOOL_PROVIDER: &str = "http://127.0.0.1:1";

/// Provider that replays scripted event sequences, one per model invocation
pub struct ScriptedProvider {
    steps: Mutex<Vec<Vec<StreamEvent>>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            steps: Mutex::new(steps),
        }
    }

    pub fn single_text_reply(text: &str) -> Self {
        Self::new(vec![vec![
            StreamEvent::TextDelta(text.to_string()),
            StreamEvent::Done,
        ]])
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn stream_chat(&self, _request: ProviderRequest) -> Result<mpsc::Receiver<StreamEvent>> {
        let mut steps = self.steps.lock().unwrap();
        if steps.is_empty() {
            anyhow::bail!("no scripted steps left");
        }
        let step = steps.remove(0);
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for event in step {
                let _ = tx.send(event).await;
            }
        });
        Ok(rx)
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<String> {
        anyhow::bail!("not scripted")
    }
}

pub async fn create_test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("create in-memory sqlite");
    PersistenceCoordinator::init_schema(&pool)
        .await
        .expect("init schema");
    pool
}

/// Build a ChatService over a scripted provider, in-memory sqlite, and an
/// unreachable tool provider (every turn runs tool-less).
pub async fn create_test_service(provider: ScriptedProvider) -> (Arc<ChatService>, SqlitePool) {
    let pool = create_test_pool().await;

    let models = Arc::new(ProviderRegistry::with_models(
        vec![("test-model".to_string(), Arc::new(provider) as Arc<dyn Provider>, json!({}))],
        "test-model".to_string(),
    ));

    let service = Arc::new(ChatService {
        models,
        tools: Arc::new(ToolSessionManager::new(
            UNREACHABLE_TOOL_PROVIDER.to_string(),
            1,
            1,
        )),
        streams: Arc::new(InMemoryStreamRegistry::new(300)),
        persistence: Arc::new(PersistenceCoordinator::new(
            Some(pool.clone()),
            TitleGenerator::truncating(),
        )),
        max_steps: 20,
    });

    (service, pool)
}

pub fn turn_request(conversation_id: &str, text: &str) -> tiller::chat::types::TurnRequest {
    serde_json::from_value(json!({
        "id": conversation_id,
        "selectedChatModel": "test-model",
        "messages": [
            {"role": "user", "content": text}
        ]
    }))
    .expect("valid turn request")
}

/// Poll until the conversation holds `expected` messages; panics after ~2s.
/// Assistant persistence happens after the stream terminal, so tests that
/// observed the terminal frame may still be slightly ahead of the write.
pub async fn wait_for_message_count(pool: &SqlitePool, conversation_id: &str, expected: i64) {
    for _ in 0..100 {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM messages WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_one(pool)
                .await
                .expect("count messages");
        if count == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "conversation {} never reached {} messages",
        conversation_id, expected
    );
}
