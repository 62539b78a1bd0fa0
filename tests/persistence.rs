// tests/persistence.rs
// Durable storage behavior: conversation creation, ownership enforcement,
// deletion, and the disabled (ephemeral) mode.

mod test_helpers;

use sqlx::SqlitePool;

use tiller::chat::persist::PersistenceCoordinator;
use tiller::chat::title::TitleGenerator;
use tiller::chat::types::{Message, MessagePart, Role};

use test_helpers::create_test_pool;

fn coordinator(pool: SqlitePool) -> PersistenceCoordinator {
    PersistenceCoordinator::new(Some(pool), TitleGenerator::truncating())
}

fn assistant(text: &str) -> Message {
    Message::new(
        Role::Assistant,
        vec![MessagePart::Text { text: text.into() }],
    )
}

#[tokio::test]
async fn test_user_turn_creates_conversation_with_title() {
    let pool = create_test_pool().await;
    let store = coordinator(pool.clone());

    store
        .record_user_turn("u1", "c1", &Message::user("plan my trip to Lisbon"))
        .await
        .unwrap();

    let (user_id, title): (String, String) =
        sqlx::query_as("SELECT user_id, title FROM conversations WHERE id = 'c1'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(user_id, "u1");
    assert_eq!(title, "plan my trip to Lisbon");
}

#[tokio::test]
async fn test_one_turn_stores_user_plus_assistant_messages() {
    let pool = create_test_pool().await;
    let store = coordinator(pool.clone());

    store
        .record_user_turn("u1", "c1", &Message::user("hi"))
        .await
        .unwrap();
    store
        .record_assistant_turns("c1", &[assistant("step one"), assistant("step two")])
        .await
        .unwrap();

    let messages = store.list_messages("u1", "c1").await.unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].text(), "step one");
    assert_eq!(messages[2].text(), "step two");
}

#[tokio::test]
async fn test_resubmitted_user_message_stored_once() {
    // Retry after disconnect: same client-assigned message id arrives
    // twice and must anchor exactly one durable copy, not fail the turn
    let pool = create_test_pool().await;
    let store = coordinator(pool.clone());
    let message = Message::user("retry me");

    store.record_user_turn("u1", "c1", &message).await.unwrap();
    store.record_user_turn("u1", "c1", &message).await.unwrap();

    let messages = store.list_messages("u1", "c1").await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, message.id);
}

#[tokio::test]
async fn test_user_turn_into_foreign_conversation_forbidden() {
    let pool = create_test_pool().await;
    let store = coordinator(pool.clone());

    store
        .record_user_turn("u2", "c1", &Message::user("mine"))
        .await
        .unwrap();

    let err = store
        .record_user_turn("u1", "c1", &Message::user("mine now"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    // Nothing was written for the rejected caller
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM messages WHERE conversation_id = 'c1'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_delete_by_non_owner_forbidden_and_record_unchanged() {
    let pool = create_test_pool().await;
    let store = coordinator(pool.clone());

    store
        .record_user_turn("u2", "c1", &Message::user("hello"))
        .await
        .unwrap();

    let err = store.delete_conversation("u1", "c1").await.unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations WHERE id = 'c1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_delete_by_owner_removes_conversation_and_messages() {
    let pool = create_test_pool().await;
    let store = coordinator(pool.clone());

    store
        .record_user_turn("u1", "c1", &Message::user("hello"))
        .await
        .unwrap();
    store
        .record_assistant_turns("c1", &[assistant("hi there")])
        .await
        .unwrap();

    store.delete_conversation("u1", "c1").await.unwrap();

    let (conversations,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
        .fetch_one(&pool)
        .await
        .unwrap();
    let (messages,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!((conversations, messages), (0, 0));
}

#[tokio::test]
async fn test_delete_missing_conversation_not_found() {
    let pool = create_test_pool().await;
    let store = coordinator(pool);

    let err = store.delete_conversation("u1", "ghost").await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_messages_of_foreign_conversation_hidden() {
    let pool = create_test_pool().await;
    let store = coordinator(pool);

    store
        .record_user_turn("u2", "c1", &Message::user("secret"))
        .await
        .unwrap();

    let err = store.list_messages("u1", "c1").await.unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
}

#[tokio::test]
async fn test_disabled_mode_is_a_successful_noop() {
    let store = PersistenceCoordinator::new(None, TitleGenerator::truncating());
    assert!(!store.enabled());

    store
        .record_user_turn("u1", "c1", &Message::user("hi"))
        .await
        .unwrap();
    store
        .record_assistant_turns("c1", &[assistant("hello")])
        .await
        .unwrap();
    store.delete_conversation("u1", "c1").await.unwrap();
    assert!(store.list_messages("u1", "c1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stored_parts_roundtrip() {
    let pool = create_test_pool().await;
    let store = coordinator(pool);

    store
        .record_user_turn("u1", "c1", &Message::user("run the tool"))
        .await
        .unwrap();

    let message = Message::new(
        Role::Assistant,
        vec![
            MessagePart::ToolCall {
                call_id: "call_1".into(),
                name: "search".into(),
                arguments: serde_json::json!({ "q": "weather" }),
            },
            MessagePart::ToolResult {
                call_id: "call_1".into(),
                name: "search".into(),
                success: true,
                output: "{\"temp\": 21}".into(),
            },
            MessagePart::Text {
                text: "21 degrees".into(),
            },
        ],
    );
    store.record_assistant_turns("c1", &[message]).await.unwrap();

    let stored = store.list_messages("u1", "c1").await.unwrap();
    let parts = &stored[1].parts;
    assert_eq!(parts.len(), 3);
    assert!(matches!(parts[0], MessagePart::ToolCall { .. }));
    assert!(matches!(parts[1], MessagePart::ToolResult { success: true, .. }));
    assert_eq!(stored[1].text(), "21 degrees");
}
