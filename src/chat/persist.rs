// src/chat/persist.rs
// Durable conversation storage. Exactly two writes per turn: the user
// message before generation (fatal on failure, since an assistant reply must
// not be orphaned) and the assistant messages after the loop terminates
// (best-effort, the caller logs and swallows). With no database configured
// every operation is a successful no-op.

use sqlx::SqlitePool;

use crate::api::{ChatError, ChatResult};

use super::title::TitleGenerator;
use super::types::{Message, MessagePart, Role};

pub struct PersistenceCoordinator {
    db: Option<SqlitePool>,
    titles: TitleGenerator,
}

impl PersistenceCoordinator {
    pub fn new(db: Option<SqlitePool>, titles: TitleGenerator) -> Self {
        Self { db, titles }
    }

    pub fn enabled(&self) -> bool {
        self.db.is_some()
    }

    pub async fn init_schema(pool: &SqlitePool) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                role TEXT NOT NULL,
                parts TEXT NOT NULL,
                attachments TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Record the user message, creating the conversation (with a generated
    /// title) on first contact. Rejects writes into another user's
    /// conversation.
    pub async fn record_user_turn(
        &self,
        user_id: &str,
        conversation_id: &str,
        message: &Message,
    ) -> ChatResult<()> {
        let pool = match &self.db {
            Some(pool) => pool,
            None => return Ok(()),
        };

        match self.owner_of(pool, conversation_id).await? {
            Some(owner) if owner != user_id => {
                return Err(ChatError::Forbidden("conversation belongs to another user".into()));
            }
            Some(_) => {}
            None => {
                let title = self.titles.generate(&message.text()).await;
                sqlx::query(
                    "INSERT INTO conversations (id, user_id, title, created_at) VALUES (?, ?, ?, ?)",
                )
                .bind(conversation_id)
                .bind(user_id)
                .bind(&title)
                .bind(message.created_at)
                .execute(pool)
                .await?;
                tracing::info!(conversation_id, user_id, "Created conversation");
            }
        }

        self.insert_message(pool, conversation_id, message).await
    }

    /// Store the assistant messages one terminal loop produced. Errors
    /// propagate; the caller decides they are non-fatal at that point.
    pub async fn record_assistant_turns(
        &self,
        conversation_id: &str,
        messages: &[Message],
    ) -> ChatResult<()> {
        let pool = match &self.db {
            Some(pool) => pool,
            None => return Ok(()),
        };

        for message in messages {
            self.insert_message(pool, conversation_id, message).await?;
        }
        Ok(())
    }

    pub async fn list_messages(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> ChatResult<Vec<Message>> {
        let pool = match &self.db {
            Some(pool) => pool,
            None => return Ok(Vec::new()),
        };

        match self.owner_of(pool, conversation_id).await? {
            None => return Err(ChatError::NotFound("conversation not found".into())),
            Some(owner) if owner != user_id => {
                return Err(ChatError::Forbidden("conversation belongs to another user".into()));
            }
            Some(_) => {}
        }

        let rows: Vec<(String, String, String, String, i64)> = sqlx::query_as(
            "SELECT id, role, parts, attachments, created_at FROM messages \
             WHERE conversation_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(conversation_id)
        .fetch_all(pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for (id, role, parts, attachments, created_at) in rows {
            let role = Role::parse(&role)
                .ok_or_else(|| ChatError::Internal(format!("unknown stored role: {}", role)))?;
            let parts: Vec<MessagePart> = serde_json::from_str(&parts)
                .map_err(|e| ChatError::Internal(format!("corrupt message parts: {}", e)))?;
            let attachments = serde_json::from_str(&attachments).unwrap_or_default();
            messages.push(Message {
                id,
                role,
                parts,
                attachments,
                created_at,
            });
        }
        Ok(messages)
    }

    /// Delete a conversation and its messages. Only the owner may delete.
    pub async fn delete_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> ChatResult<()> {
        let pool = match &self.db {
            Some(pool) => pool,
            None => return Ok(()),
        };

        match self.owner_of(pool, conversation_id).await? {
            None => return Err(ChatError::NotFound("conversation not found".into())),
            Some(owner) if owner != user_id => {
                return Err(ChatError::Forbidden("conversation belongs to another user".into()));
            }
            Some(_) => {}
        }

        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(pool)
            .await?;
        sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .execute(pool)
            .await?;

        tracing::info!(conversation_id, "Deleted conversation");
        Ok(())
    }

    async fn owner_of(&self, pool: &SqlitePool, conversation_id: &str) -> ChatResult<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT user_id FROM conversations WHERE id = ?")
                .bind(conversation_id)
                .fetch_optional(pool)
                .await?;
        Ok(row.map(|(user_id,)| user_id))
    }

    async fn insert_message(
        &self,
        pool: &SqlitePool,
        conversation_id: &str,
        message: &Message,
    ) -> ChatResult<()> {
        let parts = serde_json::to_string(&message.parts)
            .map_err(|e| ChatError::Internal(format!("unserializable parts: {}", e)))?;
        let attachments = serde_json::to_string(&message.attachments)
            .map_err(|e| ChatError::Internal(format!("unserializable attachments: {}", e)))?;

        // The message id is the idempotency key: a client retrying a turn
        // after a disconnect resubmits the same id, and the duplicate write
        // must be a no-op rather than a fatal constraint violation
        sqlx::query(
            "INSERT OR IGNORE INTO messages (id, conversation_id, role, parts, attachments, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(conversation_id)
        .bind(message.role.as_str())
        .bind(&parts)
        .bind(&attachments)
        .bind(message.created_at)
        .execute(pool)
        .await?;
        Ok(())
    }
}
