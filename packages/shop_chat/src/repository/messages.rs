//! Chat message persistence.

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::ChatRepository;
use crate::chat::MessageStore;
use crate::models::{NewMessage, PersistedMessage, User, UserId};

impl ChatRepository {
    /// Store a message. Messages are never mutated afterwards.
    pub async fn insert_message(&self, message: &NewMessage) -> Result<PersistedMessage> {
        let result = sqlx::query(
            "INSERT INTO messages (sender_id, receiver_id, content, read, timestamp)
             VALUES (?, ?, ?, 0, ?)",
        )
        .bind(message.sender_id)
        .bind(message.receiver_id)
        .bind(&message.content)
        .bind(message.timestamp)
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!(
                "Failed to store message {} -> {}",
                message.sender_id, message.receiver_id
            )
        })?;

        Ok(PersistedMessage {
            id: result.last_insert_rowid(),
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            content: message.content.clone(),
            read: false,
            timestamp: message.timestamp,
        })
    }

    /// Every message exchanged between two users, oldest first.
    pub async fn conversation_between(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Vec<PersistedMessage>> {
        let messages = sqlx::query_as::<_, PersistedMessage>(
            "SELECT id, sender_id, receiver_id, content, read, timestamp
             FROM messages
             WHERE (sender_id = ? AND receiver_id = ?) OR (sender_id = ? AND receiver_id = ?)
             ORDER BY timestamp ASC, id ASC",
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load conversation")?;
        Ok(messages)
    }
}

#[async_trait]
impl MessageStore for ChatRepository {
    async fn find_admin(&self) -> Result<Option<User>> {
        ChatRepository::find_admin(self).await
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        self.get_user(id).await
    }

    async fn persist(&self, message: NewMessage) -> Result<PersistedMessage> {
        self.insert_message(&message).await
    }
}
