//! Conversation and message persistence (SQLite).

use crate::error::Result;

use sqlx::{Row as _, SqlitePool};

/// A persisted chat message.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub confidence: Option<f64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Conversation bookkeeping: one conversation per (tenant, session),
/// append-only messages.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
}

/// Result of [`ConversationStore::ensure`].
#[derive(Debug, Clone)]
pub struct EnsuredConversation {
    pub id: String,
    /// True when this call created the conversation (first message of the
    /// session) — the caller fires the conversation-started webhook then.
    pub created: bool,
}

impl ConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get or create the conversation for a (tenant, session) pair.
    /// Idempotent: concurrent calls race on the unique index and both end
    /// up with the same row.
    pub async fn ensure(&self, tenant_id: &str, session_id: &str) -> Result<EnsuredConversation> {
        if let Some(row) =
            sqlx::query("SELECT id FROM conversations WHERE tenant_id = ? AND session_id = ?")
                .bind(tenant_id)
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?
        {
            return Ok(EnsuredConversation {
                id: row.try_get("id")?,
                created: false,
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO conversations (id, tenant_id, session_id) VALUES (?, ?, ?)",
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(EnsuredConversation { id, created: true });
        }

        // Lost the race: another request created it between our read and
        // write. Re-read the winner.
        let row = sqlx::query("SELECT id FROM conversations WHERE tenant_id = ? AND session_id = ?")
            .bind(tenant_id)
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(EnsuredConversation {
            id: row.try_get("id")?,
            created: false,
        })
    }

    /// Append a message. Confidence is `None` for user messages.
    pub async fn append_message(
        &self,
        conversation_id: &str,
        tenant_id: &str,
        role: &str,
        content: &str,
        confidence: Option<f64>,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, tenant_id, role, content, confidence) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(tenant_id)
        .bind(role)
        .bind(content)
        .bind(confidence)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Number of messages in a conversation so far.
    pub async fn message_count(&self, conversation_id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Load recent messages for a conversation (oldest first).
    pub async fn load_recent(
        &self,
        conversation_id: &str,
        limit: i64,
    ) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, confidence, created_at \
             FROM messages WHERE conversation_id = ? \
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<StoredMessage> = rows
            .into_iter()
            .map(|row| StoredMessage {
                id: row.try_get("id").unwrap_or_default(),
                conversation_id: row.try_get("conversation_id").unwrap_or_default(),
                role: row.try_get("role").unwrap_or_default(),
                content: row.try_get("content").unwrap_or_default(),
                confidence: row.try_get("confidence").ok(),
                created_at: row
                    .try_get("created_at")
                    .unwrap_or_else(|_| chrono::Utc::now()),
            })
            .collect();

        messages.reverse();
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    async fn setup() -> (Db, ConversationStore) {
        let db = Db::connect_in_memory().await.unwrap();
        sqlx::query("INSERT INTO tenants (id, identifier, name) VALUES ('t1', 'acme', 'Acme')")
            .execute(&db.pool)
            .await
            .unwrap();
        let store = ConversationStore::new(db.pool.clone());
        (db, store)
    }

    #[tokio::test]
    async fn ensure_is_idempotent_per_tenant_session() {
        let (_db, store) = setup().await;

        let first = store.ensure("t1", "s1").await.unwrap();
        let second = store.ensure("t1", "s1").await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn append_and_load_round_trip() {
        let (_db, store) = setup().await;
        let conversation = store.ensure("t1", "s1").await.unwrap();

        store
            .append_message(&conversation.id, "t1", "user", "hello", None)
            .await
            .unwrap();
        store
            .append_message(&conversation.id, "t1", "assistant", "hi there", Some(0.7))
            .await
            .unwrap();

        let messages = store.load_recent(&conversation.id, 10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert!(messages[0].confidence.is_none());
        assert_eq!(messages[1].confidence, Some(0.7));
        assert_eq!(store.message_count(&conversation.id).await.unwrap(), 2);
    }
}
