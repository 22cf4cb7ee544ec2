//! Persistence for escalation events and outbox entries (SQLite).
//!
//! Ownership contract: the delivery service writes events and entries
//! exactly once per triggering call; after creation an entry is mutated only
//! by the dispatcher (attempt counts and status transitions).

use crate::error::Result;

use sqlx::{Row as _, SqlitePool};

/// Delivery status of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Failed => "failed",
        }
    }

    fn from_str(raw: &str) -> Self {
        match raw {
            "sent" => OutboxStatus::Sent,
            "failed" => OutboxStatus::Failed,
            _ => OutboxStatus::Pending,
        }
    }
}

/// One pending (or settled) external delivery.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: String,
    pub tenant_id: String,
    pub integration_id: Option<String>,
    pub provider: String,
    /// Delivery payload, JSON. Carries the destination endpoint when one is
    /// known at enqueue time.
    pub payload: String,
    pub status: OutboxStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub sent_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// An immutable audit record of one escalation or notification firing.
#[derive(Debug, Clone)]
pub struct EscalationEvent {
    pub id: String,
    pub tenant_id: String,
    pub conversation_id: String,
    pub session_id: String,
    pub reason: String,
    pub rule_id: Option<String>,
    pub destinations: String,
    pub keywords: String,
    pub is_notification: bool,
    pub from_chat: bool,
    pub used_curated_answer: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Write-once log of escalation events.
#[derive(Debug, Clone)]
pub struct EventLog {
    pool: SqlitePool,
}

impl EventLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist one event on an explicit connection, so the delivery service
    /// can put the event and its outbox entries in one transaction. Events
    /// are never updated after insertion.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_on(
        conn: &mut sqlx::SqliteConnection,
        id: &str,
        tenant_id: &str,
        conversation_id: &str,
        session_id: &str,
        reason: &str,
        rule_id: Option<&str>,
        destinations_json: &str,
        keywords_json: &str,
        is_notification: bool,
        from_chat: bool,
        used_curated_answer: bool,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO escalation_events \
             (id, tenant_id, conversation_id, session_id, reason, rule_id, destinations, keywords, \
              is_notification, from_chat, used_curated_answer) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(conversation_id)
        .bind(session_id)
        .bind(reason)
        .bind(rule_id)
        .bind(destinations_json)
        .bind(keywords_json)
        .bind(is_notification)
        .bind(from_chat)
        .bind(used_curated_answer)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Recent events for a tenant, newest first.
    pub async fn list_recent(&self, tenant_id: &str, limit: i64) -> Result<Vec<EscalationEvent>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, conversation_id, session_id, reason, rule_id, destinations, \
                    keywords, is_notification, from_chat, used_curated_answer, created_at \
             FROM escalation_events WHERE tenant_id = ? \
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| EscalationEvent {
                id: row.try_get("id").unwrap_or_default(),
                tenant_id: row.try_get("tenant_id").unwrap_or_default(),
                conversation_id: row.try_get("conversation_id").unwrap_or_default(),
                session_id: row.try_get("session_id").unwrap_or_default(),
                reason: row.try_get("reason").unwrap_or_default(),
                rule_id: row.try_get("rule_id").ok(),
                destinations: row.try_get("destinations").unwrap_or_default(),
                keywords: row.try_get("keywords").unwrap_or_default(),
                is_notification: row.try_get("is_notification").unwrap_or_default(),
                from_chat: row.try_get("from_chat").unwrap_or_default(),
                used_curated_answer: row.try_get("used_curated_answer").unwrap_or_default(),
                created_at: row
                    .try_get("created_at")
                    .unwrap_or_else(|_| chrono::Utc::now()),
            })
            .collect())
    }
}

/// Outbox entry persistence.
#[derive(Debug, Clone)]
pub struct OutboxStore {
    pool: SqlitePool,
}

impl OutboxStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Enqueue one pending entry. Called exactly once per
    /// (escalation call, destination) — retries mutate this row, they never
    /// create a new one.
    pub async fn enqueue(
        &self,
        tenant_id: &str,
        integration_id: Option<&str>,
        provider: &str,
        payload: &str,
    ) -> Result<String> {
        let mut conn = self.pool.acquire().await?;
        Self::enqueue_on(&mut conn, tenant_id, integration_id, provider, payload).await
    }

    /// Enqueue on an explicit connection (transactional counterpart of
    /// [`OutboxStore::enqueue`]).
    pub async fn enqueue_on(
        conn: &mut sqlx::SqliteConnection,
        tenant_id: &str,
        integration_id: Option<&str>,
        provider: &str,
        payload: &str,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO outbox_entries (id, tenant_id, integration_id, provider, payload) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(integration_id)
        .bind(provider)
        .bind(payload)
        .execute(&mut *conn)
        .await?;

        Ok(id)
    }

    /// Pending entries that still have retry budget, oldest first.
    pub async fn fetch_due(&self, max_attempts: i64, limit: i64) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, integration_id, provider, payload, status, attempts, \
                    last_error, created_at, sent_at \
             FROM outbox_entries \
             WHERE status = 'pending' AND attempts < ? \
             ORDER BY created_at ASC LIMIT ?",
        )
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_entry).collect())
    }

    /// Mark an entry delivered.
    pub async fn mark_sent(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE outbox_entries SET status = 'sent', sent_at = datetime('now') WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed attempt: bump the counter, keep the error. The entry
    /// flips to `failed` only once the retry budget is exhausted; before
    /// that it stays `pending` for a later pass.
    pub async fn record_failure(&self, id: &str, error: &str, max_attempts: i64) -> Result<()> {
        sqlx::query(
            "UPDATE outbox_entries SET \
                attempts = attempts + 1, \
                last_error = ?, \
                status = CASE WHEN attempts + 1 >= ? THEN 'failed' ELSE 'pending' END \
             WHERE id = ?",
        )
        .bind(error)
        .bind(max_attempts)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark an entry failed outright, without going through the retry
    /// budget. Used for entries no transport can carry.
    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE outbox_entries SET status = 'failed', attempts = attempts + 1, last_error = ? \
             WHERE id = ?",
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load one entry by id (used by tests and the admin surface).
    pub async fn get(&self, id: &str) -> Result<Option<OutboxEntry>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, integration_id, provider, payload, status, attempts, \
                    last_error, created_at, sent_at \
             FROM outbox_entries WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_entry))
    }
}

fn row_to_entry(row: sqlx::sqlite::SqliteRow) -> OutboxEntry {
    let raw_status: String = row.try_get("status").unwrap_or_default();
    OutboxEntry {
        id: row.try_get("id").unwrap_or_default(),
        tenant_id: row.try_get("tenant_id").unwrap_or_default(),
        integration_id: row.try_get("integration_id").ok(),
        provider: row.try_get("provider").unwrap_or_default(),
        payload: row.try_get("payload").unwrap_or_default(),
        status: OutboxStatus::from_str(&raw_status),
        attempts: row.try_get("attempts").unwrap_or_default(),
        last_error: row.try_get("last_error").ok(),
        created_at: row
            .try_get("created_at")
            .unwrap_or_else(|_| chrono::Utc::now()),
        sent_at: row.try_get("sent_at").ok(),
    }
}
