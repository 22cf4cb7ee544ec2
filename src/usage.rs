//! Per-tenant message quota gate.
//!
//! Checked before any processing; recorded after successful processing.
//! Billing proper lives elsewhere — this is only the monthly counter the
//! chat pipeline consults.

use crate::error::Result;

use sqlx::SqlitePool;

/// Outcome of a quota check.
#[derive(Debug, Clone)]
pub struct UsageVerdict {
    pub ok: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UsageGate {
    pool: SqlitePool,
}

impl UsageGate {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Whether the tenant may send another message this period.
    pub async fn can_send(&self, tenant_id: &str) -> Result<UsageVerdict> {
        let limit: i64 = sqlx::query_scalar("SELECT plan_message_limit FROM tenants WHERE id = ?")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await?;

        let sent: Option<i64> =
            sqlx::query_scalar("SELECT sent FROM usage_counters WHERE tenant_id = ? AND period = ?")
                .bind(tenant_id)
                .bind(current_period())
                .fetch_optional(&self.pool)
                .await?;
        let sent = sent.unwrap_or(0);

        if sent >= limit {
            return Ok(UsageVerdict {
                ok: false,
                reason: Some(format!("monthly message limit of {limit} reached")),
            });
        }

        Ok(UsageVerdict {
            ok: true,
            reason: None,
        })
    }

    /// Count one successfully processed message.
    pub async fn record_sent(&self, tenant_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO usage_counters (tenant_id, period, sent) VALUES (?, ?, 1) \
             ON CONFLICT (tenant_id, period) DO UPDATE SET sent = sent + 1",
        )
        .bind(tenant_id)
        .bind(current_period())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Current billing period, e.g. `2026-08`.
fn current_period() -> String {
    chrono::Utc::now().format("%Y-%m").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    async fn setup(limit: i64) -> (Db, UsageGate) {
        let db = Db::connect_in_memory().await.unwrap();
        sqlx::query("INSERT INTO tenants (id, identifier, name, plan_message_limit) VALUES ('t1', 'acme', 'Acme', ?)")
            .bind(limit)
            .execute(&db.pool)
            .await
            .unwrap();
        let gate = UsageGate::new(db.pool.clone());
        (db, gate)
    }

    #[tokio::test]
    async fn allows_until_the_limit_then_rejects_with_a_reason() {
        let (_db, gate) = setup(2).await;

        assert!(gate.can_send("t1").await.unwrap().ok);
        gate.record_sent("t1").await.unwrap();
        gate.record_sent("t1").await.unwrap();

        let verdict = gate.can_send("t1").await.unwrap();
        assert!(!verdict.ok);
        assert!(verdict.reason.unwrap().contains("limit of 2"));
    }

    #[tokio::test]
    async fn counters_are_per_tenant() {
        let (db, gate) = setup(1).await;
        sqlx::query("INSERT INTO tenants (id, identifier, name, plan_message_limit) VALUES ('t2', 'other', 'Other', 1)")
            .execute(&db.pool)
            .await
            .unwrap();

        gate.record_sent("t1").await.unwrap();

        assert!(!gate.can_send("t1").await.unwrap().ok);
        assert!(gate.can_send("t2").await.unwrap().ok);
    }
}
