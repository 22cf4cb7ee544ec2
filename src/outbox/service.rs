//! Escalation delivery service.
//!
//! One call per triggering decision: persists exactly one escalation event
//! and one outbox entry per resolved destination, all in one transaction.
//! Only the durable inserts are awaited — actual dispatch happens
//! out-of-band in the dispatcher, so the chat response never waits on a slow
//! or down provider.

use crate::error::Result;
use crate::escalation::{Destination, EscalationReason};
use crate::outbox::store::{EventLog, OutboxStore};

use serde_json::json;
use sqlx::{Row as _, SqlitePool};

/// Audit metadata recorded alongside the event.
#[derive(Debug, Clone, Default)]
pub struct EscalationMeta {
    /// True when the call comes from the notification-rule path.
    pub is_notification: bool,
    /// True when triggered by the chat pipeline (vs an external entry point).
    pub from_chat: bool,
    /// True when the triggering answer came from a curated response.
    pub used_curated_answer: bool,
}

/// Everything the delivery service needs for one escalation.
#[derive(Debug, Clone)]
pub struct EscalationParams {
    pub tenant_id: String,
    pub conversation_id: String,
    pub session_id: String,
    pub user_message: String,
    pub answer_text: String,
    pub confidence: f64,
    pub reason: EscalationReason,
    pub rule_id: Option<String>,
    /// Destinations from the matched rule; empty means "fall back to the
    /// tenant's active integrations".
    pub destinations: Vec<Destination>,
    pub keywords: Vec<String>,
    pub trigger_webhooks: bool,
    pub meta: EscalationMeta,
}

/// Persists escalations and enqueues their deliveries.
#[derive(Debug, Clone)]
pub struct DeliveryService {
    pool: SqlitePool,
}

/// An active tenant integration, the no-rule fallback destination set.
#[derive(Debug, Clone)]
struct ActiveIntegration {
    id: String,
    provider: String,
    endpoint: String,
}

/// One resolved outbox entry, ready to insert.
#[derive(Debug)]
struct PlannedDelivery {
    integration_id: Option<String>,
    provider: String,
    payload: String,
}

impl DeliveryService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Handle one escalation or notification firing.
    ///
    /// The event and its entries land in one transaction: either the audit
    /// record and every queued delivery exist, or none do. Errors returned
    /// here are contained by the caller (logged, never surfaced to the end
    /// user, never able to alter the chat response).
    pub async fn handle_escalation(&self, params: EscalationParams) -> Result<String> {
        let destinations_json = serde_json::to_string(&params.destinations)
            .unwrap_or_else(|_| "[]".to_string());
        let keywords_json =
            serde_json::to_string(&params.keywords).unwrap_or_else(|_| "[]".to_string());

        let event_id = uuid::Uuid::new_v4().to_string();
        let payload = json!({
            "event_id": event_id,
            "tenant_id": params.tenant_id,
            "session_id": params.session_id,
            "reason": params.reason.as_str(),
            "rule_id": params.rule_id,
            "message": params.user_message,
            "answer": params.answer_text,
            "confidence": params.confidence,
            "keywords": params.keywords,
            "is_notification": params.meta.is_notification,
        });

        // Destination resolution reads finish before the write transaction
        // opens, so the transaction holds its connection for inserts only.
        let deliveries = self.plan_deliveries(&params, &payload).await?;

        let mut tx = self.pool.begin().await?;
        EventLog::insert_on(
            &mut tx,
            &event_id,
            &params.tenant_id,
            &params.conversation_id,
            &params.session_id,
            params.reason.as_str(),
            params.rule_id.as_deref(),
            &destinations_json,
            &keywords_json,
            params.meta.is_notification,
            params.meta.from_chat,
            params.meta.used_curated_answer,
        )
        .await?;
        for delivery in &deliveries {
            OutboxStore::enqueue_on(
                &mut tx,
                &params.tenant_id,
                delivery.integration_id.as_deref(),
                &delivery.provider,
                &delivery.payload,
            )
            .await?;
        }
        tx.commit().await?;

        Ok(event_id)
    }

    /// Resolve the outbox entries one escalation produces.
    async fn plan_deliveries(
        &self,
        params: &EscalationParams,
        payload: &serde_json::Value,
    ) -> Result<Vec<PlannedDelivery>> {
        if params.destinations.is_empty() {
            // No rule destinations: fall back to every active integration
            // the tenant has configured.
            return Ok(self
                .active_integrations(&params.tenant_id)
                .await?
                .into_iter()
                .map(|integration| {
                    let mut entry_payload = payload.clone();
                    entry_payload["endpoint"] = json!(integration.endpoint);
                    PlannedDelivery {
                        integration_id: Some(integration.id),
                        provider: integration.provider,
                        payload: entry_payload.to_string(),
                    }
                })
                .collect());
        }

        let mut planned = Vec::with_capacity(params.destinations.len());
        for destination in &params.destinations {
            planned.push(self.plan_destination(&params.tenant_id, destination, payload).await?);
        }
        Ok(planned)
    }

    async fn plan_destination(
        &self,
        tenant_id: &str,
        destination: &Destination,
        payload: &serde_json::Value,
    ) -> Result<PlannedDelivery> {
        let mut entry_payload = payload.clone();
        Ok(match destination {
            Destination::Integration { integration_id } => {
                let provider = match self.integration(tenant_id, integration_id).await? {
                    Some(integration) => {
                        entry_payload["endpoint"] = json!(integration.endpoint);
                        integration.provider
                    }
                    None => {
                        // The rule references an integration that no longer
                        // exists. Enqueue anyway so the failure is visible
                        // in the outbox rather than silently dropped.
                        "integration".to_string()
                    }
                };
                PlannedDelivery {
                    integration_id: Some(integration_id.clone()),
                    provider,
                    payload: entry_payload.to_string(),
                }
            }
            Destination::Email { email } => {
                entry_payload["email"] = json!(email);
                PlannedDelivery {
                    integration_id: None,
                    provider: "email".to_string(),
                    payload: entry_payload.to_string(),
                }
            }
            Destination::Webhook { url } => {
                if let Some(url) = url {
                    entry_payload["endpoint"] = json!(url);
                }
                PlannedDelivery {
                    integration_id: None,
                    provider: "webhook".to_string(),
                    payload: entry_payload.to_string(),
                }
            }
        })
    }

    async fn active_integrations(&self, tenant_id: &str) -> Result<Vec<ActiveIntegration>> {
        let rows = sqlx::query(
            "SELECT id, provider, endpoint FROM integrations \
             WHERE tenant_id = ? AND active = 1 ORDER BY created_at ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ActiveIntegration {
                id: row.try_get("id").unwrap_or_default(),
                provider: row.try_get("provider").unwrap_or_default(),
                endpoint: row.try_get("endpoint").unwrap_or_default(),
            })
            .collect())
    }

    async fn integration(
        &self,
        tenant_id: &str,
        integration_id: &str,
    ) -> Result<Option<ActiveIntegration>> {
        let row = sqlx::query(
            "SELECT id, provider, endpoint FROM integrations WHERE tenant_id = ? AND id = ?",
        )
        .bind(tenant_id)
        .bind(integration_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ActiveIntegration {
            id: row.try_get("id").unwrap_or_default(),
            provider: row.try_get("provider").unwrap_or_default(),
            endpoint: row.try_get("endpoint").unwrap_or_default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::outbox::store::OutboxStatus;

    async fn setup() -> (Db, DeliveryService) {
        let db = Db::connect_in_memory().await.unwrap();
        sqlx::query("INSERT INTO tenants (id, identifier, name) VALUES ('t1', 'acme', 'Acme')")
            .execute(&db.pool)
            .await
            .unwrap();
        let service = DeliveryService::new(db.pool.clone());
        (db, service)
    }

    fn params(destinations: Vec<Destination>) -> EscalationParams {
        EscalationParams {
            tenant_id: "t1".to_string(),
            conversation_id: "c1".to_string(),
            session_id: "s1".to_string(),
            user_message: "refund please".to_string(),
            answer_text: "Let me check.".to_string(),
            confidence: 0.4,
            reason: EscalationReason::LowConfidence,
            rule_id: None,
            destinations,
            keywords: vec!["refund".to_string()],
            trigger_webhooks: true,
            meta: EscalationMeta {
                from_chat: true,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn persists_one_event_and_one_entry_per_destination() {
        let (db, service) = setup().await;

        let destinations = vec![
            Destination::Email {
                email: "ops@acme.test".to_string(),
            },
            Destination::Webhook { url: None },
        ];
        service.handle_escalation(params(destinations)).await.unwrap();

        let event_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM escalation_events")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        let entry_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox_entries")
            .fetch_one(&db.pool)
            .await
            .unwrap();

        assert_eq!(event_count, 1);
        assert_eq!(entry_count, 2);
    }

    #[tokio::test]
    async fn no_destinations_falls_back_to_active_integrations() {
        let (db, service) = setup().await;
        sqlx::query(
            "INSERT INTO integrations (id, tenant_id, provider, endpoint, active) VALUES \
             ('i1', 't1', 'slack', 'https://hooks.slack.test/x', 1), \
             ('i2', 't1', 'teams', 'https://teams.test/y', 0)",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        service.handle_escalation(params(Vec::new())).await.unwrap();

        let entries = OutboxStore::new(db.pool.clone()).fetch_due(5, 10).await.unwrap();
        // Only the active integration gets an entry.
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].integration_id.as_deref(), Some("i1"));
        assert_eq!(entries[0].provider, "slack");
        assert_eq!(entries[0].status, OutboxStatus::Pending);
        assert_eq!(entries[0].attempts, 0);
    }

    #[tokio::test]
    async fn event_records_reason_rule_and_notification_flag() {
        let (db, service) = setup().await;

        let mut escalation = params(Vec::new());
        escalation.reason = EscalationReason::RuleMatch;
        escalation.rule_id = Some("r-refund".to_string());
        escalation.meta.is_notification = false;
        service.handle_escalation(escalation).await.unwrap();

        let events = EventLog::new(db.pool.clone()).list_recent("t1", 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, "rule_match");
        assert_eq!(events[0].rule_id.as_deref(), Some("r-refund"));
        assert!(!events[0].is_notification);
        assert!(events[0].from_chat);
    }

    #[tokio::test]
    async fn enqueue_failure_rolls_back_the_event() {
        let (db, service) = setup().await;
        // Break the entry insert; the event insert alone still succeeds.
        sqlx::query("DROP TABLE outbox_entries")
            .execute(&db.pool)
            .await
            .unwrap();

        let destinations = vec![Destination::Email {
            email: "ops@acme.test".to_string(),
        }];
        let result = service.handle_escalation(params(destinations)).await;
        assert!(result.is_err());

        // No half-written escalation: the audit record must not claim
        // deliveries that were never queued.
        let event_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM escalation_events")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(event_count, 0);
    }

    #[tokio::test]
    async fn integration_destination_carries_endpoint_in_payload() {
        let (db, service) = setup().await;
        sqlx::query(
            "INSERT INTO integrations (id, tenant_id, provider, endpoint, active) VALUES \
             ('i1', 't1', 'slack', 'https://hooks.slack.test/x', 1)",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        let destinations = vec![Destination::Integration {
            integration_id: "i1".to_string(),
        }];
        service.handle_escalation(params(destinations)).await.unwrap();

        let entries = OutboxStore::new(db.pool.clone()).fetch_due(5, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        let payload: serde_json::Value = serde_json::from_str(&entries[0].payload).unwrap();
        assert_eq!(payload["endpoint"], "https://hooks.slack.test/x");
        assert_eq!(payload["reason"], "low_confidence");
    }
}
