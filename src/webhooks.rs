//! Tenant webhook fan-out.
//!
//! Fires on conversation start and on every message, independent of the
//! escalation outcome; escalation-specific fan-out is additionally gated by
//! the decision's `trigger_webhooks` flag. All sends are fire-and-forget —
//! they spawn a tokio task and return immediately so the chat response never
//! waits on a slow or down endpoint.

use sqlx::{Row as _, SqlitePool};
use std::time::Duration;

/// Event kinds pushed to tenant webhook endpoints.
#[derive(Debug, Clone, Copy)]
pub enum WebhookEvent {
    ConversationStarted,
    MessageReceived,
    MessageAnswered,
    Escalation,
}

impl WebhookEvent {
    fn as_str(self) -> &'static str {
        match self {
            WebhookEvent::ConversationStarted => "conversation.started",
            WebhookEvent::MessageReceived => "message.received",
            WebhookEvent::MessageAnswered => "message.answered",
            WebhookEvent::Escalation => "escalation.triggered",
        }
    }
}

/// Pushes events to a tenant's active webhook endpoints.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    pool: SqlitePool,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            client: reqwest::Client::new(),
        }
    }

    /// Fan out one event to every active endpoint. Fire-and-forget: failures
    /// are logged and never propagate.
    pub fn notify(&self, tenant_id: &str, event: WebhookEvent, payload: serde_json::Value) {
        let pool = self.pool.clone();
        let client = self.client.clone();
        let tenant_id = tenant_id.to_string();

        tokio::spawn(async move {
            let rows = match sqlx::query(
                "SELECT url FROM webhook_endpoints WHERE tenant_id = ? AND active = 1",
            )
            .bind(&tenant_id)
            .fetch_all(&pool)
            .await
            {
                Ok(rows) => rows,
                Err(error) => {
                    tracing::warn!(%error, tenant_id, "failed to load webhook endpoints");
                    return;
                }
            };

            let body = serde_json::json!({
                "event": event.as_str(),
                "tenant_id": tenant_id,
                "data": payload,
            });

            for row in rows {
                let url: String = match row.try_get("url") {
                    Ok(url) => url,
                    Err(_) => continue,
                };

                let result = client
                    .post(&url)
                    .json(&body)
                    .timeout(Duration::from_secs(5))
                    .send()
                    .await;

                match result {
                    Ok(response) if !response.status().is_success() => {
                        tracing::warn!(
                            tenant_id,
                            url,
                            status = %response.status(),
                            event = event.as_str(),
                            "webhook endpoint rejected event"
                        );
                    }
                    Ok(_) => {}
                    Err(error) => {
                        tracing::warn!(%error, tenant_id, url, event = event.as_str(), "webhook delivery failed");
                    }
                }
            }
        });
    }
}
