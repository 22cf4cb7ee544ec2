//! Out-of-band outbox dispatcher.
//!
//! Runs as an async loop beside the API, draining pending entries through a
//! [`DeliveryTransport`]. At-least-once: a failed attempt bumps the entry's
//! counter and leaves it pending for the next pass; nothing here ever
//! creates or duplicates entries.

use crate::config::OutboxConfig;
use crate::error::Result;
use crate::outbox::store::{OutboxEntry, OutboxStore};

use sqlx::SqlitePool;
use std::time::Duration;

/// Delivers one outbox entry to its external destination.
pub trait DeliveryTransport: Send + Sync {
    /// Whether this transport can carry the entry at all. Entries it cannot
    /// (wrong provider, no endpoint recorded) are marked failed after a
    /// single pass instead of churning through the retry budget.
    fn supports(&self, _entry: &OutboxEntry) -> bool {
        true
    }

    fn deliver(
        &self,
        entry: &OutboxEntry,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// HTTP delivery: POSTs the entry payload to the endpoint recorded at
/// enqueue time.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl DeliveryTransport for HttpTransport {
    /// Only entries with an endpoint recorded at enqueue time are
    /// HTTP-deliverable; email-provider entries never are.
    fn supports(&self, entry: &OutboxEntry) -> bool {
        serde_json::from_str::<serde_json::Value>(&entry.payload)
            .ok()
            .and_then(|payload| payload.get("endpoint")?.as_str().map(str::to_owned))
            .is_some()
    }

    async fn deliver(&self, entry: &OutboxEntry) -> anyhow::Result<()> {
        let payload: serde_json::Value = serde_json::from_str(&entry.payload)
            .map_err(|error| anyhow::anyhow!("malformed outbox payload: {error}"))?;

        let Some(endpoint) = payload.get("endpoint").and_then(|value| value.as_str()) else {
            anyhow::bail!(
                "no delivery endpoint configured for provider {}",
                entry.provider
            );
        };

        let response = self
            .client
            .post(endpoint)
            .json(&payload)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("destination returned {}", response.status());
        }

        Ok(())
    }
}

/// One dispatcher pass: claim due entries, attempt each, settle the row.
/// Returns the number of entries attempted.
pub async fn run_pass<T: DeliveryTransport>(
    outbox: &OutboxStore,
    transport: &T,
    config: &OutboxConfig,
) -> Result<usize> {
    let due = outbox
        .fetch_due(config.max_attempts, config.batch_size)
        .await?;
    let attempted = due.len();

    for entry in due {
        if !transport.supports(&entry) {
            tracing::warn!(
                entry_id = %entry.id,
                provider = %entry.provider,
                "no usable transport for outbox entry, marking failed"
            );
            outbox.mark_failed(&entry.id, "no delivery endpoint").await?;
            continue;
        }
        match transport.deliver(&entry).await {
            Ok(()) => {
                outbox.mark_sent(&entry.id).await?;
                tracing::debug!(entry_id = %entry.id, provider = %entry.provider, "outbox entry delivered");
            }
            Err(error) => {
                tracing::warn!(
                    entry_id = %entry.id,
                    provider = %entry.provider,
                    attempts = entry.attempts + 1,
                    %error,
                    "outbox delivery failed"
                );
                outbox
                    .record_failure(&entry.id, &error.to_string(), config.max_attempts)
                    .await?;
            }
        }
    }

    Ok(attempted)
}

/// Spawn the dispatcher loop. Pass failures are logged and the loop keeps
/// going — a broken pass never takes the daemon down.
pub fn spawn_dispatcher<T: DeliveryTransport + 'static>(
    pool: SqlitePool,
    config: OutboxConfig,
    transport: T,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let outbox = OutboxStore::new(pool);
        let mut ticker = tokio::time::interval(Duration::from_secs(config.poll_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(error) = run_pass(&outbox, &transport, &config).await {
                tracing::warn!(%error, "outbox dispatcher pass failed");
            }
        }
    })
}
