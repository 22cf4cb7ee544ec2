//! Rule persistence (SQLite, read-only to the core).
//!
//! Rules are tenant configuration managed elsewhere; this store only reads
//! them. Fetch order is the evaluation order: `priority DESC, created_at
//! DESC`. Rows with malformed condition JSON survive the fetch with
//! `conditions = None` so one bad rule never disables a tenant's rule set.

use crate::error::Result;
use crate::escalation::destinations::Destination;
use crate::rules::ast::Condition;

use serde::{Deserialize, Serialize};
use sqlx::{Row as _, SqlitePool};

/// Kind of a rule, controlling how a match is acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// Hand the conversation to a human.
    Escalation,
    /// Direct the conversation to a specific handler.
    Routing,
    /// Non-blocking side alert; never interrupts the conversation.
    Notification,
}

impl RuleType {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleType::Escalation => "escalation",
            RuleType::Routing => "routing",
            RuleType::Notification => "notification",
        }
    }

    fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "escalation" => Some(RuleType::Escalation),
            "routing" => Some(RuleType::Routing),
            "notification" => Some(RuleType::Notification),
            _ => None,
        }
    }
}

/// A tenant-authored rule as loaded for evaluation.
#[derive(Debug, Clone)]
pub struct EscalationRule {
    pub id: String,
    pub tenant_id: String,
    pub site_id: Option<String>,
    pub rule_type: RuleType,
    pub priority: i64,
    /// Parsed condition tree; `None` when the stored JSON was unparseable.
    pub conditions: Option<Condition>,
    pub destinations: Vec<Destination>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl EscalationRule {
    /// Whether the resolver should evaluate this rule at all. Rules with
    /// empty or unparseable conditions are permanently non-matching and are
    /// skipped before they reach the engine.
    pub fn is_evaluable(&self) -> bool {
        matches!(&self.conditions, Some(tree) if !tree.is_vacant())
    }
}

/// Read-only access to the `escalation_rules` table.
#[derive(Debug, Clone)]
pub struct RuleStore {
    pool: SqlitePool,
}

impl RuleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch enabled rules of the given kinds for a tenant, scoped to rules
    /// that are global (no site) or bound to the requesting site, in
    /// evaluation order.
    pub async fn fetch(
        &self,
        tenant_id: &str,
        site_id: Option<&str>,
        kinds: &[RuleType],
    ) -> Result<Vec<EscalationRule>> {
        // `kinds` is a fixed enum set, never user input.
        let kind_list = kinds
            .iter()
            .map(|kind| format!("'{}'", kind.as_str()))
            .collect::<Vec<_>>()
            .join(", ");

        let query = format!(
            "SELECT id, tenant_id, site_id, rule_type, priority, conditions, destinations, created_at \
             FROM escalation_rules \
             WHERE tenant_id = ? AND enabled = 1 AND rule_type IN ({kind_list}) \
               AND (site_id IS NULL OR site_id = ?) \
             ORDER BY priority DESC, created_at DESC"
        );

        let rows = sqlx::query(&query)
            .bind(tenant_id)
            .bind(site_id)
            .fetch_all(&self.pool)
            .await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            let raw_type: String = row.try_get("rule_type")?;
            let Some(rule_type) = RuleType::from_str(&raw_type) else {
                continue;
            };

            let raw_conditions: String = row.try_get("conditions")?;
            let raw_destinations: String = row.try_get("destinations")?;

            rules.push(EscalationRule {
                id: row.try_get("id")?,
                tenant_id: row.try_get("tenant_id")?,
                site_id: row.try_get("site_id").ok(),
                rule_type,
                priority: row.try_get("priority")?,
                conditions: Condition::from_json(&raw_conditions),
                destinations: serde_json::from_str(&raw_destinations).unwrap_or_default(),
                created_at: row
                    .try_get("created_at")
                    .unwrap_or_else(|_| chrono::Utc::now()),
            });
        }

        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    async fn seed_tenant(pool: &SqlitePool) {
        sqlx::query("INSERT INTO tenants (id, identifier, name) VALUES ('t1', 'acme', 'Acme')")
            .execute(pool)
            .await
            .unwrap();
    }

    async fn insert_rule(
        pool: &SqlitePool,
        id: &str,
        rule_type: &str,
        priority: i64,
        site_id: Option<&str>,
        conditions: &str,
    ) {
        sqlx::query(
            "INSERT INTO escalation_rules (id, tenant_id, site_id, rule_type, enabled, priority, conditions) \
             VALUES (?, 't1', ?, ?, 1, ?, ?)",
        )
        .bind(id)
        .bind(site_id)
        .bind(rule_type)
        .bind(priority)
        .bind(conditions)
        .execute(pool)
        .await
        .unwrap();
    }

    const KEYWORD_RULE: &str =
        r#"{"operator":"and","conditions":[{"field":"keywords","operator":"contains","value":"refund"}]}"#;

    #[tokio::test]
    async fn fetch_orders_by_priority_then_recency() {
        let db = Db::connect_in_memory().await.unwrap();
        seed_tenant(&db.pool).await;
        insert_rule(&db.pool, "low", "escalation", 5, None, KEYWORD_RULE).await;
        insert_rule(&db.pool, "high", "routing", 10, None, KEYWORD_RULE).await;

        let store = RuleStore::new(db.pool.clone());
        let rules = store
            .fetch("t1", None, &[RuleType::Escalation, RuleType::Routing])
            .await
            .unwrap();

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id, "high");
        assert_eq!(rules[1].id, "low");
    }

    #[tokio::test]
    async fn site_scoped_rules_only_apply_to_their_site() {
        let db = Db::connect_in_memory().await.unwrap();
        seed_tenant(&db.pool).await;
        insert_rule(&db.pool, "global", "escalation", 1, None, KEYWORD_RULE).await;
        insert_rule(&db.pool, "scoped", "escalation", 1, Some("site-a"), KEYWORD_RULE).await;

        let store = RuleStore::new(db.pool.clone());

        let for_site_a = store.fetch("t1", Some("site-a"), &[RuleType::Escalation]).await.unwrap();
        assert_eq!(for_site_a.len(), 2);

        let no_site = store.fetch("t1", None, &[RuleType::Escalation]).await.unwrap();
        assert_eq!(no_site.len(), 1);
        assert_eq!(no_site[0].id, "global");
    }

    #[tokio::test]
    async fn malformed_conditions_survive_the_fetch_but_are_not_evaluable() {
        let db = Db::connect_in_memory().await.unwrap();
        seed_tenant(&db.pool).await;
        insert_rule(&db.pool, "bad", "escalation", 1, None, "{{{ not json").await;
        insert_rule(&db.pool, "empty", "escalation", 1, None, r#"{"operator":"and","conditions":[]}"#).await;

        let store = RuleStore::new(db.pool.clone());
        let rules = store.fetch("t1", None, &[RuleType::Escalation]).await.unwrap();

        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|rule| !rule.is_evaluable()));
    }
}
