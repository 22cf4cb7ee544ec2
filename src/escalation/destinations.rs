//! Delivery destinations and webhook-fanout deduplication.

use serde::{Deserialize, Serialize};

/// A configured delivery target on a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Destination {
    /// A tenant integration (Slack, Teams, help desk, …), addressed by id.
    Integration { integration_id: String },
    /// A plain email notification.
    Email { email: String },
    /// A generic webhook; `url` overrides the tenant's configured endpoints.
    Webhook {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
}

impl Destination {
    pub fn is_integration(&self) -> bool {
        matches!(self, Destination::Integration { .. })
    }
}

/// Whether the generic webhook fan-out should fire for an escalation.
///
/// When a matched rule explicitly names integration destinations, those
/// integrations are notified directly through the outbox — a generic webhook
/// fan-out on top would deliver the same escalation twice. Confidence-only
/// escalations have no rule and therefore no explicit destinations, so they
/// always fan out; so do rule matches whose destinations are exclusively
/// email or webhook entries.
pub fn webhook_fanout_allowed(rule_matched: bool, destinations: &[Destination]) -> bool {
    let has_integration = destinations.iter().any(Destination::is_integration);
    !(rule_matched && has_integration)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn integration(id: &str) -> Destination {
        Destination::Integration {
            integration_id: id.to_string(),
        }
    }

    fn email(address: &str) -> Destination {
        Destination::Email {
            email: address.to_string(),
        }
    }

    #[test]
    fn integration_destination_suppresses_fanout() {
        let destinations = vec![integration("slack-1"), email("ops@acme.test")];

        assert!(!webhook_fanout_allowed(true, &destinations));
    }

    #[test]
    fn email_and_webhook_only_destinations_keep_fanout() {
        let destinations = vec![email("ops@acme.test"), Destination::Webhook { url: None }];

        assert!(webhook_fanout_allowed(true, &destinations));
    }

    #[test]
    fn confidence_only_escalation_always_fans_out() {
        // No rule matched, hence no explicit destinations.
        assert!(webhook_fanout_allowed(false, &[]));
        // Even if destinations were somehow present without a rule match.
        assert!(webhook_fanout_allowed(false, &[integration("slack-1")]));
    }

    #[test]
    fn destination_json_round_trips_the_wire_tags() {
        let parsed: Vec<Destination> = serde_json::from_str(
            r#"[
                {"type": "integration", "integration_id": "slack-1"},
                {"type": "email", "email": "ops@acme.test"},
                {"type": "webhook"}
            ]"#,
        )
        .unwrap();

        assert_eq!(parsed.len(), 3);
        assert!(parsed[0].is_integration());
        assert!(!parsed[1].is_integration());
    }
}
