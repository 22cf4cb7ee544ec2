//! Escalation decision resolution.
//!
//! Two independent signals feed one decision: the confidence signal
//! (threshold test, then handoff-phrase test on the answer) and the rule
//! signal (first matching escalation-or-routing rule in priority order).
//! [`resolve`] merges them with a fixed precedence: the rule-derived reason
//! and rule id always replace the confidence-derived reason. Notification
//! rules are evaluated separately, every one, and never affect the decision.

use crate::confidence::ESCALATION_THRESHOLD;
use crate::escalation::destinations::{webhook_fanout_allowed, Destination};
use crate::rules::{evaluate, EscalationRule, RuleContext, RuleStore, RuleType};

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Assistant answers containing this phrase signal an explicit handoff.
fn handoff_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new(r"(?i)connect\s+you\s+with\s+support").expect("static pattern compiles")
    })
}

/// Why an escalation (or notification) fired. Stored on the audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// Answer confidence fell below the escalation threshold.
    LowConfidence,
    /// The answer text offered to connect the user with support.
    Handoff,
    /// The user explicitly asked for a human through a dedicated entry
    /// point (widget handoff button). Not produced by the chat pipeline.
    UserRequest,
    /// An escalation-type rule matched.
    RuleMatch,
    /// A routing-type rule matched.
    RoutingRule,
    /// A notification-type rule matched (non-blocking side alert).
    NotificationMatch,
}

impl EscalationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EscalationReason::LowConfidence => "low_confidence",
            EscalationReason::Handoff => "handoff",
            EscalationReason::UserRequest => "user_request",
            EscalationReason::RuleMatch => "rule_match",
            EscalationReason::RoutingRule => "routing_rule",
            EscalationReason::NotificationMatch => "notification_match",
        }
    }
}

/// The rule half of the decision: the first matching rule in walk order.
#[derive(Debug, Clone)]
pub struct RuleSignal {
    pub rule_id: String,
    pub reason: EscalationReason,
    pub destinations: Vec<Destination>,
}

/// The combined per-message escalation decision.
#[derive(Debug, Clone)]
pub struct Decision {
    pub escalate: bool,
    pub reason: Option<EscalationReason>,
    pub rule_id: Option<String>,
    pub destinations: Vec<Destination>,
    /// Whether the generic webhook fan-out should fire for this escalation.
    pub trigger_webhooks: bool,
}

impl Decision {
    pub fn no_escalation() -> Self {
        Self {
            escalate: false,
            reason: None,
            rule_id: None,
            destinations: Vec::new(),
            trigger_webhooks: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Pure signal functions
// ---------------------------------------------------------------------------

/// The confidence signal. The threshold test fires first; an answer that
/// offers the handoff phrase escalates even when confidence is high.
pub fn confidence_signal(confidence: f64, answer_text: &str) -> Option<EscalationReason> {
    if confidence < ESCALATION_THRESHOLD {
        Some(EscalationReason::LowConfidence)
    } else if handoff_pattern().is_match(answer_text) {
        Some(EscalationReason::Handoff)
    } else {
        None
    }
}

/// Walk escalation and routing rules in their fetched order (priority DESC,
/// created_at DESC) and return the first match. The walk is first-match-wins
/// across both types combined: a higher-priority routing rule pre-empts a
/// lower-priority escalation rule, and vice versa. Rules with empty or
/// unparseable conditions are skipped and never reach the engine.
pub fn first_matching_rule(rules: &[EscalationRule], context: &RuleContext) -> Option<RuleSignal> {
    for rule in rules {
        if !rule.is_evaluable() {
            continue;
        }
        let Some(tree) = &rule.conditions else {
            continue;
        };
        if evaluate(tree, context).matched {
            let reason = match rule.rule_type {
                RuleType::Routing => EscalationReason::RoutingRule,
                _ => EscalationReason::RuleMatch,
            };
            return Some(RuleSignal {
                rule_id: rule.id.clone(),
                reason,
                destinations: rule.destinations.clone(),
            });
        }
    }
    None
}

/// Evaluate every notification rule — no short-circuit across rules — and
/// return the matches. Each one fires its own non-blocking delivery; none of
/// them affect the escalation decision.
pub fn matching_notification_rules<'a>(
    rules: &'a [EscalationRule],
    context: &RuleContext,
) -> Vec<&'a EscalationRule> {
    rules
        .iter()
        .filter(|rule| rule.is_evaluable())
        .filter(|rule| match &rule.conditions {
            Some(tree) => evaluate(tree, context).matched,
            None => false,
        })
        .collect()
}

/// Merge the two signals into one decision.
///
/// Precedence is a defined contract: when both signals fire, the
/// rule-derived reason and rule id replace the confidence-derived reason.
pub fn resolve(
    confidence: Option<EscalationReason>,
    rule: Option<RuleSignal>,
) -> Decision {
    match (confidence, rule) {
        (_, Some(signal)) => {
            let trigger_webhooks = webhook_fanout_allowed(true, &signal.destinations);
            Decision {
                escalate: true,
                reason: Some(signal.reason),
                rule_id: Some(signal.rule_id),
                destinations: signal.destinations,
                trigger_webhooks,
            }
        }
        (Some(reason), None) => Decision {
            escalate: true,
            reason: Some(reason),
            rule_id: None,
            destinations: Vec::new(),
            trigger_webhooks: webhook_fanout_allowed(false, &[]),
        },
        (None, None) => Decision::no_escalation(),
    }
}

// ---------------------------------------------------------------------------
// Store-backed resolver
// ---------------------------------------------------------------------------

/// Orchestrates rule fetch and evaluation for one message.
///
/// Any error while fetching rules degrades to "no rule matched" (fail open)
/// — the confidence signal still applies independently, and the chat answer
/// is never blocked by a broken rule set.
#[derive(Debug, Clone)]
pub struct EscalationResolver {
    rule_store: RuleStore,
}

impl EscalationResolver {
    pub fn new(rule_store: RuleStore) -> Self {
        Self { rule_store }
    }

    /// Resolve the escalation decision for one message.
    pub async fn decide(
        &self,
        tenant_id: &str,
        site_id: Option<&str>,
        context: &RuleContext,
        answer_text: &str,
    ) -> Decision {
        let from_confidence = confidence_signal(context.confidence, answer_text);

        let from_rules = match self
            .rule_store
            .fetch(tenant_id, site_id, &[RuleType::Escalation, RuleType::Routing])
            .await
        {
            Ok(rules) => first_matching_rule(&rules, context),
            Err(error) => {
                tracing::warn!(%error, tenant_id, "rule fetch failed, treating as no match");
                None
            }
        };

        resolve(from_confidence, from_rules)
    }

    /// Fetch and evaluate notification rules for the same context. Fail
    /// open: a fetch error yields no notifications rather than an error.
    pub async fn notifications(
        &self,
        tenant_id: &str,
        site_id: Option<&str>,
        context: &RuleContext,
    ) -> Vec<EscalationRule> {
        match self
            .rule_store
            .fetch(tenant_id, site_id, &[RuleType::Notification])
            .await
        {
            Ok(rules) => {
                let matched: Vec<String> = matching_notification_rules(&rules, context)
                    .into_iter()
                    .map(|rule| rule.id.clone())
                    .collect();
                rules
                    .into_iter()
                    .filter(|rule| matched.contains(&rule.id))
                    .collect()
            }
            Err(error) => {
                tracing::warn!(%error, tenant_id, "notification rule fetch failed, skipping");
                Vec::new()
            }
        }
    }
}
