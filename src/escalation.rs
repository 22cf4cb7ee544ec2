//! Escalation decision pipeline: confidence signal, rule walk, destination
//! resolution, and the combinator that merges them into one decision.

pub mod destinations;
pub mod resolver;

pub use destinations::{webhook_fanout_allowed, Destination};
pub use resolver::{
    confidence_signal, first_matching_rule, matching_notification_rules, resolve, Decision,
    EscalationReason, EscalationResolver, RuleSignal,
};
