//! Pure condition-tree evaluator.
//!
//! No I/O and no mutation: identical `(tree, context)` inputs always yield
//! identical output, which the rule playground relies on to reproduce
//! production decisions out-of-band. `and` short-circuits on the first false
//! child, `or` on the first true child; only evaluated nodes appear in the
//! trace.

use crate::rules::ast::{Comparator, Condition, Field, GroupOp, Leaf};
use crate::rules::context::RuleContext;

/// Outcome of evaluating one condition tree.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub matched: bool,
    pub trace: Vec<TraceEntry>,
}

/// One evaluated node, addressed by its path in the tree (e.g. `0.2.1`).
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub path: String,
    pub node: String,
    pub matched: bool,
}

/// Evaluate a condition tree against a message context.
pub fn evaluate(tree: &Condition, context: &RuleContext) -> Evaluation {
    let mut trace = Vec::new();
    let matched = eval_node(tree, context, "root", &mut trace);
    Evaluation { matched, trace }
}

fn eval_node(
    node: &Condition,
    context: &RuleContext,
    path: &str,
    trace: &mut Vec<TraceEntry>,
) -> bool {
    match node {
        Condition::Group {
            operator,
            conditions,
        } => {
            let matched = match operator {
                // An empty group matches nothing, for either operator. A
                // vacuously-true `and` would turn a truncated tree into
                // match-everything.
                GroupOp::And if conditions.is_empty() => false,
                GroupOp::And => {
                    let mut all = true;
                    for (index, child) in conditions.iter().enumerate() {
                        let child_path = format!("{path}.{index}");
                        if !eval_node(child, context, &child_path, trace) {
                            all = false;
                            break;
                        }
                    }
                    all
                }
                GroupOp::Or => {
                    let mut any = false;
                    for (index, child) in conditions.iter().enumerate() {
                        let child_path = format!("{path}.{index}");
                        if eval_node(child, context, &child_path, trace) {
                            any = true;
                            break;
                        }
                    }
                    any
                }
            };
            trace.push(TraceEntry {
                path: path.to_string(),
                node: format!("{operator:?}({})", conditions.len()).to_lowercase(),
                matched,
            });
            matched
        }
        Condition::Leaf(leaf) => {
            let matched = eval_leaf(leaf, context);
            trace.push(TraceEntry {
                path: path.to_string(),
                node: format!("{:?}.{:?}", leaf.field, leaf.operator).to_lowercase(),
                matched,
            });
            matched
        }
        Condition::Unknown(_) => {
            // Tenant-authored data may carry leaf kinds this build does not
            // know. They never match and never abort evaluation.
            trace.push(TraceEntry {
                path: path.to_string(),
                node: "unknown".to_string(),
                matched: false,
            });
            false
        }
    }
}

fn eval_leaf(leaf: &Leaf, context: &RuleContext) -> bool {
    match leaf.field {
        Field::Message => text_compare(&context.message, leaf),
        Field::Keywords => match (leaf.operator, leaf.value.as_str()) {
            (Comparator::Contains | Comparator::Eq, Some(value)) => {
                let needle = value.trim().to_lowercase();
                if needle.split_whitespace().nth(1).is_some() {
                    // A multi-word value can never equal a single extracted
                    // token; match it as a phrase against the message.
                    context.message.to_lowercase().contains(&needle)
                } else {
                    context.keywords.iter().any(|keyword| *keyword == needle)
                }
            }
            _ => false,
        },
        Field::Confidence => numeric_compare(context.confidence, leaf),
        Field::Site => match (&context.site_id, leaf.value.as_str()) {
            (Some(site), Some(value)) if leaf.operator == Comparator::Eq => site == value,
            _ => false,
        },
        Field::UserEmail => match &context.user_email {
            Some(email) => text_compare(email, leaf),
            None => false,
        },
        Field::SessionDuration => match context.session_duration_secs {
            Some(seconds) => numeric_compare(seconds as f64, leaf),
            None => false,
        },
        Field::ConversationLength => match context.conversation_length {
            Some(length) => numeric_compare(length as f64, leaf),
            None => false,
        },
        Field::OffHours => match (leaf.operator, leaf.value.as_bool()) {
            (Comparator::Eq, Some(value)) => context.is_off_hours == value,
            _ => false,
        },
        Field::Timestamp => match leaf
            .value
            .as_str()
            .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
        {
            Some(value) => ordered_compare(
                context.timestamp.timestamp_millis() as f64,
                value.timestamp_millis() as f64,
                leaf.operator,
            ),
            None => false,
        },
    }
}

/// Case-insensitive substring (`contains`) or equality (`eq`) on a text
/// field. Other comparators never match text.
fn text_compare(actual: &str, leaf: &Leaf) -> bool {
    let Some(expected) = leaf.value.as_str() else {
        return false;
    };
    let actual = actual.to_lowercase();
    let expected = expected.to_lowercase();
    match leaf.operator {
        Comparator::Contains => actual.contains(&expected),
        Comparator::Eq => actual == expected,
        _ => false,
    }
}

fn numeric_compare(actual: f64, leaf: &Leaf) -> bool {
    let Some(expected) = leaf.value.as_f64() else {
        return false;
    };
    ordered_compare(actual, expected, leaf.operator)
}

fn ordered_compare(actual: f64, expected: f64, operator: Comparator) -> bool {
    match operator {
        Comparator::Lt => actual < expected,
        Comparator::Lte => actual <= expected,
        Comparator::Gt => actual > expected,
        Comparator::Gte => actual >= expected,
        Comparator::Eq => (actual - expected).abs() < f64::EPSILON,
        Comparator::Contains => false,
    }
}
