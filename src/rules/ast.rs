//! Condition tree AST.
//!
//! Rule conditions arrive as tenant-authored JSON and are deserialized into
//! a tagged union once at load time. Evaluation is then exhaustive pattern
//! matching — never duck-typed field access against raw JSON. The leaf
//! catalog is open-ended on the wire: a leaf kind this build does not know
//! lands in [`Condition::Unknown`] instead of failing the whole rule set.

use serde::{Deserialize, Serialize};

/// Boolean combinator for a group node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupOp {
    And,
    Or,
}

/// Context field a leaf condition tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// Raw message text (substring match).
    Message,
    /// Extracted keyword set. Single-word values match extracted tokens
    /// exactly; multi-word values match as a case-insensitive phrase on the
    /// message text.
    Keywords,
    /// Answer confidence (numeric comparison).
    Confidence,
    /// Requesting site identifier (equality).
    Site,
    /// Visitor email, when known (substring or equality).
    UserEmail,
    /// Seconds since the session started (numeric comparison).
    SessionDuration,
    /// Messages in the conversation so far (numeric comparison).
    ConversationLength,
    /// Whether the message arrived outside business hours (equality).
    OffHours,
    /// Message timestamp, RFC 3339 (ordered comparison).
    Timestamp,
}

/// Comparison operator for a leaf condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Contains,
}

/// A single field comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leaf {
    pub field: Field,
    pub operator: Comparator,
    pub value: serde_json::Value,
}

/// A node in the condition tree.
///
/// Untagged: a node with a boolean `operator` and a `conditions` array is a
/// group; a node with a known `field`/`operator`/`value` triple is a leaf;
/// anything else (unknown field, unknown comparator, malformed node) is
/// `Unknown` and evaluates to no-match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Group {
        operator: GroupOp,
        conditions: Vec<Condition>,
    },
    Leaf(Leaf),
    Unknown(serde_json::Value),
}

impl Condition {
    /// Parse a condition tree from stored JSON. Returns `None` when the JSON
    /// itself is unparseable (the caller treats the rule as non-matching).
    pub fn from_json(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    /// Whether this tree can never match anything and should be skipped
    /// before evaluation: an empty group, or a root that failed to parse
    /// into a known shape.
    pub fn is_vacant(&self) -> bool {
        match self {
            Condition::Group { conditions, .. } => conditions.is_empty(),
            Condition::Leaf(_) => false,
            Condition::Unknown(_) => true,
        }
    }
}
