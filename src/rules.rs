//! Tenant-authored escalation rules: condition AST, pure evaluator, store.

pub mod ast;
pub mod context;
pub mod engine;
pub mod store;

pub use ast::{Comparator, Condition, Field, GroupOp, Leaf};
pub use context::RuleContext;
pub use engine::{evaluate, Evaluation, TraceEntry};
pub use store::{EscalationRule, RuleStore, RuleType};
