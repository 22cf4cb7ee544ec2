//! deskbot — multi-tenant support chat daemon.
//!
//! The core of the system is the per-message escalation pipeline: every
//! inbound chat message gets an answer (curated or generated), a confidence
//! score, and a decision about whether a human or integration must be
//! notified — through which channels, with what reason, and with an
//! auditable trail. Delivery is reliable (outbox pattern, at-least-once)
//! and never blocks or fails the user-visible answer.

pub mod answers;
pub mod api;
pub mod config;
pub mod confidence;
pub mod conversation;
pub mod db;
pub mod error;
pub mod escalation;
pub mod keywords;
pub mod outbox;
pub mod rules;
pub mod usage;
pub mod webhooks;

pub use config::Config;
pub use db::Db;
pub use error::{DeskbotError, Result};
