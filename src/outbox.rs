//! Reliable delivery: escalation audit events plus an outbox of pending
//! external deliveries with at-least-once retry bookkeeping.

pub mod dispatcher;
pub mod service;
pub mod store;

pub use dispatcher::{spawn_dispatcher, DeliveryTransport, HttpTransport};
pub use service::{DeliveryService, EscalationMeta, EscalationParams};
pub use store::{EscalationEvent, EventLog, OutboxEntry, OutboxStatus, OutboxStore};
