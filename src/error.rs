//! Error types shared across the daemon.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeskbotError>;

/// Top-level error family.
///
/// The escalation/notification/delivery path never lets these propagate to
/// the chat response — callers along that path catch and log. Only answer
/// generation errors (missing credentials, malformed input, internal
/// failure) surface to the API layer.
#[derive(Debug, Error)]
pub enum DeskbotError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("completion model is not configured")]
    ModelNotConfigured,

    #[error("completion request failed: {0}")]
    Completion(String),

    #[error("unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("message quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
