//! Per-message evaluation context.

use chrono::{DateTime, Timelike as _, Utc};

/// Everything a rule leaf can test, built once per inbound message and never
/// mutated afterward. Pure input to the rule engine — escalation, routing,
/// and notification rules for the same message all see the same context.
#[derive(Debug, Clone)]
pub struct RuleContext {
    /// The inbound user message text.
    pub message: String,
    /// Confidence of the produced answer.
    pub confidence: f64,
    /// Keywords extracted from the message (ordered, deduplicated).
    pub keywords: Vec<String>,
    /// Requesting site, when the widget is embedded on a known site.
    pub site_id: Option<String>,
    /// Arrival time of the message.
    pub timestamp: DateTime<Utc>,
    /// Visitor email, when captured by the widget.
    pub user_email: Option<String>,
    /// Seconds since the session started, when known.
    pub session_duration_secs: Option<i64>,
    /// Whether the message arrived outside business hours (9:00–18:00 UTC).
    pub is_off_hours: bool,
    /// Number of messages in the conversation so far, when known.
    pub conversation_length: Option<i64>,
}

impl RuleContext {
    /// Build a context for one inbound message. Keywords come from the
    /// shared extractor so keyword leaves behave identically across rule
    /// types.
    pub fn for_message(
        message: &str,
        confidence: f64,
        site_id: Option<String>,
        user_email: Option<String>,
        conversation_length: Option<i64>,
    ) -> Self {
        let timestamp = Utc::now();
        Self {
            message: message.to_string(),
            confidence,
            keywords: crate::keywords::extract(message),
            site_id,
            timestamp,
            user_email,
            session_duration_secs: None,
            is_off_hours: is_off_hours(timestamp),
            conversation_length,
        }
    }
}

/// Business hours are 9:00–18:00 UTC; everything else is off-hours.
fn is_off_hours(timestamp: DateTime<Utc>) -> bool {
    let hour = timestamp.hour();
    !(9..18).contains(&hour)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    #[test]
    fn off_hours_boundaries() {
        let morning = Utc.with_ymd_and_hms(2026, 3, 5, 8, 59, 0).unwrap();
        let open = Utc.with_ymd_and_hms(2026, 3, 5, 9, 0, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2026, 3, 5, 18, 0, 0).unwrap();

        assert!(is_off_hours(morning));
        assert!(!is_off_hours(open));
        assert!(is_off_hours(evening));
    }

    #[test]
    fn context_uses_the_shared_extractor() {
        let context =
            RuleContext::for_message("I need a REFUND now", 0.7, None, None, None);

        assert_eq!(context.keywords, vec!["need", "refund", "now"]);
        assert_eq!(context.confidence, 0.7);
    }
}
