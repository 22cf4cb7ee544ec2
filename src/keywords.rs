//! Keyword extraction from message text.
//!
//! Rule leaves that test keyword membership all go through this one
//! extractor, so keyword behavior is identical for escalation, routing, and
//! notification rules. Pure and deterministic — the query playground relies
//! on re-running extraction out-of-band and getting the same token set.

use std::collections::HashSet;

/// Common English words that carry no routing signal.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "do",
    "does", "for", "from", "had", "has", "have", "how", "i", "if", "in",
    "is", "it", "its", "me", "my", "no", "not", "of", "on", "or", "our",
    "so", "that", "the", "their", "them", "then", "there", "these", "they",
    "this", "to", "was", "we", "were", "what", "when", "where", "which",
    "who", "why", "will", "with", "would", "you", "your",
];

/// Extract keywords from a message: lowercase, strip punctuation, drop
/// stopwords, dedupe preserving first-seen order.
pub fn extract(message: &str) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut keywords = Vec::new();

    for raw_token in message.split_whitespace() {
        let token: String = raw_token
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();

        if token.is_empty() || STOPWORDS.contains(&token.as_str()) {
            continue;
        }

        if seen.insert(token.clone()) {
            keywords.push(token);
        }
    }

    keywords
}
