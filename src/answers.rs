//! Answer production: curated answers first, generative completion second.
//!
//! A non-empty curated match always wins and the model is never invoked for
//! it. Retrieval ranking proper is out of scope — curated matching is a
//! deterministic keyword-overlap scan, enough to exercise the
//! curated-vs-generated split the escalation pipeline depends on.

use crate::config::ModelConfig;
use crate::error::{DeskbotError, Result};
use crate::keywords;

use serde::Serialize;
use sqlx::{Row as _, SqlitePool};
use std::time::Duration;

/// Where an answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOrigin {
    Curated,
    Generated,
}

/// The produced answer plus everything the escalation pipeline needs.
#[derive(Debug, Clone)]
pub struct ChatAnswer {
    pub text: String,
    /// Identifiers of the curated answers backing this response.
    pub refs: Vec<String>,
    pub confidence: f64,
    pub origin: AnswerOrigin,
}

/// Raw completion result from the model.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    /// False when the output was truncated (length stop, content filter, …).
    pub finished_normally: bool,
}

/// A generative completion backend.
pub trait CompletionClient: Send + Sync {
    fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> impl std::future::Future<Output = Result<Completion>> + Send;
}

/// A tenant-authored curated answer row.
#[derive(Debug, Clone)]
struct CuratedAnswer {
    id: String,
    question: String,
    answer: String,
    keywords: Vec<String>,
}

const SYSTEM_PROMPT: &str = "You are a support assistant for this site. Answer from the \
provided context. If you cannot help, say you will connect the user with support.";

/// Curated-first answer source over one tenant's content.
#[derive(Debug, Clone)]
pub struct AnswerService<C> {
    pool: SqlitePool,
    completion: Option<C>,
}

impl<C: CompletionClient> AnswerService<C> {
    pub fn new(pool: SqlitePool, completion: Option<C>) -> Self {
        Self { pool, completion }
    }

    /// Whether generated answers are available. Checked before any side
    /// effect so a misconfigured deployment fails with an explicit code
    /// instead of half-processing messages.
    pub fn is_model_configured(&self) -> bool {
        self.completion.is_some()
    }

    /// Produce the answer for one message.
    pub async fn answer(
        &self,
        tenant_id: &str,
        message: &str,
        site_id: Option<&str>,
    ) -> Result<ChatAnswer> {
        if let Some(curated) = self.best_curated(tenant_id, message, site_id).await? {
            return Ok(ChatAnswer {
                text: curated.answer,
                refs: vec![curated.id],
                confidence: crate::confidence::for_curated(),
                origin: AnswerOrigin::Curated,
            });
        }

        let completion = self
            .completion
            .as_ref()
            .ok_or(DeskbotError::ModelNotConfigured)?;
        let result = completion.complete(SYSTEM_PROMPT, message).await?;

        Ok(ChatAnswer {
            confidence: crate::confidence::for_generated(result.finished_normally),
            text: result.text,
            refs: Vec::new(),
            origin: AnswerOrigin::Generated,
        })
    }

    /// Best-overlap curated answer, if any keyword overlaps at all.
    async fn best_curated(
        &self,
        tenant_id: &str,
        message: &str,
        site_id: Option<&str>,
    ) -> Result<Option<CuratedAnswer>> {
        let rows = sqlx::query(
            "SELECT id, question, answer, keywords FROM curated_answers \
             WHERE tenant_id = ? AND (site_id IS NULL OR site_id = ?)",
        )
        .bind(tenant_id)
        .bind(site_id)
        .fetch_all(&self.pool)
        .await?;

        let message_keywords = keywords::extract(message);
        let message_lower = message.to_lowercase();

        let mut best: Option<(usize, CuratedAnswer)> = None;
        for row in rows {
            let raw_keywords: String = row.try_get("keywords").unwrap_or_default();
            let candidate = CuratedAnswer {
                id: row.try_get("id").unwrap_or_default(),
                question: row.try_get("question").unwrap_or_default(),
                answer: row.try_get("answer").unwrap_or_default(),
                keywords: serde_json::from_str(&raw_keywords).unwrap_or_default(),
            };

            let mut score = candidate
                .keywords
                .iter()
                .filter(|keyword| message_keywords.contains(&keyword.to_lowercase()))
                .count();
            // Substring fallback on the stored question text.
            if score == 0 && message_lower.contains(&candidate.question.to_lowercase()) {
                score = 1;
            }

            if score > 0 && best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                best = Some((score, candidate));
            }
        }

        Ok(best.map(|(_, answer)| answer))
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible completion client
// ---------------------------------------------------------------------------

/// Completion client for an OpenAI-compatible chat endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompletion {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenAiCompletion {
    /// Build from config. Returns `None` when the endpoint or API key is
    /// missing — callers treat that as "model not configured".
    pub fn from_config(config: &ModelConfig) -> Option<Self> {
        Some(Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone()?,
            api_key: config.api_key.clone()?,
            model: config.model.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }
}

impl CompletionClient for OpenAiCompletion {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| DeskbotError::Completion(error.to_string()))?;

        if !response.status().is_success() {
            return Err(DeskbotError::Completion(format!(
                "completion endpoint returned {}",
                response.status()
            )));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|error| DeskbotError::Completion(error.to_string()))?;

        let choice = &parsed["choices"][0];
        let text = choice["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let finished_normally = choice["finish_reason"].as_str() == Some("stop");

        Ok(Completion {
            text,
            finished_normally,
        })
    }
}
