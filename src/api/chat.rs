//! The chat endpoint: answer production plus the escalation pipeline.
//!
//! The pipeline order is fixed: usage gate, conversation bookkeeping, answer,
//! confidence, escalation/routing rules (first-match short-circuit), then
//! notification rules (every one), all over a single context built once per
//! message. Everything after the answer is produced is best-effort — an
//! error in escalation, notification, or delivery is logged and contained,
//! never surfaced to the user, and the answer is returned regardless.

use super::state::ApiState;
use crate::answers::AnswerOrigin;
use crate::error::DeskbotError;
use crate::escalation::EscalationReason;
use crate::outbox::{EscalationMeta, EscalationParams};
use crate::rules::RuleContext;
use crate::webhooks::WebhookEvent;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use sqlx::Row as _;
use std::sync::Arc;

#[derive(Deserialize)]
pub(super) struct ChatRequest {
    /// Tenant identifier as embedded in the widget snippet.
    tenant: String,
    session_id: String,
    message: String,
    #[serde(default)]
    site_id: Option<String>,
    /// Voice-mode flag from the widget; carried through to webhooks.
    #[serde(default)]
    voice: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct ChatResponse {
    answer: String,
    refs: Vec<String>,
    confidence: f64,
    source: AnswerOrigin,
}

#[derive(Debug, Serialize)]
pub(super) struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub(super) struct ErrorDetail {
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, code: &'static str, message: Option<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: ErrorDetail { code, message },
        }),
    )
}

pub(super) async fn chat_send(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.message.trim().is_empty() || request.session_id.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            Some("message and session_id are required".to_string()),
        ));
    }

    // Configuration problems reject the request before any side effect.
    if !state.answers.is_model_configured() {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "model_not_configured",
            None,
        ));
    }

    let tenant_id = find_tenant(&state, &request.tenant).await?.ok_or_else(|| {
        api_error(StatusCode::NOT_FOUND, "unknown_tenant", None)
    })?;

    let verdict = state.usage.can_send(&tenant_id).await.map_err(|error| {
        internal_error(&state, error)
    })?;
    if !verdict.ok {
        return Err(api_error(
            StatusCode::TOO_MANY_REQUESTS,
            "quota_exceeded",
            verdict.reason,
        ));
    }

    let conversation = state
        .conversations
        .ensure(&tenant_id, &request.session_id)
        .await
        .map_err(|error| internal_error(&state, error))?;

    if conversation.created {
        state.webhooks.notify(
            &tenant_id,
            WebhookEvent::ConversationStarted,
            serde_json::json!({
                "conversation_id": conversation.id,
                "session_id": request.session_id,
                "site_id": request.site_id,
                "voice": request.voice,
            }),
        );
    }

    state
        .conversations
        .append_message(&conversation.id, &tenant_id, "user", &request.message, None)
        .await
        .map_err(|error| internal_error(&state, error))?;
    state.webhooks.notify(
        &tenant_id,
        WebhookEvent::MessageReceived,
        serde_json::json!({
            "conversation_id": conversation.id,
            "session_id": request.session_id,
            "message": request.message,
        }),
    );

    // Answer production is the only stage whose errors reach the caller.
    let answer = state
        .answers
        .answer(&tenant_id, &request.message, request.site_id.as_deref())
        .await
        .map_err(|error| match error {
            DeskbotError::ModelNotConfigured => {
                api_error(StatusCode::SERVICE_UNAVAILABLE, "model_not_configured", None)
            }
            other => internal_error(&state, other),
        })?;

    state
        .conversations
        .append_message(
            &conversation.id,
            &tenant_id,
            "assistant",
            &answer.text,
            Some(answer.confidence),
        )
        .await
        .map_err(|error| internal_error(&state, error))?;
    state.webhooks.notify(
        &tenant_id,
        WebhookEvent::MessageAnswered,
        serde_json::json!({
            "conversation_id": conversation.id,
            "session_id": request.session_id,
            "answer": answer.text,
            "confidence": answer.confidence,
            "source": answer.origin,
        }),
    );

    // The answer is final from here on. The escalation pipeline runs after
    // it and cannot alter or fail the response.
    run_escalation_pipeline(&state, &tenant_id, &conversation.id, &request, &answer).await;

    if let Err(error) = state.usage.record_sent(&tenant_id).await {
        tracing::warn!(%error, tenant_id, "failed to record usage");
    }

    Ok(Json(ChatResponse {
        answer: answer.text,
        refs: answer.refs,
        confidence: answer.confidence,
        source: answer.origin,
    }))
}

/// Escalation + notification resolution and delivery enqueue. Best-effort
/// end to end: every failure inside is logged and contained.
async fn run_escalation_pipeline(
    state: &Arc<ApiState>,
    tenant_id: &str,
    conversation_id: &str,
    request: &ChatRequest,
    answer: &crate::answers::ChatAnswer,
) {
    let conversation_length = match state.conversations.message_count(conversation_id).await {
        Ok(count) => Some(count),
        Err(error) => {
            tracing::warn!(%error, "failed to count conversation messages");
            None
        }
    };

    let context = RuleContext::for_message(
        &request.message,
        answer.confidence,
        request.site_id.clone(),
        None,
        conversation_length,
    );

    let decision = state
        .resolver
        .decide(tenant_id, request.site_id.as_deref(), &context, &answer.text)
        .await;

    if decision.escalate {
        let reason = decision.reason.unwrap_or(EscalationReason::LowConfidence);
        let params = EscalationParams {
            tenant_id: tenant_id.to_string(),
            conversation_id: conversation_id.to_string(),
            session_id: request.session_id.clone(),
            user_message: request.message.clone(),
            answer_text: answer.text.clone(),
            confidence: answer.confidence,
            reason,
            rule_id: decision.rule_id.clone(),
            destinations: decision.destinations.clone(),
            keywords: context.keywords.clone(),
            trigger_webhooks: decision.trigger_webhooks,
            meta: EscalationMeta {
                is_notification: false,
                from_chat: true,
                used_curated_answer: answer.origin == AnswerOrigin::Curated,
            },
        };

        match state.delivery.handle_escalation(params).await {
            Ok(event_id) => {
                tracing::info!(
                    tenant_id,
                    event_id,
                    reason = reason.as_str(),
                    rule_id = decision.rule_id.as_deref().unwrap_or(""),
                    "escalation recorded"
                );
                if decision.trigger_webhooks {
                    state.webhooks.notify(
                        tenant_id,
                        WebhookEvent::Escalation,
                        serde_json::json!({
                            "conversation_id": conversation_id,
                            "session_id": request.session_id,
                            "reason": reason.as_str(),
                            "rule_id": decision.rule_id,
                            "keywords": context.keywords,
                        }),
                    );
                }
            }
            Err(error) => {
                tracing::warn!(%error, tenant_id, "escalation delivery failed");
            }
        }
    }

    // Notification rules: every match fires its own non-blocking delivery,
    // independent of the escalation outcome above.
    let notifications = state
        .resolver
        .notifications(tenant_id, request.site_id.as_deref(), &context)
        .await;

    for rule in notifications {
        let delivery = state.delivery.clone();
        let params = EscalationParams {
            tenant_id: tenant_id.to_string(),
            conversation_id: conversation_id.to_string(),
            session_id: request.session_id.clone(),
            user_message: request.message.clone(),
            answer_text: answer.text.clone(),
            confidence: answer.confidence,
            reason: EscalationReason::NotificationMatch,
            rule_id: Some(rule.id.clone()),
            destinations: rule.destinations.clone(),
            keywords: context.keywords.clone(),
            trigger_webhooks: false,
            meta: EscalationMeta {
                is_notification: true,
                from_chat: true,
                used_curated_answer: answer.origin == AnswerOrigin::Curated,
            },
        };

        tokio::spawn(async move {
            if let Err(error) = delivery.handle_escalation(params).await {
                tracing::warn!(%error, "notification delivery failed");
            }
        });
    }
}

async fn find_tenant(state: &Arc<ApiState>, identifier: &str) -> Result<Option<String>, ApiError> {
    sqlx::query("SELECT id FROM tenants WHERE identifier = ?")
        .bind(identifier)
        .fetch_optional(&state.pool)
        .await
        .map_err(|error| internal_error(state, DeskbotError::from(error)))
        .map(|row| row.and_then(|row| row.try_get("id").ok()))
}

/// Generic failure response. Detail is exposed only outside production.
fn internal_error(state: &Arc<ApiState>, error: DeskbotError) -> ApiError {
    tracing::error!(%error, "chat request failed");
    let message = if state.config.is_production() {
        None
    } else {
        Some(error.to_string())
    };
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub(super) struct HistoryQuery {
    tenant: String,
    session_id: String,
    #[serde(default = "default_history_limit")]
    limit: i64,
}

fn default_history_limit() -> i64 {
    50
}

#[derive(Serialize)]
pub(super) struct HistoryMessage {
    id: String,
    role: String,
    content: String,
    confidence: Option<f64>,
}

pub(super) async fn chat_history(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryMessage>>, ApiError> {
    let tenant_id = find_tenant(&state, &query.tenant).await?.ok_or_else(|| {
        api_error(StatusCode::NOT_FOUND, "unknown_tenant", None)
    })?;

    let conversation = state
        .conversations
        .ensure(&tenant_id, &query.session_id)
        .await
        .map_err(|error| internal_error(&state, error))?;

    let messages = state
        .conversations
        .load_recent(&conversation.id, query.limit.min(200))
        .await
        .map_err(|error| internal_error(&state, error))?;

    Ok(Json(
        messages
            .into_iter()
            .map(|message| HistoryMessage {
                id: message.id,
                role: message.role,
                content: message.content,
                confidence: message.confidence,
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::Db;

    /// State over an in-memory database with one tenant, one curated answer
    /// (so the pipeline never needs a live completion endpoint), and model
    /// credentials present.
    async fn setup(message_limit: i64) -> (Db, Arc<ApiState>) {
        let db = Db::connect_in_memory().await.unwrap();
        sqlx::query(
            "INSERT INTO tenants (id, identifier, name, plan_message_limit) \
             VALUES ('t1', 'acme', 'Acme', ?)",
        )
        .bind(message_limit)
        .execute(&db.pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO curated_answers (id, tenant_id, question, answer, keywords) \
             VALUES ('ca-hours', 't1', 'what are your hours', 'Open 9 to 5.', '[\"hours\"]')",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        let mut config = Config::default();
        config.model.endpoint = Some("http://completion.invalid".to_string());
        config.model.api_key = Some("test-key".to_string());
        let state = Arc::new(ApiState::new(config, db.pool.clone()));
        (db, state)
    }

    fn request(tenant: &str, message: &str) -> ChatRequest {
        ChatRequest {
            tenant: tenant.to_string(),
            session_id: "s1".to_string(),
            message: message.to_string(),
            site_id: None,
            voice: false,
        }
    }

    async fn table_count(pool: &sqlx::SqlitePool, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn quota_exhausted_rejects_before_any_write() {
        let (db, state) = setup(0).await;

        let (status, Json(body)) =
            chat_send(State(state), Json(request("acme", "what are your hours")))
                .await
                .unwrap_err();

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body.error.code, "quota_exceeded");
        assert_eq!(table_count(&db.pool, "conversations").await, 0);
        assert_eq!(table_count(&db.pool, "messages").await, 0);
    }

    #[tokio::test]
    async fn unknown_tenant_is_a_stable_not_found() {
        let (_db, state) = setup(10).await;

        let (status, Json(body)) =
            chat_send(State(state), Json(request("ghost", "hello")))
                .await
                .unwrap_err();

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error.code, "unknown_tenant");
    }

    #[tokio::test]
    async fn blank_message_is_invalid_request() {
        let (_db, state) = setup(10).await;

        let (status, Json(body)) =
            chat_send(State(state), Json(request("acme", "   ")))
                .await
                .unwrap_err();

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error.code, "invalid_request");
    }

    #[tokio::test]
    async fn missing_model_credentials_reject_before_side_effects() {
        let db = Db::connect_in_memory().await.unwrap();
        sqlx::query("INSERT INTO tenants (id, identifier, name) VALUES ('t1', 'acme', 'Acme')")
            .execute(&db.pool)
            .await
            .unwrap();
        // No model endpoint or key configured.
        let state = Arc::new(ApiState::new(Config::default(), db.pool.clone()));

        let (status, Json(body)) =
            chat_send(State(state), Json(request("acme", "hello")))
                .await
                .unwrap_err();

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.error.code, "model_not_configured");
        assert_eq!(table_count(&db.pool, "conversations").await, 0);
        assert_eq!(table_count(&db.pool, "messages").await, 0);
    }

    #[tokio::test]
    async fn curated_send_persists_both_messages_and_counts_usage() {
        let (db, state) = setup(10).await;

        let Json(response) =
            chat_send(State(state), Json(request("acme", "what are your hours")))
                .await
                .unwrap();

        assert_eq!(response.answer, "Open 9 to 5.");
        assert_eq!(response.confidence, 0.95);
        assert_eq!(response.source, AnswerOrigin::Curated);
        assert_eq!(table_count(&db.pool, "conversations").await, 1);
        assert_eq!(table_count(&db.pool, "messages").await, 2);

        let sent: i64 = sqlx::query_scalar("SELECT sent FROM usage_counters WHERE tenant_id = 't1'")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(sent, 1);
    }
}
