//! Shared state for API handlers.

use crate::answers::{AnswerService, OpenAiCompletion};
use crate::config::Config;
use crate::conversation::ConversationStore;
use crate::escalation::EscalationResolver;
use crate::outbox::DeliveryService;
use crate::rules::RuleStore;
use crate::usage::UsageGate;
use crate::webhooks::WebhookNotifier;

use sqlx::SqlitePool;

pub struct ApiState {
    pub config: Config,
    pub pool: SqlitePool,
    pub conversations: ConversationStore,
    pub answers: AnswerService<OpenAiCompletion>,
    pub resolver: EscalationResolver,
    pub delivery: DeliveryService,
    pub usage: UsageGate,
    pub webhooks: WebhookNotifier,
}

impl ApiState {
    pub fn new(config: Config, pool: SqlitePool) -> Self {
        let completion = OpenAiCompletion::from_config(&config.model);
        Self {
            conversations: ConversationStore::new(pool.clone()),
            answers: AnswerService::new(pool.clone(), completion),
            resolver: EscalationResolver::new(RuleStore::new(pool.clone())),
            delivery: DeliveryService::new(pool.clone()),
            usage: UsageGate::new(pool.clone()),
            webhooks: WebhookNotifier::new(pool.clone()),
            config,
            pool,
        }
    }
}
