// Relay commands module. Each admin surface gets its own command file.
// The shared Data struct lives here - it is the composition root's bundle
// of services, injected into every command and event handler.

pub mod access;
pub mod moderation;
pub mod status;

use crate::core::assistant::AssistantService;
use crate::core::gate::MessageGate;
use crate::core::moderation::ModerationEngine;
use crate::core::policy::PolicyConfig;
use crate::core::ratelimit::RateLimiter;
use crate::core::registry::{StateSnapshot, UserRegistry};
use crate::core::spam::SpamScorer;
use crate::core::trust::AccountTrust;
use crate::infra::assistant::HttpCompletionClient;
use crate::infra::state::{JsonSnapshotStore, StoreError};
use chrono::Utc;
use std::sync::Arc;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Services shared across all commands and the event handler.
pub struct Data {
    pub config: Arc<PolicyConfig>,
    pub registry: Arc<UserRegistry>,
    pub trust: Arc<AccountTrust>,
    pub limiter: Arc<RateLimiter>,
    pub scorer: Arc<SpamScorer>,
    pub moderation: Arc<ModerationEngine>,
    pub gate: Arc<MessageGate>,
    pub assistant: Arc<AssistantService<HttpCompletionClient>>,
    pub store: Arc<JsonSnapshotStore>,
}

impl Data {
    pub fn capture_snapshot(&self, kind: &str) -> StateSnapshot {
        self.registry
            .capture_snapshot(self.trust.suspicious_ids(), kind, Utc::now())
    }

    /// Persist the current state to the main snapshot file.
    pub fn checkpoint(&self, kind: &str) -> Result<(), StoreError> {
        let snapshot = self.capture_snapshot(kind);
        self.store.save(&snapshot)
    }
}

/// Admin commands are operator-only; there is no role hierarchy beyond that.
pub(crate) fn is_operator(ctx: &Context<'_>) -> bool {
    ctx.author().id.get() as i64 == ctx.data().config.owner_id
}

pub(crate) async fn require_operator(ctx: &Context<'_>) -> Result<bool, Error> {
    if is_operator(ctx) {
        return Ok(true);
    }
    ctx.say("Only the operator can use this command.").await?;
    Ok(false)
}
