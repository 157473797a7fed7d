// The message pipeline: registry (ban) -> rate limiter -> account trust ->
// spam scorer -> moderation engine, in that order. Everything here is a
// bounded, synchronous, in-memory computation; the caller copies the outcome
// out and performs transport I/O afterwards, never under a component lock.
//
// Per-user FIFO arrival order is the caller's obligation - window and
// duplicate bookkeeping relies on monotonic timestamp insertion.

use crate::core::moderation::{ChatUserKey, ModAction, ModerationDecision, ModerationEngine};
use crate::core::policy::PolicyConfig;
use crate::core::ratelimit::{RateLimiter, RequestClass};
use crate::core::registry::{BanStatus, ChatLogEntry, UserRegistry};
use crate::core::spam::SpamScorer;
use crate::core::trust::{AccountTrust, Identity, TrustState};
use chrono::{DateTime, Utc};
use std::sync::Arc;

const HISTORY_MESSAGE_BOUND: usize = 100;

/// Tokens that mark obviously hostile payloads. Checked case-insensitively.
const DANGEROUS_TOKENS: &[&str] = &[
    "<script",
    "<?php",
    "javascript:",
    "eval(",
    "system(",
    "exec(",
    "shell_exec(",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
        }
    }
}

/// Transport-shape inbound event; the adapter builds one of these and the
/// core never sees anything more platform-specific.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub sender: Identity,
    pub chat_id: i64,
    pub chat_kind: ChatKind,
    pub chat_title: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub enum DenyReason {
    /// Sender is banned; `until` is absent for permanent bans.
    Banned { until: Option<DateTime<Utc>> },
    /// Throttled; the cooldown remainder is included when one is active.
    RateLimited { cooldown_secs: Option<u64> },
    /// Flagged suspicious; only an admin can clear the flag.
    Suspicious,
    /// Identity verification failed for a private chat.
    VerificationFailed { reasons: String },
    /// Verification is disabled and the sender is not approved.
    NotApproved,
}

/// Structured invalid-input result. Never an error - malformed input is an
/// expected condition with a user-facing tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFault {
    Empty,
    TooLong,
    Malicious,
}

impl InputFault {
    pub fn tag(&self) -> &'static str {
        match self {
            InputFault::Empty => "empty_input",
            InputFault::TooLong => "input_too_long",
            InputFault::Malicious => "potentially_malicious_input",
        }
    }
}

#[derive(Debug, Clone)]
pub enum GateOutcome {
    /// Clean message: proceed to the completion boundary.
    Accepted {
        score: i32,
        /// Set when this message triggered a successful first-contact
        /// verification and the sender was auto-approved.
        auto_approved: bool,
    },
    /// Spam in a group chat: apply the moderation decision.
    Moderate {
        decision: ModerationDecision,
        score: i32,
    },
    /// Spam in a private chat: drop silently, no moderation action.
    SpamDropped { score: i32, reasons: String },
    Denied(DenyReason),
    Invalid(InputFault),
}

pub struct MessageGate {
    config: Arc<PolicyConfig>,
    registry: Arc<UserRegistry>,
    trust: Arc<AccountTrust>,
    limiter: Arc<RateLimiter>,
    scorer: Arc<SpamScorer>,
    moderation: Arc<ModerationEngine>,
}

impl MessageGate {
    pub fn new(
        config: Arc<PolicyConfig>,
        registry: Arc<UserRegistry>,
        trust: Arc<AccountTrust>,
        limiter: Arc<RateLimiter>,
        scorer: Arc<SpamScorer>,
        moderation: Arc<ModerationEngine>,
    ) -> Self {
        Self {
            config,
            registry,
            trust,
            limiter,
            scorer,
            moderation,
        }
    }

    /// Run one inbound message through the full pipeline.
    pub fn process(&self, msg: &InboundMessage, now: DateTime<Utc>) -> GateOutcome {
        if let Some(fault) = self.validate_input(&msg.text) {
            return GateOutcome::Invalid(fault);
        }

        let user_id = msg.sender.id;
        let is_owner = user_id == self.config.owner_id;
        let mut auto_approved = false;

        if !is_owner {
            match self.check_access(msg, now) {
                AccessCheck::Denied(reason) => return GateOutcome::Denied(reason),
                AccessCheck::Allowed { newly_approved } => auto_approved = newly_approved,
            }
        }

        // Scoring always runs - the duplicate and cadence indexes are
        // sensors and must observe every message.
        self.registry.touch_spam_check(user_id, now);
        let verdict = self.scorer.score(user_id, &msg.text, now);

        if verdict.is_spam {
            let reasons = verdict.reason_string();
            let cumulative = self.registry.add_violation(user_id, &reasons, now);

            if msg.chat_kind == ChatKind::Private {
                return GateOutcome::SpamDropped {
                    score: verdict.score,
                    reasons,
                };
            }

            let key = ChatUserKey::new(msg.chat_id, user_id);
            let mut decision = match self.moderation.evaluate(key, verdict.score, &reasons, now) {
                Some(decision) => decision,
                // Unreachable by construction (is_spam implies score >=
                // threshold), but degrade to a plain drop rather than panic.
                None => {
                    return GateOutcome::SpamDropped {
                        score: verdict.score,
                        reasons,
                    }
                }
            };

            // A user whose cumulative violation count reached the auto-ban
            // bar is banned outright, whatever the per-message action was.
            if cumulative >= self.config.auto_ban_spam_score as u32 {
                decision.action = ModAction::Ban;
            }

            match decision.action {
                ModAction::Warn { .. } => self.registry.bump_warnings(user_id, now),
                ModAction::Ban => self.registry.ban(user_id, None),
                ModAction::Mute { .. } => {}
            }

            return GateOutcome::Moderate {
                decision,
                score: verdict.score,
            };
        }

        // Clean path: record traffic and stats, keep an audit trail entry.
        self.limiter.record(user_id, RequestClass::Message, now);
        self.registry
            .record_message(user_id, &msg.sender.handle(), now);
        self.registry.push_history(ChatLogEntry {
            user_id,
            username: msg.sender.handle(),
            chat_kind: msg.chat_kind.as_str().to_string(),
            chat_title: msg.chat_title.clone(),
            timestamp: now,
            message: truncate(&msg.text, HISTORY_MESSAGE_BOUND),
            spam_score: verdict.score,
        });

        GateOutcome::Accepted {
            score: verdict.score,
            auto_approved,
        }
    }

    fn validate_input(&self, text: &str) -> Option<InputFault> {
        if text.trim().is_empty() {
            return Some(InputFault::Empty);
        }
        // The hard cap sits well above the spam length limit so oversized
        // messages still reach the scorer, where length is a signal.
        if text.chars().count() > self.config.max_message_length * 4 {
            return Some(InputFault::TooLong);
        }
        let lowered = text.to_lowercase();
        if DANGEROUS_TOKENS.iter().any(|t| lowered.contains(t)) {
            return Some(InputFault::Malicious);
        }
        None
    }

    fn check_access(&self, msg: &InboundMessage, now: DateTime<Utc>) -> AccessCheck {
        let user_id = msg.sender.id;

        // Ban takes precedence over everything, approval included.
        if let BanStatus::Active { until, permanent } = self.registry.ban_status(user_id, now) {
            return AccessCheck::Denied(DenyReason::Banned {
                until: (!permanent).then_some(until),
            });
        }

        if self
            .limiter
            .is_limited(user_id, RequestClass::Message, now)
        {
            return AccessCheck::Denied(DenyReason::RateLimited {
                cooldown_secs: self.limiter.cooldown_remaining(user_id, now),
            });
        }

        if self.trust.is_suspicious(user_id) {
            return AccessCheck::Denied(DenyReason::Suspicious);
        }

        // Private chats are gated on explicit approval; first contact runs
        // the trust heuristics and auto-approves on success.
        if msg.chat_kind == ChatKind::Private && !self.registry.is_approved(user_id) {
            let outcome = self.trust.verify(&msg.sender);
            if !outcome.verified {
                self.trust.record_failed_verification(user_id);
                self.registry
                    .set_trust_state(user_id, TrustState::Pending, now);
                return AccessCheck::Denied(DenyReason::VerificationFailed {
                    reasons: outcome.reason_string(),
                });
            }

            if !self.config.verification_enabled {
                return AccessCheck::Denied(DenyReason::NotApproved);
            }

            self.registry.approve(user_id);
            self.registry
                .set_trust_state(user_id, TrustState::Verified, now);
            tracing::info!(user_id, "first contact verified, auto-approved");
            return AccessCheck::Allowed {
                newly_approved: true,
            };
        }

        AccessCheck::Allowed {
            newly_approved: false,
        }
    }

    /// Api-class throttle check used by the boundary before a completion
    /// call; `record_api` is its companion on the success path.
    pub fn api_limited(&self, user_id: i64, now: DateTime<Utc>) -> bool {
        if user_id == self.config.owner_id {
            return false;
        }
        self.limiter.is_limited(user_id, RequestClass::Api, now)
    }

    pub fn record_api(&self, user_id: i64, now: DateTime<Utc>) {
        self.limiter.record(user_id, RequestClass::Api, now);
    }
}

enum AccessCheck {
    Allowed { newly_approved: bool },
    Denied(DenyReason),
}

fn truncate(text: &str, bound: usize) -> String {
    if text.chars().count() <= bound {
        text.to_string()
    } else {
        let kept: String = text.chars().take(bound).collect();
        format!("{kept}...")
    }
}
