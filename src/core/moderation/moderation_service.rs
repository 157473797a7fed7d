// Enforcement state machine. Per (chat, user): clean -> warned(n) ->
// muted(until) -> banned, returning to clean only via explicit admin reset;
// mutes also return to clean on expiry, via the periodic sweep or lazily on
// query. The engine only ever produces decisions - the transport adapter
// performs the actual calls after the lock is released.

use super::moderation_models::{ChatUserKey, ModAction, ModerationDecision, ModerationStats};
use crate::core::policy::PolicyConfig;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

const WARNINGS_BEFORE_MUTE: u32 = 3;
const SPAM_MUTE_MINUTES: i64 = 30;
const ESCALATION_MUTE_MINUTES: i64 = 60;

pub struct ModerationEngine {
    spam_threshold: i32,
    auto_ban_score: i32,
    warnings: DashMap<ChatUserKey, u32>,
    mutes: DashMap<ChatUserKey, DateTime<Utc>>,
}

impl ModerationEngine {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            spam_threshold: config.spam_score_threshold,
            auto_ban_score: config.auto_ban_spam_score,
            warnings: DashMap::new(),
            mutes: DashMap::new(),
        }
    }

    /// Map a spam score onto an enforcement action and record the resulting
    /// state. Returns `None` below the spam threshold - callers gate on the
    /// scorer's verdict, so that path is not normally reached.
    ///
    /// The ban threshold takes precedence: a score satisfying both ban and
    /// mute yields a ban only, and no mute record is created for it.
    pub fn evaluate(
        &self,
        key: ChatUserKey,
        score: i32,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Option<ModerationDecision> {
        let action = if score >= self.auto_ban_score {
            tracing::warn!(
                chat_id = key.chat_id,
                user_id = key.user_id,
                score,
                "score at ban threshold, requesting ban"
            );
            ModAction::Ban
        } else if score >= self.spam_threshold + 2 {
            self.record_mute(key, SPAM_MUTE_MINUTES, now)
        } else if score >= self.spam_threshold {
            let count = {
                let mut entry = self.warnings.entry(key).or_insert(0);
                *entry += 1;
                *entry
            };

            if count >= WARNINGS_BEFORE_MUTE {
                // Escalate; the warning counter is deliberately left in
                // place - only an explicit admin reset clears it.
                tracing::info!(
                    chat_id = key.chat_id,
                    user_id = key.user_id,
                    warnings = count,
                    "warning escalation, muting"
                );
                self.record_mute(key, ESCALATION_MUTE_MINUTES, now)
            } else {
                ModAction::Warn { count }
            }
        } else {
            return None;
        };

        Some(ModerationDecision {
            action,
            delete_message: true,
            reason: reason.to_string(),
        })
    }

    fn record_mute(&self, key: ChatUserKey, minutes: i64, now: DateTime<Utc>) -> ModAction {
        let until = now + Duration::minutes(minutes);
        self.mutes.insert(key, until);
        ModAction::Mute { until, minutes }
    }

    /// Admin mute with an explicit duration.
    pub fn impose_mute(&self, key: ChatUserKey, minutes: i64, now: DateTime<Utc>) -> DateTime<Utc> {
        let until = now + Duration::minutes(minutes);
        self.mutes.insert(key, until);
        tracing::info!(
            chat_id = key.chat_id,
            user_id = key.user_id,
            minutes,
            "mute imposed"
        );
        until
    }

    /// Admin unmute. Returns whether a mute record existed.
    pub fn lift_mute(&self, key: ChatUserKey) -> bool {
        let existed = self.mutes.remove(&key).is_some();
        if existed {
            tracing::info!(chat_id = key.chat_id, user_id = key.user_id, "mute lifted");
        }
        existed
    }

    /// Lazy expiry: an expired entry is evicted on query.
    pub fn is_muted(&self, key: ChatUserKey, now: DateTime<Utc>) -> bool {
        match self.mutes.get(&key).map(|until| *until) {
            Some(until) if until > now => true,
            Some(_) => {
                self.mutes.remove(&key);
                false
            }
            None => false,
        }
    }

    pub fn mute_remaining(&self, key: ChatUserKey, now: DateTime<Utc>) -> Option<u64> {
        let until = self.mutes.get(&key).map(|until| *until)?;
        if until <= now {
            return None;
        }
        Some((until - now).num_seconds().max(0) as u64)
    }

    /// Sweep path: snapshot expired entries, evict them and hand the keys to
    /// the caller so it can restore permissions at the transport. This is
    /// the only automatic state-eviction path for mutes.
    pub fn take_expired_mutes(&self, now: DateTime<Utc>) -> Vec<ChatUserKey> {
        let expired: Vec<ChatUserKey> = self
            .mutes
            .iter()
            .filter(|entry| *entry.value() <= now)
            .map(|entry| *entry.key())
            .collect();

        for key in &expired {
            self.mutes.remove(key);
        }
        expired
    }

    pub fn warning_count(&self, key: ChatUserKey) -> u32 {
        self.warnings.get(&key).map(|count| *count).unwrap_or(0)
    }

    /// Admin reset: the self-loop back to clean.
    pub fn clear_warnings(&self, key: ChatUserKey) {
        self.warnings.remove(&key);
        tracing::info!(
            chat_id = key.chat_id,
            user_id = key.user_id,
            "warnings cleared"
        );
    }

    pub fn stats(&self, chat_id: i64) -> ModerationStats {
        ModerationStats {
            users_warned: self
                .warnings
                .iter()
                .filter(|entry| entry.key().chat_id == chat_id)
                .count(),
            active_mutes: self
                .mutes
                .iter()
                .filter(|entry| entry.key().chat_id == chat_id)
                .count(),
        }
    }
}
