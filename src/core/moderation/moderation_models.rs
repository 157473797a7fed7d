// Moderation domain types. The transport adapter translates these into
// platform calls; nothing here knows about the platform.

use chrono::{DateTime, Utc};

/// Chat-scoped per-user moderation state key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChatUserKey {
    pub chat_id: i64,
    pub user_id: i64,
}

impl ChatUserKey {
    pub fn new(chat_id: i64, user_id: i64) -> Self {
        Self { chat_id, user_id }
    }
}

/// Enforcement action selected for one spam verdict.
#[derive(Debug, Clone, PartialEq)]
pub enum ModAction {
    /// Warn in-channel; carries the cumulative warning number.
    Warn { count: u32 },
    /// Chat-scoped mute until the given time.
    Mute { until: DateTime<Utc>, minutes: i64 },
    /// Global ban request; no chat-scoped state is kept for it.
    Ban,
}

/// One decision, copied out of the engine before any I/O happens.
///
/// Deletion of the triggering message and the action itself are independent
/// best-effort side effects: a failed transport call never unwinds state
/// already recorded here.
#[derive(Debug, Clone)]
pub struct ModerationDecision {
    pub action: ModAction,
    pub delete_message: bool,
    pub reason: String,
}

/// Chat-level counters for the admin status report.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModerationStats {
    pub users_warned: usize,
    pub active_mutes: usize,
}
