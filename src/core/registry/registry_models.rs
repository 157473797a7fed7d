// Registry domain types and the snapshot wire format.
//
// The snapshot is plain serde structs with explicit field-by-field mapping;
// every field defaults so an older or partial file still loads.

use crate::core::trust::TrustState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Display-name value meaning "nothing better known".
pub const PLACEHOLDER_NAME: &str = "unknown";

/// Serialized ban end-time meaning a permanent ban.
pub const PERMANENT_BAN_SENTINEL: &str = "max";

/// Canonical per-user record, created lazily on first observation.
///
/// `spam_score` is the cumulative violation count - monotonically
/// non-decreasing except through an explicit admin reset - and is distinct
/// from any per-message score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: i64,
    pub username: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub spam_score: u32,
    #[serde(default)]
    pub warnings: u32,
    #[serde(default)]
    pub verification_status: TrustState,
    #[serde(default)]
    pub last_spam_check: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn new(user_id: i64, username: String, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            username,
            first_seen: now,
            last_seen: now,
            message_count: 0,
            spam_score: 0,
            warnings: 0,
            verification_status: TrustState::Unverified,
            last_spam_check: None,
        }
    }
}

/// Ban state as seen by the access gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanStatus {
    NotBanned,
    Active {
        until: DateTime<Utc>,
        permanent: bool,
    },
}

/// One processed interaction, kept in a bounded history for auditing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatLogEntry {
    pub user_id: i64,
    pub username: String,
    pub chat_kind: String,
    #[serde(default)]
    pub chat_title: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default)]
    pub spam_score: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupInfo {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
}

/// Everything that survives a restart. Ban end-times are RFC 3339 strings
/// with a `"max"` sentinel for permanent bans.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub approved_users: Vec<i64>,
    #[serde(default)]
    pub banned_users: HashMap<i64, String>,
    #[serde(default)]
    pub group_states: HashMap<i64, bool>,
    #[serde(default)]
    pub chat_history: Vec<ChatLogEntry>,
    #[serde(default)]
    pub user_stats: HashMap<i64, UserRecord>,
    #[serde(default)]
    pub spam_violations: HashMap<i64, Vec<DateTime<Utc>>>,
    #[serde(default)]
    pub suspicious_users: Vec<i64>,
    #[serde(default)]
    pub session_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_backup_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub backup_info: BackupInfo,
    pub state: PersistedState,
}

/// Registry counters surfaced by the admin status report.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryStats {
    pub approved_users: usize,
    pub banned_users: usize,
    pub known_users: usize,
    pub total_groups: usize,
    pub active_groups: usize,
    pub history_entries: usize,
    pub violation_entries: usize,
}
