// The canonical per-user store: approvals, bans, stats, the 24-hour
// violation log, per-group enable state and the bounded interaction history.
// One coarse lock guards the whole record set so snapshot capture always
// sees a consistent view; no I/O ever happens under it.

use super::registry_models::{
    BackupInfo, BanStatus, ChatLogEntry, PersistedState, RegistryStats, StateSnapshot, UserRecord,
    PERMANENT_BAN_SENTINEL, PLACEHOLDER_NAME,
};
use crate::core::trust::TrustState;
use crate::core::window::SlidingWindow;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

const VIOLATION_HORIZON_HOURS: i64 = 24;
const HISTORY_LIVE_BOUND: usize = 1000;
const HISTORY_SNAPSHOT_BOUND: usize = 100;
const SNAPSHOT_VERSION: &str = "2.0";

struct RegistryInner {
    session_id: String,
    approved: HashSet<i64>,
    banned: HashMap<i64, DateTime<Utc>>,
    group_states: HashMap<i64, bool>,
    chat_history: Vec<ChatLogEntry>,
    users: HashMap<i64, UserRecord>,
    spam_violations: HashMap<i64, SlidingWindow<()>>,
    session_start: DateTime<Utc>,
    last_backup: Option<DateTime<Utc>>,
}

pub struct UserRegistry {
    inner: Mutex<RegistryInner>,
}

impl UserRegistry {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                session_id: random_session_id(),
                approved: HashSet::new(),
                banned: HashMap::new(),
                group_states: HashMap::new(),
                chat_history: Vec::new(),
                users: HashMap::new(),
                spam_violations: HashMap::new(),
                session_start: now,
                last_backup: None,
            }),
        }
    }

    /// Fetch-or-create, updating `last_seen` and, when the supplied name is
    /// not the placeholder, the last-known display name.
    pub fn get_or_create(&self, user_id: i64, name: &str, now: DateTime<Utc>) -> UserRecord {
        let mut inner = self.inner.lock().expect("registry lock");
        upsert_user(&mut inner.users, user_id, name, now).clone()
    }

    pub fn record_message(&self, user_id: i64, name: &str, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("registry lock");
        let record = upsert_user(&mut inner.users, user_id, name, now);
        record.message_count += 1;
    }

    pub fn touch_spam_check(&self, user_id: i64, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("registry lock");
        let record = upsert_user(&mut inner.users, user_id, PLACEHOLDER_NAME, now);
        record.last_spam_check = Some(now);
    }

    /// Record a spam violation: appends to the pruned 24-hour log and bumps
    /// the cumulative counter. Returns the new cumulative count so callers
    /// can apply the auto-ban rule.
    pub fn add_violation(&self, user_id: i64, tag: &str, now: DateTime<Utc>) -> u32 {
        let mut inner = self.inner.lock().expect("registry lock");

        let log = inner.spam_violations.entry(user_id).or_default();
        log.push(now, ());
        log.prune(Duration::hours(VIOLATION_HORIZON_HOURS), now);

        let record = upsert_user(&mut inner.users, user_id, PLACEHOLDER_NAME, now);
        record.spam_score += 1;
        let cumulative = record.spam_score;

        tracing::warn!(user_id, tag, cumulative, "spam violation recorded");
        cumulative
    }

    pub fn cumulative_spam_score(&self, user_id: i64) -> u32 {
        let inner = self.inner.lock().expect("registry lock");
        inner.users.get(&user_id).map(|u| u.spam_score).unwrap_or(0)
    }

    pub fn bump_warnings(&self, user_id: i64, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("registry lock");
        let record = upsert_user(&mut inner.users, user_id, PLACEHOLDER_NAME, now);
        record.warnings += 1;
    }

    pub fn set_trust_state(&self, user_id: i64, state: TrustState, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("registry lock");
        let record = upsert_user(&mut inner.users, user_id, PLACEHOLDER_NAME, now);
        record.verification_status = state;
    }

    // ---- approvals -------------------------------------------------------

    pub fn approve(&self, user_id: i64) {
        let mut inner = self.inner.lock().expect("registry lock");
        inner.approved.insert(user_id);
        // Granting access also lifts an existing ban, as one admin gesture.
        inner.banned.remove(&user_id);
        tracing::info!(user_id, "access granted");
    }

    pub fn revoke(&self, user_id: i64) {
        let mut inner = self.inner.lock().expect("registry lock");
        inner.approved.remove(&user_id);
        tracing::info!(user_id, "access revoked");
    }

    pub fn is_approved(&self, user_id: i64) -> bool {
        let inner = self.inner.lock().expect("registry lock");
        inner.approved.contains(&user_id)
    }

    // ---- bans ------------------------------------------------------------

    /// Ban a user. `until = None` means permanent (sentinel end-time).
    pub fn ban(&self, user_id: i64, until: Option<DateTime<Utc>>) {
        let mut inner = self.inner.lock().expect("registry lock");
        let end = until.unwrap_or(DateTime::<Utc>::MAX_UTC);
        inner.banned.insert(user_id, end);
        tracing::warn!(user_id, permanent = until.is_none(), "user banned");
    }

    /// Returns whether a ban record existed.
    pub fn unban(&self, user_id: i64) -> bool {
        let mut inner = self.inner.lock().expect("registry lock");
        let existed = inner.banned.remove(&user_id).is_some();
        if existed {
            tracing::info!(user_id, "user unbanned");
        }
        existed
    }

    /// Ban check with lazy expiry: an elapsed ban is removed on access.
    pub fn ban_status(&self, user_id: i64, now: DateTime<Utc>) -> BanStatus {
        let mut inner = self.inner.lock().expect("registry lock");
        match inner.banned.get(&user_id).copied() {
            Some(until) if until > now => BanStatus::Active {
                until,
                permanent: until == DateTime::<Utc>::MAX_UTC,
            },
            Some(_) => {
                inner.banned.remove(&user_id);
                BanStatus::NotBanned
            }
            None => BanStatus::NotBanned,
        }
    }

    // ---- groups ----------------------------------------------------------

    pub fn set_group_enabled(&self, chat_id: i64, enabled: bool) {
        let mut inner = self.inner.lock().expect("registry lock");
        inner.group_states.insert(chat_id, enabled);
        tracing::info!(chat_id, enabled, "group state changed");
    }

    pub fn group_enabled(&self, chat_id: i64) -> bool {
        let inner = self.inner.lock().expect("registry lock");
        inner.group_states.get(&chat_id).copied().unwrap_or(false)
    }

    // ---- history ---------------------------------------------------------

    pub fn push_history(&self, entry: ChatLogEntry) {
        let mut inner = self.inner.lock().expect("registry lock");
        inner.chat_history.push(entry);
        let len = inner.chat_history.len();
        if len > HISTORY_LIVE_BOUND {
            inner.chat_history.drain(..len - HISTORY_LIVE_BOUND);
        }
    }

    // ---- admin resets ----------------------------------------------------

    /// Zero the cumulative counters and mark the account verified.
    pub fn mark_safe(&self, user_id: i64, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("registry lock");
        let record = upsert_user(&mut inner.users, user_id, PLACEHOLDER_NAME, now);
        record.spam_score = 0;
        record.warnings = 0;
        record.verification_status = TrustState::Verified;
        tracing::info!(user_id, "user counters reset, marked verified");
    }

    pub fn rotate_session(&self) -> (String, String) {
        let mut inner = self.inner.lock().expect("registry lock");
        let old = std::mem::replace(&mut inner.session_id, random_session_id());
        let new = inner.session_id.clone();
        tracing::info!(%new, "session id rotated");
        (old, new)
    }

    pub fn session_id(&self) -> String {
        self.inner.lock().expect("registry lock").session_id.clone()
    }

    pub fn session_start(&self) -> DateTime<Utc> {
        self.inner.lock().expect("registry lock").session_start
    }

    pub fn last_backup(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().expect("registry lock").last_backup
    }

    pub fn set_last_backup(&self, at: DateTime<Utc>) {
        self.inner.lock().expect("registry lock").last_backup = Some(at);
    }

    pub fn user(&self, user_id: i64) -> Option<UserRecord> {
        let inner = self.inner.lock().expect("registry lock");
        inner.users.get(&user_id).cloned()
    }

    // ---- maintenance -----------------------------------------------------

    /// Time-window eviction: expired bans, stale violations, history bound.
    /// Running it twice with no new events changes nothing.
    pub fn prune(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("registry lock");

        inner.banned.retain(|_, until| *until > now);

        let horizon = Duration::hours(VIOLATION_HORIZON_HOURS);
        for log in inner.spam_violations.values_mut() {
            log.prune(horizon, now);
        }
        inner.spam_violations.retain(|_, log| !log.is_empty());

        let len = inner.chat_history.len();
        if len > HISTORY_LIVE_BOUND {
            inner.chat_history.drain(..len - HISTORY_LIVE_BOUND);
        }
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock().expect("registry lock");
        RegistryStats {
            approved_users: inner.approved.len(),
            banned_users: inner.banned.len(),
            known_users: inner.users.len(),
            total_groups: inner.group_states.len(),
            active_groups: inner.group_states.values().filter(|v| **v).count(),
            history_entries: inner.chat_history.len(),
            violation_entries: inner.spam_violations.values().map(|log| log.len()).sum(),
        }
    }

    // ---- snapshot --------------------------------------------------------

    /// Capture the persisted state. `suspicious` comes from the trust
    /// component, which owns that set at runtime.
    pub fn capture_snapshot(
        &self,
        suspicious: Vec<i64>,
        kind: &str,
        now: DateTime<Utc>,
    ) -> StateSnapshot {
        let inner = self.inner.lock().expect("registry lock");

        let banned_users = inner
            .banned
            .iter()
            .map(|(id, until)| {
                let value = if *until == DateTime::<Utc>::MAX_UTC {
                    PERMANENT_BAN_SENTINEL.to_string()
                } else {
                    until.to_rfc3339()
                };
                (*id, value)
            })
            .collect();

        let history_start = inner
            .chat_history
            .len()
            .saturating_sub(HISTORY_SNAPSHOT_BOUND);

        StateSnapshot {
            backup_info: BackupInfo {
                timestamp: now,
                kind: kind.to_string(),
                version: SNAPSHOT_VERSION.to_string(),
            },
            state: PersistedState {
                session_id: inner.session_id.clone(),
                approved_users: inner.approved.iter().copied().collect(),
                banned_users,
                group_states: inner.group_states.clone(),
                chat_history: inner.chat_history[history_start..].to_vec(),
                user_stats: inner.users.clone(),
                spam_violations: inner
                    .spam_violations
                    .iter()
                    .map(|(id, log)| (*id, log.iter().map(|(at, _)| *at).collect()))
                    .collect(),
                suspicious_users: suspicious,
                session_start_time: Some(inner.session_start),
                last_backup_time: inner.last_backup,
            },
        }
    }

    /// Rebuild from a snapshot. Returns the suspicious ids so the caller can
    /// seed the trust component. Unparseable ban entries are skipped with a
    /// log line rather than failing the whole load.
    pub fn apply_snapshot(&self, snapshot: &StateSnapshot) -> Vec<i64> {
        let mut inner = self.inner.lock().expect("registry lock");
        let state = &snapshot.state;

        if !state.session_id.is_empty() {
            inner.session_id = state.session_id.clone();
        }
        inner.approved = state.approved_users.iter().copied().collect();

        inner.banned.clear();
        for (id, raw) in &state.banned_users {
            if raw == PERMANENT_BAN_SENTINEL {
                inner.banned.insert(*id, DateTime::<Utc>::MAX_UTC);
            } else {
                match DateTime::parse_from_rfc3339(raw) {
                    Ok(until) => {
                        inner.banned.insert(*id, until.with_timezone(&Utc));
                    }
                    Err(err) => {
                        tracing::warn!(user_id = id, %raw, %err, "skipping unparseable ban entry");
                    }
                }
            }
        }

        inner.group_states = state.group_states.clone();
        inner.chat_history = state.chat_history.clone();
        inner.users = state.user_stats.clone();

        inner.spam_violations = state
            .spam_violations
            .iter()
            .map(|(id, times)| {
                let mut log = SlidingWindow::new();
                for at in times {
                    log.push(*at, ());
                }
                (*id, log)
            })
            .collect();

        if let Some(start) = state.session_start_time {
            inner.session_start = start;
        }
        inner.last_backup = state.last_backup_time;

        state.suspicious_users.clone()
    }
}

fn upsert_user<'a>(
    users: &'a mut HashMap<i64, UserRecord>,
    user_id: i64,
    name: &str,
    now: DateTime<Utc>,
) -> &'a mut UserRecord {
    let record = users
        .entry(user_id)
        .or_insert_with(|| UserRecord::new(user_id, name.to_string(), now));
    record.last_seen = now;
    if name != PLACEHOLDER_NAME && record.username != name {
        record.username = name.to_string();
    }
    record
}

fn random_session_id() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn registry() -> UserRegistry {
        UserRegistry::new(at(0))
    }

    #[test]
    fn get_or_create_tracks_last_seen_and_name() {
        let registry = registry();
        let first = registry.get_or_create(42, "alice", at(0));
        assert_eq!(first.first_seen, at(0));

        // Placeholder never overwrites a real name.
        let second = registry.get_or_create(42, PLACEHOLDER_NAME, at(10));
        assert_eq!(second.username, "alice");
        assert_eq!(second.last_seen, at(10));
        assert_eq!(second.first_seen, at(0));

        let third = registry.get_or_create(42, "alice_wong", at(20));
        assert_eq!(third.username, "alice_wong");
    }

    #[test]
    fn violations_prune_to_a_day_but_the_counter_is_cumulative() {
        let registry = registry();
        registry.add_violation(42, "spam", at(0));
        registry.add_violation(42, "spam", at(10));
        let third = registry.add_violation(42, "spam", at(90_000));

        assert_eq!(third, 3);
        // Only the last entry is inside the 24h window.
        assert_eq!(registry.stats().violation_entries, 1);
        assert_eq!(registry.cumulative_spam_score(42), 3);
    }

    #[test]
    fn expired_ban_clears_lazily() {
        let registry = registry();
        registry.ban(42, Some(at(100)));
        assert!(matches!(
            registry.ban_status(42, at(50)),
            BanStatus::Active {
                permanent: false,
                ..
            }
        ));
        assert_eq!(registry.ban_status(42, at(101)), BanStatus::NotBanned);
        // The record is gone, not merely ignored.
        assert_eq!(registry.stats().banned_users, 0);
    }

    #[test]
    fn permanent_ban_round_trips_through_the_sentinel() {
        let registry = registry();
        registry.ban(42, None);
        let snapshot = registry.capture_snapshot(Vec::new(), "manual", at(10));
        assert_eq!(
            snapshot.state.banned_users.get(&42).map(String::as_str),
            Some(PERMANENT_BAN_SENTINEL)
        );

        let restored = UserRegistry::new(at(20));
        restored.apply_snapshot(&snapshot);
        assert!(matches!(
            restored.ban_status(42, at(20)),
            BanStatus::Active {
                permanent: true,
                ..
            }
        ));
    }

    #[test]
    fn approval_lifts_an_existing_ban() {
        let registry = registry();
        registry.ban(42, None);
        registry.approve(42);
        assert_eq!(registry.ban_status(42, at(1)), BanStatus::NotBanned);
        assert!(registry.is_approved(42));
    }

    #[test]
    fn snapshot_round_trip_preserves_fields() {
        let registry = registry();
        registry.approve(1);
        registry.ban(2, Some(at(5000)));
        registry.set_group_enabled(-100, true);
        registry.record_message(3, "carol", at(10));
        registry.add_violation(3, "spam_pattern_0", at(20));
        registry.push_history(ChatLogEntry {
            user_id: 3,
            username: "carol".to_string(),
            chat_kind: "group".to_string(),
            chat_title: Some("test".to_string()),
            timestamp: at(10),
            message: "hello".to_string(),
            spam_score: 0,
        });
        registry.set_last_backup(at(30));

        let snapshot = registry.capture_snapshot(vec![9], "manual", at(40));
        let json = serde_json::to_string_pretty(&snapshot).unwrap();
        let parsed: StateSnapshot = serde_json::from_str(&json).unwrap();

        let restored = UserRegistry::new(at(50));
        let suspicious = restored.apply_snapshot(&parsed);

        assert_eq!(suspicious, vec![9]);
        assert!(restored.is_approved(1));
        assert!(matches!(
            restored.ban_status(2, at(50)),
            BanStatus::Active { .. }
        ));
        assert!(restored.group_enabled(-100));
        assert_eq!(restored.session_id(), registry.session_id());
        assert_eq!(restored.session_start(), registry.session_start());
        assert_eq!(restored.last_backup(), Some(at(30)));

        let original_user = registry.user(3).unwrap();
        let restored_user = restored.user(3).unwrap();
        assert_eq!(original_user, restored_user);
        assert_eq!(restored.stats().violation_entries, 1);
        assert_eq!(restored.stats().history_entries, 1);
    }

    #[test]
    fn missing_snapshot_fields_default() {
        let minimal = r#"{
            "backup_info": {"timestamp": "2026-01-01T00:00:00Z", "type": "manual", "version": "2.0"},
            "state": {"approved_users": [7]}
        }"#;
        let snapshot: StateSnapshot = serde_json::from_str(minimal).unwrap();

        let registry = registry();
        let suspicious = registry.apply_snapshot(&snapshot);
        assert!(suspicious.is_empty());
        assert!(registry.is_approved(7));
        assert_eq!(registry.stats().known_users, 0);
    }

    #[test]
    fn prune_is_idempotent() {
        let registry = registry();
        registry.ban(1, Some(at(10)));
        registry.add_violation(2, "spam", at(0));

        registry.prune(at(100));
        let first = registry.stats();
        registry.prune(at(100));
        let second = registry.stats();

        assert_eq!(first.banned_users, second.banned_users);
        assert_eq!(first.violation_entries, second.violation_entries);
    }

    #[test]
    fn history_is_bounded() {
        let registry = registry();
        for i in 0..1100 {
            registry.push_history(ChatLogEntry {
                user_id: i,
                username: "u".to_string(),
                chat_kind: "private".to_string(),
                chat_title: None,
                timestamp: at(i),
                message: "m".to_string(),
                spam_score: 0,
            });
        }
        assert_eq!(registry.stats().history_entries, 1000);

        // Snapshots carry only the most recent 100.
        let snapshot = registry.capture_snapshot(Vec::new(), "auto", at(2000));
        assert_eq!(snapshot.state.chat_history.len(), 100);
        assert_eq!(snapshot.state.chat_history.last().unwrap().user_id, 1099);
    }

    #[test]
    fn rotate_session_changes_the_id() {
        let registry = registry();
        let before = registry.session_id();
        let (old, new) = registry.rotate_session();
        assert_eq!(old, before);
        assert_eq!(new, registry.session_id());
    }
}
