// Spam scoring - additive signals over one message plus two flood indexes.
//
// The duplicate and cadence indexes are sensors: they are updated on every
// call whether or not the verdict is spam. Violation bookkeeping (the
// 24-hour log and the cumulative per-user counter) is the gate's job.

use super::spam_models::{SpamIndexStats, SpamVerdict};
use crate::core::policy::PolicyConfig;
use crate::core::window::SlidingWindow;
use chrono::{DateTime, Duration, Utc};
use regex::{Regex, RegexBuilder};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

const DUPLICATE_HORIZON: Duration = Duration::hours(1);
const CADENCE_CAPACITY: usize = 10;
const RAPID_WINDOW_SECS: i64 = 30;
const RAPID_MESSAGE_COUNT: usize = 5;

#[derive(Default)]
struct SpamIndexes {
    /// fingerprint -> (timestamp, sender) entries within the last hour.
    /// The bucket is shared across users; counting is per user inside it.
    duplicates: HashMap<u64, SlidingWindow<i64>>,
    /// sender -> most recent message timestamps, bounded to the last 10.
    cadence: HashMap<i64, SlidingWindow<()>>,
}

pub struct SpamScorer {
    patterns: Vec<Regex>,
    profanity: HashSet<String>,
    shortlink: Option<Regex>,
    max_message_length: usize,
    max_identical: usize,
    spam_threshold: i32,
    max_caps_ratio: f64,
    profanity_filter: bool,
    caps_filter: bool,
    new_account_id_floor: i64,

    indexes: Mutex<SpamIndexes>,
}

impl SpamScorer {
    pub fn new(config: &PolicyConfig) -> Self {
        // Compile once up front; a bad configured pattern is a startup
        // error, not a per-message one.
        let patterns = config
            .spam_patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .unwrap_or_else(|e| panic!("invalid spam pattern {p:?}: {e}"))
            })
            .collect();

        let shortlink = if config.link_filter && !config.shortlink_domains.is_empty() {
            let hosts = config
                .shortlink_domains
                .iter()
                .map(|d| regex::escape(d))
                .collect::<Vec<_>>()
                .join("|");
            Some(
                RegexBuilder::new(&format!(r"https?://(?:{hosts})/"))
                    .case_insensitive(true)
                    .build()
                    .expect("short-link pattern"),
            )
        } else {
            None
        };

        Self {
            patterns,
            profanity: config
                .profanity_words
                .iter()
                .map(|w| w.to_lowercase())
                .collect(),
            shortlink,
            max_message_length: config.max_message_length,
            max_identical: config.max_identical_messages,
            spam_threshold: config.spam_score_threshold,
            max_caps_ratio: config.max_caps_ratio,
            profanity_filter: config.profanity_filter,
            caps_filter: config.caps_filter,
            new_account_id_floor: config.new_account_id_floor,
            indexes: Mutex::new(SpamIndexes::default()),
        }
    }

    /// Score one message. The score is the sum of every triggered signal.
    pub fn score(&self, user_id: i64, text: &str, now: DateTime<Utc>) -> SpamVerdict {
        let mut score = 0;
        let mut reasons: Vec<String> = Vec::new();

        if text.chars().count() > self.max_message_length {
            score += 2;
            reasons.push("message_too_long".to_string());
        }

        for (i, pattern) in self.patterns.iter().enumerate() {
            if pattern.is_match(text) {
                score += 2;
                reasons.push(format!("spam_pattern_{i}"));
            }
        }

        if self.profanity_filter && self.contains_profanity(text) {
            score += 1;
            reasons.push("profanity".to_string());
        }

        if self.caps_filter && self.excessive_caps(text) {
            score += 1;
            reasons.push("excessive_caps".to_string());
        }

        let duplicate_penalty = self.duplicate_penalty(user_id, text, now);
        if duplicate_penalty > 0 {
            score += duplicate_penalty;
            reasons.push("duplicate_message".to_string());
        }

        if let Some(shortlink) = &self.shortlink {
            if shortlink.is_match(text) {
                score += 3;
                reasons.push("suspicious_links".to_string());
            }
        }

        if self.rapid_messaging(user_id, now) {
            score += 2;
            reasons.push("rapid_messaging".to_string());
        }

        if user_id > self.new_account_id_floor {
            score += 1;
            reasons.push("new_account".to_string());
        }

        let is_spam = score >= self.spam_threshold;
        let verdict = SpamVerdict {
            is_spam,
            score,
            reasons,
        };

        if is_spam {
            tracing::warn!(
                user_id,
                score,
                reasons = %verdict.reason_string(),
                "spam detected"
            );
        }

        verdict
    }

    /// Stable fingerprint of normalized message text.
    fn fingerprint(text: &str) -> u64 {
        let normalized = text.trim().to_lowercase();
        let mut hasher = DefaultHasher::new();
        normalized.hash(&mut hasher);
        hasher.finish()
    }

    /// Escalating duplicate penalty: the bucket is pruned to one hour, prior
    /// same-user entries are counted, THEN the current entry is appended.
    /// Once the prior count reaches the configured limit the penalty grows by
    /// one per repetition instead of firing as a flat flag.
    fn duplicate_penalty(&self, user_id: i64, text: &str, now: DateTime<Utc>) -> i32 {
        let fingerprint = Self::fingerprint(text);
        let mut indexes = self.indexes.lock().expect("spam index lock");
        let bucket = indexes.duplicates.entry(fingerprint).or_default();

        bucket.prune(DUPLICATE_HORIZON, now);
        let prior = bucket.iter().filter(|(_, uid)| *uid == user_id).count();
        bucket.push(now, user_id);

        if prior >= self.max_identical {
            (prior - self.max_identical + 1) as i32
        } else {
            0
        }
    }

    /// Burst detection over the bounded cadence index: at least 5 messages
    /// (the current one included) inside the trailing 30 seconds.
    fn rapid_messaging(&self, user_id: i64, now: DateTime<Utc>) -> bool {
        let mut indexes = self.indexes.lock().expect("spam index lock");
        let window = indexes.cadence.entry(user_id).or_default();

        window.push(now, ());
        window.keep_latest(CADENCE_CAPACITY);
        window.count_since(now - Duration::seconds(RAPID_WINDOW_SECS)) >= RAPID_MESSAGE_COUNT
    }

    fn contains_profanity(&self, text: &str) -> bool {
        text.split_whitespace()
            .any(|word| self.profanity.contains(&word.to_lowercase()))
    }

    fn excessive_caps(&self, text: &str) -> bool {
        let total = text.chars().count();
        if total < 10 {
            return false;
        }
        let caps = text.chars().filter(|c| c.is_uppercase()).count();
        caps as f64 / total as f64 > self.max_caps_ratio
    }

    /// Admin reset: forget everything recorded about one user.
    pub fn reset_user(&self, user_id: i64) {
        let mut indexes = self.indexes.lock().expect("spam index lock");
        indexes.cadence.remove(&user_id);
        for bucket in indexes.duplicates.values_mut() {
            bucket.retain(|_, uid| *uid != user_id);
        }
        indexes.duplicates.retain(|_, bucket| !bucket.is_empty());
        tracing::info!(user_id, "spam indexes reset");
    }

    /// Periodic eviction of stale fingerprint buckets and idle cadence
    /// entries. Safe to run repeatedly; scoring also prunes on access.
    pub fn prune(&self, now: DateTime<Utc>) {
        let mut indexes = self.indexes.lock().expect("spam index lock");
        for bucket in indexes.duplicates.values_mut() {
            bucket.prune(DUPLICATE_HORIZON, now);
        }
        indexes.duplicates.retain(|_, bucket| !bucket.is_empty());
        indexes
            .cadence
            .retain(|_, window| window.count_since(now - DUPLICATE_HORIZON) > 0);
    }

    pub fn stats(&self) -> SpamIndexStats {
        let indexes = self.indexes.lock().expect("spam index lock");
        SpamIndexStats {
            tracked_fingerprints: indexes.duplicates.len(),
            tracked_users: indexes.cadence.len(),
            pattern_count: self.patterns.len(),
            profanity_count: self.profanity.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> SpamScorer {
        SpamScorer::new(&PolicyConfig::default())
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn benign_message_scores_zero() {
        let verdict = scorer().score(42, "good morning everyone", at(0));
        assert!(!verdict.is_spam);
        assert_eq!(verdict.score, 0);
        assert!(verdict.reasons.is_empty());
    }

    #[test]
    fn oversized_message_adds_two() {
        let text = "a".repeat(4001);
        let verdict = scorer().score(42, &text, at(0));
        assert_eq!(verdict.score, 2);
        assert_eq!(verdict.reasons, vec!["message_too_long"]);
    }

    #[test]
    fn each_matching_pattern_adds_its_own_tag() {
        let verdict = scorer().score(42, "Congratulations winner, click here, act now!", at(0));
        // Patterns 0, 1 and 4 each match once.
        assert_eq!(verdict.score, 6);
        assert_eq!(
            verdict.reasons,
            vec!["spam_pattern_0", "spam_pattern_1", "spam_pattern_4"]
        );
        assert!(verdict.is_spam);
    }

    #[test]
    fn profanity_token_adds_one() {
        let verdict = scorer().score(42, "that looks like a scam to me", at(0));
        assert_eq!(verdict.score, 1);
        assert_eq!(verdict.reasons, vec!["profanity"]);
    }

    #[test]
    fn shouting_adds_one() {
        let verdict = scorer().score(42, "WHY IS EVERYONE IGNORING ME", at(0));
        assert_eq!(verdict.score, 1);
        assert_eq!(verdict.reasons, vec!["excessive_caps"]);
    }

    #[test]
    fn short_shouting_is_ignored() {
        let verdict = scorer().score(42, "WHY", at(0));
        assert_eq!(verdict.score, 0);
    }

    #[test]
    fn shortlink_adds_three() {
        let verdict = scorer().score(42, "look at https://bit.ly/xyz today", at(0));
        assert_eq!(verdict.score, 5);
        assert!(verdict.reasons.contains(&"suspicious_links".to_string()));
        // The shortlink URL also matches configured pattern 3.
        assert!(verdict.reasons.contains(&"spam_pattern_3".to_string()));
        assert!(verdict.is_spam);
    }

    #[test]
    fn high_user_id_adds_one() {
        let verdict = scorer().score(6_000_000_000, "good morning everyone", at(0));
        assert_eq!(verdict.score, 1);
        assert_eq!(verdict.reasons, vec!["new_account"]);
    }

    #[test]
    fn duplicate_penalty_escalates() {
        let service = scorer();
        let mut penalties = Vec::new();
        for i in 0..5 {
            let verdict = service.score(42, "hello there my friend", at(i * 10));
            penalties.push(verdict.score);
        }
        // Limit 3: penalties 0,0,0,1,2 on successive sends.
        assert_eq!(penalties, vec![0, 0, 0, 1, 2]);
    }

    #[test]
    fn duplicate_counting_is_per_user_within_a_shared_bucket() {
        let service = scorer();
        for i in 0..4 {
            service.score(1, "the very same text", at(i * 10));
        }
        // A different user sending the same text starts from zero.
        let verdict = service.score(2, "the very same text", at(50));
        assert_eq!(verdict.score, 0);
    }

    #[test]
    fn duplicates_expire_after_an_hour() {
        let service = scorer();
        for i in 0..4 {
            service.score(42, "the very same text", at(i * 10));
        }
        let verdict = service.score(42, "the very same text", at(4000));
        assert_eq!(verdict.score, 0);
    }

    #[test]
    fn rapid_messaging_fires_on_fifth_message_in_window() {
        let service = scorer();
        for i in 0..4 {
            let verdict = service.score(42, &format!("message number {i}"), at(i));
            assert_eq!(verdict.score, 0, "message {i} should be clean");
        }
        let verdict = service.score(42, "message number 4", at(4));
        assert_eq!(verdict.score, 2);
        assert_eq!(verdict.reasons, vec!["rapid_messaging"]);
    }

    #[test]
    fn slow_cadence_never_fires() {
        let service = scorer();
        for i in 0..8 {
            let verdict = service.score(42, &format!("note {i}"), at(i * 60));
            assert_eq!(verdict.score, 0);
        }
    }

    #[test]
    fn reset_user_clears_both_indexes() {
        let service = scorer();
        for i in 0..4 {
            service.score(42, "the very same text", at(i));
        }
        service.reset_user(42);

        // Duplicate history gone: the next send is penalty-free, and the
        // cadence window restarts.
        let verdict = service.score(42, "the very same text", at(10));
        assert_eq!(verdict.score, 0);
    }

    #[test]
    fn prune_is_idempotent() {
        let service = scorer();
        for i in 0..3 {
            service.score(42, "some text", at(i));
        }
        service.prune(at(10));
        let first = service.stats();
        service.prune(at(10));
        let second = service.stats();
        assert_eq!(first.tracked_fingerprints, second.tracked_fingerprints);
        assert_eq!(first.tracked_users, second.tracked_users);
    }
}
