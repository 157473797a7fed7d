// Heuristic account verification. Cheap, explainable checks chosen over any
// learned model: the system runs with zero training data and every decision
// must produce an auditable reason string.

use super::trust_models::{Identity, VerificationOutcome};
use crate::core::policy::PolicyConfig;
use dashmap::{DashMap, DashSet};

const VERIFICATION_FAIL_SCORE: i32 = 3;
const MAX_FAILED_VERIFICATIONS: u32 = 3;

pub struct AccountTrust {
    enabled: bool,
    new_account_id_floor: i64,
    suspicious_tokens: Vec<String>,
    promo_keywords: Vec<String>,

    suspicious: DashSet<i64>,
    failed_verifications: DashMap<i64, u32>,
}

impl AccountTrust {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            enabled: config.verification_enabled,
            new_account_id_floor: config.new_account_id_floor,
            suspicious_tokens: config
                .suspicious_username_tokens
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
            promo_keywords: config.promo_keywords.iter().map(|t| t.to_lowercase()).collect(),
            suspicious: DashSet::new(),
            failed_verifications: DashMap::new(),
        }
    }

    /// Score an identity against the configured heuristics.
    ///
    /// Pure except for the suspicious-set insertion on failure.
    pub fn verify(&self, identity: &Identity) -> VerificationOutcome {
        if !self.enabled {
            return VerificationOutcome {
                verified: true,
                score: 0,
                reasons: vec!["verification_disabled"],
            };
        }

        let mut score = 0;
        let mut reasons = Vec::new();

        if identity.username.is_none() {
            score += 1;
            reasons.push("no_username");
        }

        if identity.id > self.new_account_id_floor {
            score += 2;
            reasons.push("new_account_id");
        }

        if let Some(username) = &identity.username {
            if self.is_suspicious_username(username) {
                score += 2;
                reasons.push("suspicious_username");
            }
        }

        if self.is_suspicious_display_name(identity.display_name.as_deref()) {
            score += 1;
            reasons.push("suspicious_name");
        }

        let verified = score < VERIFICATION_FAIL_SCORE;
        let outcome = VerificationOutcome {
            verified,
            score,
            reasons,
        };

        if !verified {
            self.suspicious.insert(identity.id);
            tracing::warn!(
                user_id = identity.id,
                score,
                reasons = %outcome.reason_string(),
                "account failed verification"
            );
        }

        outcome
    }

    fn is_suspicious_username(&self, username: &str) -> bool {
        let lowered = username.to_lowercase();
        if self.suspicious_tokens.iter().any(|t| lowered.contains(t)) {
            return true;
        }

        let total = username.chars().count();
        if total == 0 {
            return false;
        }
        let digits = username.chars().filter(|c| c.is_ascii_digit()).count();
        digits as f64 / total as f64 > 0.5
    }

    fn is_suspicious_display_name(&self, name: Option<&str>) -> bool {
        let name = match name {
            Some(n) if !n.is_empty() => n,
            // An absent display name is itself a weak signal.
            _ => return true,
        };

        let total = name.chars().count();
        let special = name
            .chars()
            .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
            .count();
        if special as f64 / total as f64 > 0.3 {
            return true;
        }

        let lowered = name.to_lowercase();
        self.promo_keywords.iter().any(|w| lowered.contains(w))
    }

    /// Record a failed verification attempt; repeated failures flag the id.
    pub fn record_failed_verification(&self, user_id: i64) {
        let mut count = self.failed_verifications.entry(user_id).or_insert(0);
        *count += 1;
        if *count >= MAX_FAILED_VERIFICATIONS {
            self.suspicious.insert(user_id);
            tracing::warn!(
                user_id,
                failures = *count,
                "user flagged suspicious after repeated verification failures"
            );
        }
    }

    pub fn is_suspicious(&self, user_id: i64) -> bool {
        self.suspicious.contains(&user_id)
    }

    /// Admin action: clear the suspicious flag and the failure counter.
    pub fn mark_safe(&self, user_id: i64) {
        self.suspicious.remove(&user_id);
        self.failed_verifications.remove(&user_id);
        tracing::info!(user_id, "user marked safe");
    }

    pub fn suspicious_ids(&self) -> Vec<i64> {
        self.suspicious.iter().map(|id| *id).collect()
    }

    pub fn restore_suspicious(&self, ids: impl IntoIterator<Item = i64>) {
        for id in ids {
            self.suspicious.insert(id);
        }
    }

    pub fn suspicious_count(&self) -> usize {
        self.suspicious.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::PolicyConfig;

    fn trust() -> AccountTrust {
        AccountTrust::new(&PolicyConfig::default())
    }

    fn identity(id: i64, username: Option<&str>, name: Option<&str>) -> Identity {
        Identity {
            id,
            username: username.map(str::to_string),
            display_name: name.map(str::to_string),
        }
    }

    #[test]
    fn plain_username_passes() {
        let outcome = trust().verify(&identity(42, Some("alice_wong"), Some("Alice Wong")));
        assert!(outcome.verified);
        assert_eq!(outcome.score, 0);
        assert!(outcome.reasons.is_empty());
    }

    #[test]
    fn bot_username_with_digit_flood_is_flagged() {
        let service = trust();
        // "bot12345": contains a suspicious token AND digit density > 0.5,
        // but the username check contributes its weight once.
        let outcome = service.verify(&identity(6_000_000_000, Some("bot12345"), Some("x")));
        assert!(!outcome.verified);
        assert!(outcome.reasons.contains(&"suspicious_username"));
        assert!(outcome.reasons.contains(&"new_account_id"));
        assert!(service.is_suspicious(6_000_000_000));
    }

    #[test]
    fn missing_username_alone_is_not_enough() {
        let outcome = trust().verify(&identity(42, None, Some("Alice")));
        assert!(outcome.verified);
        assert_eq!(outcome.score, 1);
        assert_eq!(outcome.reasons, vec!["no_username"]);
    }

    #[test]
    fn promo_display_name_adds_weight() {
        let outcome = trust().verify(&identity(42, Some("normal_handle"), Some("FREE money here")));
        assert!(outcome.verified);
        assert_eq!(outcome.reasons, vec!["suspicious_name"]);
    }

    #[test]
    fn verification_is_deterministic() {
        let service = trust();
        let id = identity(7_000_000_000, None, Some("$$$ WIN $$$"));
        let first = service.verify(&id);
        let second = service.verify(&id);
        assert_eq!(first.score, second.score);
        assert_eq!(first.reasons, second.reasons);
    }

    #[test]
    fn repeated_failures_flag_the_user() {
        let service = trust();
        for _ in 0..3 {
            service.record_failed_verification(99);
        }
        assert!(service.is_suspicious(99));

        service.mark_safe(99);
        assert!(!service.is_suspicious(99));
        // Counter was cleared too: two more failures stay below the bar.
        service.record_failed_verification(99);
        service.record_failed_verification(99);
        assert!(!service.is_suspicious(99));
    }

    #[test]
    fn disabled_verification_accepts_everyone() {
        let config = PolicyConfig {
            verification_enabled: false,
            ..PolicyConfig::default()
        };
        let service = AccountTrust::new(&config);
        let outcome = service.verify(&identity(9_999_999_999, None, None));
        assert!(outcome.verified);
    }
}
