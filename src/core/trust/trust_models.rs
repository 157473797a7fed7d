// Trust domain types. Pure data, no transport dependencies.

use serde::{Deserialize, Serialize};

/// Opaque identity descriptor handed over by the transport adapter.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
}

impl Identity {
    /// Best display handle we have, used for user records and logs.
    pub fn handle(&self) -> String {
        if let Some(username) = &self.username {
            format!("@{}", username)
        } else if let Some(name) = &self.display_name {
            name.clone()
        } else {
            format!("user {}", self.id)
        }
    }
}

/// Coarse classification of account legitimacy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrustState {
    #[default]
    Unverified,
    Pending,
    Verified,
}

/// Result of one verification pass. Deterministic for a given identity and
/// configuration; reasons are ordered by check order so the audit string is
/// stable.
#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub verified: bool,
    pub score: i32,
    pub reasons: Vec<&'static str>,
}

impl VerificationOutcome {
    pub fn reason_string(&self) -> String {
        if self.reasons.is_empty() {
            "verified".to_string()
        } else {
            self.reasons.join(", ")
        }
    }
}
