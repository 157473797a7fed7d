// Traffic throttling, independent of message content. Two request classes
// share one per-user state record: messages (1-minute and 1-hour caps) and
// api calls (1-minute cap). A breach starts a progressive cooldown that
// overrides window occupancy until it expires or an admin resets the user.

use crate::core::policy::PolicyConfig;
use crate::core::window::SlidingWindow;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

const COOLDOWN_STEP_MINUTES: i64 = 5;
const COOLDOWN_CAP_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Message,
    Api,
}

/// Point-in-time usage numbers for status reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateUsage {
    pub messages_last_minute: usize,
    pub messages_last_hour: usize,
    pub api_calls_last_minute: usize,
    pub violations: u32,
    pub cooldown_secs: u64,
}

#[derive(Default)]
struct UserTraffic {
    messages: SlidingWindow<()>,
    api_calls: SlidingWindow<()>,
    cooldown_until: Option<DateTime<Utc>>,
    violations: u32,
}

pub struct RateLimiter {
    max_messages_per_minute: usize,
    max_messages_per_hour: usize,
    max_api_calls_per_minute: usize,
    users: Mutex<HashMap<i64, UserTraffic>>,
}

impl RateLimiter {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            max_messages_per_minute: config.max_messages_per_minute,
            max_messages_per_hour: config.max_messages_per_hour,
            max_api_calls_per_minute: config.max_api_calls_per_minute,
            users: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether a user may proceed. Pruning and the lazy cooldown check
    /// run before window occupancy is evaluated, so stale entries can never
    /// cause a false positive. A breach applies the progressive cooldown as
    /// a side effect.
    pub fn is_limited(&self, user_id: i64, class: RequestClass, now: DateTime<Utc>) -> bool {
        let mut users = self.users.lock().expect("rate limiter lock");
        let traffic = users.entry(user_id).or_default();

        if let Some(until) = traffic.cooldown_until {
            if until > now {
                return true;
            }
            traffic.cooldown_until = None;
        }

        traffic.messages.prune(Duration::hours(1), now);
        traffic.api_calls.prune(Duration::minutes(1), now);

        let breach = match class {
            RequestClass::Message => {
                if traffic.messages.count_since(now - Duration::minutes(1))
                    >= self.max_messages_per_minute
                {
                    Some("message_flood")
                } else if traffic.messages.len() >= self.max_messages_per_hour {
                    Some("message_abuse")
                } else {
                    None
                }
            }
            RequestClass::Api => {
                if traffic.api_calls.len() >= self.max_api_calls_per_minute {
                    Some("api_abuse")
                } else {
                    None
                }
            }
        };

        match breach {
            Some(kind) => {
                traffic.violations += 1;
                let minutes = (i64::from(traffic.violations) * COOLDOWN_STEP_MINUTES)
                    .min(COOLDOWN_CAP_MINUTES);
                traffic.cooldown_until = Some(now + Duration::minutes(minutes));
                tracing::warn!(
                    user_id,
                    violation = kind,
                    cooldown_minutes = minutes,
                    "rate limit cooldown applied"
                );
                true
            }
            None => false,
        }
    }

    pub fn record(&self, user_id: i64, class: RequestClass, now: DateTime<Utc>) {
        let mut users = self.users.lock().expect("rate limiter lock");
        let traffic = users.entry(user_id).or_default();
        match class {
            RequestClass::Message => traffic.messages.push(now, ()),
            RequestClass::Api => traffic.api_calls.push(now, ()),
        }
    }

    /// Seconds left on an active cooldown, if any.
    pub fn cooldown_remaining(&self, user_id: i64, now: DateTime<Utc>) -> Option<u64> {
        let users = self.users.lock().expect("rate limiter lock");
        let until = users.get(&user_id)?.cooldown_until?;
        if until <= now {
            return None;
        }
        Some((until - now).num_seconds().max(0) as u64)
    }

    /// Admin reset: windows, cooldown and the violation counter all go.
    pub fn reset_user(&self, user_id: i64) {
        let mut users = self.users.lock().expect("rate limiter lock");
        users.remove(&user_id);
        tracing::info!(user_id, "rate limits reset");
    }

    pub fn usage(&self, user_id: i64, now: DateTime<Utc>) -> RateUsage {
        let users = self.users.lock().expect("rate limiter lock");
        let Some(traffic) = users.get(&user_id) else {
            return RateUsage::default();
        };

        RateUsage {
            messages_last_minute: traffic.messages.count_since(now - Duration::minutes(1)),
            messages_last_hour: traffic.messages.count_since(now - Duration::hours(1)),
            api_calls_last_minute: traffic.api_calls.count_since(now - Duration::minutes(1)),
            violations: traffic.violations,
            cooldown_secs: traffic
                .cooldown_until
                .filter(|until| *until > now)
                .map(|until| (until - now).num_seconds().max(0) as u64)
                .unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(&PolicyConfig::default())
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn fill_minute_window(limiter: &RateLimiter, user_id: i64, now: DateTime<Utc>) {
        for _ in 0..10 {
            limiter.record(user_id, RequestClass::Message, now);
        }
    }

    #[test]
    fn under_the_caps_nothing_is_limited() {
        let limiter = limiter();
        for i in 0..9 {
            limiter.record(42, RequestClass::Message, at(i));
        }
        assert!(!limiter.is_limited(42, RequestClass::Message, at(10)));
        assert!(!limiter.is_limited(42, RequestClass::Api, at(10)));
    }

    #[test]
    fn minute_cap_breach_starts_five_minute_cooldown() {
        let limiter = limiter();
        fill_minute_window(&limiter, 42, at(0));

        assert!(limiter.is_limited(42, RequestClass::Message, at(1)));
        assert_eq!(limiter.cooldown_remaining(42, at(1)), Some(300));
    }

    #[test]
    fn cooldown_overrides_empty_windows() {
        let limiter = limiter();
        fill_minute_window(&limiter, 42, at(0));
        assert!(limiter.is_limited(42, RequestClass::Message, at(1)));

        // Two minutes later the minute window would be clear, but the
        // cooldown still holds - for every request class.
        assert!(limiter.is_limited(42, RequestClass::Message, at(121)));
        assert!(limiter.is_limited(42, RequestClass::Api, at(121)));
    }

    #[test]
    fn cooldown_clears_lazily_after_expiry() {
        let limiter = limiter();
        fill_minute_window(&limiter, 42, at(0));
        assert!(limiter.is_limited(42, RequestClass::Message, at(1)));

        assert!(!limiter.is_limited(42, RequestClass::Message, at(302)));
        assert_eq!(limiter.cooldown_remaining(42, at(302)), None);
    }

    #[test]
    fn cooldown_grows_progressively_and_caps_at_an_hour() {
        let limiter = limiter();
        // Breaches spaced an hour apart: windows and the previous cooldown
        // have both drained by the next round.
        for breach in 1..=13i64 {
            let now = at(breach * 3600);
            fill_minute_window(&limiter, 42, now);
            assert!(limiter.is_limited(42, RequestClass::Message, now));

            let expected_minutes = (breach * 5).min(60);
            assert_eq!(
                limiter.cooldown_remaining(42, now),
                Some((expected_minutes * 60) as u64),
                "breach #{breach}"
            );
        }
    }

    #[test]
    fn hourly_cap_triggers_without_minute_burst() {
        let limiter = limiter();
        // 100 messages spread over ~50 minutes: never 10 in one minute.
        for i in 0..100 {
            limiter.record(42, RequestClass::Message, at(i * 30));
        }
        assert!(limiter.is_limited(42, RequestClass::Message, at(3001)));
    }

    #[test]
    fn api_class_has_its_own_minute_cap() {
        let limiter = limiter();
        for _ in 0..5 {
            limiter.record(42, RequestClass::Api, at(0));
        }
        assert!(limiter.is_limited(42, RequestClass::Api, at(1)));
        // Message class is unaffected by api traffic.
        limiter.reset_user(42);
        for _ in 0..5 {
            limiter.record(42, RequestClass::Api, at(10));
        }
        assert!(!limiter.is_limited(42, RequestClass::Message, at(11)));
    }

    #[test]
    fn reset_zeroes_the_violation_counter() {
        let limiter = limiter();
        fill_minute_window(&limiter, 42, at(0));
        assert!(limiter.is_limited(42, RequestClass::Message, at(1)));
        fill_minute_window(&limiter, 42, at(7200));
        assert!(limiter.is_limited(42, RequestClass::Message, at(7200)));

        limiter.reset_user(42);

        // The next breach starts from a five-minute cooldown again.
        fill_minute_window(&limiter, 42, at(10_000));
        assert!(limiter.is_limited(42, RequestClass::Message, at(10_000)));
        assert_eq!(limiter.cooldown_remaining(42, at(10_000)), Some(300));
    }

    #[test]
    fn usage_reports_per_class_counts() {
        let limiter = limiter();
        for i in 0..3 {
            limiter.record(42, RequestClass::Message, at(i));
        }
        limiter.record(42, RequestClass::Api, at(3));

        let usage = limiter.usage(42, at(4));
        assert_eq!(usage.messages_last_minute, 3);
        assert_eq!(usage.messages_last_hour, 3);
        assert_eq!(usage.api_calls_last_minute, 1);
        assert_eq!(usage.violations, 0);
        assert_eq!(usage.cooldown_secs, 0);
    }
}
