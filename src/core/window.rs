// Sliding-window primitive shared by the spam scorer, the rate limiter and
// the registry's violation log. Entries are kept in insertion order; callers
// must push monotonically increasing timestamps (per-user FIFO processing is
// the pipeline's responsibility).

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// A time-bounded sequence of `(timestamp, value)` entries.
///
/// Pruning drops everything older than a horizon and is idempotent: pruning
/// twice with the same `now` leaves the window unchanged.
#[derive(Debug, Clone)]
pub struct SlidingWindow<T = ()> {
    entries: VecDeque<(DateTime<Utc>, T)>,
}

impl<T> Default for SlidingWindow<T> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}

impl<T> SlidingWindow<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, at: DateTime<Utc>, value: T) {
        self.entries.push_back((at, value));
    }

    /// Drop entries older than `now - horizon`.
    pub fn prune(&mut self, horizon: Duration, now: DateTime<Utc>) {
        let cutoff = now - horizon;
        while let Some((at, _)) = self.entries.front() {
            if *at > cutoff {
                break;
            }
            self.entries.pop_front();
        }
    }

    /// Count entries strictly newer than `cutoff`.
    pub fn count_since(&self, cutoff: DateTime<Utc>) -> usize {
        self.entries.iter().filter(|(at, _)| *at > cutoff).count()
    }

    /// Keep only the `n` most recent entries.
    pub fn keep_latest(&mut self, n: usize) {
        while self.entries.len() > n {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(DateTime<Utc>, T)> {
        self.entries.iter()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&DateTime<Utc>, &T) -> bool) {
        self.entries.retain(|(at, value)| keep(at, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn prune_drops_only_expired_entries() {
        let mut window: SlidingWindow = SlidingWindow::new();
        window.push(at(0), ());
        window.push(at(30), ());
        window.push(at(90), ());

        window.prune(Duration::seconds(60), at(100));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn prune_is_idempotent() {
        let mut window: SlidingWindow = SlidingWindow::new();
        for s in [0, 10, 20, 95] {
            window.push(at(s), ());
        }

        window.prune(Duration::seconds(60), at(100));
        let after_first: Vec<_> = window.iter().map(|(t, _)| *t).collect();
        window.prune(Duration::seconds(60), at(100));
        let after_second: Vec<_> = window.iter().map(|(t, _)| *t).collect();
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn count_since_excludes_cutoff_boundary() {
        let mut window: SlidingWindow = SlidingWindow::new();
        window.push(at(10), ());
        window.push(at(20), ());
        window.push(at(30), ());

        assert_eq!(window.count_since(at(20)), 1);
        assert_eq!(window.count_since(at(5)), 3);
    }

    #[test]
    fn keep_latest_bounds_from_the_front() {
        let mut window: SlidingWindow<u32> = SlidingWindow::new();
        for i in 0..12u32 {
            window.push(at(i as i64), i);
        }

        window.keep_latest(10);
        assert_eq!(window.len(), 10);
        assert_eq!(window.iter().next().map(|(_, v)| *v), Some(2));
    }
}
