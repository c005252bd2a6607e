//! Per-user ceiling on decision computations, independent of the
//! pause/debounce gating. Sliding one-hour window.

use dashmap::DashMap;
use pd_core::UserId;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub struct RateLimiter {
    events: DashMap<UserId, VecDeque<Instant>>,
    window: Duration,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            events: DashMap::new(),
            window,
        }
    }

    pub fn hourly() -> Self {
        Self::new(Duration::from_secs(3600))
    }

    /// Returns true and records the event when the user is under `max`
    /// events in the window; false (without recording) when at the ceiling.
    pub fn check_and_record(&self, user_id: &UserId, max: u32) -> bool {
        let now = Instant::now();
        let mut entry = self.events.entry(user_id.clone()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) > self.window {
                entry.pop_front();
            } else {
                break;
            }
        }
        if entry.len() >= max as usize {
            return false;
        }
        entry.push_back(now);
        true
    }

    pub fn count(&self, user_id: &UserId) -> usize {
        self.events.get(user_id).map(|q| q.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforces_ceiling() {
        let limiter = RateLimiter::hourly();
        let user: UserId = "alice".into();
        for _ in 0..3 {
            assert!(limiter.check_and_record(&user, 3));
        }
        assert!(!limiter.check_and_record(&user, 3));
        assert_eq!(limiter.count(&user), 3);
    }

    #[test]
    fn users_are_independent() {
        let limiter = RateLimiter::hourly();
        let alice: UserId = "alice".into();
        let bob: UserId = "bob".into();
        assert!(limiter.check_and_record(&alice, 1));
        assert!(!limiter.check_and_record(&alice, 1));
        assert!(limiter.check_and_record(&bob, 1));
    }

    #[test]
    fn window_expiry_frees_budget() {
        let limiter = RateLimiter::new(Duration::from_millis(30));
        let user: UserId = "alice".into();
        assert!(limiter.check_and_record(&user, 1));
        assert!(!limiter.check_and_record(&user, 1));
        std::thread::sleep(Duration::from_millis(50));
        assert!(limiter.check_and_record(&user, 1));
    }
}
