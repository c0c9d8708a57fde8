use crate::events::{TeamId, Timestamp};
use chrono::{Duration, Utc};
use std::collections::HashMap;

/// Rate limiter protecting teams from alert storms
///
/// Tracks, per team, how many alerts were dispatched within the current
/// sliding one-hour window. The window is anchored at the first alert after
/// the previous window went stale, not at calendar boundaries; a stale
/// window is lazily reset on the next access.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: HashMap<TeamId, Window>,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    window_start: Timestamp,
}

impl Window {
    fn is_stale(&self) -> bool {
        Utc::now() - self.window_start >= Duration::hours(1)
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the team has reached its hourly cap
    ///
    /// A stale window is reset (count 0, window start now) before the check,
    /// so a team that was capped an hour ago is immediately allowed again.
    pub fn is_limited(&mut self, team: TeamId, max: u32) -> bool {
        match self.windows.get_mut(&team) {
            Some(window) if window.is_stale() => {
                window.count = 0;
                window.window_start = Utc::now();
                max == 0
            }
            Some(window) => window.count >= max,
            None => max == 0,
        }
    }

    /// Count one dispatched alert against the team's active window
    pub fn record_alert(&mut self, team: TeamId) {
        self.record_alert_at(team, Utc::now());
    }

    /// Count one alert with a controlled timestamp
    ///
    /// This is primarily used for testing; a fresh window is anchored at
    /// `timestamp` instead of now.
    pub fn record_alert_at(&mut self, team: TeamId, timestamp: Timestamp) {
        let window = self.windows.entry(team).or_insert(Window {
            count: 0,
            window_start: timestamp,
        });

        if window.is_stale() {
            window.count = 0;
            window.window_start = timestamp;
        }
        window.count += 1;
    }

    /// Alerts counted in the team's current window
    pub fn current_count(&mut self, team: TeamId) -> u32 {
        match self.windows.get_mut(&team) {
            Some(window) if window.is_stale() => {
                window.count = 0;
                window.window_start = Utc::now();
                0
            }
            Some(window) => window.count,
            None => 0,
        }
    }

    /// Number of teams currently tracked
    pub fn tracked_teams(&self) -> usize {
        self.windows.len()
    }

    /// Wipe all team windows (used at shutdown/reset)
    pub fn clear(&mut self) {
        self.windows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_team_is_not_limited() {
        let mut limiter = RateLimiter::new();
        assert!(!limiter.is_limited(1, 5));
    }

    #[test]
    fn test_limit_reached_at_exactly_max() {
        let mut limiter = RateLimiter::new();

        limiter.record_alert(1);
        limiter.record_alert(1);
        assert!(!limiter.is_limited(1, 3));

        limiter.record_alert(1);
        assert!(limiter.is_limited(1, 3));
    }

    #[test]
    fn test_teams_are_tracked_independently() {
        let mut limiter = RateLimiter::new();
        limiter.record_alert(1);

        assert!(limiter.is_limited(1, 1));
        assert!(!limiter.is_limited(2, 1));
    }

    #[test]
    fn test_stale_window_resets_on_check() {
        let mut limiter = RateLimiter::new();

        // Window anchored one hour and one second in the past.
        let old_start = Utc::now() - Duration::seconds(3601);
        limiter.record_alert_at(1, old_start);
        limiter.record_alert_at(1, old_start);

        assert!(!limiter.is_limited(1, 2));
        assert_eq!(limiter.current_count(1), 0);
    }

    #[test]
    fn test_record_after_stale_window_starts_fresh_count() {
        let mut limiter = RateLimiter::new();
        limiter.record_alert_at(1, Utc::now() - Duration::seconds(3601));

        limiter.record_alert(1);
        assert_eq!(limiter.current_count(1), 1);
    }

    #[test]
    fn test_window_is_sliding_not_calendar_aligned() {
        let mut limiter = RateLimiter::new();

        // 59 minutes in: still the same window.
        limiter.record_alert_at(1, Utc::now() - Duration::minutes(59));
        limiter.record_alert(1);
        assert_eq!(limiter.current_count(1), 2);
    }

    #[test]
    fn test_zero_max_always_limits() {
        let mut limiter = RateLimiter::new();
        assert!(limiter.is_limited(1, 0));
    }

    #[test]
    fn test_clear_wipes_all_teams() {
        let mut limiter = RateLimiter::new();
        limiter.record_alert(1);
        limiter.record_alert(2);
        assert_eq!(limiter.tracked_teams(), 2);

        limiter.clear();
        assert_eq!(limiter.tracked_teams(), 0);
        assert!(!limiter.is_limited(1, 1));
    }
}

// Property-based tests
#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    // After exactly `max` recorded alerts inside one window, the team is
    // limited; one fewer and it is not.
    #[quickcheck]
    fn prop_limit_boundary(team: i64, max: u8) -> bool {
        let max = u32::from(max % 16) + 1;
        let mut limiter = RateLimiter::new();

        for _ in 0..max - 1 {
            limiter.record_alert(team);
        }
        let below = !limiter.is_limited(team, max);

        limiter.record_alert(team);
        below && limiter.is_limited(team, max)
    }

    // Recording for one team never limits another.
    #[quickcheck]
    fn prop_accounting_is_team_local(a: i64, b: i64, records: u8) -> bool {
        if a == b {
            return true;
        }
        let mut limiter = RateLimiter::new();
        for _ in 0..records {
            limiter.record_alert(a);
        }

        !limiter.is_limited(b, 1)
    }

    // The current count never exceeds the number of records.
    #[quickcheck]
    fn prop_count_matches_records(team: i64, records: u8) -> bool {
        let mut limiter = RateLimiter::new();
        for _ in 0..records {
            limiter.record_alert(team);
        }

        limiter.current_count(team) == u32::from(records)
    }
}
