//! Utility functions for the matchmaking service

use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use std::sync::RwLock;
use uuid::Uuid;

/// Source of "now" for every time-dependent decision (queue ordering, ban
/// expiry, usage-day rollover). Injected so tests can move time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Calendar day used to bucket usage counters
    fn today(&self) -> NaiveDate;
}

/// Wall clock; days follow the host's local calendar
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Manually driven clock for tests; days follow the UTC calendar
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut now) = self.now.write() {
            *now = at;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.write() {
            *now += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.read().map(|now| *now).unwrap_or_else(|_| Utc::now())
    }

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Generate a room ID from both participants and the claim time. The random
/// suffix keeps IDs unique even if the same pair re-matches within a millisecond.
pub fn generate_room_id(first: &str, second: &str, at: DateTime<Utc>) -> String {
    format!(
        "chat_{}_{}_{}_{}",
        first,
        second,
        at.timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_generate_unique_room_ids() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let id1 = generate_room_id("a", "b", at);
        let id2 = generate_room_id("a", "b", at);
        assert_ne!(id1, id2);
        assert!(id1.starts_with(&format!("chat_a_b_{}_", at.timestamp_millis())));
    }

    #[test]
    fn test_manual_clock() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 23, 30, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());

        clock.advance(Duration::hours(1));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());

        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
