//! Report counting and temporary bans
//!
//! A device accumulates reports until the count exceeds the configured
//! threshold, at which point it is banned for a fixed duration. An expired ban
//! is reclaimed lazily: `check_ban` always reconciles the record first, which
//! also resets the report count so the device starts over.

use crate::error::{MatchmakingError, Result};
use crate::store::UserStore;
use crate::types::{ReportOutcome, UserRecord};
use crate::utils::Clock;
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info};

/// Ban state of a device at the time of the check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BanStatus {
    pub is_banned: bool,
    /// Time left on the ban; zero when not banned
    pub remaining: Duration,
}

impl BanStatus {
    pub fn clear() -> Self {
        Self {
            is_banned: false,
            remaining: Duration::zero(),
        }
    }
}

/// Ban and report gate over the durable user store
#[derive(Clone)]
pub struct BanGate {
    users: Arc<dyn UserStore>,
    clock: Arc<dyn Clock>,
    report_ban_threshold: u32,
    ban_duration: Duration,
}

impl BanGate {
    pub fn new(
        users: Arc<dyn UserStore>,
        clock: Arc<dyn Clock>,
        report_ban_threshold: u32,
        ban_duration: Duration,
    ) -> Self {
        Self {
            users,
            clock,
            report_ban_threshold,
            ban_duration,
        }
    }

    /// Record that the device was seen now, creating its record on first contact
    pub async fn touch(&self, device_id: &str) -> Result<UserRecord> {
        self.users.touch(device_id, self.clock.now()).await
    }

    /// Clear an elapsed ban and reset the report count.
    /// Returns true if this call performed the reset.
    pub async fn reconcile_expired_ban(&self, device_id: &str) -> Result<bool> {
        let reset = self
            .users
            .clear_expired_ban(device_id, self.clock.now())
            .await?;
        if reset {
            info!("Ban expired for {}, report count reset", device_id);
        }
        Ok(reset)
    }

    /// Whether the device is currently banned, and for how much longer
    pub async fn check_ban(&self, device_id: &str) -> Result<BanStatus> {
        self.reconcile_expired_ban(device_id).await?;

        let now = self.clock.now();
        let status = match self.users.find(device_id).await? {
            Some(UserRecord {
                banned_until: Some(until),
                ..
            }) if until > now => BanStatus {
                is_banned: true,
                remaining: until - now,
            },
            _ => BanStatus::clear(),
        };

        debug!("Ban check for {}: {:?}", device_id, status);
        Ok(status)
    }

    /// Count a report against `target_id`, banning it once the count exceeds
    /// the threshold
    pub async fn report(&self, target_id: &str) -> Result<ReportOutcome> {
        let now = self.clock.now();
        let mut record = self.users.increment_reports(target_id, now).await?;

        if record.report_count <= self.report_ban_threshold {
            debug!(
                "Report recorded against {} ({} of {})",
                target_id, record.report_count, self.report_ban_threshold
            );
            return Ok(ReportOutcome {
                banned: false,
                record: Some(record),
            });
        }

        let until = now.checked_add_signed(self.ban_duration).ok_or_else(|| {
            MatchmakingError::InternalError {
                message: format!("Ban duration {} overflows", self.ban_duration),
            }
        })?;
        self.users.set_banned_until(target_id, until).await?;
        record.banned_until = Some(until);

        info!(
            "Device {} banned until {} after {} reports",
            target_id, until, record.report_count
        );
        Ok(ReportOutcome {
            banned: true,
            record: Some(record),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryUserStore;
    use crate::utils::ManualClock;

    fn create_test_gate(threshold: u32) -> (BanGate, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let gate = BanGate::new(
            Arc::new(InMemoryUserStore::new()),
            clock.clone(),
            threshold,
            Duration::hours(24),
        );
        (gate, clock)
    }

    #[tokio::test]
    async fn test_new_device_is_not_banned() {
        let (gate, _) = create_test_gate(10);

        let record = gate.touch("d1").await.unwrap();
        assert_eq!(record.report_count, 0);
        assert_eq!(gate.check_ban("d1").await.unwrap(), BanStatus::clear());
        assert_eq!(gate.check_ban("never-seen").await.unwrap(), BanStatus::clear());
    }

    #[tokio::test]
    async fn test_ban_after_threshold_exceeded() {
        let (gate, _) = create_test_gate(10);

        for _ in 0..10 {
            let outcome = gate.report("target").await.unwrap();
            assert!(!outcome.banned);
        }
        assert!(!gate.check_ban("target").await.unwrap().is_banned);

        let outcome = gate.report("target").await.unwrap();
        assert!(outcome.banned);
        assert_eq!(outcome.record.unwrap().report_count, 11);

        let status = gate.check_ban("target").await.unwrap();
        assert!(status.is_banned);
        assert_eq!(status.remaining, Duration::hours(24));
    }

    #[tokio::test]
    async fn test_expired_ban_is_reconciled() {
        let (gate, clock) = create_test_gate(1);

        gate.report("target").await.unwrap();
        assert!(gate.report("target").await.unwrap().banned);

        clock.advance(Duration::hours(23));
        let status = gate.check_ban("target").await.unwrap();
        assert!(status.is_banned);
        assert_eq!(status.remaining, Duration::hours(1));

        clock.advance(Duration::hours(1));
        assert_eq!(gate.check_ban("target").await.unwrap(), BanStatus::clear());

        // The count restarted from zero
        let outcome = gate.report("target").await.unwrap();
        assert!(!outcome.banned);
        assert_eq!(outcome.record.unwrap().report_count, 1);
    }

    #[tokio::test]
    async fn test_unrepresentable_ban_expiry_is_an_error() {
        let gate = BanGate::new(
            Arc::new(InMemoryUserStore::new()),
            Arc::new(ManualClock::default()),
            0,
            Duration::MAX,
        );

        assert!(gate.report("target").await.is_err());
        assert!(!gate.check_ban("target").await.unwrap().is_banned);
    }
}
