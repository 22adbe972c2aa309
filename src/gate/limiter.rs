//! Per-device daily usage limit
//!
//! Counters live under `limit:{device_id}:{YYYY-MM-DD}` and expire on their
//! own, so a new calendar day always starts from zero.

use crate::error::Result;
use crate::store::CounterStore;
use crate::utils::Clock;
use chrono::Duration;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct RateLimiter {
    counters: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    daily_limit: u32,
    counter_ttl: Duration,
}

impl RateLimiter {
    pub fn new(
        counters: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        daily_limit: u32,
        counter_ttl: Duration,
    ) -> Self {
        Self {
            counters,
            clock,
            daily_limit,
            counter_ttl,
        }
    }

    /// Key of today's counter for a device
    pub fn usage_key(&self, device_id: &str) -> String {
        format!(
            "limit:{}:{}",
            device_id,
            self.clock.today().format("%Y-%m-%d")
        )
    }

    /// Uses consumed today
    pub async fn usage(&self, device_id: &str) -> Result<i64> {
        Ok(self
            .counters
            .get(&self.usage_key(device_id))
            .await?
            .unwrap_or(0))
    }

    /// True while today's count is below the daily limit. This is only a
    /// read; concurrent callers can both see room for one more, so the count
    /// returned by [`Self::increment_usage`] is the binding check.
    pub async fn allowed(&self, device_id: &str) -> Result<bool> {
        Ok(self.usage(device_id).await? < i64::from(self.daily_limit))
    }

    /// Consume one unit of today's allowance and return the new count
    pub async fn increment_usage(&self, device_id: &str) -> Result<i64> {
        let key = self.usage_key(device_id);
        let count = self.counters.increment(&key).await?;
        if count == 1 {
            self.counters.expire(&key, self.counter_ttl).await?;
        }
        debug!("Usage for {} is now {}/{}", device_id, count, self.daily_limit);
        Ok(count)
    }
}
