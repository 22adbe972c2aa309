//! Durable user record interface and in-memory implementation
//!
//! Records carry the report counter, ban expiry and the last submitted
//! profile. Implementations must make each method atomic per record:
//! `increment_reports` is a field-level increment and `clear_expired_ban`
//! a conditional update.

use crate::error::{MatchmakingError, Result};
use crate::types::{Profile, UserRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// Trait for durable user record operations
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Upsert a record, setting `last_online` to `now`
    async fn touch(&self, device_id: &str, now: DateTime<Utc>) -> Result<UserRecord>;

    /// Find a record
    async fn find(&self, device_id: &str) -> Result<Option<UserRecord>>;

    /// Upsert and atomically increment the report count, returning the
    /// post-increment record
    async fn increment_reports(&self, device_id: &str, now: DateTime<Utc>) -> Result<UserRecord>;

    /// Set the ban expiry on an existing record
    async fn set_banned_until(&self, device_id: &str, until: DateTime<Utc>) -> Result<()>;

    /// If the ban expiry is present and not after `now`, clear it and reset the
    /// report count. Returns true if this call performed the reset.
    async fn clear_expired_ban(&self, device_id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Store the latest public profile for a device, creating its record at
    /// `now` on first contact
    async fn save_profile(
        &self,
        device_id: &str,
        profile: Profile,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Load the latest public profile for a device
    async fn load_profile(&self, device_id: &str) -> Result<Option<Profile>>;
}

#[derive(Debug, Clone)]
struct StoredUser {
    record: UserRecord,
    profile: Option<Profile>,
}

/// In-memory user record storage
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<String, StoredUser>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known devices
    pub fn len(&self) -> Result<usize> {
        let users = self
            .users
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("users read"))?;
        Ok(users.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn upsert<'a>(
        users: &'a mut HashMap<String, StoredUser>,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> &'a mut StoredUser {
        users
            .entry(device_id.to_string())
            .or_insert_with(|| StoredUser {
                record: UserRecord::new(device_id.to_string(), now),
                profile: None,
            })
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn touch(&self, device_id: &str, now: DateTime<Utc>) -> Result<UserRecord> {
        let mut users = self
            .users
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("users write"))?;
        let user = Self::upsert(&mut users, device_id, now);
        user.record.last_online = now;
        Ok(user.record.clone())
    }

    async fn find(&self, device_id: &str) -> Result<Option<UserRecord>> {
        let users = self
            .users
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("users read"))?;
        Ok(users.get(device_id).map(|user| user.record.clone()))
    }

    async fn increment_reports(&self, device_id: &str, now: DateTime<Utc>) -> Result<UserRecord> {
        let mut users = self
            .users
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("users write"))?;
        let user = Self::upsert(&mut users, device_id, now);
        user.record.report_count = user.record.report_count.saturating_add(1);
        Ok(user.record.clone())
    }

    async fn set_banned_until(&self, device_id: &str, until: DateTime<Utc>) -> Result<()> {
        let mut users = self
            .users
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("users write"))?;
        let user = users
            .get_mut(device_id)
            .ok_or_else(|| MatchmakingError::InternalError {
                message: format!("No user record for {}", device_id),
            })?;
        user.record.banned_until = Some(until);
        Ok(())
    }

    async fn clear_expired_ban(&self, device_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut users = self
            .users
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("users write"))?;
        match users.get_mut(device_id) {
            Some(user) if user.record.banned_until.is_some_and(|until| until <= now) => {
                user.record.banned_until = None;
                user.record.report_count = 0;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn save_profile(
        &self,
        device_id: &str,
        profile: Profile,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut users = self
            .users
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("users write"))?;
        Self::upsert(&mut users, device_id, now).profile = Some(profile);
        Ok(())
    }

    async fn load_profile(&self, device_id: &str) -> Result<Option<Profile>> {
        let users = self
            .users
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("users read"))?;
        Ok(users.get(device_id).and_then(|user| user.profile.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_touch_creates_then_updates() {
        let store = InMemoryUserStore::new();
        let t0 = Utc::now();

        let created = store.touch("d1", t0).await.unwrap();
        assert_eq!(created.report_count, 0);
        assert!(created.banned_until.is_none());
        assert_eq!(created.created_at, t0);

        let later = t0 + Duration::minutes(5);
        let touched = store.touch("d1", later).await.unwrap();
        assert_eq!(touched.last_online, later);
        assert_eq!(touched.created_at, t0);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_increment_reports_upserts() {
        let store = InMemoryUserStore::new();
        let now = Utc::now();

        let record = store.increment_reports("target", now).await.unwrap();
        assert_eq!(record.report_count, 1);
        let record = store.increment_reports("target", now).await.unwrap();
        assert_eq!(record.report_count, 2);
    }

    #[tokio::test]
    async fn test_clear_expired_ban_is_conditional() {
        let store = InMemoryUserStore::new();
        let now = Utc::now();

        store.increment_reports("d1", now).await.unwrap();
        store
            .set_banned_until("d1", now + Duration::hours(1))
            .await
            .unwrap();

        assert!(!store.clear_expired_ban("d1", now).await.unwrap());
        assert_eq!(store.find("d1").await.unwrap().unwrap().report_count, 1);

        let after = now + Duration::hours(2);
        assert!(store.clear_expired_ban("d1", after).await.unwrap());
        let record = store.find("d1").await.unwrap().unwrap();
        assert_eq!(record.report_count, 0);
        assert!(record.banned_until.is_none());

        assert!(!store.clear_expired_ban("unknown", after).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_banned_until_requires_record() {
        let store = InMemoryUserStore::new();
        assert!(store.set_banned_until("ghost", Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_profile_roundtrip() {
        let store = InMemoryUserStore::new();
        assert!(store.load_profile("d1").await.unwrap().is_none());

        let profile = Profile {
            nickname: Some("moth".to_string()),
            bio: None,
            gender: Some("female".to_string()),
        };
        let at = Utc::now() - Duration::days(3);
        store.save_profile("d1", profile.clone(), at).await.unwrap();
        assert_eq!(store.load_profile("d1").await.unwrap(), Some(profile));

        // A record first created by a profile save carries the caller's time
        let record = store.find("d1").await.unwrap().unwrap();
        assert_eq!(record.created_at, at);
        assert_eq!(record.last_online, at);
    }
}
