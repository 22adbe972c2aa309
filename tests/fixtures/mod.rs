//! Test fixtures and store doubles for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use flowmatch::config::MatchmakingSettings;
use flowmatch::error::{MatchmakingError, Result};
use flowmatch::metrics::MetricsCollector;
use flowmatch::room::{RecordingRoomHandoff, RoomAssignment, RoomHandoff};
use flowmatch::store::{
    CounterStore, InMemoryEphemeralStore, InMemoryUserStore, OrderedSetStore, PairRemoval,
    UserStore,
};
use flowmatch::types::{EnterRequest, Profile, UserRecord};
use flowmatch::utils::ManualClock;
use flowmatch::MatchmakingManager;
use mockall::mock;
use std::sync::Arc;

mock! {
    pub Users {}

    #[async_trait]
    impl UserStore for Users {
        async fn touch(&self, device_id: &str, now: DateTime<Utc>) -> Result<UserRecord>;
        async fn find(&self, device_id: &str) -> Result<Option<UserRecord>>;
        async fn increment_reports(&self, device_id: &str, now: DateTime<Utc>) -> Result<UserRecord>;
        async fn set_banned_until(&self, device_id: &str, until: DateTime<Utc>) -> Result<()>;
        async fn clear_expired_ban(&self, device_id: &str, now: DateTime<Utc>) -> Result<bool>;
        async fn save_profile(&self, device_id: &str, profile: Profile, now: DateTime<Utc>) -> Result<()>;
        async fn load_profile(&self, device_id: &str) -> Result<Option<Profile>>;
    }
}

fn durable_down() -> anyhow::Error {
    MatchmakingError::StoreUnavailable {
        store: "users".to_string(),
        message: "connection refused".to_string(),
    }
    .into()
}

/// A user store whose every call fails
pub fn unavailable_user_store() -> MockUsers {
    let mut users = MockUsers::new();
    users.expect_touch().returning(|_, _| Err(durable_down()));
    users.expect_find().returning(|_| Err(durable_down()));
    users
        .expect_increment_reports()
        .returning(|_, _| Err(durable_down()));
    users
        .expect_set_banned_until()
        .returning(|_, _| Err(durable_down()));
    users
        .expect_clear_expired_ban()
        .returning(|_, _| Err(durable_down()));
    users
        .expect_save_profile()
        .returning(|_, _, _| Err(durable_down()));
    users.expect_load_profile().returning(|_| Err(durable_down()));
    users
}

/// Ordered sets and counters that refuse every operation
#[derive(Debug, Default)]
pub struct UnavailableEphemeralStore;

fn ephemeral_down<T>() -> Result<T> {
    Err(MatchmakingError::StoreUnavailable {
        store: "ephemeral".to_string(),
        message: "connection refused".to_string(),
    }
    .into())
}

#[async_trait]
impl OrderedSetStore for UnavailableEphemeralStore {
    async fn insert_if_absent(&self, _set: &str, _member: &str, _score: i64) -> Result<bool> {
        ephemeral_down()
    }

    async fn score(&self, _set: &str, _member: &str) -> Result<Option<i64>> {
        ephemeral_down()
    }

    async fn remove(&self, _set: &str, _member: &str) -> Result<bool> {
        ephemeral_down()
    }

    async fn range_by_rank(
        &self,
        _set: &str,
        _start: usize,
        _stop: usize,
    ) -> Result<Vec<(String, i64)>> {
        ephemeral_down()
    }

    async fn range_by_score(&self, _set: &str, _max_score: i64) -> Result<Vec<(String, i64)>> {
        ephemeral_down()
    }

    async fn cardinality(&self, _set: &str) -> Result<usize> {
        ephemeral_down()
    }

    async fn remove_pair(
        &self,
        _first: (&str, &str),
        _second: (&str, &str),
    ) -> Result<PairRemoval> {
        ephemeral_down()
    }
}

#[async_trait]
impl CounterStore for UnavailableEphemeralStore {
    async fn get(&self, _key: &str) -> Result<Option<i64>> {
        ephemeral_down()
    }

    async fn increment(&self, _key: &str) -> Result<i64> {
        ephemeral_down()
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool> {
        ephemeral_down()
    }
}

/// Hand-off that always fails, to check pairings survive transport errors
#[derive(Debug, Default)]
pub struct FailingRoomHandoff;

#[async_trait]
impl RoomHandoff for FailingRoomHandoff {
    async fn hand_off(&self, _assignment: &RoomAssignment) -> Result<()> {
        Err(MatchmakingError::AmqpConnectionFailed {
            message: "broker gone".to_string(),
        }
        .into())
    }
}

/// Complete in-memory system with controllable time
pub struct TestSystem {
    pub manager: MatchmakingManager,
    pub handoff: Arc<RecordingRoomHandoff>,
    pub users: Arc<InMemoryUserStore>,
    pub clock: Arc<ManualClock>,
    pub metrics: Arc<MetricsCollector>,
}

pub fn create_test_system(settings: MatchmakingSettings) -> TestSystem {
    let clock = Arc::new(ManualClock::default());
    let ephemeral = Arc::new(InMemoryEphemeralStore::new(clock.clone()));
    let users = Arc::new(InMemoryUserStore::new());
    let handoff = Arc::new(RecordingRoomHandoff::new());
    let metrics = Arc::new(MetricsCollector::new().expect("metrics collector"));

    let manager = MatchmakingManager::new(
        ephemeral.clone(),
        ephemeral,
        users.clone(),
        handoff.clone(),
        clock.clone(),
        settings,
        metrics.clone(),
    );

    TestSystem {
        manager,
        handoff,
        users,
        clock,
        metrics,
    }
}

/// Manager over working queues and a durable store that is down
pub fn create_system_with_users_down() -> (MatchmakingManager, Arc<RecordingRoomHandoff>) {
    let clock = Arc::new(ManualClock::default());
    let ephemeral = Arc::new(InMemoryEphemeralStore::new(clock.clone()));
    let handoff = Arc::new(RecordingRoomHandoff::new());

    let manager = MatchmakingManager::new(
        ephemeral.clone(),
        ephemeral,
        Arc::new(unavailable_user_store()),
        handoff.clone(),
        clock,
        MatchmakingSettings::default(),
        Arc::new(MetricsCollector::new().expect("metrics collector")),
    );

    (manager, handoff)
}

/// Manager whose queues and counters are down
pub fn create_system_with_ephemeral_down() -> MatchmakingManager {
    let clock = Arc::new(ManualClock::default());
    let ephemeral = Arc::new(UnavailableEphemeralStore);

    MatchmakingManager::new(
        ephemeral.clone(),
        ephemeral,
        Arc::new(InMemoryUserStore::new()),
        Arc::new(RecordingRoomHandoff::new()),
        clock,
        MatchmakingSettings::default(),
        Arc::new(MetricsCollector::new().expect("metrics collector")),
    )
}

pub fn enter(device_id: &str, gender: &str, preference: &str) -> EnterRequest {
    EnterRequest {
        device_id: device_id.to_string(),
        gender: Some(gender.to_string()),
        preference: Some(preference.to_string()),
        profile: Profile::default(),
    }
}

pub fn enter_with_profile(
    device_id: &str,
    gender: &str,
    preference: &str,
    nickname: &str,
) -> EnterRequest {
    EnterRequest {
        profile: Profile {
            nickname: Some(nickname.to_string()),
            bio: None,
            gender: Some(gender.to_string()),
        },
        ..enter(device_id, gender, preference)
    }
}
