//! Ephemeral store interface and in-memory implementation
//!
//! Queues live in ordered sets keyed by intent and usage counters live in
//! plain self-expiring integer keys. Every operation must be atomic at the
//! store level because matchmaking runs without any external locking.

use crate::error::{MatchmakingError, Result};
use crate::utils::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

/// Outcome of an atomic two-entry removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairRemoval {
    /// Both entries were present and both were removed
    Removed,
    /// The first entry was missing; nothing was removed
    FirstMissing,
    /// The second entry was missing; nothing was removed
    SecondMissing,
    /// Neither entry was present
    BothMissing,
}

/// Ordered-set capability (score-ordered membership sets)
#[async_trait]
pub trait OrderedSetStore: Send + Sync {
    /// Insert `member` with `score` unless it is already present.
    /// Returns false when the member already existed.
    async fn insert_if_absent(&self, set: &str, member: &str, score: i64) -> Result<bool>;

    /// Score of a member, if present
    async fn score(&self, set: &str, member: &str) -> Result<Option<i64>>;

    /// Remove a member if present. Returns true only if this call removed it.
    async fn remove(&self, set: &str, member: &str) -> Result<bool>;

    /// Members by ascending rank, `start..=stop` inclusive
    async fn range_by_rank(&self, set: &str, start: usize, stop: usize)
        -> Result<Vec<(String, i64)>>;

    /// Members with score less than or equal to `max_score`, ascending
    async fn range_by_score(&self, set: &str, max_score: i64) -> Result<Vec<(String, i64)>>;

    /// Number of members in the set
    async fn cardinality(&self, set: &str) -> Result<usize>;

    /// Remove two (set, member) entries together, or neither
    async fn remove_pair(
        &self,
        first: (&str, &str),
        second: (&str, &str),
    ) -> Result<PairRemoval>;
}

/// Plain integer key capability with expiry
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current value, if the key exists and has not expired
    async fn get(&self, key: &str) -> Result<Option<i64>>;

    /// Atomically increment, creating the key at 1. Returns the new value.
    async fn increment(&self, key: &str) -> Result<i64>;

    /// Set a time-to-live on an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
}

/// Score-ordered set. Ties on score keep insertion order.
#[derive(Debug, Default)]
struct SortedSet {
    members: HashMap<String, (i64, u64)>,
    order: BTreeSet<(i64, u64, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: i64, seq: u64) -> bool {
        if self.members.contains_key(member) {
            return false;
        }
        self.members.insert(member.to_string(), (score, seq));
        self.order.insert((score, seq, member.to_string()));
        true
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.members.remove(member) {
            Some((score, seq)) => {
                self.order.remove(&(score, seq, member.to_string()));
                true
            }
            None => false,
        }
    }

    fn contains(&self, member: &str) -> bool {
        self.members.contains_key(member)
    }
}

#[derive(Debug)]
struct Counter {
    value: i64,
    expires_at: Option<DateTime<Utc>>,
}

impl Counter {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct SetSpace {
    sets: HashMap<String, SortedSet>,
    next_seq: u64,
}

/// In-memory ephemeral store backing both queues and usage counters
pub struct InMemoryEphemeralStore {
    sets: RwLock<SetSpace>,
    counters: RwLock<HashMap<String, Counter>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryEphemeralStore {
    /// Create a new in-memory store using `clock` for key expiry
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sets: RwLock::new(SetSpace::default()),
            counters: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Drop expired counters (expiry is otherwise evaluated lazily)
    pub fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut counters = self
            .counters
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("counters write"))?;
        let before = counters.len();
        counters.retain(|_, counter| counter.is_live(now));
        Ok(before - counters.len())
    }
}

#[async_trait]
impl OrderedSetStore for InMemoryEphemeralStore {
    async fn insert_if_absent(&self, set: &str, member: &str, score: i64) -> Result<bool> {
        let mut space = self
            .sets
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("sets write"))?;
        let seq = space.next_seq;
        space.next_seq += 1;
        Ok(space
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member, score, seq))
    }

    async fn score(&self, set: &str, member: &str) -> Result<Option<i64>> {
        let space = self
            .sets
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("sets read"))?;
        Ok(space
            .sets
            .get(set)
            .and_then(|s| s.members.get(member))
            .map(|(score, _)| *score))
    }

    async fn remove(&self, set: &str, member: &str) -> Result<bool> {
        let mut space = self
            .sets
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("sets write"))?;
        Ok(space
            .sets
            .get_mut(set)
            .map(|s| s.remove(member))
            .unwrap_or(false))
    }

    async fn range_by_rank(
        &self,
        set: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<(String, i64)>> {
        if stop < start {
            return Ok(Vec::new());
        }
        let space = self
            .sets
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("sets read"))?;
        Ok(space
            .sets
            .get(set)
            .map(|s| {
                s.order
                    .iter()
                    .skip(start)
                    .take(stop - start + 1)
                    .map(|(score, _, member)| (member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn range_by_score(&self, set: &str, max_score: i64) -> Result<Vec<(String, i64)>> {
        let space = self
            .sets
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("sets read"))?;
        Ok(space
            .sets
            .get(set)
            .map(|s| {
                s.order
                    .iter()
                    .take_while(|(score, _, _)| *score <= max_score)
                    .map(|(score, _, member)| (member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn cardinality(&self, set: &str) -> Result<usize> {
        let space = self
            .sets
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("sets read"))?;
        Ok(space.sets.get(set).map(|s| s.members.len()).unwrap_or(0))
    }

    async fn remove_pair(
        &self,
        first: (&str, &str),
        second: (&str, &str),
    ) -> Result<PairRemoval> {
        let mut space = self
            .sets
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("sets write"))?;

        let present = |space: &SetSpace, (set, member): (&str, &str)| {
            space
                .sets
                .get(set)
                .map(|s| s.contains(member))
                .unwrap_or(false)
        };

        let outcome = match (present(&*space, first), present(&*space, second)) {
            (true, true) => PairRemoval::Removed,
            (false, true) => PairRemoval::FirstMissing,
            (true, false) => PairRemoval::SecondMissing,
            (false, false) => PairRemoval::BothMissing,
        };

        if outcome == PairRemoval::Removed {
            for (set, member) in [first, second] {
                if let Some(s) = space.sets.get_mut(set) {
                    s.remove(member);
                }
            }
        }

        Ok(outcome)
    }
}

#[async_trait]
impl CounterStore for InMemoryEphemeralStore {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let now = self.clock.now();
        let counters = self
            .counters
            .read()
            .map_err(|_| MatchmakingError::lock_poisoned("counters read"))?;
        Ok(counters
            .get(key)
            .filter(|counter| counter.is_live(now))
            .map(|counter| counter.value))
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let now = self.clock.now();
        let mut counters = self
            .counters
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("counters write"))?;

        let counter = counters.entry(key.to_string()).or_insert(Counter {
            value: 0,
            expires_at: None,
        });
        if !counter.is_live(now) {
            counter.value = 0;
            counter.expires_at = None;
        }
        counter.value += 1;
        Ok(counter.value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        let mut counters = self
            .counters
            .write()
            .map_err(|_| MatchmakingError::lock_poisoned("counters write"))?;

        match counters.get_mut(key) {
            Some(counter) if counter.is_live(now) => {
                counter.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;

    fn create_test_store() -> (InMemoryEphemeralStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (InMemoryEphemeralStore::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_insert_if_absent() {
        let (store, _) = create_test_store();

        assert!(store.insert_if_absent("q", "a", 10).await.unwrap());
        assert!(!store.insert_if_absent("q", "a", 20).await.unwrap());
        assert_eq!(store.score("q", "a").await.unwrap(), Some(10));
        assert_eq!(store.cardinality("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_range_orders_by_score_then_insertion() {
        let (store, _) = create_test_store();

        store.insert_if_absent("q", "late", 20).await.unwrap();
        store.insert_if_absent("q", "tie-first", 10).await.unwrap();
        store.insert_if_absent("q", "tie-second", 10).await.unwrap();

        let members: Vec<String> = store
            .range_by_rank("q", 0, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|(member, _)| member)
            .collect();
        assert_eq!(members, vec!["tie-first", "tie-second", "late"]);

        let head = store.range_by_rank("q", 0, 0).await.unwrap();
        assert_eq!(head, vec![("tie-first".to_string(), 10)]);

        let old = store.range_by_score("q", 10).await.unwrap();
        assert_eq!(old.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_is_conditional() {
        let (store, _) = create_test_store();

        store.insert_if_absent("q", "a", 1).await.unwrap();
        assert!(store.remove("q", "a").await.unwrap());
        assert!(!store.remove("q", "a").await.unwrap());
        assert!(!store.remove("missing", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_pair_all_or_nothing() {
        let (store, _) = create_test_store();

        store.insert_if_absent("q1", "a", 1).await.unwrap();
        store.insert_if_absent("q2", "b", 2).await.unwrap();

        let outcome = store.remove_pair(("q1", "a"), ("q2", "zzz")).await.unwrap();
        assert_eq!(outcome, PairRemoval::SecondMissing);
        assert_eq!(store.cardinality("q1").await.unwrap(), 1);

        let outcome = store.remove_pair(("q1", "a"), ("q2", "b")).await.unwrap();
        assert_eq!(outcome, PairRemoval::Removed);
        assert_eq!(store.cardinality("q1").await.unwrap(), 0);
        assert_eq!(store.cardinality("q2").await.unwrap(), 0);

        let outcome = store.remove_pair(("q1", "a"), ("q2", "b")).await.unwrap();
        assert_eq!(outcome, PairRemoval::BothMissing);
    }

    #[tokio::test]
    async fn test_remove_pair_within_one_set() {
        let (store, _) = create_test_store();

        store.insert_if_absent("q", "a", 1).await.unwrap();
        store.insert_if_absent("q", "b", 2).await.unwrap();

        let outcome = store.remove_pair(("q", "a"), ("q", "b")).await.unwrap();
        assert_eq!(outcome, PairRemoval::Removed);
        assert_eq!(store.cardinality("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_counter_expiry() {
        let (store, clock) = create_test_store();

        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.expire("k", Duration::seconds(10)).await.unwrap());

        assert_eq!(store.increment("k").await.unwrap(), 1);
        assert!(store.expire("k", Duration::seconds(10)).await.unwrap());
        assert_eq!(store.increment("k").await.unwrap(), 2);

        clock.advance(Duration::seconds(11));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.increment("k").await.unwrap(), 1);

        clock.advance(Duration::days(1));
        assert_eq!(store.purge_expired().unwrap(), 0);
        store.expire("k", Duration::seconds(1)).await.unwrap();
        clock.advance(Duration::seconds(2));
        assert_eq!(store.purge_expired().unwrap(), 1);
    }
}
