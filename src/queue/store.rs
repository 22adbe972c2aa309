//! Intent-partitioned, time-ordered waiting queues
//!
//! Each of the nine intents owns one ordered set keyed by
//! `queue:{gender}:{preference}`, scored by the enqueue time in milliseconds.

use crate::error::{MatchmakingError, Result};
use crate::store::{OrderedSetStore, PairRemoval};
use crate::types::{DeviceId, Intent, QueueEntry};
use crate::utils::Clock;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// Outcome of an atomic claim of a candidate together with the requester
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Both entries were removed; the pairing is exclusive
    Claimed,
    /// The candidate was taken by someone else; nothing was removed
    CandidateGone,
    /// The requester is no longer queued (already paired or withdrawn)
    RequesterGone,
}

/// Queue operations over an ordered-set capability
#[derive(Clone)]
pub struct QueueStore {
    sets: Arc<dyn OrderedSetStore>,
    clock: Arc<dyn Clock>,
}

impl QueueStore {
    pub fn new(sets: Arc<dyn OrderedSetStore>, clock: Arc<dyn Clock>) -> Self {
        Self { sets, clock }
    }

    /// Add a device to an intent's queue with the current time as its score.
    /// Fails with `AlreadyQueued` if it already waits under this intent.
    pub async fn enqueue(&self, device_id: &str, intent: Intent) -> Result<QueueEntry> {
        let enqueued_at_ms = self.clock.now().timestamp_millis();
        let inserted = self
            .sets
            .insert_if_absent(&intent.queue_key(), device_id, enqueued_at_ms)
            .await?;

        if !inserted {
            return Err(MatchmakingError::AlreadyQueued {
                device_id: device_id.to_string(),
                intent,
            }
            .into());
        }

        debug!("Enqueued {} in {} at {}", device_id, intent, enqueued_at_ms);
        Ok(QueueEntry {
            device_id: device_id.to_string(),
            intent,
            enqueued_at_ms,
        })
    }

    pub async fn is_queued(&self, device_id: &str, intent: Intent) -> Result<bool> {
        Ok(self
            .sets
            .score(&intent.queue_key(), device_id)
            .await?
            .is_some())
    }

    /// Remove a device from an intent's queue. Returns whether an entry was removed.
    pub async fn dequeue(&self, device_id: &str, intent: Intent) -> Result<bool> {
        self.sets.remove(&intent.queue_key(), device_id).await
    }

    /// Oldest waiting entry, without removing it
    pub async fn oldest(&self, intent: Intent) -> Result<Option<QueueEntry>> {
        let head = self.sets.range_by_rank(&intent.queue_key(), 0, 0).await?;
        Ok(head
            .into_iter()
            .next()
            .map(|(device_id, score)| entry(device_id, intent, score)))
    }

    /// Oldest waiting entry that is not `device_id`
    pub async fn oldest_excluding(
        &self,
        intent: Intent,
        device_id: &str,
    ) -> Result<Option<QueueEntry>> {
        // The excluded device can occupy at most one slot, so two suffice
        let head = self.sets.range_by_rank(&intent.queue_key(), 0, 1).await?;
        Ok(head
            .into_iter()
            .find(|(member, _)| member != device_id)
            .map(|(member, score)| entry(member, intent, score)))
    }

    pub async fn count(&self, intent: Intent) -> Result<usize> {
        self.sets.cardinality(&intent.queue_key()).await
    }

    /// Number of devices waiting across every intent
    pub async fn total_waiting(&self) -> Result<usize> {
        let mut total = 0;
        for intent in Intent::all() {
            total += self.count(intent).await?;
        }
        Ok(total)
    }

    /// Every intent under which the device currently waits
    pub async fn find_intents(&self, device_id: &str) -> Result<Vec<Intent>> {
        let mut found = Vec::new();
        for intent in Intent::all() {
            if self.is_queued(device_id, intent).await? {
                found.push(intent);
            }
        }
        Ok(found)
    }

    /// Remove the device from every intent. Returns the intents it was removed from.
    pub async fn withdraw_everywhere(&self, device_id: &str) -> Result<Vec<Intent>> {
        let mut removed = Vec::new();
        for intent in Intent::all() {
            if self.dequeue(device_id, intent).await? {
                removed.push(intent);
            }
        }
        Ok(removed)
    }

    /// Atomically remove both the candidate and the requester, or neither
    pub async fn claim(
        &self,
        candidate: &QueueEntry,
        requester: (&str, Intent),
    ) -> Result<ClaimOutcome> {
        let candidate_key = candidate.intent.queue_key();
        let requester_key = requester.1.queue_key();

        let removal = self
            .sets
            .remove_pair(
                (candidate_key.as_str(), candidate.device_id.as_str()),
                (requester_key.as_str(), requester.0),
            )
            .await?;

        Ok(match removal {
            PairRemoval::Removed => ClaimOutcome::Claimed,
            PairRemoval::FirstMissing => ClaimOutcome::CandidateGone,
            PairRemoval::SecondMissing | PairRemoval::BothMissing => ClaimOutcome::RequesterGone,
        })
    }

    /// Remove every entry enqueued at or before `older_than`
    pub async fn sweep_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<QueueEntry>> {
        let horizon = older_than.timestamp_millis();
        let mut swept = Vec::new();

        for intent in Intent::all() {
            let key = intent.queue_key();
            for (device_id, score) in self.sets.range_by_score(&key, horizon).await? {
                // Only report entries this sweep actually removed
                if self.sets.remove(&key, &device_id).await? {
                    swept.push(entry(device_id, intent, score));
                }
            }
        }

        Ok(swept)
    }
}

fn entry(device_id: DeviceId, intent: Intent, enqueued_at_ms: i64) -> QueueEntry {
    QueueEntry {
        device_id,
        intent,
        enqueued_at_ms,
    }
}
