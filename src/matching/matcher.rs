//! Partner search with atomic claim-or-retry pairing
//!
//! For each probe target the matcher peeks at the oldest waiting entry that
//! is not the requester and tries to remove that entry and the requester's
//! own entry in one atomic step. A lost race on the candidate moves on to the
//! next-oldest entry of the same queue; a lost race on the requester means a
//! concurrent search already paired it, so the search ends empty-handed.

use crate::error::Result;
use crate::matching::probe::probe_targets;
use crate::queue::{ClaimOutcome, QueueStore};
use crate::types::{Intent, QueueEntry};
use async_trait::async_trait;
use tracing::{debug, info};

/// Result of a single partner search
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchAttempt {
    /// The claimed partner, if the search succeeded
    pub partner: Option<QueueEntry>,
    /// Claims lost to concurrent searches
    pub claim_conflicts: u32,
    /// True when the requester itself was claimed by someone else mid-search
    pub requester_gone: bool,
}

impl MatchAttempt {
    pub fn is_match(&self) -> bool {
        self.partner.is_some()
    }
}

/// Trait for partner search strategies
#[async_trait]
pub trait PartnerMatcher: Send + Sync {
    /// Search for a partner for a device already queued under `intent`.
    /// On success both entries have been removed from their queues.
    async fn find_partner(&self, device_id: &str, intent: Intent) -> Result<MatchAttempt>;
}

/// Reciprocal-compatibility matcher driven by the probe table
#[derive(Clone)]
pub struct CompatibilityMatcher {
    queue: QueueStore,
    max_claim_attempts: u32,
}

impl CompatibilityMatcher {
    pub fn new(queue: QueueStore, max_claim_attempts: u32) -> Self {
        Self {
            queue,
            max_claim_attempts,
        }
    }
}

#[async_trait]
impl PartnerMatcher for CompatibilityMatcher {
    async fn find_partner(&self, device_id: &str, intent: Intent) -> Result<MatchAttempt> {
        let mut attempt = MatchAttempt::default();

        for target in probe_targets(intent) {
            while let Some(candidate) = self.queue.oldest_excluding(target, device_id).await? {
                match self.queue.claim(&candidate, (device_id, intent)).await? {
                    ClaimOutcome::Claimed => {
                        info!(
                            "Paired {} ({}) with {} ({})",
                            device_id, intent, candidate.device_id, candidate.intent
                        );
                        attempt.partner = Some(candidate);
                        return Ok(attempt);
                    }
                    ClaimOutcome::CandidateGone => {
                        attempt.claim_conflicts += 1;
                        debug!(
                            "Lost claim on {} in {} ({} conflicts)",
                            candidate.device_id, target, attempt.claim_conflicts
                        );
                        if attempt.claim_conflicts >= self.max_claim_attempts {
                            break;
                        }
                    }
                    ClaimOutcome::RequesterGone => {
                        debug!("{} was claimed by a concurrent search", device_id);
                        attempt.requester_gone = true;
                        return Ok(attempt);
                    }
                }
            }
        }

        debug!("No partner available for {} in {}", device_id, intent);
        Ok(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryEphemeralStore;
    use crate::types::{Gender, Preference};
    use crate::utils::ManualClock;
    use chrono::Duration;
    use std::sync::Arc;

    fn create_test_matcher() -> (CompatibilityMatcher, QueueStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemoryEphemeralStore::new(clock.clone()));
        let queue = QueueStore::new(store, clock.clone());
        (CompatibilityMatcher::new(queue.clone(), 16), queue, clock)
    }

    #[tokio::test]
    async fn test_reciprocal_match() {
        let (matcher, queue, _) = create_test_matcher();
        let female_for_male = Intent::new(Gender::Female, Preference::Male);
        let male_for_female = Intent::new(Gender::Male, Preference::Female);

        queue.enqueue("a", female_for_male).await.unwrap();
        assert!(!matcher.find_partner("a", female_for_male).await.unwrap().is_match());

        queue.enqueue("b", male_for_female).await.unwrap();
        let attempt = matcher.find_partner("b", male_for_female).await.unwrap();
        assert_eq!(attempt.partner.unwrap().device_id, "a");
        assert_eq!(queue.total_waiting().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_any_fallback() {
        let (matcher, queue, _) = create_test_matcher();
        let female_any = Intent::new(Gender::Female, Preference::Any);
        let male_for_female = Intent::new(Gender::Male, Preference::Female);

        queue.enqueue("c", female_any).await.unwrap();
        queue.enqueue("d", male_for_female).await.unwrap();

        let attempt = matcher.find_partner("d", male_for_female).await.unwrap();
        assert_eq!(attempt.partner.unwrap().device_id, "c");
    }

    #[tokio::test]
    async fn test_no_self_match_but_same_intent_pairs() {
        let (matcher, queue, clock) = create_test_matcher();
        let female_for_female = Intent::new(Gender::Female, Preference::Female);

        queue.enqueue("solo", female_for_female).await.unwrap();
        let attempt = matcher.find_partner("solo", female_for_female).await.unwrap();
        assert!(!attempt.is_match());
        assert!(queue.is_queued("solo", female_for_female).await.unwrap());

        clock.advance(Duration::milliseconds(1));
        queue.enqueue("second", female_for_female).await.unwrap();
        let attempt = matcher.find_partner("second", female_for_female).await.unwrap();
        assert_eq!(attempt.partner.unwrap().device_id, "solo");
    }

    #[tokio::test]
    async fn test_oldest_compatible_wins() {
        let (matcher, queue, clock) = create_test_matcher();
        let female_for_male = Intent::new(Gender::Female, Preference::Male);
        let male_for_female = Intent::new(Gender::Male, Preference::Female);

        queue.enqueue("early", female_for_male).await.unwrap();
        clock.advance(Duration::milliseconds(10));
        queue.enqueue("late", female_for_male).await.unwrap();
        queue.enqueue("m", male_for_female).await.unwrap();

        let attempt = matcher.find_partner("m", male_for_female).await.unwrap();
        assert_eq!(attempt.partner.unwrap().device_id, "early");
        assert!(queue.is_queued("late", female_for_male).await.unwrap());
    }

    #[tokio::test]
    async fn test_requester_already_claimed() {
        let (matcher, queue, _) = create_test_matcher();
        let female_for_male = Intent::new(Gender::Female, Preference::Male);
        let male_for_female = Intent::new(Gender::Male, Preference::Female);

        queue.enqueue("f", female_for_male).await.unwrap();
        // Requester is not queued at all
        let attempt = matcher.find_partner("m", male_for_female).await.unwrap();
        assert!(attempt.requester_gone);
        assert!(!attempt.is_match());
        assert!(queue.is_queued("f", female_for_male).await.unwrap());
    }

    #[tokio::test]
    async fn test_incompatible_queues_are_not_searched() {
        let (matcher, queue, _) = create_test_matcher();
        let male_for_male = Intent::new(Gender::Male, Preference::Male);
        let female_for_male = Intent::new(Gender::Female, Preference::Male);
        let other_any = Intent::new(Gender::Other, Preference::Any);

        queue.enqueue("mm", male_for_male).await.unwrap();
        queue.enqueue("o", other_any).await.unwrap();
        queue.enqueue("fm", female_for_male).await.unwrap();

        let attempt = matcher.find_partner("fm", female_for_male).await.unwrap();
        assert!(!attempt.is_match());
        assert_eq!(queue.total_waiting().await.unwrap(), 3);
    }
}
