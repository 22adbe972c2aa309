//! Matchmaking manager orchestrating admission, pairing, reports and withdrawal
//!
//! The manager is the single entry point for callers. It validates the
//! request, runs the ban and rate gates, records the device in its intent's
//! queue and immediately searches for a partner. Durable-store failures are
//! tolerated (the request proceeds as if the device were clean); ephemeral
//! store failures abort the call.

use crate::config::MatchmakingSettings;
use crate::error::{is_already_queued, MatchmakingError, Result};
use crate::gate::{BanGate, RateLimiter};
use crate::matching::{CompatibilityMatcher, PartnerMatcher};
use crate::metrics::MetricsCollector;
use crate::queue::QueueStore;
use crate::room::{RoomAllocator, RoomHandoff};
use crate::store::{CounterStore, OrderedSetStore, UserStore};
use crate::types::{
    AdmissionOutcome, EnterRequest, Intent, LeaveRequest, Pairing, QueueEntry, Rejection,
    ReportOutcome,
};
use crate::utils::Clock;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

/// Snapshot of matchmaking activity
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchmakingStats {
    /// Devices accepted into a queue
    pub admissions: u64,
    /// Refused admissions by reason label
    pub rejections: HashMap<String, u64>,
    /// Rooms created
    pub matches: u64,
    /// Claims lost to concurrent searches
    pub claim_conflicts: u64,
    /// Reports accepted
    pub reports: u64,
    /// Bans issued
    pub bans: u64,
    /// Durable store failures tolerated
    pub durable_degraded: u64,
    /// Rooms the transport could not be told about
    pub handoff_failures: u64,
    /// Entries removed by the staleness sweep
    pub stale_swept: u64,
    /// Last tolerated durable store failure
    pub last_degraded_at: Option<DateTime<Utc>>,
    /// Devices currently waiting across all queues
    pub waiting: usize,
    /// Devices currently waiting, per queue
    pub waiting_by_intent: Vec<(Intent, usize)>,
}

impl MatchmakingStats {
    /// Total refused admissions
    pub fn total_rejections(&self) -> u64 {
        self.rejections.values().sum()
    }
}

/// Result of the admission step, before any partner search
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub device_id: String,
    /// Outcome so far; `pairing` is filled in by the search
    pub outcome: AdmissionOutcome,
    /// Intent to search under, for accepted and already-queued devices
    pub search: Option<Intent>,
}

/// The main matchmaking manager
#[derive(Clone)]
pub struct MatchmakingManager {
    queue: QueueStore,
    limiter: RateLimiter,
    bans: BanGate,
    users: Arc<dyn UserStore>,
    matcher: Arc<dyn PartnerMatcher>,
    rooms: RoomAllocator,
    clock: Arc<dyn Clock>,
    settings: MatchmakingSettings,
    /// Manager statistics
    stats: Arc<RwLock<MatchmakingStats>>,
    /// Metrics collector for recording performance data
    metrics_collector: Arc<MetricsCollector>,
}

impl MatchmakingManager {
    /// Create a manager over the given store capabilities
    pub fn new(
        sets: Arc<dyn OrderedSetStore>,
        counters: Arc<dyn CounterStore>,
        users: Arc<dyn UserStore>,
        handoff: Arc<dyn RoomHandoff>,
        clock: Arc<dyn Clock>,
        settings: MatchmakingSettings,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        let queue = QueueStore::new(sets, clock.clone());
        let matcher = Arc::new(CompatibilityMatcher::new(
            queue.clone(),
            settings.max_claim_attempts,
        ));

        Self {
            limiter: RateLimiter::new(
                counters,
                clock.clone(),
                settings.daily_limit,
                settings.usage_counter_ttl(),
            ),
            bans: BanGate::new(
                users.clone(),
                clock.clone(),
                settings.report_ban_threshold,
                settings.ban_duration(),
            ),
            rooms: RoomAllocator::new(users.clone(), handoff),
            queue,
            users,
            matcher,
            clock,
            settings,
            stats: Arc::new(RwLock::new(MatchmakingStats::default())),
            metrics_collector,
        }
    }

    /// Replace the partner search strategy
    pub fn with_matcher(mut self, matcher: Arc<dyn PartnerMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Queue operations, for callers that need direct inspection
    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn ban_gate(&self) -> &BanGate {
        &self.bans
    }

    /// Admit a device into matchmaking and try to pair it right away
    pub async fn try_enter_and_match(&self, request: EnterRequest) -> Result<AdmissionOutcome> {
        let admission = self.admit(request).await?;
        let mut outcome = admission.outcome;

        if let Some(intent) = admission.search {
            outcome.pairing = self.find_match(&admission.device_id, intent).await?;
        }
        Ok(outcome)
    }

    /// Run the gates and record the device in its intent's queue, without
    /// searching. Callers that announce admissions do so between this and
    /// [`Self::find_match`].
    pub async fn admit(&self, request: EnterRequest) -> Result<Admission> {
        let timer = self.metrics_collector.start_timer();
        let device_id = request.device_id.as_str();

        if device_id.trim().is_empty() {
            return Err(MatchmakingError::InvalidRequest {
                reason: "Device id required".to_string(),
            }
            .into());
        }

        let intent = match Intent::parse(request.gender.as_deref(), request.preference.as_deref())
        {
            Ok(intent) => intent,
            Err(e) => {
                let detail = match e {
                    MatchmakingError::InvalidIntent { reason } => reason,
                    other => other.to_string(),
                };
                return Ok(self.reject(device_id, Rejection::InvalidIntent { detail }));
            }
        };

        debug!("Admission request from {} for {}", device_id, intent);

        // Durable gating fails open
        if let Err(e) = self.bans.touch(device_id).await {
            self.note_degraded("touch", device_id, &e);
        }
        match self.bans.check_ban(device_id).await {
            Ok(status) if status.is_banned => {
                return Ok(self.reject(
                    device_id,
                    Rejection::Banned {
                        remaining_ms: status.remaining.num_milliseconds(),
                    },
                ));
            }
            Ok(_) => {}
            Err(e) => self.note_degraded("check_ban", device_id, &e),
        }
        if let Err(e) = self
            .users
            .save_profile(device_id, request.profile.clone(), self.clock.now())
            .await
        {
            self.note_degraded("save_profile", device_id, &e);
        }

        if self.queue.is_queued(device_id, intent).await? {
            return Ok(self.already_queued(device_id, intent));
        }

        if intent.preference.is_targeted() && !self.limiter.allowed(device_id).await? {
            return Ok(self.reject(device_id, Rejection::RateLimited));
        }

        // A device waits under at most one intent
        for previous in self.queue.withdraw_everywhere(device_id).await? {
            info!("Moved {} out of {} before joining {}", device_id, previous, intent);
        }

        match self.queue.enqueue(device_id, intent).await {
            Ok(_) => {}
            Err(e) if is_already_queued(&e) => return Ok(self.already_queued(device_id, intent)),
            Err(e) => return Err(e),
        }

        // The entry only stands once today's usage has been charged
        if intent.preference.is_targeted() {
            let used = match self.limiter.increment_usage(device_id).await {
                Ok(used) => used,
                Err(e) => {
                    self.undo_enqueue(device_id, intent).await;
                    return Err(e);
                }
            };
            if used > i64::from(self.settings.daily_limit) {
                self.undo_enqueue(device_id, intent).await;
                return Ok(self.reject(device_id, Rejection::RateLimited));
            }
            debug!("{} has used {} targeted searches today", device_id, used);
        }

        self.update_stats(|stats| stats.admissions += 1);
        self.metrics_collector
            .record_admission(intent.preference, timer.stop());
        info!("{} joined {}", device_id, intent);

        Ok(Admission {
            device_id: device_id.to_string(),
            outcome: AdmissionOutcome {
                accepted: true,
                rejection: None,
                pairing: None,
            },
            search: Some(intent),
        })
    }

    /// Search for a partner for a device already waiting under `intent`.
    /// On success the room has been allocated and handed off.
    pub async fn find_match(&self, device_id: &str, intent: Intent) -> Result<Option<Pairing>> {
        let timer = self.metrics_collector.start_timer();
        let attempt = self.matcher.find_partner(device_id, intent).await?;

        self.metrics_collector.record_match_search(
            attempt.is_match(),
            attempt.claim_conflicts,
            timer.stop(),
        );
        if attempt.claim_conflicts > 0 {
            self.update_stats(|stats| stats.claim_conflicts += u64::from(attempt.claim_conflicts));
        }

        let Some(partner) = attempt.partner else {
            return Ok(None);
        };

        let assignment = self
            .rooms
            .allocate((device_id, intent), &partner, self.clock.now())
            .await;
        if assignment.profile_lookup_failures > 0 {
            self.record_degraded("load_profile", u64::from(assignment.profile_lookup_failures));
        }

        if let Err(e) = self.rooms.hand_off(&assignment).await {
            error!("Failed to hand off room {}: {}", assignment.room_id, e);
            self.update_stats(|stats| stats.handoff_failures += 1);
            self.metrics_collector.record_handoff_failure();
        }

        self.update_stats(|stats| stats.matches += 1);
        info!(
            "Room {} created for {} and {}",
            assignment.room_id, device_id, partner.device_id
        );

        Ok(Some(assignment.requester_pairing()))
    }

    /// Count a report against the partner of a room
    pub async fn report_partner(
        &self,
        reporter_id: &str,
        room_id: &str,
        target_id: &str,
    ) -> Result<ReportOutcome> {
        if reporter_id.trim().is_empty() || target_id.trim().is_empty() {
            return Err(MatchmakingError::InvalidRequest {
                reason: "Reporter and target are required".to_string(),
            }
            .into());
        }
        if reporter_id == target_id {
            return Err(MatchmakingError::InvalidRequest {
                reason: "A device cannot report itself".to_string(),
            }
            .into());
        }

        match self.bans.report(target_id).await {
            Ok(outcome) => {
                info!(
                    "{} reported {} in room {} (banned: {})",
                    reporter_id, target_id, room_id, outcome.banned
                );
                self.update_stats(|stats| {
                    stats.reports += 1;
                    if outcome.banned {
                        stats.bans += 1;
                    }
                });
                self.metrics_collector.record_report(outcome.banned);
                Ok(outcome)
            }
            Err(e) => {
                self.note_degraded("report", target_id, &e);
                Ok(ReportOutcome {
                    banned: false,
                    record: None,
                })
            }
        }
    }

    /// Withdraw a device. An unrecognized intent withdraws it from every queue.
    /// Returns the intents it was removed from.
    pub async fn leave_queue(&self, request: &LeaveRequest) -> Result<Vec<Intent>> {
        let removed = match Intent::parse(request.gender.as_deref(), request.preference.as_deref())
        {
            Ok(intent) => {
                if self.queue.dequeue(&request.device_id, intent).await? {
                    vec![intent]
                } else {
                    Vec::new()
                }
            }
            Err(_) => self.queue.withdraw_everywhere(&request.device_id).await?,
        };

        if removed.is_empty() {
            debug!("{} was not waiting", request.device_id);
        } else {
            info!("{} left {:?}", request.device_id, removed);
        }
        Ok(removed)
    }

    /// Remove entries older than the configured horizon. Does nothing when
    /// the sweep is disabled.
    pub async fn sweep_stale_entries(&self) -> Result<Vec<QueueEntry>> {
        let Some(age) = self.settings.stale_entry_age() else {
            return Ok(Vec::new());
        };

        let horizon = self.clock.now() - age;
        let swept = self.queue.sweep_stale(horizon).await?;

        if !swept.is_empty() {
            info!("Swept {} stale queue entries", swept.len());
            self.update_stats(|stats| stats.stale_swept += swept.len() as u64);
            self.metrics_collector.record_stale_swept(swept.len());
        }
        Ok(swept)
    }

    /// Current statistics, including live queue sizes
    pub async fn get_stats(&self) -> Result<MatchmakingStats> {
        let mut snapshot = self
            .stats
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            })?
            .clone();

        let mut waiting_by_intent = Vec::with_capacity(9);
        for intent in Intent::all() {
            waiting_by_intent.push((intent, self.queue.count(intent).await?));
        }
        snapshot.waiting = waiting_by_intent.iter().map(|(_, n)| n).sum();
        snapshot.waiting_by_intent = waiting_by_intent;

        Ok(snapshot)
    }

    /// True if a durable store failure was tolerated within `window`
    pub fn degraded_within(&self, window: Duration) -> bool {
        let now = self.clock.now();
        self.stats
            .read()
            .ok()
            .and_then(|stats| stats.last_degraded_at)
            .is_some_and(|at| now - at <= window)
    }

    /// The waiting entry may have become matchable since it was queued, so
    /// the device is still searched for
    fn already_queued(&self, device_id: &str, intent: Intent) -> Admission {
        let rejection = Rejection::AlreadyQueued;
        self.record_rejection(device_id, &rejection);
        Admission {
            device_id: device_id.to_string(),
            outcome: AdmissionOutcome::rejected(rejection),
            search: Some(intent),
        }
    }

    async fn undo_enqueue(&self, device_id: &str, intent: Intent) {
        if let Err(e) = self.queue.dequeue(device_id, intent).await {
            error!("Failed to withdraw {} from {}: {}", device_id, intent, e);
        }
    }

    fn reject(&self, device_id: &str, rejection: Rejection) -> Admission {
        self.record_rejection(device_id, &rejection);
        Admission {
            device_id: device_id.to_string(),
            outcome: AdmissionOutcome::rejected(rejection),
            search: None,
        }
    }

    fn record_rejection(&self, device_id: &str, rejection: &Rejection) {
        info!("Rejected {}: {}", device_id, rejection.message());
        self.metrics_collector.record_rejection(rejection);
        self.update_stats(|stats| {
            *stats
                .rejections
                .entry(rejection.label().to_string())
                .or_insert(0) += 1;
        });
    }

    fn note_degraded(&self, operation: &str, device_id: &str, error: &anyhow::Error) {
        warn!(
            "Durable store {} failed for {}, continuing: {}",
            operation, device_id, error
        );
        self.record_degraded(operation, 1);
    }

    fn record_degraded(&self, operation: &str, count: u64) {
        let now = self.clock.now();
        for _ in 0..count {
            self.metrics_collector.record_durable_degraded(operation);
        }
        self.update_stats(|stats| {
            stats.durable_degraded += count;
            stats.last_degraded_at = Some(now);
        });
    }

    fn update_stats(&self, update: impl FnOnce(&mut MatchmakingStats)) {
        match self.stats.write() {
            Ok(mut stats) => update(&mut stats),
            Err(_) => warn!("Failed to acquire stats lock"),
        }
    }
}
