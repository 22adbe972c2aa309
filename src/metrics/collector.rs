//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the flowmatch matchmaking
//! service using Prometheus metrics.

use crate::matchmaker::MatchmakingStats;
use crate::types::{Intent, Preference, Rejection};
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Queue admission metrics
    queue_metrics: QueueMetrics,

    /// Pairing metrics
    match_metrics: MatchMetrics,

    /// Report and ban metrics
    moderation_metrics: ModerationMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP messages processed
    pub amqp_messages_total: IntCounterVec,

    /// AMQP message processing errors
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Queue admission metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Accepted admissions by preference
    pub admissions_total: IntCounterVec,

    /// Refused admissions by reason
    pub rejections_total: IntCounterVec,

    /// Devices currently waiting, by queue
    pub waiting: IntGaugeVec,

    /// Entries removed by the staleness sweep
    pub stale_swept_total: IntCounter,
}

/// Pairing metrics
#[derive(Clone)]
pub struct MatchMetrics {
    /// Rooms created
    pub matches_total: IntCounter,

    /// Claims lost to concurrent searches
    pub claim_conflicts_total: IntCounter,

    /// Rooms the transport could not be told about
    pub handoff_failures_total: IntCounter,
}

/// Report and ban metrics
#[derive(Clone)]
pub struct ModerationMetrics {
    /// Reports accepted
    pub reports_total: IntCounter,

    /// Bans issued
    pub bans_total: IntCounter,

    /// Durable store failures that were tolerated, by operation
    pub durable_degraded_total: IntCounterVec,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// End-to-end admission processing time
    pub admission_duration: Histogram,

    /// Partner search time
    pub match_search_duration: Histogram,

    /// AMQP operation durations
    pub amqp_operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let moderation_metrics = ModerationMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            match_metrics,
            moderation_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get queue metrics
    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    /// Get match metrics
    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    /// Get moderation metrics
    pub fn moderation(&self) -> &ModerationMetrics {
        &self.moderation_metrics
    }

    /// Get performance metrics
    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record an accepted admission
    pub fn record_admission(&self, preference: Preference, duration: Duration) {
        self.queue_metrics
            .admissions_total
            .with_label_values(&[preference.as_str()])
            .inc();

        self.performance_metrics
            .admission_duration
            .observe(duration.as_secs_f64());
    }

    /// Record a refused admission
    pub fn record_rejection(&self, rejection: &Rejection) {
        self.queue_metrics
            .rejections_total
            .with_label_values(&[rejection.label()])
            .inc();
    }

    /// Record the outcome of a partner search
    pub fn record_match_search(&self, matched: bool, claim_conflicts: u32, duration: Duration) {
        if matched {
            self.match_metrics.matches_total.inc();
        }
        self.match_metrics
            .claim_conflicts_total
            .inc_by(u64::from(claim_conflicts));

        self.performance_metrics
            .match_search_duration
            .observe(duration.as_secs_f64());
    }

    /// Record a failed room hand-off
    pub fn record_handoff_failure(&self) {
        self.match_metrics.handoff_failures_total.inc();
    }

    /// Record an accepted report
    pub fn record_report(&self, banned: bool) {
        self.moderation_metrics.reports_total.inc();
        if banned {
            self.moderation_metrics.bans_total.inc();
        }
    }

    /// Record a tolerated durable store failure
    pub fn record_durable_degraded(&self, operation: &str) {
        self.moderation_metrics
            .durable_degraded_total
            .with_label_values(&[operation])
            .inc();
    }

    /// Record entries removed by the staleness sweep
    pub fn record_stale_swept(&self, count: usize) {
        self.queue_metrics.stale_swept_total.inc_by(count as u64);
    }

    /// Set the waiting gauge for one queue
    pub fn set_waiting(&self, intent: Intent, waiting: usize) {
        self.queue_metrics
            .waiting
            .with_label_values(&[intent.queue_key().as_str()])
            .set(waiting as i64);
    }

    /// Update gauges from manager stats
    pub fn update_from_stats(&self, stats: &MatchmakingStats) {
        for (intent, waiting) in &stats.waiting_by_intent {
            self.set_waiting(*intent, *waiting);
        }
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }

        self.performance_metrics
            .amqp_operation_duration
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("flowmatch_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "flowmatch_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("flowmatch_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "flowmatch_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("flowmatch_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let admissions_total = IntCounterVec::new(
            Opts::new("flowmatch_admissions_total", "Accepted queue admissions"),
            &["preference"],
        )?;
        registry.register(Box::new(admissions_total.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new("flowmatch_rejections_total", "Refused queue admissions"),
            &["reason"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let waiting = IntGaugeVec::new(
            Opts::new("flowmatch_waiting", "Devices currently waiting"),
            &["queue"],
        )?;
        registry.register(Box::new(waiting.clone()))?;

        let stale_swept_total = IntCounter::new(
            "flowmatch_stale_swept_total",
            "Queue entries removed by the staleness sweep",
        )?;
        registry.register(Box::new(stale_swept_total.clone()))?;

        Ok(Self {
            admissions_total,
            rejections_total,
            waiting,
            stale_swept_total,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let matches_total = IntCounter::new("flowmatch_matches_total", "Rooms created")?;
        registry.register(Box::new(matches_total.clone()))?;

        let claim_conflicts_total = IntCounter::new(
            "flowmatch_claim_conflicts_total",
            "Claims lost to concurrent searches",
        )?;
        registry.register(Box::new(claim_conflicts_total.clone()))?;

        let handoff_failures_total = IntCounter::new(
            "flowmatch_handoff_failures_total",
            "Rooms that could not be handed off",
        )?;
        registry.register(Box::new(handoff_failures_total.clone()))?;

        Ok(Self {
            matches_total,
            claim_conflicts_total,
            handoff_failures_total,
        })
    }
}

impl ModerationMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let reports_total = IntCounter::new("flowmatch_reports_total", "Reports accepted")?;
        registry.register(Box::new(reports_total.clone()))?;

        let bans_total = IntCounter::new("flowmatch_bans_total", "Bans issued")?;
        registry.register(Box::new(bans_total.clone()))?;

        let durable_degraded_total = IntCounterVec::new(
            Opts::new(
                "flowmatch_durable_degraded_total",
                "Durable store failures tolerated",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(durable_degraded_total.clone()))?;

        Ok(Self {
            reports_total,
            bans_total,
            durable_degraded_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let admission_duration = Histogram::with_opts(
            HistogramOpts::new(
                "flowmatch_admission_duration_seconds",
                "Admission processing time",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        registry.register(Box::new(admission_duration.clone()))?;

        let match_search_duration = Histogram::with_opts(
            HistogramOpts::new(
                "flowmatch_match_search_duration_seconds",
                "Partner search time",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        registry.register(Box::new(match_search_duration.clone()))?;

        let amqp_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "flowmatch_amqp_operation_duration_seconds",
                "AMQP operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operation_duration.clone()))?;

        Ok(Self {
            admission_duration,
            match_search_duration,
            amqp_operation_duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Gender;
    use prometheus::Encoder;

    fn render(collector: &MetricsCollector) -> String {
        let mut buffer = Vec::new();
        prometheus::TextEncoder::new()
            .encode(&collector.registry().gather(), &mut buffer)
            .unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        let _service = collector.service();
        let _queue = collector.queue();
        let _matches = collector.matches();
        let _moderation = collector.moderation();
        let _performance = collector.performance();
    }

    #[test]
    fn test_admission_and_rejection_recording() {
        let collector = MetricsCollector::new().unwrap();

        collector.record_admission(Preference::Female, Duration::from_millis(2));
        collector.record_rejection(&Rejection::RateLimited);
        collector.record_rejection(&Rejection::Banned { remaining_ms: 10 });

        assert_eq!(
            collector
                .queue()
                .admissions_total
                .with_label_values(&["female"])
                .get(),
            1
        );
        assert_eq!(
            collector
                .queue()
                .rejections_total
                .with_label_values(&["rate_limited"])
                .get(),
            1
        );

        let text = render(&collector);
        assert!(text.contains("flowmatch_rejections_total{reason=\"banned\"} 1"));
    }

    #[test]
    fn test_match_and_moderation_recording() {
        let collector = MetricsCollector::new().unwrap();

        collector.record_match_search(true, 3, Duration::from_micros(50));
        collector.record_match_search(false, 0, Duration::from_micros(20));
        collector.record_report(false);
        collector.record_report(true);
        collector.record_durable_degraded("check_ban");

        assert_eq!(collector.matches().matches_total.get(), 1);
        assert_eq!(collector.matches().claim_conflicts_total.get(), 3);
        assert_eq!(collector.moderation().reports_total.get(), 2);
        assert_eq!(collector.moderation().bans_total.get(), 1);
    }

    #[test]
    fn test_waiting_gauge() {
        let collector = MetricsCollector::new().unwrap();
        collector.set_waiting(Intent::new(Gender::Male, Preference::Any), 4);

        let text = render(&collector);
        assert!(text.contains("flowmatch_waiting{queue=\"queue:male:any\"} 4"));
    }

    #[test]
    fn test_metrics_timer() {
        let collector = MetricsCollector::new().unwrap();
        let timer = collector.start_timer();

        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.elapsed() >= Duration::from_millis(10));
        assert!(timer.stop() >= Duration::from_millis(10));
    }
}
