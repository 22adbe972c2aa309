//! Health check endpoints and monitoring
//!
//! This module provides health check functionality for the flowmatch
//! service, including readiness and liveness probes.

use crate::amqp::AmqpConnection;
use crate::matchmaker::MatchmakingManager;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error};

/// Window after a tolerated durable-store failure during which the service
/// reports itself degraded
pub const DEGRADED_WINDOW_SECONDS: i64 = 300;

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Everything a health probe needs to look at
#[derive(Clone)]
pub struct HealthContext {
    pub service_name: String,
    pub manager: Arc<MatchmakingManager>,
    pub is_running: Arc<RwLock<bool>>,
    /// Absent when running without a broker (tests, local tools)
    pub amqp_connection: Option<Arc<AmqpConnection>>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl HealthContext {
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    pub version: String,
    /// Current timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Service statistics
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Devices currently waiting across all queues
    pub devices_waiting: usize,
    pub admissions: u64,
    pub rejections: u64,
    /// Rooms created since service start
    pub matches: u64,
    pub reports: u64,
    pub bans: u64,
    /// Durable store failures tolerated since service start
    pub durable_degraded: u64,
    /// Service uptime information
    pub uptime_info: String,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(context: &HealthContext) -> Result<Self> {
        let mut checks = Vec::new();
        let mut overall_status = HealthStatus::Healthy;

        for check in [
            Self::check_service_running(context).await,
            Self::check_matchmaker(context).await,
            Self::check_amqp_health(context),
        ] {
            overall_status = Self::combine(overall_status, &check.status);
            checks.push(check);
        }

        let stats = Self::gather_service_stats(context).await;

        Ok(HealthCheck {
            status: overall_status,
            service: context.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(context: &HealthContext) -> Result<HealthStatus> {
        if context.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify service can handle requests
    pub async fn readiness_check(context: &HealthContext) -> Result<HealthStatus> {
        if !context.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        let matchmaker = Self::check_matchmaker(context).await.status;
        let amqp = Self::check_amqp_health(context).status;
        Ok(Self::combine(matchmaker, &amqp))
    }

    fn combine(current: HealthStatus, next: &HealthStatus) -> HealthStatus {
        match (current, next) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }

    /// Check if service is running
    async fn check_service_running(context: &HealthContext) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if context.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// The ephemeral store must answer; recent durable failures degrade
    async fn check_matchmaker(context: &HealthContext) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match context.manager.get_stats().await {
            Ok(_) if context
                .manager
                .degraded_within(chrono::Duration::seconds(DEGRADED_WINDOW_SECONDS)) =>
            {
                (
                    HealthStatus::Degraded,
                    Some("Durable store failures tolerated recently".to_string()),
                )
            }
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Matchmaker stats check failed: {}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Queue store unavailable: {}", e)),
                )
            }
        };

        ComponentCheck {
            name: "matchmaker".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_amqp_health(context: &HealthContext) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match &context.amqp_connection {
            Some(connection) if connection.is_alive() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Unhealthy,
                Some("AMQP connection closed".to_string()),
            ),
            None => (
                HealthStatus::Degraded,
                Some("No broker connection configured".to_string()),
            ),
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Gather current service statistics
    async fn gather_service_stats(context: &HealthContext) -> ServiceStats {
        let uptime = chrono::Utc::now() - context.started_at;
        let uptime_info = format!("Up {}s", uptime.num_seconds());

        match context.manager.get_stats().await {
            Ok(stats) => ServiceStats {
                devices_waiting: stats.waiting,
                admissions: stats.admissions,
                rejections: stats.total_rejections(),
                matches: stats.matches,
                reports: stats.reports,
                bans: stats.bans,
                durable_degraded: stats.durable_degraded,
                uptime_info,
            },
            Err(e) => {
                debug!("Failed to get matchmaking stats for health check: {}", e);
                ServiceStats {
                    uptime_info,
                    ..ServiceStats::default()
                }
            }
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchmakingSettings;
    use crate::metrics::MetricsCollector;
    use crate::room::RecordingRoomHandoff;
    use crate::store::{InMemoryEphemeralStore, InMemoryUserStore};
    use crate::utils::ManualClock;

    fn create_test_context(running: bool) -> HealthContext {
        let clock = Arc::new(ManualClock::default());
        let ephemeral = Arc::new(InMemoryEphemeralStore::new(clock.clone()));
        let manager = MatchmakingManager::new(
            ephemeral.clone(),
            ephemeral,
            Arc::new(InMemoryUserStore::new()),
            Arc::new(RecordingRoomHandoff::new()),
            clock,
            MatchmakingSettings::default(),
            Arc::new(MetricsCollector::new().unwrap()),
        );

        HealthContext {
            service_name: "flowmatch".to_string(),
            manager: Arc::new(manager),
            is_running: Arc::new(RwLock::new(running)),
            amqp_connection: None,
            started_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_liveness_follows_running_flag() {
        let context = create_test_context(true);
        assert_eq!(
            HealthCheck::liveness_check(&context).await.unwrap(),
            HealthStatus::Healthy
        );

        *context.is_running.write().await = false;
        assert_eq!(
            HealthCheck::liveness_check(&context).await.unwrap(),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_without_broker_is_degraded() {
        let context = create_test_context(true);
        let health = HealthCheck::check(&context).await.unwrap();

        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.checks.len(), 3);
        assert_eq!(health.stats.devices_waiting, 0);
        assert!(health.to_json().unwrap().contains("amqp_connection"));
    }

    #[tokio::test]
    async fn test_stopped_service_not_ready() {
        let context = create_test_context(false);
        assert_eq!(
            HealthCheck::readiness_check(&context).await.unwrap(),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn test_status_combination() {
        assert_eq!(
            HealthCheck::combine(HealthStatus::Healthy, &HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthCheck::combine(HealthStatus::Degraded, &HealthStatus::Unhealthy),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthCheck::combine(HealthStatus::Healthy, &HealthStatus::Healthy),
            HealthStatus::Healthy
        );
    }
}
