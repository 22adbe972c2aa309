//! Main application state and service coordination
//!
//! This module contains the production AppState that coordinates all
//! service components, AMQP connections, and background tasks.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::{ManagerMessageHandler, RequestConsumer};
use crate::amqp::publisher::{AmqpEventPublisher, EventPublisher, PublisherConfig};
use crate::config::{AppConfig, MatchmakingSettings};
use crate::matchmaker::MatchmakingManager;
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector, MetricsService};
use crate::room::{PublisherHandoff, RoomHandoff};
use crate::service::health::{HealthContext, DEGRADED_WINDOW_SECONDS};
use crate::store::{InMemoryEphemeralStore, InMemoryUserStore};
use crate::utils::{Clock, SystemClock};
use amqprs::channel::QueueDeclareArguments;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Matchmaking core wired over the in-memory stores
pub struct MatchmakingCore {
    pub manager: Arc<MatchmakingManager>,
    /// Kept separately so the cleanup task can purge expired counters
    pub ephemeral: Arc<InMemoryEphemeralStore>,
}

impl MatchmakingCore {
    /// Build the manager and its stores around a room hand-off
    pub fn build(
        settings: &MatchmakingSettings,
        handoff: Arc<dyn RoomHandoff>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ephemeral = Arc::new(InMemoryEphemeralStore::new(clock.clone()));
        let manager = MatchmakingManager::new(
            ephemeral.clone(),
            ephemeral.clone(),
            Arc::new(InMemoryUserStore::new()),
            handoff,
            clock,
            settings.clone(),
            metrics_collector,
        );

        Self {
            manager: Arc::new(manager),
            ephemeral,
        }
    }
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Core matchmaking components
    core: MatchmakingCore,

    /// Publisher for outbound events
    event_publisher: Arc<dyn EventPublisher>,

    /// AMQP connection for message handling
    amqp_connection: Arc<AmqpConnection>,

    /// Metrics service for monitoring and health checks
    metrics_service: Arc<MetricsService>,

    /// Background task handles
    background_tasks: Vec<JoinHandle<()>>,

    /// AMQP consumer for matchmaking requests
    request_consumer: Option<RequestConsumer>,

    /// View of the service handed to health probes
    health_context: HealthContext,

    /// Service status
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing flowmatch matchmaking service");
        info!(
            "Configuration: service={}, amqp_url={}",
            config.service.name, config.amqp.url
        );

        let amqp_connection = Self::initialize_amqp(&config).await?;

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let event_publisher =
            Self::initialize_publisher(&config, amqp_connection.clone()).await?;

        let core = MatchmakingCore::build(
            &config.matchmaking,
            Arc::new(PublisherHandoff::new(event_publisher.clone())),
            metrics_collector.clone(),
        );

        let is_running = Arc::new(RwLock::new(false));
        let context = HealthContext {
            service_name: config.service.name.clone(),
            manager: core.manager.clone(),
            is_running: is_running.clone(),
            amqp_connection: Some(amqp_connection.clone()),
            started_at: chrono::Utc::now(),
        };
        let metrics_service =
            Self::initialize_metrics(&config, metrics_collector, context.clone());

        Ok(Self {
            config,
            core,
            event_publisher,
            amqp_connection,
            metrics_service,
            background_tasks: Vec::new(),
            request_consumer: None,
            health_context: context,
            is_running,
        })
    }

    /// Start all background services and message consumption
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting flowmatch matchmaking service");

        *self.is_running.write().await = true;

        self.start_metrics_service().await?;
        self.start_amqp_consumption().await?;
        self.start_background_tasks();

        info!("✅ Flowmatch service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of flowmatch service");

        *self.is_running.write().await = false;

        if let Some(consumer) = &self.request_consumer {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("✅ AMQP message consumption stopped");
            }
        }

        self.stop_background_tasks().await;

        info!("Stopping metrics service...");
        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        } else {
            info!("✅ Metrics service stopped");
        }

        let final_stats =
            self.core
                .manager
                .get_stats()
                .await
                .map_err(|e| ServiceError::BackgroundTask {
                    message: format!("Failed to get final stats: {}", e),
                })?;

        info!(
            "Final service statistics: admissions={}, matches={}, rejections={}, reports={}, bans={}, waiting={}",
            final_stats.admissions,
            final_stats.matches,
            final_stats.total_rejections(),
            final_stats.reports,
            final_stats.bans,
            final_stats.waiting
        );
        info!("✅ Flowmatch service shutdown completed");

        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Get matchmaking manager for operations
    pub fn manager(&self) -> Arc<MatchmakingManager> {
        self.core.manager.clone()
    }

    /// Context for running health checks against this service
    pub fn health_context(&self) -> HealthContext {
        self.health_context.clone()
    }

    /// Get metrics service
    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    /// Get AMQP connection for health checks
    pub fn amqp_connection(&self) -> Arc<AmqpConnection> {
        self.amqp_connection.clone()
    }

    fn initialize_metrics(
        config: &AppConfig,
        metrics_collector: Arc<MetricsCollector>,
        context: HealthContext,
    ) -> Arc<MetricsService> {
        info!(
            "Initializing metrics service on port {}",
            config.service.health_port
        );

        let health_config = HealthServerConfig {
            port: config.service.health_port,
            host: "0.0.0.0".to_string(),
        };

        let health_server =
            Arc::new(HealthServer::new(health_config, metrics_collector.clone()).with_context(context));
        Arc::new(MetricsService::new(metrics_collector, health_server))
    }

    /// Start metrics service
    async fn start_metrics_service(&mut self) -> Result<(), ServiceError> {
        info!("Starting metrics and health endpoints");

        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.health_port;

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                tracing::error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });

        self.background_tasks.push(metrics_handle);

        // Give the server a moment to bind
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        info!("✅ Metrics service started on port {}", port);
        Ok(())
    }

    /// Initialize AMQP connection with retry logic
    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let amqp_config =
            AmqpConfig::from_settings(&config.amqp).map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    /// Open a channel and declare the events exchange
    async fn initialize_publisher(
        config: &AppConfig,
        amqp_connection: Arc<AmqpConnection>,
    ) -> Result<Arc<dyn EventPublisher>, ServiceError> {
        let channel = amqp_connection
            .connection()
            .open_channel(None)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to open AMQP channel: {}", e),
            })?;

        let publisher_config = PublisherConfig {
            exchange: config.amqp.exchange_name.clone(),
            ..PublisherConfig::default()
        };
        let publisher = AmqpEventPublisher::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize event publisher: {}", e),
            })?;

        Ok(Arc::new(publisher))
    }

    /// Start AMQP message consumption
    async fn start_amqp_consumption(&mut self) -> Result<(), ServiceError> {
        let queue_name = self.config.amqp.queue_name.clone();
        info!("Starting AMQP message consumption on '{}'", queue_name);

        let channel = self
            .amqp_connection
            .connection()
            .open_channel(None)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        let queue_declare_args = QueueDeclareArguments::new(&queue_name)
            .durable(true)
            .auto_delete(false)
            .finish();

        channel
            .queue_declare(queue_declare_args)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to declare queue {}: {}", queue_name, e),
            })?;

        debug!("Queue '{}' declared", queue_name);

        let message_handler = Arc::new(ManagerMessageHandler::new(
            self.core.manager.clone(),
            self.event_publisher.clone(),
            self.metrics_service.collector(),
        ));

        let consumer = RequestConsumer::new(message_handler, channel);
        consumer
            .start_consuming(&queue_name)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming messages: {}", e),
            })?;

        self.request_consumer = Some(consumer);

        info!("Listening for matchmaking requests on '{}'", queue_name);
        Ok(())
    }

    /// Start background maintenance tasks
    fn start_background_tasks(&mut self) {
        info!("Starting background maintenance tasks...");

        let metrics_task = {
            let manager = self.core.manager.clone();
            let metrics_collector = self.metrics_service.collector();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(30));

                while *is_running.read().await {
                    interval.tick().await;

                    match manager.get_stats().await {
                        Ok(stats) => {
                            debug!(
                                "Updating metrics - waiting: {}, matches: {}, admissions: {}",
                                stats.waiting, stats.matches, stats.admissions
                            );
                            metrics_collector.update_from_stats(&stats);
                        }
                        Err(e) => {
                            warn!("Failed to get matchmaking stats for metrics update: {}", e);
                        }
                    }
                }

                info!("Metrics update task stopped");
            })
        };

        let cleanup_interval = self.config.cleanup_interval();
        info!(
            "Starting queue cleanup task ({}s interval)...",
            cleanup_interval.as_secs()
        );
        let cleanup_task = {
            let manager = self.core.manager.clone();
            let ephemeral = self.core.ephemeral.clone();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(cleanup_interval);

                while *is_running.read().await {
                    interval.tick().await;

                    match manager.sweep_stale_entries().await {
                        Ok(swept) if !swept.is_empty() => {
                            info!("Removed {} stale queue entries", swept.len())
                        }
                        Ok(_) => debug!("Cleanup check completed - no stale entries"),
                        Err(e) => warn!("Queue cleanup failed: {}", e),
                    }

                    match ephemeral.purge_expired() {
                        Ok(purged) if purged > 0 => debug!("Purged {} expired counters", purged),
                        Ok(_) => {}
                        Err(e) => warn!("Counter purge failed: {}", e),
                    }
                }

                info!("Queue cleanup task stopped");
            })
        };

        let health_metrics_task = {
            let manager = self.core.manager.clone();
            let amqp_connection = self.amqp_connection.clone();
            let metrics_collector = self.metrics_service.collector();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                let start_time = tokio::time::Instant::now();

                while *is_running.read().await {
                    interval.tick().await;

                    let uptime_seconds = start_time.elapsed().as_secs() as i64;
                    metrics_collector
                        .service()
                        .uptime_seconds
                        .set(uptime_seconds);

                    let amqp_alive = amqp_connection.is_alive();
                    let durable_ok = !manager
                        .degraded_within(chrono::Duration::seconds(DEGRADED_WINDOW_SECONDS));
                    let queue_ok = manager.get_stats().await.is_ok();

                    // 2 = healthy, 1 = degraded, 0 = unhealthy
                    let status = if !amqp_alive || !queue_ok {
                        0
                    } else if !durable_ok {
                        1
                    } else {
                        2
                    };
                    metrics_collector.update_health_status(status);
                    metrics_collector.update_component_health("amqp", amqp_alive);
                    metrics_collector.update_component_health("queue_store", queue_ok);
                    metrics_collector.update_component_health("user_store", durable_ok);

                    debug!(
                        "Updated service health metrics - uptime: {}s, status: {}",
                        uptime_seconds, status
                    );
                }

                info!("Health metrics task stopped");
            })
        };

        self.background_tasks.push(metrics_task);
        self.background_tasks.push(cleanup_task);
        self.background_tasks.push(health_metrics_task);

        info!("3 background maintenance tasks started");
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);

        for (i, task) in self.background_tasks.drain(..).enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        tokio::time::sleep(std::time::Duration::from_millis(500)).await;

        info!("✅ All {} background tasks stopped", task_count);
    }
}
