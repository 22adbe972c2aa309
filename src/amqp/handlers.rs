//! AMQP message handlers for processing matchmaking requests
//!
//! This module provides the request consumer for the matchmaking service and
//! the handler that turns requests into manager calls and outbound events.

use crate::amqp::messages::{MessageUtils, BANNED_SESSION_REASON};
use crate::amqp::publisher::EventPublisher;
use crate::error::{MatchmakingError, Result};
use crate::matchmaker::MatchmakingManager;
use crate::metrics::MetricsCollector;
use crate::types::{
    AmqpMessage, EnterRequest, LeaveRequest, QueueJoined, QueueRejected, ReportRequest,
    SessionEnded,
};
use crate::utils::current_timestamp;
use amqprs::{
    channel::{BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, Channel},
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Trait defining the interface for handling AMQP requests
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle an admission request
    async fn handle_enter(&self, request: EnterRequest) -> Result<()>;

    /// Handle a withdrawal request
    async fn handle_leave(&self, request: LeaveRequest) -> Result<()>;

    /// Handle a report against a room partner
    async fn handle_report(&self, request: ReportRequest) -> Result<()>;

    /// Handle processing errors
    async fn handle_error(&self, error: MatchmakingError, message_data: &[u8]);
}

/// Decode a request and route it to the matching handler method
pub async fn dispatch(handler: &dyn MessageHandler, content: &[u8]) -> Result<()> {
    match MessageUtils::deserialize_request(content)? {
        AmqpMessage::EnterQueue(request) => handler.handle_enter(request).await,
        AmqpMessage::LeaveQueue(request) => handler.handle_leave(request).await,
        AmqpMessage::ReportPartner(request) => handler.handle_report(request).await,
        other => Err(MatchmakingError::InvalidRequest {
            reason: format!(
                "Unexpected {} message on request queue",
                MessageUtils::get_routing_key(&other)
            ),
        }
        .into()),
    }
}

/// Consumer for the matchmaking request queue
pub struct RequestConsumer {
    handler: Arc<dyn MessageHandler>,
    channel: Channel,
    consumer_tag: String,
}

impl RequestConsumer {
    /// Create a new request consumer
    pub fn new(handler: Arc<dyn MessageHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("flowmatch-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
        }
    }

    /// Start consuming messages from the queue
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);

        self.channel
            .basic_consume(RequestDispatcher::new(self.handler.clone()), args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming messages from queue: {}", queue_name);
        Ok(())
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel.basic_cancel(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;

        info!("Stopped consuming messages");
        Ok(())
    }
}

/// Internal consumer implementation
struct RequestDispatcher {
    handler: Arc<dyn MessageHandler>,
}

impl RequestDispatcher {
    fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl AsyncConsumer for RequestDispatcher {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        let start_time = std::time::Instant::now();

        debug!(
            "AMQP message received - delivery_tag: {}, size: {} bytes",
            delivery_tag,
            content.len()
        );

        match dispatch(self.handler.as_ref(), &content).await {
            Ok(_) => {
                debug!(
                    "Message processed - delivery_tag: {}, processing_time: {:.2}ms",
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0
                );
            }
            Err(e) => {
                error!(
                    "Message processing failed - delivery_tag: {}, processing_time: {:.2}ms, error: {}",
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0,
                    e
                );
                let error = match e.downcast::<MatchmakingError>() {
                    Ok(error) => error,
                    Err(other) => MatchmakingError::InternalError {
                        message: other.to_string(),
                    },
                };
                self.handler.handle_error(error, &content).await;
            }
        }

        // Failed requests are not redelivered; the client retries on its own
        if let Err(e) = channel
            .basic_ack(BasicAckArguments::new(delivery_tag, false))
            .await
        {
            warn!("Failed to ack delivery {}: {}", delivery_tag, e);
        }
    }
}

/// Handler that drives the matchmaking manager and reports back through events
pub struct ManagerMessageHandler {
    manager: Arc<MatchmakingManager>,
    publisher: Arc<dyn EventPublisher>,
    metrics_collector: Arc<MetricsCollector>,
}

impl ManagerMessageHandler {
    pub fn new(
        manager: Arc<MatchmakingManager>,
        publisher: Arc<dyn EventPublisher>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            manager,
            publisher,
            metrics_collector,
        }
    }

    fn record(&self, operation: &str, success: bool, started: std::time::Instant) {
        self.metrics_collector
            .record_amqp_operation(operation, success, started.elapsed());
    }
}

#[async_trait]
impl MessageHandler for ManagerMessageHandler {
    async fn handle_enter(&self, request: EnterRequest) -> Result<()> {
        let started = std::time::Instant::now();

        let admission = match self.manager.admit(request).await {
            Ok(admission) => admission,
            Err(e) => {
                self.record("enter_queue", false, started);
                return Err(e);
            }
        };

        // Announced before the search so a joined event never trails a match
        if let (true, Some(intent)) = (admission.outcome.accepted, admission.search) {
            if let Err(e) = self
                .publisher
                .publish_queue_joined(QueueJoined {
                    device_id: admission.device_id.clone(),
                    preference: intent.preference,
                    timestamp: current_timestamp(),
                })
                .await
            {
                warn!("Failed to announce {} joining: {}", admission.device_id, e);
            }
        }

        if let Some(rejection) = admission.outcome.rejection.clone() {
            if let Err(e) = self
                .publisher
                .publish_queue_rejected(QueueRejected {
                    device_id: admission.device_id.clone(),
                    message: rejection.message(),
                    rejection,
                    timestamp: current_timestamp(),
                })
                .await
            {
                warn!("Failed to announce rejection of {}: {}", admission.device_id, e);
            }
        }

        if let Some(intent) = admission.search {
            if let Err(e) = self.manager.find_match(&admission.device_id, intent).await {
                self.record("enter_queue", false, started);
                return Err(e);
            }
        }

        self.record("enter_queue", true, started);
        Ok(())
    }

    async fn handle_leave(&self, request: LeaveRequest) -> Result<()> {
        let started = std::time::Instant::now();
        let result = self.manager.leave_queue(&request).await;
        self.record("leave_queue", result.is_ok(), started);
        result.map(|_| ())
    }

    async fn handle_report(&self, request: ReportRequest) -> Result<()> {
        let started = std::time::Instant::now();
        let outcome = match self
            .manager
            .report_partner(&request.reporter_id, &request.room_id, &request.target_id)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.record("report_partner", false, started);
                return Err(e);
            }
        };

        if outcome.banned {
            self.publisher
                .publish_session_ended(SessionEnded {
                    device_id: request.target_id,
                    reason: BANNED_SESSION_REASON.to_string(),
                    timestamp: current_timestamp(),
                })
                .await?;
        }

        self.record("report_partner", true, started);
        Ok(())
    }

    async fn handle_error(&self, error: MatchmakingError, message_data: &[u8]) {
        let preview_len = std::cmp::min(100, message_data.len());
        let preview = String::from_utf8_lossy(&message_data[..preview_len]);
        error!(
            "Request handling failed - error: '{}', message_size: {} bytes, preview: {:?}",
            error,
            message_data.len(),
            preview
        );
    }
}
