//! AMQP event publisher for outbound events

use crate::amqp::messages::{
    MessageEnvelope, EVENTS_EXCHANGE, MATCH_FOUND_ROUTING_KEY, QUEUE_JOINED_ROUTING_KEY,
    QUEUE_REJECTED_ROUTING_KEY, SESSION_ENDED_ROUTING_KEY,
};
use crate::error::{MatchmakingError, Result};
use crate::types::*;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Trait for publishing matchmaking events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a QueueJoined event
    async fn publish_queue_joined(&self, event: QueueJoined) -> Result<()>;

    /// Publish a QueueRejected event
    async fn publish_queue_rejected(&self, event: QueueRejected) -> Result<()>;

    /// Publish a MatchFound event
    async fn publish_match_found(&self, event: MatchFound) -> Result<()>;

    /// Publish a SessionEnded event
    async fn publish_session_ended(&self, event: SessionEnded) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: EVENTS_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
}

impl AmqpEventPublisher {
    /// Create a new event publisher
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self { channel, config };

        publisher.setup_exchange().await?;

        Ok(publisher)
    }

    /// Declare the events exchange
    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.config.exchange, "topic");
        self.channel.exchange_declare(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to declare events exchange: {}", e),
            }
        })?;

        info!("Declared events exchange {}", self.config.exchange);
        Ok(())
    }

    /// Publish with exponential backoff retry
    async fn publish_with_retry<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(envelope).await {
                Ok(_) => {
                    debug!(
                        "Published message {} with routing key {}",
                        envelope.correlation_id, envelope.routing_key
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    /// Single publish attempt
    async fn try_publish<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_queue_joined(&self, event: QueueJoined) -> Result<()> {
        let envelope = MessageEnvelope::new(event, QUEUE_JOINED_ROUTING_KEY.to_string());
        self.publish_with_retry(&envelope).await
    }

    async fn publish_queue_rejected(&self, event: QueueRejected) -> Result<()> {
        let envelope = MessageEnvelope::new(event, QUEUE_REJECTED_ROUTING_KEY.to_string());
        self.publish_with_retry(&envelope).await
    }

    async fn publish_match_found(&self, event: MatchFound) -> Result<()> {
        let envelope = MessageEnvelope::new(event, MATCH_FOUND_ROUTING_KEY.to_string());
        self.publish_with_retry(&envelope).await
    }

    async fn publish_session_ended(&self, event: SessionEnded) -> Result<()> {
        let envelope = MessageEnvelope::new(event, SESSION_ENDED_ROUTING_KEY.to_string());
        self.publish_with_retry(&envelope).await
    }
}

/// Mock event publisher for testing
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published_events: std::sync::Mutex<Vec<String>>,
    messages: std::sync::Mutex<Vec<AmqpMessage>>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all published event types (for testing)
    pub fn get_published_events(&self) -> Vec<String> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Get all published events with payloads (for testing)
    pub fn get_published_messages(&self) -> Vec<AmqpMessage> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    /// Clear published events (for testing)
    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
        if let Ok(mut messages) = self.messages.lock() {
            messages.clear();
        }
    }

    fn record(&self, name: &str, message: AmqpMessage) {
        if let Ok(mut events) = self.published_events.lock() {
            events.push(name.to_string());
        }
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message);
        }
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_queue_joined(&self, event: QueueJoined) -> Result<()> {
        self.record("QueueJoined", AmqpMessage::QueueJoined(event));
        Ok(())
    }

    async fn publish_queue_rejected(&self, event: QueueRejected) -> Result<()> {
        self.record("QueueRejected", AmqpMessage::QueueRejected(event));
        Ok(())
    }

    async fn publish_match_found(&self, event: MatchFound) -> Result<()> {
        self.record("MatchFound", AmqpMessage::MatchFound(event));
        Ok(())
    }

    async fn publish_session_ended(&self, event: SessionEnded) -> Result<()> {
        self.record("SessionEnded", AmqpMessage::SessionEnded(event));
        Ok(())
    }
}
