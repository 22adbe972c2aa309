//! AMQP message definitions and serialization

use crate::error::{MatchmakingError, Result};
use crate::types::*;
use serde_json;

/// Queue carrying admission, withdrawal and report requests
pub const REQUEST_QUEUE: &str = "flowmatch.requests";

/// Topic exchange for outbound events
pub const EVENTS_EXCHANGE: &str = "flowmatch.events";

/// Routing keys for events
pub const QUEUE_JOINED_ROUTING_KEY: &str = "queue.joined";
pub const QUEUE_REJECTED_ROUTING_KEY: &str = "queue.rejected";
pub const MATCH_FOUND_ROUTING_KEY: &str = "match.found";
pub const SESSION_ENDED_ROUTING_KEY: &str = "session.ended";

/// Reason sent to a device whose session ends because it was banned
pub const BANNED_SESSION_REASON: &str = "You have been banned.";

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            MatchmakingError::InvalidRequest {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Deserialize an inbound request. Only request variants are accepted.
    pub fn deserialize_request(bytes: &[u8]) -> Result<AmqpMessage> {
        let message: AmqpMessage =
            serde_json::from_slice(bytes).map_err(|e| MatchmakingError::InvalidRequest {
                reason: format!("Failed to deserialize request: {}", e),
            })?;

        Self::validate_request(&message)?;
        Ok(message)
    }

    /// Validate an inbound request. Intent fields are left to the manager,
    /// which answers a bad intent with a rejection rather than an error.
    pub fn validate_request(message: &AmqpMessage) -> Result<()> {
        let device_ids: Vec<&str> = match message {
            AmqpMessage::EnterQueue(request) => vec![request.device_id.as_str()],
            AmqpMessage::LeaveQueue(request) => vec![request.device_id.as_str()],
            AmqpMessage::ReportPartner(request) => {
                vec![request.reporter_id.as_str(), request.target_id.as_str()]
            }
            other => {
                return Err(MatchmakingError::InvalidRequest {
                    reason: format!(
                        "{} is an outbound event, not a request",
                        Self::get_routing_key(other)
                    ),
                }
                .into());
            }
        };

        if device_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(MatchmakingError::InvalidRequest {
                reason: "Device ID cannot be empty".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Serialize any AMQP message to bytes
    pub fn serialize_message<T: serde::Serialize>(message: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Get routing key for a message type
    pub fn get_routing_key(message: &AmqpMessage) -> &'static str {
        match message {
            AmqpMessage::EnterQueue(_) => "request.enter",
            AmqpMessage::LeaveQueue(_) => "request.leave",
            AmqpMessage::ReportPartner(_) => "request.report",
            AmqpMessage::QueueJoined(_) => QUEUE_JOINED_ROUTING_KEY,
            AmqpMessage::QueueRejected(_) => QUEUE_REJECTED_ROUTING_KEY,
            AmqpMessage::MatchFound(_) => MATCH_FOUND_ROUTING_KEY,
            AmqpMessage::SessionEnded(_) => SESSION_ENDED_ROUTING_KEY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_enter_request() -> EnterRequest {
        EnterRequest {
            device_id: "device-1".to_string(),
            gender: Some("female".to_string()),
            preference: Some("any".to_string()),
            profile: Profile::default(),
        }
    }

    #[test]
    fn test_message_envelope_creation() {
        let request = create_test_enter_request();
        let envelope = MessageEnvelope::new(request, "test.routing.key".to_string());

        assert_eq!(envelope.routing_key, "test.routing.key");
        assert!(!envelope.correlation_id.is_empty());

        let bytes = envelope.to_bytes().unwrap();
        let decoded = MessageEnvelope::<EnterRequest>::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.correlation_id, envelope.correlation_id);
    }

    #[test]
    fn test_request_validation() {
        let valid = AmqpMessage::EnterQueue(create_test_enter_request());
        assert!(MessageUtils::validate_request(&valid).is_ok());

        let mut request = create_test_enter_request();
        request.device_id = " ".to_string();
        assert!(MessageUtils::validate_request(&AmqpMessage::EnterQueue(request)).is_err());

        let report = AmqpMessage::ReportPartner(ReportRequest {
            reporter_id: "a".to_string(),
            room_id: "room".to_string(),
            target_id: "".to_string(),
        });
        assert!(MessageUtils::validate_request(&report).is_err());

        let event = AmqpMessage::SessionEnded(SessionEnded {
            device_id: "a".to_string(),
            reason: BANNED_SESSION_REASON.to_string(),
            timestamp: chrono::Utc::now(),
        });
        assert!(MessageUtils::validate_request(&event).is_err());
    }

    #[test]
    fn test_deserialize_request() {
        let json = br#"{"type":"LeaveQueue","device_id":"d1","gender":null,"preference":null}"#;
        match MessageUtils::deserialize_request(json).unwrap() {
            AmqpMessage::LeaveQueue(request) => assert_eq!(request.device_id, "d1"),
            other => panic!("unexpected message {:?}", other),
        }

        assert!(MessageUtils::deserialize_request(b"not json").is_err());
    }

    #[test]
    fn test_routing_key_generation() {
        let joined = AmqpMessage::QueueJoined(QueueJoined {
            device_id: "d1".to_string(),
            preference: Preference::Any,
            timestamp: chrono::Utc::now(),
        });
        assert_eq!(
            MessageUtils::get_routing_key(&joined),
            QUEUE_JOINED_ROUTING_KEY
        );

        let enter = AmqpMessage::EnterQueue(create_test_enter_request());
        assert_eq!(MessageUtils::get_routing_key(&enter), "request.enter");
    }
}
