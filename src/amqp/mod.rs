//! AMQP integration for the matchmaking service
//!
//! This module handles the broker connection, request consumption and event
//! publishing for the matchmaking service.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{dispatch, ManagerMessageHandler, MessageHandler, RequestConsumer};
pub use messages::*;
pub use publisher::{AmqpEventPublisher, EventPublisher, MockEventPublisher, PublisherConfig};
