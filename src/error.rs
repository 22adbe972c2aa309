//! Error types for the matchmaking service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application. Named conditions are raised as `MatchmakingError`
//! and recovered by callers with `downcast_ref`.

use crate::types::Intent;

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Device {device_id} is already queued in {intent}")]
    AlreadyQueued { device_id: String, intent: Intent },

    #[error("Invalid intent: {reason}")]
    InvalidIntent { reason: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("{store} store unavailable: {message}")]
    StoreUnavailable { store: String, message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Shorthand for a poisoned lock inside an in-memory store
    pub(crate) fn lock_poisoned(what: &str) -> Self {
        MatchmakingError::InternalError {
            message: format!("Failed to acquire {} lock", what),
        }
    }
}

/// Returns true when the error chain carries `AlreadyQueued`
pub fn is_already_queued(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<MatchmakingError>(),
        Some(MatchmakingError::AlreadyQueued { .. })
    )
}
