//! Flowmatch - matchmaking for anonymous one-to-one chat
//!
//! This crate pairs anonymous devices into private chat rooms based on each
//! device's own gender and the gender it wants to meet. It provides AMQP-based
//! request handling, per-intent FIFO queues, daily search limits and
//! report-driven bans.

pub mod amqp;
pub mod config;
pub mod error;
pub mod gate;
pub mod matching;
pub mod matchmaker;
pub mod metrics;
pub mod queue;
pub mod room;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use matchmaker::{MatchmakingManager, MatchmakingStats};
pub use room::RoomHandoff;
pub use store::{CounterStore, OrderedSetStore, UserStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
