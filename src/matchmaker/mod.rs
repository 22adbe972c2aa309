//! Matchmaking façade for admission, reports and withdrawal
//!
//! This module ties the queue store, gates, matcher and room allocator
//! together behind a single manager.

pub mod manager;

// Re-export commonly used types
pub use manager::{Admission, MatchmakingManager, MatchmakingStats};
