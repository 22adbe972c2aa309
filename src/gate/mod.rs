//! Admission gates: temporary bans driven by reports, and the daily usage cap

pub mod ban;
pub mod limiter;

pub use ban::{BanGate, BanStatus};
pub use limiter::RateLimiter;
