//! Compatibility matching between waiting devices
//!
//! This module holds the probe-order policy and the atomic pairing search.

pub mod matcher;
pub mod probe;

// Re-export commonly used types
pub use matcher::{CompatibilityMatcher, MatchAttempt, PartnerMatcher};
pub use probe::{is_probed, probe_targets};
