//! Waiting queues, one per intent

pub mod store;

pub use store::{ClaimOutcome, QueueStore};
