//! Storage capabilities for the matchmaking engine
//!
//! Components never embed a backing store; they receive these capability
//! traits as `Arc<dyn ...>`. In-memory implementations ship for tests and
//! single-node deployments.

pub mod ephemeral;
pub mod records;

// Re-export commonly used types
pub use ephemeral::{CounterStore, InMemoryEphemeralStore, OrderedSetStore, PairRemoval};
pub use records::{InMemoryUserStore, UserStore};
