//! Concurrency-safe state for the context-sharing hub.
//!
//! Each structure here is safe to share behind an `Arc` and mutates with
//! per-key locking, so unrelated entities, topics and agents never contend
//! on a single global lock.

pub mod claims;
pub mod error;
pub mod reputation;
pub mod subscriptions;

pub use claims::{ClaimOutcome, ClaimTable};
pub use error::StateError;
pub use reputation::{ReputationConfig, ReputationEngine};
pub use subscriptions::{Subscription, SubscriptionId, SubscriptionIndex};
