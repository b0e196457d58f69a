//! The realtime coordination hub.
//!
//! [`Hub`] is the service object: construct one per process, wrap it in an
//! `Arc` and hand it to every transport. It owns the connection registry,
//! the subscription index, the claim table and the reputation engine, and
//! implements publish fan-out and liveness cleanup on top of them.

pub mod auth;
pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod registry;
pub mod settings;
pub mod sweep;

pub use auth::CredentialValidator;
pub use dispatcher::{Dispatcher, PublishReceipt};
pub use error::HubError;
pub use hub::Hub;
pub use registry::{ConnectionHandle, ConnectionRegistry, SessionId};
pub use settings::{DeliverySettings, HubSettings, LivenessSettings};
pub use sweep::spawn_liveness_sweep;

pub use share_state::{ClaimOutcome, ReputationConfig, StateError, SubscriptionId};
