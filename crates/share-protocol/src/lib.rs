//! Share protocol - wire types and message definitions for the context-sharing hub.
//!
//! Agents talk to the hub with JSON-RPC 2.0 requests and receive
//! realtime pushes as `{type, data, timestamp}` envelopes.

pub mod constants;
pub mod error;
pub mod identity;
pub mod messages;
pub mod types;

pub use constants::*;
pub use error::*;
pub use identity::*;
pub use messages::*;
pub use types::*;
