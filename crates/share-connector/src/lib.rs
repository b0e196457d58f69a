//! Network front end for the context-sharing hub.
//!
//! Serves the JSON-RPC API over line-delimited TCP and WebSocket, plus a
//! handful of read-only HTTP endpoints, on top of a shared [`share_hub::Hub`].

pub mod auth;
pub mod config;
pub mod rpc;
pub mod rpc_server;
pub mod ws_server;

pub use auth::{build_validator, hash_key, OpenAccess, RateLimiter, StaticCredentials};
pub use config::{ConfigError, HubConfig};
pub use rpc::{ServerContext, Session};
pub use rpc_server::RpcServer;
pub use ws_server::WsServer;
