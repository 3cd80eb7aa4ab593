//! # HubSockets
//!
//! A client for the hub messaging protocol: negotiate, connect, stream,
//! reconnect and disconnect over pluggable transports, with correlated hub
//! method calls on top.
//!
//! ## Features
//!
//! - **Atomic state machine**: every transition is a compare-and-set; losers join the winner
//! - **Promise-based API**: one single-assignment result type with chaining operators
//! - **Keep-alive monitor**: slow/lost detection from server-negotiated timeouts, plus a ping job
//! - **Transport fallback**: ordered candidates tried until one connects
//! - **Hub proxies**: correlation ids, remote error details and push handlers
//! - **Type-state builder**: URL and transport are required at compile time

pub mod core;
pub mod hub;
pub mod traits;
pub mod transports;

// Re-export all traits
pub use traits::*;

// Re-export core functionality
pub use self::core::{
    builder,
    builder::{states, ConnectionBuilder},
    config::{ClientConfig, ConfigError},
    connection::Connection,
    promise::Promise,
    scheduler::TokioScheduler,
    state::StateKind,
    AutoTransport, MonitorStatus, NegotiationResponse,
};

pub use hub::{HubConnection, HubProxy};
pub use transports::{WebSocketTransport, WEBSOCKETS};
