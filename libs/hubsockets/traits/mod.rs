//! # HubSockets Traits
//!
//! Capability traits the connection engine depends on, plus the shared error type:
//!
//! - **Transport / Channel / ChannelHandler**: wire operations and open streams
//! - **Encoder**: text codec for envelopes and endpoint responses
//! - **Scheduler / ScheduledTask**: periodic jobs and executor hand-off
//! - **ConnectionListener**: lifecycle and inbound message observer

pub mod encoder;
pub mod error;
pub mod listener;
pub mod scheduler;
pub mod transport;

// Re-export commonly used types
pub use encoder::{Encoder, JsonEncoder};
pub use error::{HubSocketError, Result};
pub use listener::ConnectionListener;
pub use scheduler::{ScheduledTask, Scheduler};
pub use transport::{Channel, ChannelHandler, ConnectRequest, Headers, Transport, TransportRequest};
