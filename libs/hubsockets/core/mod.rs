//! # Connection engine
//!
//! Leaf-first:
//!
//! - [`promise`]: single-assignment async result every other layer suspends on
//! - [`state`] and [`context`]: the session record and its atomic state cell
//! - [`transport_manager`], [`auto_transport`], [`monitor`], [`ping`]: wire orchestration
//! - [`connection`]: the state machine driving start, stop, send and reconnect
//!
//! ## Example
//!
//! ```rust,ignore
//! use hubsockets::{ConnectionListener, WebSocketTransport};
//!
//! #[tokio::main]
//! async fn main() -> hubsockets::Result<()> {
//!     let connection = hubsockets::builder()
//!         .url("http://localhost:8080/signalr")
//!         .transport(Arc::new(WebSocketTransport::new()?))
//!         .build()?;
//!
//!     connection.start_with(Arc::new(MyListener)).wait().await?;
//!     connection.send(r#"{"hello":"world"}"#).wait().await?;
//!     connection.stop().wait().await
//! }
//! ```

pub mod auto_transport;
pub mod builder;
pub mod config;
pub mod connection;
pub mod context;
pub mod envelope;
pub mod monitor;
pub mod negotiation;
pub mod ping;
pub mod promise;
pub mod scheduler;
pub mod state;
pub mod transport_manager;

// Re-export main types
pub use auto_transport::AutoTransport;
pub use builder::{states, ConnectionBuilder, DEFAULT_PROTOCOL_VERSION};
pub use config::{ClientConfig, ConfigError};
pub use connection::Connection;
pub use context::{ConnectionContext, StreamCursor};
pub use monitor::{MonitorListener, MonitorStatus, TransportMonitor};
pub use negotiation::{NegotiationResponse, TransportOptions};
pub use ping::DEFAULT_PING_INTERVAL;
pub use promise::Promise;
pub use scheduler::TokioScheduler;
pub use state::{AtomicConnectionState, ConnectionState, StateKind};
pub use transport_manager::{ConnectionEvents, ServerCommand, TransportManager};

/// Create a new connection builder
///
/// # Example
/// ```ignore
/// let hub = hubsockets::builder()
///     .url("http://localhost:8080/signalr")
///     .transport(Arc::new(WebSocketTransport::new()?))
///     .build_hub()?;
/// ```
pub fn builder() -> ConnectionBuilder<states::NoUrl, states::NoTransport> {
    ConnectionBuilder::new()
}
