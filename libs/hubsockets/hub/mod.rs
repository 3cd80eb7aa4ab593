//! Hub RPC correlation layer
//!
//! A [`HubConnection`] wraps a [`Connection`](crate::core::Connection) and
//! observes it like any other listener. Outbound calls get a correlation id
//! and a pending [`Promise`](crate::core::Promise) in the correlation table;
//! inbound replies settle and remove exactly that entry.
//!
//! ```text
//! HubProxy::invoke ──> id = next_id++ ──> table.insert(id) ──> send {"I":id,...}
//!                                                                   │
//! on_message {"I":id,"R":..} ──> table.remove(id) ──> resolve / reject
//! on_message {"H":hub,"M":method,"A":[..]} ──> proxy handlers + on_received
//! ```

pub mod connection;
pub mod proxy;

pub use connection::HubConnection;
pub use proxy::HubProxy;
