use crate::traits::error::HubSocketError;
use serde_json::Value;

/// Observer of connection lifecycle and inbound traffic
///
/// Listeners are notified synchronously, in registration order, on whichever
/// thread drives the event. A panicking listener is logged and skipped; the
/// remaining listeners still run. Every method defaults to a no-op.
///
/// # Example
/// ```ignore
/// struct LogListener;
///
/// impl ConnectionListener for LogListener {
///     fn on_connected(&self) {
///         info!("connected");
///     }
///
///     fn on_message(&self, message: &Value) {
///         info!("push: {}", message);
///     }
/// }
/// ```
pub trait ConnectionListener: Send + Sync {
    fn on_connecting(&self) {}

    fn on_connected(&self) {}

    fn on_reconnecting(&self) {}

    fn on_reconnected(&self) {}

    fn on_disconnecting(&self) {}

    fn on_disconnected(&self) {}

    /// A single demultiplexed inbound message (push element or correlated reply)
    fn on_message(&self, _message: &Value) {}

    /// Non-fatal error: ping failures, channel errors, failed reconnects
    fn on_error(&self, _error: &HubSocketError) {}

    /// No inbound traffic for longer than the slow threshold
    fn on_connection_slow(&self) {}
}
