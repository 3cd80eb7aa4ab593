//! Concrete transports

pub mod websocket;

pub use websocket::{WebSocketChannel, WebSocketTransport, WEBSOCKETS};

use crate::core::auto_transport::AutoTransport;
use crate::traits::{HubSocketError, Result, Transport};
use std::sync::Arc;

/// Build the transport for an ordered list of transport names
///
/// A single name yields that transport directly; several are wrapped in an
/// [`AutoTransport`] trying them in order.
pub fn from_names(names: &[String]) -> Result<Arc<dyn Transport>> {
    let mut candidates: Vec<Arc<dyn Transport>> = Vec::with_capacity(names.len());
    for name in names {
        match name.as_str() {
            WEBSOCKETS => candidates.push(Arc::new(WebSocketTransport::new()?)),
            other => {
                return Err(HubSocketError::Configuration(format!(
                    "unknown transport {:?}",
                    other
                )))
            }
        }
    }

    if candidates.len() == 1 {
        return Ok(candidates.remove(0));
    }
    Ok(Arc::new(AutoTransport::new(candidates)?))
}
