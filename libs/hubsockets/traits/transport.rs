//! Transport capability
//!
//! A [`Transport`] performs the four wire operations of the protocol. The
//! engine builds every address and header set; transports only carry bytes.
//!
//! ```text
//! TransportManager ──negotiate/ping/abort──> Transport ──HTTP──> server
//!        │
//!        └──connect(ConnectRequest, handler)──> Transport ──> Channel
//!                                                   │
//!                           ChannelHandler <────────┘ (open/message/error/close)
//! ```

use crate::core::promise::Promise;
use crate::traits::error::{HubSocketError, Result};
use reqwest::Url;
use std::sync::Arc;

/// Header/query multimap, insertion ordered
pub type Headers = Vec<(String, String)>;

/// Fully built address for negotiate, ping and abort
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: Url,
    pub headers: Headers,
}

/// Everything needed to open a channel except the transport-specific parts
///
/// The transport name and the websocket scheme upgrade depend on which
/// candidate ends up connecting, so the final address is produced by
/// [`ConnectRequest::address`] inside each transport.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Base URL, always ending in `/`
    pub base_url: Url,
    /// `reconnect` endpoint instead of `connect`
    pub reconnect: bool,
    /// Query pairs other than `transport`
    pub query: Headers,
    pub headers: Headers,
}

impl ConnectRequest {
    /// Address for `transport_name`; http(s) becomes ws(s) when `websocket` is set
    pub fn address(&self, transport_name: &str, websocket: bool) -> Result<Url> {
        let endpoint = if self.reconnect { "reconnect" } else { "connect" };
        let mut url = self.base_url.join(endpoint).map_err(|e| {
            HubSocketError::Configuration(format!("invalid {} address: {}", endpoint, e))
        })?;

        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("transport", transport_name);
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
        }

        if websocket {
            let upgraded = match url.scheme() {
                "http" => Some("ws"),
                "https" => Some("wss"),
                _ => None,
            };
            if let Some(scheme) = upgraded {
                url.set_scheme(scheme).map_err(|_| {
                    HubSocketError::Configuration(format!("cannot use scheme {} for {}", scheme, url))
                })?;
            }
        }

        Ok(url)
    }
}

/// Receives events from an open channel
pub trait ChannelHandler: Send + Sync {
    fn on_open(&self);

    /// One inbound text frame
    fn on_message(&self, text: &str);

    fn on_error(&self, error: HubSocketError);

    fn on_close(&self);
}

/// Open duplex stream, owned by the Connected state
pub trait Channel: Send + Sync {
    fn send(&self, text: &str) -> Promise<()>;

    fn close(&self) -> Promise<()>;
}

/// Wire transport capability
///
/// Every operation returns immediately with a [`Promise`] completed later from
/// the transport's own I/O threads.
pub trait Transport: Send + Sync {
    /// Protocol name sent as the `transport` query parameter
    fn name(&self) -> String;

    /// GET `negotiate`, resolving with the raw response body
    fn negotiate(&self, request: &TransportRequest) -> Promise<String>;

    /// Open a channel and wire `handler` to its events
    fn connect(
        &self,
        request: &ConnectRequest,
        handler: Arc<dyn ChannelHandler>,
    ) -> Promise<Arc<dyn Channel>>;

    /// GET `ping`, resolving with the raw response body
    fn ping(&self, request: &TransportRequest) -> Promise<String>;

    /// POST `abort`; fire-and-forget from the engine's point of view
    fn abort(&self, request: &TransportRequest) -> Promise<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(base: &str, reconnect: bool) -> ConnectRequest {
        ConnectRequest {
            base_url: Url::parse(base).unwrap(),
            reconnect,
            query: vec![
                ("connectionToken".to_string(), "tok/en+1".to_string()),
                ("connectionData".to_string(), "[]".to_string()),
            ],
            headers: Vec::new(),
        }
    }

    #[test]
    fn test_websocket_address_upgrades_scheme() {
        let url = request("https://example.com/signalr/", false)
            .address("webSockets", true)
            .unwrap();

        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/signalr/connect");
        let pairs: Vec<_> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("transport".to_string(), "webSockets".to_string()));
        assert_eq!(pairs[1], ("connectionToken".to_string(), "tok/en+1".to_string()));
    }

    #[test]
    fn test_plain_transport_keeps_scheme() {
        let url = request("http://example.com/signalr/", true)
            .address("longPolling", false)
            .unwrap();

        assert_eq!(url.scheme(), "http");
        assert_eq!(url.path(), "/signalr/reconnect");
    }

    #[test]
    fn test_http_upgrades_to_ws() {
        let url = request("http://localhost:8080/", false)
            .address("webSockets", true)
            .unwrap();
        assert!(url.as_str().starts_with("ws://localhost:8080/connect?transport=webSockets"));
    }
}
