pub mod states;

use crate::core::config::ClientConfig;
use crate::core::connection::Connection;
use crate::core::context::{normalize_base_url, ConnectionContext};
use crate::core::ping::DEFAULT_PING_INTERVAL;
use crate::core::scheduler::TokioScheduler;
use crate::core::transport_manager::TransportManager;
use crate::hub::HubConnection;
use crate::traits::*;
use states::*;
use std::sync::Arc;
use std::time::Duration;

/// Type-state builder for [`Connection`]
///
/// The URL and the transport are required; the compiler rejects `build()`
/// until both are set.
///
/// ```ignore
/// let connection = hubsockets::builder()
///     .url("http://localhost:8080/signalr")
///     .transport(Arc::new(WebSocketTransport::new()?))
///     .header("Authorization", "Bearer token")
///     .build()?;
/// ```
pub struct ConnectionBuilder<U, T>
where
    U: UrlState,
    T: TransportState,
{
    _state: TypeState<U, T>,
    url: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    protocol_version: String,
    connection_data: Option<String>,
    headers: Headers,
    query: Headers,
    encoder: Option<Arc<dyn Encoder>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    ping_interval: Duration,
    listeners: Vec<Arc<dyn ConnectionListener>>,
}

/// Protocol version spoken by default
pub const DEFAULT_PROTOCOL_VERSION: &str = "1.3";

impl ConnectionBuilder<NoUrl, NoTransport> {
    /// Create a new builder instance
    pub fn new() -> Self {
        Self {
            _state: TypeState::new(),
            url: None,
            transport: None,
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            connection_data: None,
            headers: Vec::new(),
            query: Vec::new(),
            encoder: None,
            scheduler: None,
            ping_interval: DEFAULT_PING_INTERVAL,
            listeners: Vec::new(),
        }
    }
}

impl Default for ConnectionBuilder<NoUrl, NoTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U, T> ConnectionBuilder<U, T>
where
    U: UrlState,
    T: TransportState,
{
    fn into_state<U2, T2>(self) -> ConnectionBuilder<U2, T2>
    where
        U2: UrlState,
        T2: TransportState,
    {
        ConnectionBuilder {
            _state: TypeState::new(),
            url: self.url,
            transport: self.transport,
            protocol_version: self.protocol_version,
            connection_data: self.connection_data,
            headers: self.headers,
            query: self.query,
            encoder: self.encoder,
            scheduler: self.scheduler,
            ping_interval: self.ping_interval,
            listeners: self.listeners,
        }
    }

    /// Protocol version sent as `clientProtocol` and required from the server
    pub fn protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    pub fn connection_data(mut self, data: impl Into<String>) -> Self {
        self.connection_data = Some(data.into());
        self
    }

    /// Header sent with every endpoint call
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Query parameter appended to every endpoint address
    pub fn query_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Defaults to [`JsonEncoder`]
    pub fn encoder(mut self, encoder: Arc<dyn Encoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Defaults to a [`TokioScheduler`] on the current runtime
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Interval of the ping job (default 5 minutes)
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ConnectionListener>) -> Self {
        self.listeners.push(listener);
        self
    }
}

// URL setting
impl<T> ConnectionBuilder<NoUrl, T>
where
    T: TransportState,
{
    pub fn url(mut self, url: impl Into<String>) -> ConnectionBuilder<HasUrl, T> {
        self.url = Some(url.into());
        self.into_state()
    }

    /// Take URL, protocol version, connection data, headers, query and ping
    /// interval from `config`
    pub fn config(mut self, config: &ClientConfig) -> ConnectionBuilder<HasUrl, T> {
        self.url = Some(config.url.clone());
        self.protocol_version = config.protocol_version.clone();
        if let Some(data) = &config.connection_data {
            self.connection_data = Some(data.clone());
        }
        self.headers
            .extend(config.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.query
            .extend(config.query.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.ping_interval = config.ping_interval();
        self.into_state()
    }
}

// Transport setting
impl<U> ConnectionBuilder<U, NoTransport>
where
    U: UrlState,
{
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> ConnectionBuilder<U, HasTransport> {
        self.transport = Some(transport);
        self.into_state()
    }
}

impl ConnectionBuilder<HasUrl, HasTransport> {
    /// Build the connection
    ///
    /// Fails with `Configuration` if the URL cannot be parsed, the ping
    /// interval is zero, or when no scheduler was given and there is no
    /// current Tokio runtime.
    pub fn build(self) -> Result<Connection> {
        let url = self
            .url
            .ok_or_else(|| HubSocketError::Configuration("URL is required".to_string()))?;
        let transport = self
            .transport
            .ok_or_else(|| HubSocketError::Configuration("transport is required".to_string()))?;

        let base_url = normalize_base_url(&url)?;
        if self.ping_interval.is_zero() {
            return Err(HubSocketError::Configuration(
                "ping interval must be greater than zero".to_string(),
            ));
        }
        let scheduler: Arc<dyn Scheduler> = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(TokioScheduler::current()?),
        };
        let encoder = self
            .encoder
            .unwrap_or_else(|| Arc::new(JsonEncoder) as Arc<dyn Encoder>);

        let context = Arc::new(ConnectionContext::new(
            base_url,
            self.protocol_version,
            scheduler,
            encoder,
        ));
        for (name, value) in self.headers {
            context.add_header(name, value)?;
        }
        for (name, value) in self.query {
            context.add_query_parameter(name, value)?;
        }
        if let Some(data) = self.connection_data {
            context.set_connection_data(data)?;
        }
        for listener in self.listeners {
            context.add_listener(listener);
        }

        let manager = TransportManager::with_ping_interval(transport, self.ping_interval);
        Ok(Connection::new(context, manager))
    }

    /// Build a hub connection over the same settings
    pub fn build_hub(self) -> Result<HubConnection> {
        Ok(HubConnection::new(self.build()?))
    }
}
