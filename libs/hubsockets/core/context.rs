//! Mutable session record shared by the connection engine
//!
//! Headers, query parameters and connection data are write-once-before-start:
//! every setter fails with `InvalidState` once the state leaves `Disconnected`.

use crate::core::negotiation::NegotiationResponse;
use crate::core::promise::panic_message;
use crate::core::state::{AtomicConnectionState, StateKind};
use crate::traits::{
    ConnectionListener, Encoder, Headers, HubSocketError, Result, Scheduler, TransportRequest,
};
use parking_lot::RwLock;
use reqwest::Url;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Position in the server's message stream, replayed on reconnect
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamCursor {
    pub message_id: Option<String>,
    pub groups_token: Option<String>,
}

/// Parse `url` and make sure its path ends in `/` so endpoints join under it
pub fn normalize_base_url(url: &str) -> Result<Url> {
    let mut parsed = Url::parse(url.trim())
        .map_err(|e| HubSocketError::Configuration(format!("invalid URL {:?}: {}", url, e)))?;

    if parsed.cannot_be_a_base() {
        return Err(HubSocketError::Configuration(format!(
            "URL {:?} cannot be used as a base",
            url
        )));
    }
    if !parsed.path().ends_with('/') {
        let path = format!("{}/", parsed.path());
        parsed.set_path(&path);
    }
    parsed.set_query(None);
    parsed.set_fragment(None);
    Ok(parsed)
}

pub struct ConnectionContext {
    base_url: Url,
    protocol_version: String,
    headers: RwLock<Headers>,
    query: RwLock<Headers>,
    connection_data: RwLock<String>,
    negotiated: RwLock<Option<Arc<NegotiationResponse>>>,
    cursor: RwLock<StreamCursor>,
    state: AtomicConnectionState,
    listeners: RwLock<Arc<Vec<Arc<dyn ConnectionListener>>>>,
    scheduler: Arc<dyn Scheduler>,
    encoder: Arc<dyn Encoder>,
}

impl ConnectionContext {
    pub fn new(
        base_url: Url,
        protocol_version: impl Into<String>,
        scheduler: Arc<dyn Scheduler>,
        encoder: Arc<dyn Encoder>,
    ) -> Self {
        Self {
            base_url,
            protocol_version: protocol_version.into(),
            headers: RwLock::new(Vec::new()),
            query: RwLock::new(Vec::new()),
            connection_data: RwLock::new(String::new()),
            negotiated: RwLock::new(None),
            cursor: RwLock::new(StreamCursor::default()),
            state: AtomicConnectionState::default(),
            listeners: RwLock::new(Arc::new(Vec::new())),
            scheduler,
            encoder,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    pub fn state(&self) -> &AtomicConnectionState {
        &self.state
    }

    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn encoder(&self) -> Arc<dyn Encoder> {
        Arc::clone(&self.encoder)
    }

    fn ensure_disconnected(&self, what: &str) -> Result<()> {
        let kind = self.state.kind();
        if kind != StateKind::Disconnected {
            return Err(HubSocketError::InvalidState(format!(
                "cannot change {} while {}",
                what, kind
            )));
        }
        Ok(())
    }

    /// Add a header sent with every endpoint call
    pub fn add_header(&self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.ensure_disconnected("headers")?;
        self.headers.write().push((name.into(), value.into()));
        Ok(())
    }

    /// Add a query parameter appended to every endpoint address
    pub fn add_query_parameter(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        self.ensure_disconnected("query parameters")?;
        self.query.write().push((name.into(), value.into()));
        Ok(())
    }

    pub fn set_connection_data(&self, data: impl Into<String>) -> Result<()> {
        self.ensure_disconnected("connection data")?;
        *self.connection_data.write() = data.into();
        Ok(())
    }

    pub fn headers(&self) -> Headers {
        self.headers.read().clone()
    }

    pub fn query(&self) -> Headers {
        self.query.read().clone()
    }

    pub fn connection_data(&self) -> String {
        self.connection_data.read().clone()
    }

    /// Store a fresh negotiation; a new session starts from an empty cursor
    pub fn set_negotiated(&self, response: Arc<NegotiationResponse>) {
        debug!(
            "Negotiated connection {} (protocol {})",
            response.connection_id, response.protocol_version
        );
        *self.negotiated.write() = Some(response);
        *self.cursor.write() = StreamCursor::default();
    }

    pub fn negotiated(&self) -> Option<Arc<NegotiationResponse>> {
        self.negotiated.read().clone()
    }

    pub fn connection_id(&self) -> Option<String> {
        self.negotiated.read().as_ref().map(|n| n.connection_id.clone())
    }

    pub fn connection_token(&self) -> Option<String> {
        self.negotiated
            .read()
            .as_ref()
            .map(|n| n.connection_token.clone())
    }

    /// Remember the latest message id and groups token seen in a push envelope
    pub fn record_cursor(&self, message_id: Option<&str>, groups_token: Option<&str>) {
        if message_id.is_none() && groups_token.is_none() {
            return;
        }
        let mut cursor = self.cursor.write();
        if let Some(id) = message_id {
            cursor.message_id = Some(id.to_string());
        }
        if let Some(token) = groups_token {
            cursor.groups_token = Some(token.to_string());
        }
    }

    pub fn cursor(&self) -> StreamCursor {
        self.cursor.read().clone()
    }

    /// Build the address and header set for `endpoint`
    ///
    /// `params` come first in the query string, followed by the user's
    /// query parameters.
    pub fn request(&self, endpoint: &str, params: &[(&str, String)]) -> Result<TransportRequest> {
        let mut url = self.base_url.join(endpoint).map_err(|e| {
            HubSocketError::Configuration(format!("invalid {} address: {}", endpoint, e))
        })?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
            for (key, value) in self.query.read().iter() {
                pairs.append_pair(key, value);
            }
        }
        Ok(TransportRequest {
            url,
            headers: self.headers(),
        })
    }

    /// Register a listener; notification order is registration order
    pub fn add_listener(&self, listener: Arc<dyn ConnectionListener>) {
        let mut listeners = self.listeners.write();
        let mut next = Vec::with_capacity(listeners.len() + 1);
        next.extend(listeners.iter().cloned());
        next.push(listener);
        *listeners = Arc::new(next);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Invoke `f` on every listener on the calling thread
    ///
    /// Iterates a snapshot, so listeners may register more listeners. A
    /// panicking listener is logged and skipped.
    pub fn notify<F>(&self, f: F)
    where
        F: Fn(&dyn ConnectionListener),
    {
        let snapshot = Arc::clone(&self.listeners.read());
        for listener in snapshot.iter() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))) {
                warn!("Connection listener panicked: {}", panic_message(panic.as_ref()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::promise::Promise;
    use crate::core::state::ConnectionState;
    use crate::traits::{JsonEncoder, ScheduledTask};
    use parking_lot::Mutex;
    use std::time::Duration;

    struct NoopScheduler;

    impl Scheduler for NoopScheduler {
        fn schedule(
            &self,
            _interval: Duration,
            _task: Arc<dyn Fn() + Send + Sync>,
        ) -> Arc<dyn ScheduledTask> {
            unimplemented!("not scheduled in these tests")
        }

        fn execute(&self, task: Box<dyn FnOnce() + Send>) {
            task()
        }
    }

    fn context(url: &str) -> ConnectionContext {
        ConnectionContext::new(
            normalize_base_url(url).unwrap(),
            "1.3",
            Arc::new(NoopScheduler),
            Arc::new(JsonEncoder),
        )
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let url = normalize_base_url("http://localhost:8080/signalr").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/signalr/");
        assert!(normalize_base_url("not a url").is_err());
    }

    #[test]
    fn test_request_puts_params_before_user_query() {
        let ctx = context("http://localhost/signalr");
        ctx.add_query_parameter("tenant", "a b").unwrap();
        ctx.add_header("Authorization", "Bearer x").unwrap();

        let request = ctx
            .request("negotiate", &[("clientProtocol", "1.3".to_string())])
            .unwrap();

        assert_eq!(
            request.url.as_str(),
            "http://localhost/signalr/negotiate?clientProtocol=1.3&tenant=a+b"
        );
        assert_eq!(request.headers, vec![("Authorization".into(), "Bearer x".into())]);
    }

    #[test]
    fn test_setters_rejected_after_start() {
        let ctx = context("http://localhost/signalr");
        let current = ctx.state().get();
        ctx.state()
            .compare_and_set(&current, ConnectionState::Connecting(Promise::new()))
            .unwrap();

        assert!(ctx.add_header("a", "b").unwrap_err().is_invalid_state());
        assert!(ctx.add_query_parameter("a", "b").unwrap_err().is_invalid_state());
        assert!(ctx.set_connection_data("[]").unwrap_err().is_invalid_state());
    }

    #[test]
    fn test_cursor_is_merged_and_reset_on_negotiate() {
        let ctx = context("http://localhost/signalr");
        ctx.record_cursor(Some("d-1"), None);
        ctx.record_cursor(None, Some("grp"));
        ctx.record_cursor(Some("d-2"), None);
        assert_eq!(
            ctx.cursor(),
            StreamCursor {
                message_id: Some("d-2".into()),
                groups_token: Some("grp".into())
            }
        );

        let negotiated: NegotiationResponse = serde_json::from_str(
            r#"{"ConnectionToken":"t","ConnectionId":"id-1","ProtocolVersion":"1.3"}"#,
        )
        .unwrap();
        ctx.set_negotiated(Arc::new(negotiated));
        assert_eq!(ctx.cursor(), StreamCursor::default());
        assert_eq!(ctx.connection_id().as_deref(), Some("id-1"));
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        panics: bool,
    }

    impl ConnectionListener for Recorder {
        fn on_connected(&self) {
            self.log.lock().push(self.name);
            if self.panics {
                panic!("listener {} failed", self.name);
            }
        }
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let ctx = context("http://localhost/signalr");
        let log = Arc::new(Mutex::new(Vec::new()));
        for (name, panics) in [("first", true), ("second", false), ("third", false)] {
            ctx.add_listener(Arc::new(Recorder {
                name,
                log: Arc::clone(&log),
                panics,
            }));
        }

        ctx.notify(|l| l.on_connected());
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }
}
