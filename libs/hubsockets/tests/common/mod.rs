//! Common test utilities for HubSockets integration tests
//!
//! Scripted in-memory transport, channel, scheduler and listener for driving
//! the state machine deterministically, plus small socket servers for the
//! WebSocket transport.

#![allow(dead_code)]

use hubsockets::{
    Channel, ChannelHandler, ConnectRequest, Connection, ConnectionListener, HubConnection,
    HubSocketError, Promise, ScheduledTask, Scheduler, Transport, TransportRequest,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

pub const BASE_URL: &str = "http://localhost:8080/signalr";

/// Negotiate body with the given protocol version and keep-alive (seconds, or `null`)
pub fn negotiate_body(protocol: &str, keep_alive: &str) -> String {
    format!(
        r#"{{"Url":"/signalr","ConnectionToken":"token/1+","ConnectionId":"conn-1","KeepAliveTimeout":{},"DisconnectTimeout":30.0,"TryWebSockets":true,"ProtocolVersion":"{}","TransportConnectTimeout":5.0}}"#,
        keep_alive, protocol
    )
}

/// Shared ordered log of wire operations
pub type OpLog = Arc<Mutex<Vec<String>>>;

// ============================================================================
// MockChannel
// ============================================================================

pub struct MockChannel {
    pub sent: Mutex<Vec<String>>,
    pub close_calls: AtomicUsize,
    send_error: Mutex<Option<HubSocketError>>,
    close_gate: Mutex<Option<Promise<()>>>,
    handler: Arc<dyn ChannelHandler>,
    ops: OpLog,
}

impl MockChannel {
    pub fn fail_sends_with(&self, error: HubSocketError) {
        *self.send_error.lock() = Some(error);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl Channel for MockChannel {
    fn send(&self, text: &str) -> Promise<()> {
        if let Some(error) = self.send_error.lock().clone() {
            return Promise::rejected(error);
        }
        self.sent.lock().push(text.to_string());
        Promise::resolved(())
    }

    fn close(&self) -> Promise<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.ops.lock().push("close".to_string());

        let gate = self.close_gate.lock().clone();
        let handler = Arc::clone(&self.handler);
        match gate {
            Some(gate) => {
                gate.add_callback(move |_| handler.on_close());
                gate
            }
            None => {
                handler.on_close();
                Promise::resolved(())
            }
        }
    }
}

// ============================================================================
// MockTransport
// ============================================================================

enum ConnectOutcome {
    Succeed,
    Fail(String),
}

/// Transport completing every call synchronously from a script
pub struct MockTransport {
    negotiate_body: Mutex<String>,
    held_negotiate: Mutex<Option<Promise<String>>>,
    ping_body: Mutex<String>,
    abort_error: Mutex<Option<HubSocketError>>,
    connect_script: Mutex<VecDeque<ConnectOutcome>>,
    close_gate: Mutex<Option<Promise<()>>>,
    pub requests: Mutex<Vec<TransportRequest>>,
    pub connect_urls: Mutex<Vec<String>>,
    handlers: Mutex<Vec<Arc<dyn ChannelHandler>>>,
    channels: Mutex<Vec<Arc<MockChannel>>>,
    pub ops: OpLog,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Self::with_negotiate_body(negotiate_body("1.3", "20.0"))
    }

    pub fn with_negotiate_body(body: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            negotiate_body: Mutex::new(body.into()),
            held_negotiate: Mutex::new(None),
            ping_body: Mutex::new(r#"{"Response":"pong"}"#.to_string()),
            abort_error: Mutex::new(None),
            connect_script: Mutex::new(VecDeque::new()),
            close_gate: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            connect_urls: Mutex::new(Vec::new()),
            handlers: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            ops: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Next negotiate stays pending until the returned promise is completed
    pub fn hold_negotiate(&self) -> Promise<String> {
        let promise = Promise::new();
        *self.held_negotiate.lock() = Some(promise.clone());
        promise
    }

    pub fn fail_next_connect(&self, message: &str) {
        self.connect_script
            .lock()
            .push_back(ConnectOutcome::Fail(message.to_string()));
    }

    pub fn set_ping_body(&self, body: &str) {
        *self.ping_body.lock() = body.to_string();
    }

    pub fn fail_abort_with(&self, error: HubSocketError) {
        *self.abort_error.lock() = Some(error);
    }

    /// Channels opened from now on complete `close()` only when `gate` does
    pub fn gate_closes(&self, gate: Promise<()>) {
        *self.close_gate.lock() = Some(gate);
    }

    /// Deliver one inbound frame on the most recent channel
    pub fn push(&self, text: &str) {
        let handler = self.handlers.lock().last().cloned();
        handler.expect("no channel opened").on_message(text);
    }

    /// Simulate the server dropping the most recent channel
    pub fn drop_latest_channel(&self) {
        let handler = self.handlers.lock().last().cloned();
        handler.expect("no channel opened").on_close();
    }

    pub fn report_channel_error(&self, error: HubSocketError) {
        let handler = self.handlers.lock().last().cloned();
        handler.expect("no channel opened").on_error(error);
    }

    pub fn latest_channel(&self) -> Arc<MockChannel> {
        self.channels.lock().last().cloned().expect("no channel opened")
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn op_count(&self, op: &str) -> usize {
        self.ops.lock().iter().filter(|o| o.as_str() == op).count()
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().clone()
    }

    /// URLs of every negotiate/ping/abort request, in order
    pub fn request_urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.url.to_string())
            .collect()
    }

    fn record(&self, op: &str, request: &TransportRequest) {
        self.ops.lock().push(op.to_string());
        self.requests.lock().push(request.clone());
    }
}

impl Transport for MockTransport {
    fn name(&self) -> String {
        "mock".to_string()
    }

    fn negotiate(&self, request: &TransportRequest) -> Promise<String> {
        self.record("negotiate", request);
        if let Some(held) = self.held_negotiate.lock().take() {
            return held;
        }
        Promise::resolved(self.negotiate_body.lock().clone())
    }

    fn connect(
        &self,
        request: &ConnectRequest,
        handler: Arc<dyn ChannelHandler>,
    ) -> Promise<Arc<dyn Channel>> {
        self.ops.lock().push(if request.reconnect { "reconnect" } else { "connect" }.to_string());
        match request.address(&self.name(), false) {
            Ok(url) => self.connect_urls.lock().push(url.to_string()),
            Err(e) => return Promise::rejected(e),
        }

        if let Some(ConnectOutcome::Fail(message)) = self.connect_script.lock().pop_front() {
            return Promise::rejected(HubSocketError::Transport(message));
        }

        let channel = Arc::new(MockChannel {
            sent: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
            send_error: Mutex::new(None),
            close_gate: Mutex::new(self.close_gate.lock().clone()),
            handler: Arc::clone(&handler),
            ops: Arc::clone(&self.ops),
        });
        self.handlers.lock().push(Arc::clone(&handler));
        self.channels.lock().push(Arc::clone(&channel));

        handler.on_open();
        let channel: Arc<dyn Channel> = channel;
        Promise::resolved(channel)
    }

    fn ping(&self, request: &TransportRequest) -> Promise<String> {
        self.record("ping", request);
        Promise::resolved(self.ping_body.lock().clone())
    }

    fn abort(&self, request: &TransportRequest) -> Promise<()> {
        self.record("abort", request);
        match self.abort_error.lock().clone() {
            Some(error) => Promise::rejected(error),
            None => Promise::resolved(()),
        }
    }
}

// ============================================================================
// ManualScheduler
// ============================================================================

struct ManualTask {
    interval: Duration,
    task: Arc<dyn Fn() + Send + Sync>,
    cancelled: AtomicBool,
}

impl ScheduledTask for ManualTask {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Scheduler whose periodic tasks only run when the test says so
#[derive(Default)]
pub struct ManualScheduler {
    tasks: Mutex<Vec<Arc<ManualTask>>>,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Intervals of tasks that have not been cancelled
    pub fn active_intervals(&self) -> Vec<Duration> {
        self.tasks
            .lock()
            .iter()
            .filter(|t| !t.is_cancelled())
            .map(|t| t.interval)
            .collect()
    }

    pub fn scheduled_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Run every live task scheduled with `interval` once
    pub fn tick(&self, interval: Duration) -> usize {
        let due: Vec<Arc<ManualTask>> = self
            .tasks
            .lock()
            .iter()
            .filter(|t| !t.is_cancelled() && t.interval == interval)
            .cloned()
            .collect();
        for task in &due {
            (task.task)();
        }
        due.len()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(
        &self,
        interval: Duration,
        task: Arc<dyn Fn() + Send + Sync>,
    ) -> Arc<dyn ScheduledTask> {
        let task = Arc::new(ManualTask {
            interval,
            task,
            cancelled: AtomicBool::new(false),
        });
        self.tasks.lock().push(Arc::clone(&task));
        task
    }

    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        task()
    }
}

// ============================================================================
// RecordingListener
// ============================================================================

/// Listener recording every callback as a short event name
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<String>>,
    messages: Mutex<Vec<Value>>,
    errors: Mutex<Vec<HubSocketError>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| e.as_str() == event).count()
    }

    pub fn messages(&self) -> Vec<Value> {
        self.messages.lock().clone()
    }

    pub fn errors(&self) -> Vec<HubSocketError> {
        self.errors.lock().clone()
    }

    fn push(&self, event: &str) {
        self.events.lock().push(event.to_string());
    }
}

impl ConnectionListener for RecordingListener {
    fn on_connecting(&self) {
        self.push("connecting");
    }

    fn on_connected(&self) {
        self.push("connected");
    }

    fn on_reconnecting(&self) {
        self.push("reconnecting");
    }

    fn on_reconnected(&self) {
        self.push("reconnected");
    }

    fn on_disconnecting(&self) {
        self.push("disconnecting");
    }

    fn on_disconnected(&self) {
        self.push("disconnected");
    }

    fn on_message(&self, message: &Value) {
        self.push("message");
        self.messages.lock().push(message.clone());
    }

    fn on_error(&self, error: &HubSocketError) {
        self.push("error");
        self.errors.lock().push(error.clone());
    }

    fn on_connection_slow(&self) {
        self.push("slow");
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn connection(transport: &Arc<MockTransport>, scheduler: &Arc<ManualScheduler>) -> Connection {
    hubsockets::builder()
        .url(BASE_URL)
        .transport(Arc::clone(transport) as Arc<dyn Transport>)
        .scheduler(Arc::clone(scheduler) as Arc<dyn Scheduler>)
        .build()
        .unwrap()
}

pub fn hub_connection(
    transport: &Arc<MockTransport>,
    scheduler: &Arc<ManualScheduler>,
) -> HubConnection {
    hubsockets::builder()
        .url(BASE_URL)
        .transport(Arc::clone(transport) as Arc<dyn Transport>)
        .scheduler(Arc::clone(scheduler) as Arc<dyn Scheduler>)
        .build_hub()
        .unwrap()
}

/// Settled outcome of a promise completed synchronously by the mocks
pub fn settled<T: Clone + Send + Sync + 'static>(promise: &Promise<T>) -> hubsockets::Result<T> {
    promise.peek().expect("promise still pending")
}

// ============================================================================
// Socket servers
// ============================================================================

/// A simple mock WebSocket server echoing text frames
pub struct MockWsServer {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
}

impl MockWsServer {
    /// Create and start a new mock WebSocket server
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                let shutdown = shutdown_clone.clone();
                                tokio::spawn(async move {
                                    Self::handle_connection(stream, shutdown).await;
                                });
                            }
                            Err(e) => {
                                eprintln!("Accept error: {}", e);
                                break;
                            }
                        }
                    }
                    _ = shutdown_clone.notified() => {
                        break;
                    }
                }
            }
        });

        Self { addr, shutdown }
    }

    async fn handle_connection(stream: tokio::net::TcpStream, shutdown: Arc<Notify>) {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::accept_async;

        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                eprintln!("WebSocket handshake failed: {}", e);
                return;
            }
        };

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(msg)) => {
                            if msg.is_text() || msg.is_binary() {
                                // Echo the message back
                                if write.send(msg).await.is_err() {
                                    break;
                                }
                            } else if msg.is_close() {
                                let _ = write.close().await;
                                break;
                            }
                        }
                        Some(Err(_)) | None => break,
                    }
                }
                _ = shutdown.notified() => {
                    break;
                }
            }
        }
    }

    /// Base URL the transport upgrades to `ws://`
    pub fn http_url(&self) -> String {
        format!("http://{}/signalr/", self.addr)
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for MockWsServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Minimal hub server: HTTP negotiate/ping/abort plus a WebSocket `connect`
/// that answers every invocation with its first argument.
pub struct MockHubServer {
    pub addr: SocketAddr,
    pub paths: Arc<Mutex<Vec<String>>>,
    shutdown: Arc<Notify>,
}

impl MockHubServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        let shutdown_clone = shutdown.clone();
        let paths = Arc::new(Mutex::new(Vec::new()));
        let paths_clone = Arc::clone(&paths);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                let paths = Arc::clone(&paths_clone);
                                tokio::spawn(async move {
                                    Self::handle(stream, paths).await;
                                });
                            }
                            Err(_) => break,
                        }
                    }
                    _ = shutdown_clone.notified() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            paths,
            shutdown,
        }
    }

    async fn request_line(stream: &tokio::net::TcpStream) -> Option<String> {
        let mut buf = [0u8; 2048];
        for _ in 0..100 {
            let n = stream.peek(&mut buf).await.ok()?;
            if n == 0 {
                return None;
            }
            if let Some(end) = buf[..n].windows(2).position(|w| w == b"\r\n") {
                return Some(String::from_utf8_lossy(&buf[..end]).to_string());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        None
    }

    async fn handle(mut stream: tokio::net::TcpStream, paths: Arc<Mutex<Vec<String>>>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let line = match Self::request_line(&stream).await {
            Some(line) => line,
            None => return,
        };
        let target = line.split_whitespace().nth(1).unwrap_or("").to_string();
        let path = target.split('?').next().unwrap_or("").to_string();
        paths.lock().push(target.clone());

        if path.ends_with("/connect") || path.ends_with("/reconnect") {
            Self::serve_websocket(stream).await;
            return;
        }

        // Consume the request head
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            match stream.read(&mut byte).await {
                Ok(1) => head.push(byte[0]),
                _ => return,
            }
        }

        let body = if path.ends_with("/negotiate") {
            negotiate_body("1.3", "20.0")
        } else if path.ends_with("/ping") {
            r#"{"Response":"pong"}"#.to_string()
        } else {
            String::new()
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    }

    async fn serve_websocket(stream: tokio::net::TcpStream) {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message;

        let ws_stream = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(_) => return,
        };
        let (mut write, mut read) = ws_stream.split();

        let init = r#"{"C":"d-1","S":1,"M":[]}"#.to_string();
        if write.send(Message::Text(init)).await.is_err() {
            return;
        }

        while let Some(Ok(msg)) = read.next().await {
            match msg {
                Message::Text(text) => {
                    let request: Value = match serde_json::from_str(&text) {
                        Ok(value) => value,
                        Err(_) => continue,
                    };
                    let reply = serde_json::json!({
                        "I": request["I"].clone(),
                        "R": request["A"][0].clone(),
                    });
                    if write.send(Message::Text(reply.to_string())).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => {
                    let _ = write.close().await;
                    break;
                }
                _ => {}
            }
        }
    }

    pub fn http_url(&self) -> String {
        format!("http://{}/signalr", self.addr)
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for MockHubServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
