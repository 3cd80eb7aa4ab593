//! WebSocket transport
//!
//! HTTP endpoints (negotiate, ping, abort) go through `reqwest`; the channel
//! is a `tokio-tungstenite` stream split into two tasks:
//!
//! ```text
//!                ┌──────────────┐
//!  send/close ──>│ writer task  │──> SplitSink ──> server
//!  (unbounded)   └──────────────┘
//!                ┌──────────────┐
//!  handler <─────│ reader task  │<── SplitStream <── server
//!                └──────────────┘
//! ```
//!
//! Each outbound frame carries its own promise, completed by the writer once
//! the frame is written.

use crate::core::promise::Promise;
use crate::traits::{
    Channel, ChannelHandler, ConnectRequest, Headers, HubSocketError, Result, Transport,
    TransportRequest,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, warn};

/// Protocol name of this transport
pub const WEBSOCKETS: &str = "webSockets";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    http: reqwest::Client,
    runtime: Handle,
}

impl WebSocketTransport {
    /// Transport on the current Tokio runtime
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            HubSocketError::Configuration(format!("no Tokio runtime available: {}", e))
        })?;
        Ok(Self::with_runtime(runtime))
    }

    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            http: reqwest::Client::new(),
            runtime,
        }
    }

    fn http_call(&self, method: reqwest::Method, request: &TransportRequest) -> Promise<String> {
        let promise = Promise::new();
        let completion = promise.clone();

        let mut builder = self.http.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let url = request.url.clone();

        self.runtime.spawn(async move {
            let outcome = async {
                let response = builder
                    .send()
                    .await
                    .map_err(|e| HubSocketError::Transport(format!("{} failed: {}", url.path(), e)))?;
                let response = response.error_for_status().map_err(|e| {
                    HubSocketError::Transport(format!("{} failed: {}", url.path(), e))
                })?;
                response.text().await.map_err(|e| {
                    HubSocketError::Transport(format!("reading {} failed: {}", url.path(), e))
                })
            }
            .await;
            completion.complete(outcome);
        });

        promise
    }
}

impl Transport for WebSocketTransport {
    fn name(&self) -> String {
        WEBSOCKETS.to_string()
    }

    fn negotiate(&self, request: &TransportRequest) -> Promise<String> {
        self.http_call(reqwest::Method::GET, request)
    }

    fn connect(
        &self,
        request: &ConnectRequest,
        handler: Arc<dyn ChannelHandler>,
    ) -> Promise<Arc<dyn Channel>> {
        let ws_request = match request
            .address(WEBSOCKETS, true)
            .and_then(|url| client_request(url.as_str(), &request.headers))
        {
            Ok(ws_request) => ws_request,
            Err(e) => return Promise::rejected(e),
        };

        let promise = Promise::new();
        let completion = promise.clone();
        let runtime = self.runtime.clone();

        self.runtime.spawn(async move {
            match connect_async(ws_request).await {
                Ok((stream, _)) => {
                    debug!("WebSocket channel open");
                    let (write, read) = stream.split();
                    let (tx, rx) = unbounded_channel();
                    let channel: Arc<dyn Channel> = Arc::new(WebSocketChannel {
                        outbound: tx,
                        closed: AtomicBool::new(false),
                    });

                    runtime.spawn(writer_task(write, rx));
                    handler.on_open();
                    completion.resolve(channel);
                    reader_task(read, handler).await;
                }
                Err(e) => {
                    completion.reject(HubSocketError::Transport(format!(
                        "WebSocket connect failed: {}",
                        e
                    )));
                }
            }
        });

        promise
    }

    fn ping(&self, request: &TransportRequest) -> Promise<String> {
        self.http_call(reqwest::Method::GET, request)
    }

    fn abort(&self, request: &TransportRequest) -> Promise<()> {
        self.http_call(reqwest::Method::POST, request).map(|_| Ok(()))
    }
}

fn client_request(
    url: &str,
    headers: &Headers,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
    let mut request = url
        .into_client_request()
        .map_err(|e| HubSocketError::Configuration(format!("invalid WebSocket address: {}", e)))?;

    for (key, value) in headers {
        match key.parse::<HeaderName>() {
            Ok(header_name) => match value.parse::<HeaderValue>() {
                Ok(header_value) => {
                    request.headers_mut().append(header_name, header_value);
                }
                Err(_) => warn!("Invalid header value for key '{}': {}", key, value),
            },
            Err(_) => warn!("Invalid header name: {}", key),
        }
    }
    Ok(request)
}

enum Outbound {
    Frame(String, Promise<()>),
    Close(Promise<()>),
}

/// Open WebSocket channel
pub struct WebSocketChannel {
    outbound: UnboundedSender<Outbound>,
    closed: AtomicBool,
}

impl Channel for WebSocketChannel {
    fn send(&self, text: &str) -> Promise<()> {
        if self.closed.load(Ordering::Acquire) {
            return Promise::rejected(HubSocketError::Transport("channel is closed".to_string()));
        }
        let promise = Promise::new();
        if self
            .outbound
            .send(Outbound::Frame(text.to_string(), promise.clone()))
            .is_err()
        {
            return Promise::rejected(HubSocketError::Transport("channel is closed".to_string()));
        }
        promise
    }

    fn close(&self) -> Promise<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Promise::resolved(());
        }
        let promise = Promise::new();
        if self.outbound.send(Outbound::Close(promise.clone())).is_err() {
            // Writer already gone: the stream is closed
            return Promise::resolved(());
        }
        promise
    }
}

async fn writer_task(mut write: SplitSink<WsStream, Message>, mut rx: UnboundedReceiver<Outbound>) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(text, done) => {
                let outcome = write
                    .send(Message::Text(text))
                    .await
                    .map_err(|e| HubSocketError::Transport(format!("send failed: {}", e)));
                done.complete(outcome);
            }
            Outbound::Close(done) => {
                if let Err(e) = write.close().await {
                    debug!("Close handshake failed: {}", e);
                }
                done.resolve(());
                break;
            }
        }
    }

    // Fail whatever was queued behind the close
    rx.close();
    while let Ok(outbound) = rx.try_recv() {
        match outbound {
            Outbound::Frame(_, done) => {
                done.reject(HubSocketError::Transport("channel is closed".to_string()));
            }
            Outbound::Close(done) => {
                done.resolve(());
            }
        }
    }
    debug!("WebSocket writer exiting");
}

async fn reader_task(mut read: SplitStream<WsStream>, handler: Arc<dyn ChannelHandler>) {
    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => handler.on_message(&text),
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => handler.on_message(&text),
                Err(_) => warn!("Dropping non UTF-8 binary frame"),
            },
            Ok(Message::Close(frame)) => {
                debug!("Server closed the channel: {:?}", frame);
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
            Err(e) => {
                error!("WebSocket error: {}", e);
                handler.on_error(HubSocketError::Transport(e.to_string()));
                break;
            }
        }
    }
    handler.on_close();
}
