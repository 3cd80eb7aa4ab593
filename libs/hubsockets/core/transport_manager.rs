//! Transport orchestration
//!
//! Owns the wire-level half of a connection: negotiate, connect/reconnect,
//! ping, abort and the keep-alive monitor. Everything it learns from the
//! channel is pushed up through [`ConnectionEvents`]:
//!
//! ```text
//! Transport ──frames──> ChannelAdapter ──demultiplexed──> ConnectionEvents
//!                            │                                 ▲
//!                            └──beat──> TransportMonitor ──────┘ (slow / lost)
//! ```

use crate::core::context::ConnectionContext;
use crate::core::envelope::{demultiplex, has_correlation_id, is_keep_alive, Inbound};
use crate::core::monitor::{MonitorListener, TransportMonitor};
use crate::core::negotiation::NegotiationResponse;
use crate::core::ping::{verify_pong, DEFAULT_PING_INTERVAL};
use crate::core::promise::Promise;
use crate::traits::{
    Channel, ChannelHandler, ConnectRequest, HubSocketError, ScheduledTask, Transport,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Control flags carried by a multiplexed envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCommand {
    Disconnect,
    Reconnect,
}

/// Upward interface from the transport layer to the state machine
///
/// `epoch` identifies which connect/reconnect attempt opened the channel the
/// event came from, so late events from replaced channels can be ignored.
pub trait ConnectionEvents: Send + Sync {
    /// One demultiplexed inbound message
    fn on_inbound(&self, message: Value);

    fn on_server_command(&self, command: ServerCommand);

    fn on_channel_error(&self, epoch: u64, error: HubSocketError);

    fn on_channel_closed(&self, epoch: u64);

    fn on_connection_slow(&self);

    fn on_connection_lost(&self);
}

pub struct TransportManager {
    transport: Arc<dyn Transport>,
    ping_interval: Duration,
    monitor: RwLock<Option<Arc<TransportMonitor>>>,
    monitor_task: Mutex<Option<Arc<dyn ScheduledTask>>>,
    ping_task: Mutex<Option<Arc<dyn ScheduledTask>>>,
}

impl TransportManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_ping_interval(transport, DEFAULT_PING_INTERVAL)
    }

    pub fn with_ping_interval(transport: Arc<dyn Transport>, ping_interval: Duration) -> Self {
        Self {
            transport,
            ping_interval,
            monitor: RwLock::new(None),
            monitor_task: Mutex::new(None),
            ping_task: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    pub fn monitor(&self) -> Option<Arc<TransportMonitor>> {
        self.monitor.read().clone()
    }

    /// GET `negotiate`, verify the protocol version and store the result
    pub fn negotiate(&self, ctx: &Arc<ConnectionContext>) -> Promise<Arc<NegotiationResponse>> {
        let request = match ctx.request(
            "negotiate",
            &[
                ("clientProtocol", ctx.protocol_version().to_string()),
                ("connectionData", ctx.connection_data()),
            ],
        ) {
            Ok(request) => request,
            Err(e) => return Promise::rejected(e),
        };

        debug!("Negotiating with {}", request.url);
        let context = Arc::clone(ctx);
        self.transport.negotiate(&request).map(move |body| {
            let encoder = context.encoder();
            let response: NegotiationResponse = encoder.decode_as(&body)?;
            response.verify_protocol(context.protocol_version())?;

            let response = Arc::new(response);
            context.set_negotiated(Arc::clone(&response));
            Ok(response)
        })
    }

    /// Open (or reopen, when `reconnect` is set) the channel for the negotiated session
    pub fn connect(
        &self,
        ctx: &Arc<ConnectionContext>,
        events: Weak<dyn ConnectionEvents>,
        epoch: u64,
        reconnect: bool,
    ) -> Promise<Arc<dyn Channel>> {
        let negotiated = match ctx.negotiated() {
            Some(negotiated) => negotiated,
            None => {
                return Promise::rejected(HubSocketError::InvalidState(
                    "connect requires a successful negotiate".to_string(),
                ))
            }
        };

        let mut query = vec![
            ("connectionToken".to_string(), negotiated.connection_token.clone()),
            ("connectionData".to_string(), ctx.connection_data()),
            ("clientProtocol".to_string(), ctx.protocol_version().to_string()),
        ];
        if reconnect {
            let cursor = ctx.cursor();
            if let Some(id) = cursor.message_id {
                query.push(("messageId".to_string(), id));
            }
            if let Some(token) = cursor.groups_token {
                query.push(("groupsToken".to_string(), token));
            }
        }
        query.extend(ctx.query());

        let request = ConnectRequest {
            base_url: ctx.base_url().clone(),
            reconnect,
            query,
            headers: ctx.headers(),
        };

        let monitor = if reconnect {
            self.monitor()
        } else {
            let monitor = negotiated.transport_options().keep_alive().map(|keep_alive| {
                Arc::new(TransportMonitor::new(
                    keep_alive,
                    Arc::new(MonitorBridge {
                        events: events.clone(),
                    }),
                ))
            });
            *self.monitor.write() = monitor.clone();
            monitor
        };

        let handler = Arc::new(ChannelAdapter {
            epoch,
            context: Arc::downgrade(ctx),
            events,
            monitor,
        });

        debug!(
            "{} via {} (attempt {})",
            if reconnect { "Reconnecting" } else { "Connecting" },
            self.transport.name(),
            epoch
        );
        self.transport.connect(&request, handler)
    }

    /// Schedule the monitor check and the ping job
    ///
    /// Both only run when the server negotiated a positive keep-alive timeout.
    pub fn start_monitoring(&self, ctx: &Arc<ConnectionContext>) {
        let monitor = match self.monitor() {
            Some(monitor) => monitor,
            None => {
                debug!("Keep-alive disabled by server, monitor and ping not started");
                return;
            }
        };
        self.stop_monitoring();

        let scheduler = ctx.scheduler();

        let check = Arc::clone(&monitor);
        let monitor_task = scheduler.schedule(
            monitor.check_interval(),
            Arc::new(move || {
                check.tick();
            }),
        );

        let transport = Arc::clone(&self.transport);
        let context = Arc::clone(ctx);
        let ping_task = scheduler.schedule(
            self.ping_interval,
            Arc::new(move || {
                let context_for_errors = Arc::clone(&context);
                ping_server(&transport, &context).add_callback(move |outcome| {
                    if let Err(e) = outcome {
                        warn!("Ping failed: {}", e);
                        context_for_errors.notify(|l| l.on_error(e));
                    }
                });
            }),
        );

        info!(
            "Keep-alive monitor every {:?}, ping every {:?}",
            monitor.check_interval(),
            self.ping_interval
        );
        *self.monitor_task.lock() = Some(monitor_task);
        *self.ping_task.lock() = Some(ping_task);
    }

    /// Cancel the monitor check and ping job
    pub fn stop_monitoring(&self) {
        if let Some(task) = self.monitor_task.lock().take() {
            task.cancel();
        }
        if let Some(task) = self.ping_task.lock().take() {
            task.cancel();
        }
    }

    /// Tear down everything this manager started for the session
    pub fn stop(&self) {
        self.stop_monitoring();
        *self.monitor.write() = None;
    }

    /// One ping round trip
    pub fn ping(&self, ctx: &Arc<ConnectionContext>) -> Promise<()> {
        ping_server(&self.transport, ctx)
    }

    /// POST `abort`; failures are logged and the returned promise always resolves
    pub fn abort(&self, ctx: &Arc<ConnectionContext>) -> Promise<()> {
        let token = match ctx.connection_token() {
            Some(token) => token,
            None => return Promise::resolved(()),
        };

        let request = match ctx.request(
            "abort",
            &[
                ("transport", self.transport.name()),
                ("connectionToken", token),
                ("connectionData", ctx.connection_data()),
            ],
        ) {
            Ok(request) => request,
            Err(e) => {
                warn!("Skipping abort: {}", e);
                return Promise::resolved(());
            }
        };

        self.transport.abort(&request).catch(|e| {
            warn!("Abort failed, ignoring: {}", e);
            Ok(())
        })
    }
}

fn ping_server(transport: &Arc<dyn Transport>, ctx: &Arc<ConnectionContext>) -> Promise<()> {
    let request = match ctx.request("ping", &[("connectionData", ctx.connection_data())]) {
        Ok(request) => request,
        Err(e) => return Promise::rejected(e),
    };

    let encoder = ctx.encoder();
    transport
        .ping(&request)
        .map(move |body| verify_pong(encoder.as_ref(), &body))
}

struct MonitorBridge {
    events: Weak<dyn ConnectionEvents>,
}

impl MonitorListener for MonitorBridge {
    fn on_slow(&self) {
        if let Some(events) = self.events.upgrade() {
            events.on_connection_slow();
        }
    }

    fn on_lost(&self) {
        if let Some(events) = self.events.upgrade() {
            events.on_connection_lost();
        }
    }
}

/// Handler wired into every channel the manager opens
///
/// The context is held weakly: the channel lives inside the context's state.
struct ChannelAdapter {
    epoch: u64,
    context: Weak<ConnectionContext>,
    events: Weak<dyn ConnectionEvents>,
    monitor: Option<Arc<TransportMonitor>>,
}

impl ChannelAdapter {
    fn beat(&self) {
        if let Some(monitor) = &self.monitor {
            monitor.beat();
        }
    }
}

impl ChannelHandler for ChannelAdapter {
    fn on_open(&self) {
        debug!("Channel {} open", self.epoch);
        self.beat();
    }

    fn on_message(&self, text: &str) {
        self.beat();
        let (events, context) = match (self.events.upgrade(), self.context.upgrade()) {
            (Some(events), Some(context)) => (events, context),
            _ => return,
        };

        let value = match context.encoder().decode(text) {
            Ok(value) => value,
            Err(e) => {
                events.on_channel_error(self.epoch, e);
                return;
            }
        };
        if is_keep_alive(&value) {
            return;
        }

        match demultiplex(&value) {
            Ok(Inbound::Reply(_)) => events.on_inbound(value),
            Ok(Inbound::Multiplexed(envelope)) => {
                context.record_cursor(
                    envelope.message_id.as_deref(),
                    envelope.groups_token.as_deref(),
                );
                for message in envelope.messages {
                    events.on_inbound(message);
                }
                if envelope.disconnect {
                    events.on_server_command(ServerCommand::Disconnect);
                } else if envelope.reconnect {
                    events.on_server_command(ServerCommand::Reconnect);
                }
            }
            Err(e) => {
                events.on_channel_error(self.epoch, e);
                // The pending call still needs its reply, malformed or not
                if has_correlation_id(&value) {
                    events.on_inbound(value);
                }
            }
        }
    }

    fn on_error(&self, error: HubSocketError) {
        if let Some(events) = self.events.upgrade() {
            events.on_channel_error(self.epoch, error);
        }
    }

    fn on_close(&self) {
        debug!("Channel {} closed", self.epoch);
        if let Some(events) = self.events.upgrade() {
            events.on_channel_closed(self.epoch);
        }
    }
}
