//! Connection state machine
//!
//! Every operation reads the current state and dispatches on it. Transitions
//! are a single compare-and-set against that snapshot; a caller that loses
//! the race re-dispatches to whatever state won instead of retrying:
//!
//! ```text
//!                 start                 connect ok
//!  Disconnected ───────> Connecting ─────────────────> Connected
//!       ▲                    │ fail                     │   │
//!       ├────────────────────┘                     stop │   │ reconnect / lost / T:1
//!       │                                               ▼   ▼
//!       ├─────────────────────────────────── Disconnecting  Reconnecting
//!       │          close + abort settled                        │
//!       └───────────────────────────────────────────────────────┘ fail
//! ```
//!
//! Joining callers of an in-flight `start`, `stop` or `reconnect` receive the
//! same pending [`Promise`].

use crate::core::context::ConnectionContext;
use crate::core::promise::Promise;
use crate::core::state::{ConnectionState, StateKind};
use crate::core::transport_manager::{ConnectionEvents, ServerCommand, TransportManager};
use crate::traits::{Channel, ConnectionListener, HubSocketError, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Handle to one logical connection
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    context: Arc<ConnectionContext>,
    manager: TransportManager,
    /// Id of the latest connect/reconnect attempt
    epoch: AtomicU64,
    this: Weak<ConnectionInner>,
}

impl Connection {
    pub fn new(context: Arc<ConnectionContext>, manager: TransportManager) -> Self {
        let inner = Arc::new_cyclic(|this| ConnectionInner {
            context,
            manager,
            epoch: AtomicU64::new(0),
            this: this.clone(),
        });
        Self { inner }
    }

    /// Negotiate and open the channel
    ///
    /// Joins an in-flight start; resolves immediately when already connected.
    pub fn start(&self) -> Promise<()> {
        self.inner.start_from(self.inner.context.state().get())
    }

    /// Register `listener`, then start
    pub fn start_with(&self, listener: Arc<dyn ConnectionListener>) -> Promise<()> {
        self.add_listener(listener);
        self.start()
    }

    /// Close the channel, abort the session and return to `Disconnected`
    pub fn stop(&self) -> Promise<()> {
        self.inner.stop_from(self.inner.context.state().get())
    }

    /// Send raw text over the open channel
    pub fn send(&self, text: &str) -> Promise<()> {
        self.inner.send(text)
    }

    /// Replace the channel using the `reconnect` endpoint
    pub fn reconnect(&self) -> Promise<()> {
        self.inner.reconnect_from(self.inner.context.state().get())
    }

    pub fn add_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.inner.context.add_listener(listener);
    }

    pub fn add_header(&self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.inner.context.add_header(name, value)
    }

    pub fn add_query_parameter(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        self.inner.context.add_query_parameter(name, value)
    }

    pub fn set_connection_data(&self, data: impl Into<String>) -> Result<()> {
        self.inner.context.set_connection_data(data)
    }

    pub fn state(&self) -> StateKind {
        self.inner.context.state().kind()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.context.state().is_connected()
    }

    pub fn connection_id(&self) -> Option<String> {
        self.inner.context.connection_id()
    }

    pub fn context(&self) -> &Arc<ConnectionContext> {
        &self.inner.context
    }

    pub fn transport_manager(&self) -> &TransportManager {
        &self.inner.manager
    }
}

impl ConnectionInner {
    fn strong(&self) -> Option<Arc<ConnectionInner>> {
        self.this.upgrade()
    }

    fn events(&self) -> Weak<dyn ConnectionEvents> {
        let events: Weak<dyn ConnectionEvents> = self.this.clone();
        events
    }

    fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn is_current_epoch(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) == epoch
    }

    fn invalid(op: &str, state: &ConnectionState) -> Promise<()> {
        Promise::rejected(HubSocketError::InvalidState(format!(
            "cannot {} while {}",
            op,
            state.kind()
        )))
    }

    fn start_from(&self, current: Arc<ConnectionState>) -> Promise<()> {
        match &*current {
            ConnectionState::Disconnected => {
                let pending = Promise::new();
                match self
                    .context
                    .state()
                    .compare_and_set(&current, ConnectionState::Connecting(pending.clone()))
                {
                    Ok(connecting) => {
                        self.run_start(connecting, pending.clone());
                        pending
                    }
                    Err(actual) => self.start_from(actual),
                }
            }
            ConnectionState::Connecting(pending) => pending.clone(),
            ConnectionState::Connected(_) => Promise::resolved(()),
            ConnectionState::Reconnecting(_) | ConnectionState::Disconnecting(_) => {
                Self::invalid("start", &current)
            }
        }
    }

    fn run_start(&self, connecting: Arc<ConnectionState>, pending: Promise<()>) {
        let this = match self.strong() {
            Some(this) => this,
            None => {
                pending.reject(HubSocketError::InvalidState("connection dropped".to_string()));
                return;
            }
        };

        info!("Starting connection to {}", self.context.base_url());
        self.context.notify(|l| l.on_connecting());

        let epoch = self.next_epoch();
        let connector = Arc::clone(&this);
        self.manager
            .negotiate(&self.context)
            .and_then(move |_| {
                connector
                    .manager
                    .connect(&connector.context, connector.events(), epoch, false)
            })
            .add_callback(move |outcome| this.finish_start(&connecting, &pending, outcome));
    }

    fn finish_start(
        &self,
        connecting: &Arc<ConnectionState>,
        pending: &Promise<()>,
        outcome: &Result<Arc<dyn Channel>>,
    ) {
        let state = self.context.state();
        match outcome {
            Ok(channel) => {
                match state.compare_and_set(connecting, ConnectionState::Connected(Arc::clone(channel))) {
                    Ok(_) => {
                        info!(
                            "Connected (connection id {})",
                            self.context.connection_id().unwrap_or_default()
                        );
                        self.context.notify(|l| l.on_connected());
                        self.manager.start_monitoring(&self.context);
                        pending.resolve(());
                    }
                    Err(actual) => {
                        // Connecting is only ever left from here
                        warn!("Connect finished in unexpected state {}", actual.kind());
                        channel.close();
                        pending.reject(HubSocketError::InvalidState(format!(
                            "connect finished while {}",
                            actual.kind()
                        )));
                    }
                }
            }
            Err(e) => {
                warn!("Start failed: {}", e);
                if let Err(actual) = state.compare_and_set(connecting, ConnectionState::Disconnected) {
                    warn!("Start failure observed in unexpected state {}", actual.kind());
                }
                self.manager.stop();
                self.context.notify(|l| l.on_disconnected());
                pending.reject(e.clone());
            }
        }
    }

    fn stop_from(&self, current: Arc<ConnectionState>) -> Promise<()> {
        match &*current {
            ConnectionState::Disconnected => Promise::resolved(()),
            ConnectionState::Connected(channel) => {
                let channel = Arc::clone(channel);
                let pending = Promise::new();
                match self
                    .context
                    .state()
                    .compare_and_set(&current, ConnectionState::Disconnecting(pending.clone()))
                {
                    Ok(disconnecting) => {
                        self.run_stop(disconnecting, channel, pending.clone());
                        pending
                    }
                    Err(actual) => self.stop_from(actual),
                }
            }
            ConnectionState::Disconnecting(pending) => pending.clone(),
            ConnectionState::Connecting(_) | ConnectionState::Reconnecting(_) => {
                Self::invalid("stop", &current)
            }
        }
    }

    fn run_stop(
        &self,
        disconnecting: Arc<ConnectionState>,
        channel: Arc<dyn Channel>,
        pending: Promise<()>,
    ) {
        let this = match self.strong() {
            Some(this) => this,
            None => {
                pending.resolve(());
                return;
            }
        };

        info!("Stopping connection");
        self.context.notify(|l| l.on_disconnecting());
        self.manager.stop_monitoring();

        let aborter = Arc::clone(&this);
        channel
            .close()
            .or_else(|e| {
                warn!("Channel close failed during stop, ignoring: {}", e);
                Promise::resolved(())
            })
            .and_then(move |_| aborter.manager.abort(&aborter.context))
            .add_callback(move |_| {
                if let Err(actual) = this
                    .context
                    .state()
                    .compare_and_set(&disconnecting, ConnectionState::Disconnected)
                {
                    warn!("Stop finished in unexpected state {}", actual.kind());
                }
                this.manager.stop();
                info!("Disconnected");
                this.context.notify(|l| l.on_disconnected());
                pending.resolve(());
            });
    }

    fn send(&self, text: &str) -> Promise<()> {
        let current = self.context.state().get();
        match &*current {
            ConnectionState::Connected(channel) => channel.send(text),
            _ => Self::invalid("send", &current),
        }
    }

    fn reconnect_from(&self, current: Arc<ConnectionState>) -> Promise<()> {
        match &*current {
            ConnectionState::Connected(channel) => {
                let channel = Arc::clone(channel);
                let pending = Promise::new();
                match self
                    .context
                    .state()
                    .compare_and_set(&current, ConnectionState::Reconnecting(pending.clone()))
                {
                    Ok(reconnecting) => {
                        self.run_reconnect(reconnecting, channel, pending.clone());
                        pending
                    }
                    Err(actual) => self.reconnect_from(actual),
                }
            }
            ConnectionState::Reconnecting(pending) => pending.clone(),
            _ => Self::invalid("reconnect", &current),
        }
    }

    fn run_reconnect(
        &self,
        reconnecting: Arc<ConnectionState>,
        channel: Arc<dyn Channel>,
        pending: Promise<()>,
    ) {
        let this = match self.strong() {
            Some(this) => this,
            None => {
                pending.reject(HubSocketError::InvalidState("connection dropped".to_string()));
                return;
            }
        };

        info!("Reconnecting");
        self.context.notify(|l| l.on_reconnecting());

        let epoch = self.next_epoch();
        let connector = Arc::clone(&this);
        channel
            .close()
            .or_else(|e| {
                warn!("Closing the old channel failed, ignoring: {}", e);
                Promise::resolved(())
            })
            .and_then(move |_| {
                connector
                    .manager
                    .connect(&connector.context, connector.events(), epoch, true)
            })
            .add_callback(move |outcome| this.finish_reconnect(&reconnecting, &pending, outcome));
    }

    fn finish_reconnect(
        &self,
        reconnecting: &Arc<ConnectionState>,
        pending: &Promise<()>,
        outcome: &Result<Arc<dyn Channel>>,
    ) {
        let state = self.context.state();
        match outcome {
            Ok(channel) => {
                match state.compare_and_set(reconnecting, ConnectionState::Connected(Arc::clone(channel))) {
                    Ok(_) => {
                        info!("Reconnected");
                        self.context.notify(|l| l.on_reconnected());
                        pending.resolve(());
                    }
                    Err(actual) => {
                        warn!("Reconnect finished in unexpected state {}", actual.kind());
                        channel.close();
                        pending.reject(HubSocketError::InvalidState(format!(
                            "reconnect finished while {}",
                            actual.kind()
                        )));
                    }
                }
            }
            Err(e) => {
                warn!("Reconnect failed: {}", e);
                self.context.notify(|l| l.on_error(e));
                if let Err(actual) = state.compare_and_set(reconnecting, ConnectionState::Disconnected) {
                    warn!("Reconnect failure observed in unexpected state {}", actual.kind());
                }
                self.context.notify(|l| l.on_disconnected());
                self.manager.stop();
                pending.reject(e.clone());
            }
        }
    }
}

impl ConnectionEvents for ConnectionInner {
    fn on_inbound(&self, message: Value) {
        self.context.notify(|l| l.on_message(&message));
    }

    fn on_server_command(&self, command: ServerCommand) {
        info!("Server requested {:?}", command);
        let current = self.context.state().get();
        match command {
            ServerCommand::Disconnect => {
                self.stop_from(current);
            }
            ServerCommand::Reconnect => {
                self.reconnect_from(current);
            }
        }
    }

    fn on_channel_error(&self, epoch: u64, error: HubSocketError) {
        if !self.is_current_epoch(epoch) {
            debug!("Ignoring error from replaced channel {}: {}", epoch, error);
            return;
        }
        warn!("Channel error: {}", error);
        self.context.notify(|l| l.on_error(&error));
    }

    fn on_channel_closed(&self, epoch: u64) {
        let current = self.context.state().get();
        if self.is_current_epoch(epoch) && current.kind() == StateKind::Connected {
            warn!("Channel closed unexpectedly, reconnecting");
            self.reconnect_from(current);
        }
    }

    fn on_connection_slow(&self) {
        self.context.notify(|l| l.on_connection_slow());
    }

    fn on_connection_lost(&self) {
        let current = self.context.state().get();
        if current.kind() != StateKind::Connected {
            debug!("Keep-alive lost while {}, ignoring", current.kind());
            return;
        }
        let error = HubSocketError::ConnectionLost("keep-alive timeout exceeded".to_string());
        self.context.notify(|l| l.on_error(&error));
        self.reconnect_from(current);
    }
}
