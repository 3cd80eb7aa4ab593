use crate::core::connection::Connection;
use crate::core::envelope::{
    correlation_id, has_correlation_id, HubInvocation, HubRequest, HubResponse, HubState,
};
use crate::core::promise::{panic_message, Promise};
use crate::core::state::StateKind;
use crate::hub::proxy::{HubProxy, ProxyInner};
use crate::traits::{ConnectionListener, HubSocketError, Result};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

type ReceivedCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// In-flight call awaiting its reply
struct PendingInvocation {
    hub: String,
    result: Promise<Value>,
}

pub(crate) struct HubShared {
    connection: Connection,
    proxies: RwLock<Vec<Arc<ProxyInner>>>,
    pending: DashMap<String, PendingInvocation>,
    next_id: AtomicU64,
    received: RwLock<Vec<ReceivedCallback>>,
}

/// Connection speaking the hub protocol
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct HubConnection {
    shared: Arc<HubShared>,
}

impl HubConnection {
    pub fn new(connection: Connection) -> Self {
        let shared = Arc::new(HubShared {
            connection,
            proxies: RwLock::new(Vec::new()),
            pending: DashMap::new(),
            next_id: AtomicU64::new(0),
            received: RwLock::new(Vec::new()),
        });
        shared.connection.add_listener(Arc::new(HubDispatcher {
            shared: Arc::downgrade(&shared),
        }));
        Self { shared }
    }

    /// Proxy for `hub_name`, created on first use
    ///
    /// Names are case-insensitive. Proxies can only be created while the
    /// connection is disconnected.
    pub fn create_hub_proxy(&self, hub_name: &str) -> Result<HubProxy> {
        let state = self.shared.connection.state();
        if state != StateKind::Disconnected {
            return Err(HubSocketError::InvalidState(format!(
                "cannot create hub proxy {:?} while {}",
                hub_name, state
            )));
        }
        if hub_name.trim().is_empty() {
            return Err(HubSocketError::Configuration(
                "hub name must not be empty".to_string(),
            ));
        }

        let name = hub_name.to_lowercase();
        let mut proxies = self.shared.proxies.write();
        let inner = match proxies.iter().find(|p| p.name() == name) {
            Some(existing) => Arc::clone(existing),
            None => {
                debug!("Creating hub proxy {}", name);
                let inner = Arc::new(ProxyInner::new(name));
                proxies.push(Arc::clone(&inner));
                inner
            }
        };
        Ok(HubProxy::new(inner, Arc::downgrade(&self.shared)))
    }

    /// Start the underlying connection, advertising every registered hub
    pub fn start(&self) -> Promise<()> {
        let data = self.shared.connection_data();
        if self.shared.connection.state() == StateKind::Disconnected {
            if let Err(e) = self.shared.connection.set_connection_data(data) {
                // Lost a race with another start; the connection decides below
                debug!("Connection data not updated: {}", e);
            }
        }
        self.shared.connection.start()
    }

    pub fn stop(&self) -> Promise<()> {
        self.shared.connection.stop()
    }

    /// Observe every uncorrelated push, unchanged
    pub fn on_received<F>(&self, callback: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.shared.received.write().push(Arc::new(callback));
    }

    pub fn add_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.shared.connection.add_listener(listener);
    }

    pub fn connection(&self) -> &Connection {
        &self.shared.connection
    }

    pub fn state(&self) -> StateKind {
        self.shared.connection.state()
    }

    /// Number of calls still waiting for a reply
    pub fn pending_invocations(&self) -> usize {
        self.shared.pending.len()
    }
}

impl HubShared {
    /// `[{"name":"hub"}, ...]` in registration order
    fn connection_data(&self) -> String {
        let hubs: Vec<Value> = self
            .proxies
            .read()
            .iter()
            .map(|p| json!({ "name": p.name() }))
            .collect();
        Value::Array(hubs).to_string()
    }

    fn proxy(&self, hub: &str) -> Option<Arc<ProxyInner>> {
        self.proxies
            .read()
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(hub))
            .cloned()
    }

    pub(crate) fn invoke(
        self: &Arc<Self>,
        hub: &str,
        method: &str,
        args: Vec<Value>,
        state: HubState,
    ) -> Promise<Value> {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel).to_string();
        let request = HubRequest {
            id: id.clone(),
            hub: hub.to_string(),
            method: method.to_string(),
            args,
            state: if state.is_empty() { None } else { Some(state) },
        };

        let encoder = self.connection.context().encoder();
        let text = match encoder.encode_as(&request) {
            Ok(text) => text,
            Err(e) => return Promise::rejected(e),
        };

        let result = Promise::new();
        self.pending.insert(
            id.clone(),
            PendingInvocation {
                hub: hub.to_string(),
                result: result.clone(),
            },
        );
        debug!("Invoking {}.{} (id {})", hub, method, id);

        let shared = Arc::clone(self);
        self.connection.send(&text).add_callback(move |outcome| {
            if let Err(e) = outcome {
                if let Some((_, entry)) = shared.pending.remove(&id) {
                    warn!("Sending invocation {} failed: {}", id, e);
                    entry.result.reject(e.clone());
                }
            }
        });
        result
    }

    fn handle_reply(&self, message: &Value) {
        let reply = match HubResponse::deserialize(message) {
            Ok(reply) => reply,
            Err(e) => {
                self.reject_malformed_reply(message, e.to_string());
                return;
            }
        };

        let entry = match self.pending.remove(&reply.id) {
            Some((_, entry)) => entry,
            None => {
                warn!("No pending invocation for reply {}, dropping", reply.id);
                return;
            }
        };

        if let Some(state) = &reply.state {
            if let Some(proxy) = self.proxy(&entry.hub) {
                proxy.merge_state(state);
            }
        }

        match reply.failure() {
            Some(error) => {
                debug!("Invocation {} failed remotely: {}", reply.id, error);
                entry.result.reject(error);
            }
            None => {
                entry.result.resolve(reply.result.unwrap_or(Value::Null));
            }
        }
    }

    /// A reply that cannot be decoded still settles the call it names
    fn reject_malformed_reply(&self, message: &Value, reason: String) {
        let id = match correlation_id(message) {
            Some(id) => id,
            None => {
                warn!("Dropping malformed hub reply: {}", reason);
                return;
            }
        };
        match self.pending.remove(&id) {
            Some((_, entry)) => {
                warn!("Malformed reply to invocation {}: {}", id, reason);
                entry.result.reject(HubSocketError::Serialization(format!(
                    "malformed reply to invocation {}: {}",
                    id, reason
                )));
            }
            None => warn!(
                "Dropping malformed reply {} with no pending invocation: {}",
                id, reason
            ),
        }
    }

    fn handle_push(&self, message: &Value) {
        if let Ok(invocation) = HubInvocation::deserialize(message) {
            match self.proxy(&invocation.hub) {
                Some(proxy) => {
                    if let Some(state) = &invocation.state {
                        proxy.merge_state(state);
                    }
                    proxy.dispatch(&invocation.method, &invocation.args);
                }
                None => debug!("Push for unknown hub {}", invocation.hub),
            }
        }

        let callbacks = self.received.read().clone();
        for callback in callbacks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(message))) {
                warn!("Push observer panicked: {}", panic_message(panic.as_ref()));
            }
        }
    }

    fn reject_all_pending(&self) {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        if ids.is_empty() {
            return;
        }
        warn!("Connection closed with {} pending invocations", ids.len());
        for id in ids {
            if let Some((_, entry)) = self.pending.remove(&id) {
                entry.result.reject(HubSocketError::ConnectionLost(format!(
                    "connection closed before reply to invocation {}",
                    id
                )));
            }
        }
    }
}

/// Listener routing connection events into the hub layer
struct HubDispatcher {
    shared: Weak<HubShared>,
}

impl ConnectionListener for HubDispatcher {
    fn on_message(&self, message: &Value) {
        let shared = match self.shared.upgrade() {
            Some(shared) => shared,
            None => return,
        };
        if has_correlation_id(message) {
            shared.handle_reply(message);
        } else {
            shared.handle_push(message);
        }
    }

    fn on_disconnected(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.reject_all_pending();
        }
    }
}
