use crate::core::envelope::HubState;
use crate::core::promise::{panic_message, Promise};
use crate::hub::connection::HubShared;
use crate::traits::{HubSocketError, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

type MethodHandler = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Per-hub handlers and round-tripped state
pub(crate) struct ProxyInner {
    name: String,
    handlers: RwLock<HashMap<String, Vec<MethodHandler>>>,
    state: RwLock<HubState>,
}

impl ProxyInner {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            handlers: RwLock::new(HashMap::new()),
            state: RwLock::new(HubState::new()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn merge_state(&self, update: &HubState) {
        let mut state = self.state.write();
        for (key, value) in update {
            state.insert(key.clone(), value.clone());
        }
    }

    /// Run every handler registered for `method` (case-insensitive)
    pub(crate) fn dispatch(&self, method: &str, args: &[Value]) {
        let handlers = self
            .handlers
            .read()
            .get(&method.to_lowercase())
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            debug!("No handler for {}.{}", self.name, method);
            return;
        }
        for handler in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(args))) {
                warn!(
                    "Handler for {}.{} panicked: {}",
                    self.name,
                    method,
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}

/// Client-side handle for one server hub
#[derive(Clone)]
pub struct HubProxy {
    inner: Arc<ProxyInner>,
    hub: Weak<HubShared>,
}

impl std::fmt::Debug for HubProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubProxy")
            .field("name", &self.inner.name())
            .finish_non_exhaustive()
    }
}

impl HubProxy {
    pub(crate) fn new(inner: Arc<ProxyInner>, hub: Weak<HubShared>) -> Self {
        Self { inner, hub }
    }

    /// Hub name as sent on the wire (lowercase)
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Call `method` on the server hub
    ///
    /// Resolves with the reply's `R` payload (`null` when absent), or rejects
    /// with `HubInvocation` when the server reports an error.
    pub fn invoke(&self, method: &str, args: Vec<Value>) -> Promise<Value> {
        match self.hub.upgrade() {
            Some(hub) => hub.invoke(self.inner.name(), method, args, self.state()),
            None => Promise::rejected(HubSocketError::InvalidState(
                "hub connection dropped".to_string(),
            )),
        }
    }

    /// [`invoke`](Self::invoke) with the payload deserialized into `T`
    pub fn invoke_as<T>(&self, method: &str, args: Vec<Value>) -> Promise<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let method_name = method.to_string();
        self.invoke(method, args).map(move |payload| {
            serde_json::from_value(payload).map_err(|e| {
                HubSocketError::Serialization(format!(
                    "unexpected result shape for {}: {}",
                    method_name, e
                ))
            })
        })
    }

    /// Register a handler for server pushes of `method`
    pub fn on<F>(&self, method: &str, handler: F)
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .write()
            .entry(method.to_lowercase())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Set one key of the state sent with every invocation
    pub fn set_state<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.inner.state.write().insert(key.to_string(), value);
        Ok(())
    }

    pub fn get_state(&self, key: &str) -> Option<Value> {
        self.inner.state.read().get(key).cloned()
    }

    /// Snapshot of the whole state blob
    pub fn state(&self) -> HubState {
        self.inner.state.read().clone()
    }
}
