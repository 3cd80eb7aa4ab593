//! Ordered transport fallback
//!
//! Connect tries each candidate in turn and only fails once the last one has
//! failed, with that candidate's error. Negotiate and ping always go through
//! the first candidate; abort and `name()` follow whichever candidate opened
//! the current channel.

use crate::core::promise::Promise;
use crate::traits::{
    Channel, ChannelHandler, ConnectRequest, HubSocketError, Transport, TransportRequest,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct AutoTransport {
    candidates: Arc<Vec<Arc<dyn Transport>>>,
    active: Arc<AtomicUsize>,
}

impl AutoTransport {
    /// Fails with `Configuration` when `candidates` is empty
    pub fn new(candidates: Vec<Arc<dyn Transport>>) -> crate::traits::Result<Self> {
        if candidates.is_empty() {
            return Err(HubSocketError::Configuration(
                "auto transport needs at least one candidate".to_string(),
            ));
        }
        Ok(Self {
            candidates: Arc::new(candidates),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn candidates(&self) -> &[Arc<dyn Transport>] {
        &self.candidates
    }

    /// The candidate that opened the latest channel
    pub fn active(&self) -> &Arc<dyn Transport> {
        let index = self.active.load(Ordering::Acquire);
        &self.candidates[index.min(self.candidates.len() - 1)]
    }

    fn first(&self) -> &Arc<dyn Transport> {
        &self.candidates[0]
    }
}

fn connect_from(
    candidates: Arc<Vec<Arc<dyn Transport>>>,
    active: Arc<AtomicUsize>,
    index: usize,
    request: ConnectRequest,
    handler: Arc<dyn ChannelHandler>,
) -> Promise<Arc<dyn Channel>> {
    let candidate = Arc::clone(&candidates[index]);
    debug!("Trying transport {} ({}/{})", candidate.name(), index + 1, candidates.len());

    let attempt = candidate.connect(&request, Arc::clone(&handler));
    let on_success = Arc::clone(&active);
    let connected = attempt.map(move |channel| {
        on_success.store(index, Ordering::Release);
        Ok(channel)
    });

    if index + 1 == candidates.len() {
        return connected;
    }

    connected.or_else(move |e| {
        warn!("Transport {} failed, falling back: {}", candidate.name(), e);
        connect_from(candidates, active, index + 1, request, handler)
    })
}

impl Transport for AutoTransport {
    fn name(&self) -> String {
        self.active().name()
    }

    fn negotiate(&self, request: &TransportRequest) -> Promise<String> {
        self.first().negotiate(request)
    }

    fn connect(
        &self,
        request: &ConnectRequest,
        handler: Arc<dyn ChannelHandler>,
    ) -> Promise<Arc<dyn Channel>> {
        connect_from(
            Arc::clone(&self.candidates),
            Arc::clone(&self.active),
            0,
            request.clone(),
            handler,
        )
    }

    fn ping(&self, request: &TransportRequest) -> Promise<String> {
        self.first().ping(request)
    }

    fn abort(&self, request: &TransportRequest) -> Promise<()> {
        self.active().abort(request)
    }
}
