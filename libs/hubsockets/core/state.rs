//! Connection state machine storage
//!
//! The current [`ConnectionState`] lives behind a single lock-free swap cell
//! (`ArcSwap`). Transitions
//! replace the whole state value and only succeed against the exact instance
//! the caller observed:
//!
//! ```text
//! let seen = state.get();                       // snapshot
//! match state.compare_and_set(&seen, next) {
//!     Ok(new)     => /* we own the transition */,
//!     Err(actual) => /* someone else won: dispatch to `actual` */,
//! }
//! ```
//!
//! Identity is pointer identity of the `Arc`, so two `Connecting` states from
//! different start attempts never compare equal.

use crate::core::promise::Promise;
use crate::traits::Channel;
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Connection lifecycle state
///
/// Pending variants carry the promise every joining caller receives.
pub enum ConnectionState {
    Disconnected,
    Connecting(Promise<()>),
    Connected(Arc<dyn Channel>),
    Reconnecting(Promise<()>),
    Disconnecting(Promise<()>),
}

/// Data-free tag of a [`ConnectionState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
}

impl StateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Disconnected => "Disconnected",
            StateKind::Connecting => "Connecting",
            StateKind::Connected => "Connected",
            StateKind::Reconnecting => "Reconnecting",
            StateKind::Disconnecting => "Disconnecting",
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ConnectionState {
    pub fn kind(&self) -> StateKind {
        match self {
            ConnectionState::Disconnected => StateKind::Disconnected,
            ConnectionState::Connecting(_) => StateKind::Connecting,
            ConnectionState::Connected(_) => StateKind::Connected,
            ConnectionState::Reconnecting(_) => StateKind::Reconnecting,
            ConnectionState::Disconnecting(_) => StateKind::Disconnecting,
        }
    }

    /// The in-flight result of a pending state
    pub fn pending(&self) -> Option<&Promise<()>> {
        match self {
            ConnectionState::Connecting(p)
            | ConnectionState::Reconnecting(p)
            | ConnectionState::Disconnecting(p) => Some(p),
            ConnectionState::Disconnected | ConnectionState::Connected(_) => None,
        }
    }

    pub fn channel(&self) -> Option<&Arc<dyn Channel>> {
        match self {
            ConnectionState::Connected(channel) => Some(channel),
            _ => None,
        }
    }
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pending() {
            Some(pending) => f
                .debug_tuple(self.kind().as_str())
                .field(pending)
                .finish(),
            None => f.write_str(self.kind().as_str()),
        }
    }
}

/// Swap cell holding the current state
pub struct AtomicConnectionState {
    current: ArcSwap<ConnectionState>,
    transitions: AtomicU64,
}

impl AtomicConnectionState {
    pub fn new(initial: ConnectionState) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            transitions: AtomicU64::new(0),
        }
    }

    /// Snapshot of the current state
    #[inline]
    pub fn get(&self) -> Arc<ConnectionState> {
        self.current.load_full()
    }

    #[inline]
    pub fn kind(&self) -> StateKind {
        self.current.load().kind()
    }

    /// Replace `expected` with `next`
    ///
    /// Returns the installed state on success, or the actual current state
    /// when `expected` is no longer current.
    pub fn compare_and_set(
        &self,
        expected: &Arc<ConnectionState>,
        next: ConnectionState,
    ) -> Result<Arc<ConnectionState>, Arc<ConnectionState>> {
        let next = Arc::new(next);
        let previous = self.current.compare_and_swap(expected, Arc::clone(&next));
        if !Arc::ptr_eq(&*previous, expected) {
            return Err(Arc::clone(&*previous));
        }
        self.transitions.fetch_add(1, Ordering::AcqRel);
        Ok(next)
    }

    /// Number of successful transitions so far
    pub fn transitions(&self) -> u64 {
        self.transitions.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_disconnected(&self) -> bool {
        self.kind() == StateKind::Disconnected
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.kind() == StateKind::Connected
    }
}

impl Default for AtomicConnectionState {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected)
    }
}
