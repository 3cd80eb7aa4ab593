//! Keep-alive monitor
//!
//! Tracks time since the last inbound traffic and classifies the connection:
//!
//! ```text
//!  0 ─────────── slow (2T/3) ─────────── lost (T) ──────────>  elapsed
//!      Vital              Slow                    Lost
//! ```
//!
//! Callbacks fire only on the transition into `Slow` or `Lost`, never on every
//! tick. The check runs every `T - 2T/3`.
//!
//! Timestamps are stored as milliseconds since an internal epoch so they fit
//! in an `AtomicU64` and can be stamped from any I/O thread without locking.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Health classification of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MonitorStatus {
    Vital = 0,
    Slow = 1,
    Lost = 2,
}

impl MonitorStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => MonitorStatus::Slow,
            2 => MonitorStatus::Lost,
            _ => MonitorStatus::Vital,
        }
    }
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MonitorStatus::Vital => "Vital",
            MonitorStatus::Slow => "Slow",
            MonitorStatus::Lost => "Lost",
        };
        f.write_str(name)
    }
}

/// Receives monitor transitions
pub trait MonitorListener: Send + Sync {
    /// Non-fatal: the connection may be degraded
    fn on_slow(&self);

    /// Keep-alive timeout exceeded
    fn on_lost(&self);
}

/// Heartbeat tracker for one negotiated session
pub struct TransportMonitor {
    epoch: Instant,
    last_heartbeat_ms: AtomicU64,
    lost_threshold: Duration,
    slow_threshold: Duration,
    status: AtomicU8,
    listener: Arc<dyn MonitorListener>,
}

impl TransportMonitor {
    /// Create a monitor for keep-alive timeout `keep_alive`, stamped as of now
    pub fn new(keep_alive: Duration, listener: Arc<dyn MonitorListener>) -> Self {
        let lost_ms = keep_alive.as_millis() as u64;
        let slow_ms = lost_ms * 2 / 3;
        Self {
            epoch: Instant::now(),
            last_heartbeat_ms: AtomicU64::new(0),
            lost_threshold: Duration::from_millis(lost_ms),
            slow_threshold: Duration::from_millis(slow_ms),
            status: AtomicU8::new(MonitorStatus::Vital as u8),
            listener,
        }
    }

    pub fn lost_threshold(&self) -> Duration {
        self.lost_threshold
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// How often [`tick`](Self::tick) should run
    pub fn check_interval(&self) -> Duration {
        self.lost_threshold - self.slow_threshold
    }

    /// Record inbound traffic
    pub fn beat(&self) {
        let ms = self.epoch.elapsed().as_millis() as u64;
        self.last_heartbeat_ms.store(ms, Ordering::Release);
    }

    pub fn since_last_heartbeat(&self) -> Duration {
        let last = self.last_heartbeat_ms.load(Ordering::Acquire);
        let now = self.epoch.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(last))
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Classify `elapsed` and fire the listener on a transition
    pub fn check(&self, elapsed: Duration) -> MonitorStatus {
        let next = if elapsed >= self.lost_threshold {
            MonitorStatus::Lost
        } else if elapsed >= self.slow_threshold {
            MonitorStatus::Slow
        } else {
            MonitorStatus::Vital
        };

        let previous = MonitorStatus::from_u8(self.status.swap(next as u8, Ordering::AcqRel));
        if previous != next {
            match next {
                MonitorStatus::Lost => {
                    warn!(
                        "No keep-alive for {:?} (timeout {:?}), connection lost",
                        elapsed, self.lost_threshold
                    );
                    self.listener.on_lost();
                }
                MonitorStatus::Slow => {
                    warn!("No keep-alive for {:?}, connection may be slow", elapsed);
                    self.listener.on_slow();
                }
                MonitorStatus::Vital => {
                    debug!("Keep-alive restored after {} state", previous);
                }
            }
        }
        next
    }

    /// Scheduled check against the wall clock
    pub fn tick(&self) -> MonitorStatus {
        self.check(self.since_last_heartbeat())
    }
}
