//! Single-assignment async result
//!
//! A [`Promise`] starts pending and is completed exactly once, either resolved
//! with a value or rejected with a [`HubSocketError`]. The first completion wins;
//! every later `resolve`/`reject` is a no-op that returns `false`.
//!
//! # Callback semantics
//!
//! ```text
//! add_callback while pending  ──> queued, fired once by the completing thread
//! add_callback after complete ──> fired immediately on the registering thread
//! ```
//!
//! Nothing here blocks a thread except [`Promise::await_result`], which exists
//! only to bridge into synchronous call sites (tests, `main`). Async callers use
//! [`Promise::wait`].
//!
//! # Chaining
//!
//! ```ignore
//! let text: Promise<String> = transport.negotiate(&request);
//! let negotiated = text
//!     .map(|body| parse(&body))              // transform success
//!     .and_then(|resp| connect(resp))        // chain another promise
//!     .catch(|err| fallback(err))            // recover failures only
//!     .on_complete(|outcome| log(outcome));  // observe both branches
//! ```

use crate::traits::{HubSocketError, Result, Scheduler};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

type Callback<T> = Box<dyn FnOnce(&Result<T>) + Send + 'static>;

enum Slot<T> {
    Pending(Vec<Callback<T>>),
    Done(Arc<Result<T>>),
}

struct Inner<T> {
    slot: Mutex<Slot<T>>,
    settled: Condvar,
}

/// Single-assignment, observer-registerable future
///
/// Cloning a promise yields another handle to the same result.
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.slot.lock() {
            Slot::Pending(_) => "pending",
            Slot::Done(outcome) if outcome.is_ok() => "resolved",
            Slot::Done(_) => "rejected",
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

impl<T: Send + Sync + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> Promise<T> {
    /// Create a pending promise
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot::Pending(Vec::new())),
                settled: Condvar::new(),
            }),
        }
    }

    /// Create an already-resolved promise
    pub fn resolved(value: T) -> Self {
        Self::from_result(Ok(value))
    }

    /// Create an already-rejected promise
    pub fn rejected(error: HubSocketError) -> Self {
        Self::from_result(Err(error))
    }

    pub fn from_result(outcome: Result<T>) -> Self {
        let promise = Self::new();
        promise.complete(outcome);
        promise
    }

    /// Resolve with `value`. Returns `false` if already completed.
    pub fn resolve(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// Reject with `error`. Returns `false` if already completed.
    pub fn reject(&self, error: HubSocketError) -> bool {
        self.complete(Err(error))
    }

    /// Move from pending to `outcome`, then fire every queued callback
    /// on the calling thread.
    pub fn complete(&self, outcome: Result<T>) -> bool {
        let outcome = Arc::new(outcome);

        let mut slot = self.inner.slot.lock();
        if let Slot::Done(_) = *slot {
            return false;
        }
        let previous = std::mem::replace(&mut *slot, Slot::Done(Arc::clone(&outcome)));
        drop(slot);
        self.inner.settled.notify_all();

        if let Slot::Pending(callbacks) = previous {
            for callback in callbacks {
                fire(callback, &outcome);
            }
        }
        true
    }

    /// Observe the outcome
    ///
    /// Fires synchronously if the promise is already complete, otherwise
    /// exactly once on whichever thread completes it. A panicking callback is
    /// logged and does not affect other callbacks.
    pub fn add_callback<F>(&self, callback: F)
    where
        F: FnOnce(&Result<T>) + Send + 'static,
    {
        let outcome = {
            let mut slot = self.inner.slot.lock();
            match &mut *slot {
                Slot::Pending(callbacks) => {
                    callbacks.push(Box::new(callback));
                    return;
                }
                Slot::Done(outcome) => Arc::clone(outcome),
            }
        };
        fire(Box::new(callback), &outcome);
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.inner.slot.lock(), Slot::Pending(_))
    }

    pub fn is_resolved(&self) -> bool {
        matches!(&*self.inner.slot.lock(), Slot::Done(outcome) if outcome.is_ok())
    }

    pub fn is_rejected(&self) -> bool {
        matches!(&*self.inner.slot.lock(), Slot::Done(outcome) if outcome.is_err())
    }

    /// Whether both handles point at the same underlying result
    pub fn ptr_eq(&self, other: &Promise<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    /// Current outcome without waiting
    pub fn peek(&self) -> Option<Result<T>> {
        match &*self.inner.slot.lock() {
            Slot::Pending(_) => None,
            Slot::Done(outcome) => Some((**outcome).clone()),
        }
    }

    /// Block the calling thread until completion or `timeout`
    ///
    /// Bridging utility for synchronous call sites only; never used inside
    /// the connection engine.
    pub fn await_result(&self, timeout: Option<Duration>) -> Result<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = self.inner.slot.lock();
        loop {
            if let Slot::Done(outcome) = &*slot {
                return (**outcome).clone();
            }
            match deadline {
                Some(deadline) => {
                    let timed_out = self.inner.settled.wait_until(&mut slot, deadline).timed_out();
                    if timed_out {
                        if let Slot::Done(outcome) = &*slot {
                            return (**outcome).clone();
                        }
                        return Err(HubSocketError::Timeout(format!(
                            "promise not completed within {:?}",
                            timeout.unwrap_or_default()
                        )));
                    }
                }
                None => self.inner.settled.wait(&mut slot),
            }
        }
    }

    /// Async bridge: a future completing with this promise's outcome
    pub fn wait(&self) -> impl Future<Output = Result<T>> + Send + 'static {
        let (tx, rx) = futures::channel::oneshot::channel();
        self.add_callback(move |outcome| {
            let _ = tx.send(outcome.clone());
        });
        async move {
            rx.await.unwrap_or_else(|_| {
                Err(HubSocketError::Other(
                    "promise dropped before completion".to_string(),
                ))
            })
        }
    }

    /// Complete `target` with this promise's outcome
    pub fn forward_to(&self, target: &Promise<T>) {
        let target = target.clone();
        self.add_callback(move |outcome| {
            target.complete(outcome.clone());
        });
    }

    /// Transform the success value; failures pass through
    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let downstream = Promise::new();
        let next = downstream.clone();
        self.add_callback(move |outcome| {
            let mapped = match outcome {
                Ok(value) => {
                    let value = value.clone();
                    guarded(move || f(value))
                }
                Err(e) => Err(e.clone()),
            };
            next.complete(mapped);
        });
        downstream
    }

    /// Chain to another async result produced from the success value
    pub fn and_then<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        let downstream = Promise::new();
        let next = downstream.clone();
        self.add_callback(move |outcome| match outcome {
            Ok(value) => {
                let value = value.clone();
                match guarded(move || Ok(f(value))) {
                    Ok(chained) => chained.forward_to(&next),
                    Err(e) => {
                        next.reject(e);
                    }
                }
            }
            Err(e) => {
                next.reject(e.clone());
            }
        });
        downstream
    }

    /// Chain to another async result produced from the failure
    pub fn or_else<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(HubSocketError) -> Promise<T> + Send + 'static,
    {
        let downstream = Promise::new();
        let next = downstream.clone();
        self.add_callback(move |outcome| match outcome {
            Ok(value) => {
                next.resolve(value.clone());
            }
            Err(e) => {
                let original = e.clone();
                match guarded(move || Ok(f(original))) {
                    Ok(chained) => chained.forward_to(&next),
                    Err(failure) => {
                        next.reject(failure.with_suppressed(e.clone()));
                    }
                }
            }
        });
        downstream
    }

    /// Recover from failure only
    pub fn catch<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(HubSocketError) -> Result<T> + Send + 'static,
    {
        let downstream = Promise::new();
        let next = downstream.clone();
        self.add_callback(move |outcome| match outcome {
            Ok(value) => {
                next.resolve(value.clone());
            }
            Err(e) => {
                let original = e.clone();
                match guarded(move || f(original)) {
                    Ok(value) => {
                        next.resolve(value);
                    }
                    Err(failure) => {
                        next.reject(failure.with_suppressed(e.clone()));
                    }
                }
            }
        });
        downstream
    }

    /// Side effect observing both branches; the outcome passes through
    /// unless the side effect itself fails.
    pub fn on_complete<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(&Result<T>) -> Result<()> + Send + 'static,
    {
        let downstream = Promise::new();
        let next = downstream.clone();
        self.add_callback(move |outcome| match guarded(|| f(outcome)) {
            Ok(()) => {
                next.complete(outcome.clone());
            }
            Err(failure) => {
                let failure = match outcome {
                    Err(original) => failure.with_suppressed(original.clone()),
                    Ok(_) => failure,
                };
                next.reject(failure);
            }
        });
        downstream
    }

    /// Deliver the outcome through `executor` instead of the completing thread
    pub fn run_on(&self, executor: Arc<dyn Scheduler>) -> Promise<T> {
        let downstream = Promise::new();
        let next = downstream.clone();
        self.add_callback(move |outcome| {
            let outcome = outcome.clone();
            executor.execute(Box::new(move || {
                next.complete(outcome);
            }));
        });
        downstream
    }
}

impl<U: Clone + Send + Sync + 'static> Promise<Promise<U>> {
    /// Collapse a promise of a promise
    pub fn flatten(&self) -> Promise<U> {
        self.and_then(|inner| inner)
    }
}

fn fire<T>(callback: Callback<T>, outcome: &Result<T>) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(outcome))) {
        warn!("Promise callback panicked: {}", panic_message(panic.as_ref()));
    }
}

/// Run a continuation closure, turning a panic into a rejection
fn guarded<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|panic| {
        Err(HubSocketError::CallbackPanicked(panic_message(panic.as_ref())))
    })
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
