use std::sync::Arc;
use std::time::Duration;

/// Handle to a periodic task returned by [`Scheduler::schedule`]
pub trait ScheduledTask: Send + Sync {
    /// Stop the task. No tick starts after this returns.
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;
}

/// Timer and executor capability used by the connection engine
///
/// The monitor check and the ping job are scheduled through this trait, and
/// [`Promise::run_on`](crate::core::promise::Promise::run_on) hands outcomes to
/// [`Scheduler::execute`]. Implementations must not run `task` on the calling
/// thread of `schedule`; the first run happens one `interval` later.
pub trait Scheduler: Send + Sync {
    /// Run `task` every `interval` until the returned handle is cancelled
    fn schedule(&self, interval: Duration, task: Arc<dyn Fn() + Send + Sync>)
        -> Arc<dyn ScheduledTask>;

    /// Run `task` once, as soon as possible
    fn execute(&self, task: Box<dyn FnOnce() + Send>);
}
