//! The capability the timer queue consumes from its backing executor.

use crate::error::Result;
use crate::future::{Future, Promise};

/// A boxed nullary job producing a `T`.
pub type Job<T> = Box<dyn FnOnce() -> T + Send>;

/// Anything that can run a job asynchronously and hand back a future for
/// its result. The timer queue depends only on this contract; any
/// conforming implementation may back a queue.
pub trait Executor: Send + Sync {
    /// Uniform result type of every job this executor runs.
    type Output: Send + 'static;

    /// Run `job` asynchronously; the returned future becomes ready when
    /// the job completes or panics.
    fn execute(&self, job: Job<Self::Output>) -> Result<Future<Self::Output>>;

    /// The fire-and-forget lane backing [`LaunchPolicy::Inherit`]
    /// continuations on futures this executor produced. `None` means
    /// such continuations fall back to transient threads.
    ///
    /// [`LaunchPolicy::Inherit`]: crate::LaunchPolicy::Inherit
    fn spawner(&self) -> Option<std::sync::Weak<dyn Spawn>> {
        None
    }
}

/// Minimal "run this callable somewhere else" capability.
pub trait Spawn: Send + Sync {
    fn spawn(&self, task: Box<dyn FnOnce() + Send>);
}

/// Runs every job synchronously on the calling thread and returns an
/// already-ready future. Useful as a deterministic executor in tests.
#[derive(Debug)]
pub struct InlineExecutor<T = ()> {
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> InlineExecutor<T> {
    pub fn new() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> Default for InlineExecutor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Executor for InlineExecutor<T> {
    type Output = T;

    fn execute(&self, job: Job<T>) -> Result<Future<T>> {
        let promise = Promise::new();
        let future = promise.future();
        promise.run(job);
        Ok(future)
    }
}
