//! Shared result cells with chainable continuations.
//!
//! A [`Promise`] is the single producer handle for a [`Future`]: whoever
//! runs the job fulfills the promise with the job's value or its captured
//! panic, and every clone of the future observes the result. Futures are
//! fulfilled at most once; the pending → ready transition drains waiters
//! and continuations exactly once.
//!
//! Continuations attached with [`Future::then`] carry a [`LaunchPolicy`]
//! deciding where they run relative to the fulfilling thread. `Sync`
//! continuations fire on the fulfilling thread before blocked waiters are
//! released, so `wait()` observers see their side effects.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::error::JobError;
use crate::executor::Spawn;

/// Where and when a continuation executes relative to its source future's
/// fulfillment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchPolicy {
    /// Run on a transient worker thread; never inline on the fulfilling
    /// or attaching thread.
    Async,
    /// Do not schedule until the chained future's `wait`/`get` is
    /// invoked; runs on that caller's thread.
    Deferred,
    /// Run inline on whichever thread fulfills the source future, before
    /// that thread releases blocked waiters. Keep sync continuations
    /// short; the fulfilling thread is blocked for their duration.
    Sync,
    /// Run on the source future's executor when one is attached;
    /// otherwise behaves as `Async`.
    Inherit,
    /// Implementation's choice: `Sync` when the source is already ready
    /// at attachment time, `Async` otherwise.
    Any,
    /// Alias of `Any`.
    None,
}

struct Continuation<T: Send + 'static> {
    policy: LaunchPolicy,
    run: Box<dyn FnOnce(Future<T>) + Send>,
}

impl<T: Send + 'static> Continuation<T> {
    fn dispatch(self, source: Future<T>) {
        match self.policy {
            // A deferred continuation's `run` only stashes the real work
            // into the chained future, so it fires inline like `Sync`.
            LaunchPolicy::Sync | LaunchPolicy::Deferred => (self.run)(source),
            LaunchPolicy::Inherit => {
                let spawner = source.shared.state.lock().spawner.clone();
                match spawner.and_then(|weak| weak.upgrade()) {
                    Some(executor) => {
                        let run = self.run;
                        executor.spawn(Box::new(move || run(source)));
                    }
                    None => spawn_transient(self.run, source),
                }
            }
            // `Any`/`None` resolve at attachment time and are never
            // stored; treat a stray one as `Async`.
            LaunchPolicy::Async | LaunchPolicy::Any | LaunchPolicy::None => {
                spawn_transient(self.run, source)
            }
        }
    }
}

fn spawn_transient<T: Send + 'static>(run: Box<dyn FnOnce(Future<T>) + Send>, source: Future<T>) {
    let spawned = thread::Builder::new()
        .name("chime-continuation".to_string())
        .spawn(move || run(source));
    if let Err(err) = spawned {
        // The closure is lost with the failed spawn; its promise drops
        // and the chained future reports `Abandoned`.
        warn!(error = %err, "failed to spawn continuation thread");
    }
}

/// A deferred continuation, parked until the chained future is waited
/// on. Produces the chained future's result directly; it must not hold a
/// `Promise` for the state that stores it, or the cell would own itself.
type DeferredTask<T> = Box<dyn FnOnce() -> std::result::Result<T, JobError> + Send>;

struct Inner<T: Send + 'static> {
    result: Option<std::result::Result<T, JobError>>,
    continuations: Vec<Continuation<T>>,
    deferred: Option<DeferredTask<T>>,
    spawner: Option<Weak<dyn Spawn>>,
}

struct Shared<T: Send + 'static> {
    state: Mutex<Inner<T>>,
    ready: Condvar,
}

fn fulfill<T: Send + 'static>(
    shared: &Arc<Shared<T>>,
    result: std::result::Result<T, JobError>,
) {
    let drained = {
        let mut state = shared.state.lock();
        if state.result.is_some() {
            // Single-producer promises make this unreachable.
            warn!("duplicate fulfillment dropped");
            return;
        }
        state.result = Some(result);
        std::mem::take(&mut state.continuations)
    };
    let source = Future {
        shared: Arc::clone(shared),
    };
    for continuation in drained {
        continuation.dispatch(source.clone());
    }
    shared.ready.notify_all();
}

/// Run a job under a catch-all guard, mapping a panic to [`JobError`].
fn run_caught<T>(job: impl FnOnce() -> T) -> std::result::Result<T, JobError> {
    match catch_unwind(AssertUnwindSafe(job)) {
        Ok(value) => Ok(value),
        Err(payload) => Err(JobError::Panicked(panic_message(payload))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

/// A shared cell representing a not-yet-or-already-completed computation.
///
/// Cloning a future clones the handle, not the result; all clones observe
/// the same fulfillment.
pub struct Future<T: Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl<T: Send + 'static> Future<T> {
    /// True iff the future has left the pending state.
    pub fn is_ready(&self) -> bool {
        self.shared.state.lock().result.is_some()
    }

    /// Block the calling thread until the future is ready.
    ///
    /// May be called from any number of threads. Calling `wait` from the
    /// thread that will fulfill this future deadlocks; don't.
    ///
    /// If this future was produced by a `Deferred` continuation, the
    /// first `wait` runs that continuation inline on the calling thread.
    pub fn wait(&self) {
        loop {
            let mut state = self.shared.state.lock();
            let task = loop {
                if state.result.is_some() {
                    return;
                }
                if let Some(task) = state.deferred.take() {
                    break task;
                }
                self.shared.ready.wait(&mut state);
            };
            drop(state);
            let result = task();
            fulfill(&self.shared, result);
        }
    }

    /// Wait for readiness, then return a clone of the value or the
    /// stored error. Idempotent; every observer may call `get`.
    pub fn get(&self) -> std::result::Result<T, JobError>
    where
        T: Clone,
    {
        self.wait();
        let state = self.shared.state.lock();
        match state.result.as_ref() {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(err)) => Err(err.clone()),
            // wait() only returns once the result is set.
            None => Err(JobError::Abandoned),
        }
    }

    /// Register a continuation to run once this future is ready and
    /// return the future of the continuation's own result.
    ///
    /// If this future is already ready the policy applies immediately:
    /// `Sync` (and `Any`/`None`) run `f` inline before `then` returns,
    /// `Async` returns first and runs `f` on another thread, `Deferred`
    /// waits for the chained future's `wait`/`get`.
    ///
    /// A panic inside `f` fulfills the returned future with
    /// [`JobError::Panicked`]; this future is unaffected.
    pub fn then<U, F>(&self, policy: LaunchPolicy, f: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(Future<T>) -> U + Send + 'static,
    {
        let resolved = match policy {
            LaunchPolicy::Any | LaunchPolicy::None => {
                if self.is_ready() {
                    LaunchPolicy::Sync
                } else {
                    LaunchPolicy::Async
                }
            }
            other => other,
        };
        let spawner = self.shared.state.lock().spawner.clone();

        let (chained, run): (Future<U>, Box<dyn FnOnce(Future<T>) + Send>) = match resolved {
            LaunchPolicy::Deferred => {
                // No promise here: the stash lives inside the chained
                // cell and fulfills it directly when a waiter runs it.
                let shared = Arc::new(Shared {
                    state: Mutex::new(Inner {
                        result: None,
                        continuations: Vec::new(),
                        deferred: None,
                        spawner,
                    }),
                    ready: Condvar::new(),
                });
                let chained = Future {
                    shared: Arc::clone(&shared),
                };
                let run = Box::new(move |source: Future<T>| {
                    let task: DeferredTask<U> =
                        Box::new(move || run_caught(move || f(source)));
                    shared.state.lock().deferred = Some(task);
                    shared.ready.notify_all();
                }) as Box<dyn FnOnce(Future<T>) + Send>;
                (chained, run)
            }
            _ => {
                let promise = Promise::new();
                if let Some(spawner) = spawner {
                    promise.attach_spawner(spawner);
                }
                let chained = promise.future();
                let run = Box::new(move |source: Future<T>| promise.run(move || f(source)))
                    as Box<dyn FnOnce(Future<T>) + Send>;
                (chained, run)
            }
        };
        let continuation = Continuation {
            policy: resolved,
            run,
        };

        let immediate = {
            let mut state = self.shared.state.lock();
            if state.result.is_none() {
                state.continuations.push(continuation);
                None
            } else {
                Some(continuation)
            }
        };
        if let Some(continuation) = immediate {
            continuation.dispatch(self.clone());
        }
        chained
    }
}

/// Single-producer handle fulfilling a [`Future`].
///
/// Dropping an unfulfilled promise fulfills its future with
/// [`JobError::Abandoned`] so waiters never block on a producer that went
/// away.
pub struct Promise<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    fulfilled: bool,
}

impl<T: Send + 'static> Promise<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(Inner {
                    result: None,
                    continuations: Vec::new(),
                    deferred: None,
                    spawner: None,
                }),
                ready: Condvar::new(),
            }),
            fulfilled: false,
        }
    }

    /// The future observing this promise.
    pub fn future(&self) -> Future<T> {
        Future {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Record the executor that will produce this promise's result, for
    /// continuations attached with [`LaunchPolicy::Inherit`].
    pub fn attach_spawner(&self, spawner: Weak<dyn Spawn>) {
        self.shared.state.lock().spawner = Some(spawner);
    }

    pub fn set_value(mut self, value: T) {
        self.fulfilled = true;
        fulfill(&self.shared, Ok(value));
    }

    pub fn set_error(mut self, error: JobError) {
        self.fulfilled = true;
        fulfill(&self.shared, Err(error));
    }

    /// Run `job` under a catch-all guard and fulfill with its value or
    /// its captured panic.
    pub fn run<F>(mut self, job: F)
    where
        F: FnOnce() -> T,
    {
        self.fulfilled = true;
        let result = run_caught(job);
        fulfill(&self.shared, result);
    }

    /// Forward another future's result into this promise. Blocks until
    /// `source` is ready.
    pub fn complete_from(self, source: &Future<T>)
    where
        T: Clone,
    {
        match source.get() {
            Ok(value) => self.set_value(value),
            Err(err) => self.set_error(err),
        }
    }
}

impl<T: Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        if !self.fulfilled {
            fulfill(&self.shared, Err(JobError::Abandoned));
        }
    }
}
