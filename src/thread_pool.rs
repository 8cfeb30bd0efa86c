//! Fixed-size worker pool draining a FIFO job queue.
//!
//! Workers block on a condition variable, pop jobs in enqueue order, and
//! run each one under a catch-all guard that fulfills the job's future
//! with its value or its captured panic. With a single worker, execution
//! order equals enqueue order; with more workers only the hand-off order
//! is FIFO.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::executor::{Executor, Job, Spawn};
use crate::future::{Future, Promise};

enum QueueEntry<T: Send + 'static> {
    /// A submitted job and the promise observing it.
    Job { job: Job<T>, promise: Promise<T> },
    /// A fire-and-forget hand-off from the continuation machinery.
    Task(Box<dyn FnOnce() + Send>),
}

struct PoolState<T: Send + 'static> {
    running: bool,
    queue: VecDeque<QueueEntry<T>>,
}

struct PoolShared<T: Send + 'static> {
    state: Mutex<PoolState<T>>,
    available: Condvar,
}

impl<T: Send + 'static> Spawn for PoolShared<T> {
    fn spawn(&self, task: Box<dyn FnOnce() + Send>) {
        let mut state = self.state.lock();
        if state.running {
            state.queue.push_back(QueueEntry::Task(task));
            drop(state);
            self.available.notify_one();
        } else {
            drop(state);
            // Last resort so the continuation still runs somewhere.
            let spawned = thread::Builder::new()
                .name("chime-continuation".to_string())
                .spawn(task);
            if let Err(err) = spawned {
                warn!(error = %err, "failed to spawn fallback continuation thread");
            }
        }
    }
}

/// A fixed set of worker threads executing jobs of uniform result type
/// `T` in FIFO hand-off order.
pub struct ThreadPool<T: Send + 'static = ()> {
    shared: Arc<PoolShared<T>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + 'static> ThreadPool<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    running: false,
                    queue: VecDeque::new(),
                }),
                available: Condvar::new(),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn `num_threads` workers; `0` means one per logical core.
    ///
    /// Errors with [`Error::AlreadyRunning`] unless an intervening
    /// [`stop`](Self::stop) happened, and with [`Error::Spawn`] when the
    /// OS refuses a thread (in which case the pool is rolled back to the
    /// stopped state).
    pub fn start(&self, num_threads: usize) -> Result<()> {
        let mut workers = self.workers.lock();
        {
            let mut state = self.shared.state.lock();
            if state.running {
                return Err(Error::AlreadyRunning);
            }
            state.running = true;
        }

        let count = if num_threads == 0 {
            num_cpus::get()
        } else {
            num_threads
        };
        for index in 0..count {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("chime-worker-{index}"))
                .spawn(move || worker_loop(shared, index));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    self.shared.state.lock().running = false;
                    self.shared.available.notify_all();
                    for handle in workers.drain(..) {
                        let _ = handle.join();
                    }
                    return Err(Error::Spawn(err));
                }
            }
        }
        info!(workers = count, "thread pool started");
        Ok(())
    }

    /// Signal shutdown and join all workers. Jobs already running finish;
    /// queued jobs are discarded and their futures report
    /// [`JobError::Abandoned`](crate::JobError::Abandoned). Idempotent.
    pub fn stop(&self) {
        let drained = {
            let mut state = self.shared.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
            std::mem::take(&mut state.queue)
        };
        self.shared.available.notify_all();
        if !drained.is_empty() {
            debug!(discarded = drained.len(), "discarding queued jobs");
        }
        // Entry promises drop outside the lock; their sync continuations
        // must not run under it.
        drop(drained);

        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.join();
        }
        info!("thread pool stopped");
    }

    /// Enqueue `job`; the returned future becomes ready when the job
    /// completes or panics. Errors with [`Error::NotRunning`] unless the
    /// pool is started.
    pub fn execute<F>(&self, job: F) -> Result<Future<T>>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit(Box::new(job))
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Jobs handed off but not yet picked up by a worker.
    pub fn queued_jobs(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    fn submit(&self, job: Job<T>) -> Result<Future<T>> {
        let promise = Promise::new();
        promise.attach_spawner(Arc::downgrade(&self.shared) as Weak<dyn Spawn>);
        let future = promise.future();
        {
            let mut state = self.shared.state.lock();
            if !state.running {
                return Err(Error::NotRunning);
            }
            state.queue.push_back(QueueEntry::Job { job, promise });
        }
        self.shared.available.notify_one();
        Ok(future)
    }
}

impl<T: Send + 'static> Default for ThreadPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Drop for ThreadPool<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<T: Send + 'static> Executor for ThreadPool<T> {
    type Output = T;

    fn execute(&self, job: Job<T>) -> Result<Future<T>> {
        self.submit(job)
    }

    fn spawner(&self) -> Option<Weak<dyn Spawn>> {
        Some(Arc::downgrade(&self.shared) as Weak<dyn Spawn>)
    }
}

fn worker_loop<T: Send + 'static>(shared: Arc<PoolShared<T>>, index: usize) {
    info!(worker = index, "worker started");
    loop {
        let mut state = shared.state.lock();
        while state.queue.is_empty() && state.running {
            shared.available.wait(&mut state);
        }
        if !state.running {
            break;
        }
        let entry = state.queue.pop_front();
        drop(state);

        match entry {
            Some(QueueEntry::Job { job, promise }) => {
                trace!(worker = index, "job start");
                promise.run(job);
                trace!(worker = index, "job complete");
            }
            Some(QueueEntry::Task(task)) => {
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    warn!(worker = index, "detached task panicked");
                }
            }
            None => {}
        }
    }
    info!(worker = index, "worker stopped");
}
