//! Deadline-ordered timer queue driven by a dedicated dispatcher thread.
//!
//! The queue owns a `(deadline, uid)` min-heap plus a uid-indexed side
//! map. Cancellation removes the map entry and leaves the heap entry
//! behind; the dispatcher (or [`TimerQueue::purge`]) discards such stale
//! heap entries when it meets them. Uids are minted monotonically under
//! the queue lock and never reused, so equal deadlines dispatch in
//! enqueue order.
//!
//! The dispatcher sleeps until the earliest live deadline, pops the entry
//! and hands its job to the attached [`Executor`] with the queue lock
//! released, then chains the executor's future into the handle's future
//! with a sync continuation. Because no lock is held across the hand-off,
//! jobs and continuations may re-enter `enqueue` and `cancel` freely.
//!
//! Deadlines are wall-clock points; see [`crate::clock`] for the
//! monotonicity caveat.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, JobError, Result};
use crate::executor::{Executor, Job};
use crate::future::{Future, LaunchPolicy, Promise};
use crate::sched::SchedParams;

/// Queue-monotonic timer identifier. Never reused within a queue's
/// lifetime.
pub type Uid = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct HeapEntry {
    deadline: SystemTime,
    uid: Uid,
}

struct MapEntry<T: Send + 'static> {
    job: Job<T>,
    promise: Promise<T>,
}

struct QueueState<T: Send + 'static> {
    running: bool,
    next_uid: Uid,
    jobs: HashMap<Uid, MapEntry<T>>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
}

struct QueueShared<T: Send + 'static> {
    state: Mutex<QueueState<T>>,
    wakeup: Condvar,
}

/// Returned by [`TimerQueue::enqueue`]. Owns a handle to the job's
/// future but not to the queue entry itself.
pub struct TimerHandle<T: Send + 'static> {
    /// Opaque timer uid; use it to cancel or to check queue membership.
    pub uid: Uid,
    /// The scheduled execution point, kept for convenience.
    pub deadline: SystemTime,
    /// Becomes ready when the job completes, panics, or is abandoned.
    pub result: Future<T>,
}

/// The deadline-ordered scheduler. Generic over the backing executor and
/// the clock; jobs produce the executor's uniform `Output` type.
pub struct TimerQueue<E, C = SystemClock>
where
    E: Executor + 'static,
    E::Output: Clone,
    C: Clock,
{
    shared: Arc<QueueShared<E::Output>>,
    executor: Arc<E>,
    clock: Arc<C>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl<E> TimerQueue<E>
where
    E: Executor + 'static,
    E::Output: Clone,
{
    /// Create a queue on the wall clock. The executor is shared, not
    /// owned; several queues may feed one pool.
    pub fn new(executor: Arc<E>) -> Self {
        Self::with_clock(executor, SystemClock)
    }
}

impl<E, C> TimerQueue<E, C>
where
    E: Executor + 'static,
    E::Output: Clone,
    C: Clock,
{
    pub fn with_clock(executor: Arc<E>, clock: C) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                state: Mutex::new(QueueState {
                    running: false,
                    next_uid: 0,
                    jobs: HashMap::new(),
                    heap: BinaryHeap::new(),
                }),
                wakeup: Condvar::new(),
            }),
            executor,
            clock: Arc::new(clock),
            dispatcher: Mutex::new(None),
        }
    }

    /// Spawn the dispatcher thread with default OS scheduling.
    pub fn start(&self) -> Result<()> {
        self.start_inner(None)
    }

    /// Spawn the dispatcher thread and apply `params` to it. A refused
    /// policy (insufficient privilege, unsupported platform) is logged
    /// and the dispatcher keeps the default policy; only thread creation
    /// itself is fatal.
    pub fn start_with(&self, params: SchedParams) -> Result<()> {
        self.start_inner(Some(params))
    }

    fn start_inner(&self, params: Option<SchedParams>) -> Result<()> {
        let mut dispatcher = self.dispatcher.lock();
        {
            let mut state = self.shared.state.lock();
            if state.running {
                return Err(Error::AlreadyRunning);
            }
            state.running = true;
        }
        let shared = Arc::clone(&self.shared);
        let executor = Arc::clone(&self.executor);
        let clock = Arc::clone(&self.clock);
        let spawned = thread::Builder::new()
            .name("chime-timer".to_string())
            .spawn(move || dispatch_loop(shared, executor, clock));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                self.shared.state.lock().running = false;
                return Err(Error::Spawn(err));
            }
        };
        if let Some(params) = params {
            apply_sched_params(&handle, params);
        }
        *dispatcher = Some(handle);
        Ok(())
    }

    /// Signal the dispatcher to exit after its current wake and join it.
    /// Remaining entries are discarded; their futures report
    /// [`JobError::Abandoned`]. Jobs already handed to the executor
    /// finish normally. Idempotent.
    pub fn stop(&self) {
        let mut dispatcher = self.dispatcher.lock();
        let discarded = {
            let mut state = self.shared.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
            state.heap.clear();
            std::mem::take(&mut state.jobs)
        };
        self.shared.wakeup.notify_one();
        if let Some(handle) = dispatcher.take() {
            let _ = handle.join();
        }
        if !discarded.is_empty() {
            debug!(discarded = discarded.len(), "discarding pending timers");
        }
        // Entry promises drop outside the lock.
        drop(discarded);
        info!("timer queue stopped");
    }

    /// Schedule `job` for execution at `deadline` (a past deadline fires
    /// immediately). Returns the handle carrying the minted uid and the
    /// job's future. Errors with [`Error::NotRunning`] unless started.
    pub fn enqueue<F>(&self, deadline: SystemTime, job: F) -> Result<TimerHandle<E::Output>>
    where
        F: FnOnce() -> E::Output + Send + 'static,
    {
        let promise = Promise::new();
        if let Some(spawner) = self.executor.spawner() {
            promise.attach_spawner(spawner);
        }
        let result = promise.future();
        let (uid, is_first) = {
            let mut state = self.shared.state.lock();
            if !state.running {
                return Err(Error::NotRunning);
            }
            let uid = state.next_uid;
            state.next_uid += 1;
            state.jobs.insert(
                uid,
                MapEntry {
                    job: Box::new(job),
                    promise,
                },
            );
            state.heap.push(Reverse(HeapEntry { deadline, uid }));
            let is_first = matches!(state.heap.peek(), Some(Reverse(head)) if head.uid == uid);
            (uid, is_first)
        };
        // Only a new earliest deadline moves the dispatcher's wake-up.
        if is_first {
            self.shared.wakeup.notify_one();
        }
        debug!(uid, "timer scheduled");
        Ok(TimerHandle {
            uid,
            deadline,
            result,
        })
    }

    /// Cancel the timer with this uid. True iff the entry was present
    /// and not yet dispatched; a second cancel of the same uid returns
    /// false. Never blocks on the dispatcher.
    ///
    /// A cancelled timer's future reports [`JobError::Abandoned`].
    pub fn cancel(&self, uid: Uid) -> bool {
        let (removed, was_first) = {
            let mut state = self.shared.state.lock();
            match state.jobs.remove(&uid) {
                Some(entry) => {
                    let was_first =
                        matches!(state.heap.peek(), Some(Reverse(head)) if head.uid == uid);
                    (Some(entry), was_first)
                }
                None => (None, false),
            }
        };
        let cancelled = removed.is_some();
        // Entry promise drops outside the lock.
        drop(removed);
        if cancelled {
            debug!(uid, "timer cancelled");
            if was_first {
                self.shared.wakeup.notify_one();
            }
        }
        cancelled
    }

    /// True iff an uncancelled, undispatched entry with this uid exists.
    pub fn in_queue(&self, uid: Uid) -> bool {
        self.shared.state.lock().jobs.contains_key(&uid)
    }

    /// Live (uncancelled, undispatched) timers.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().jobs.len()
    }

    /// Compact the heap by dropping entries whose timers were cancelled.
    /// An optimization for long-lived queues with many cancellations;
    /// dispatch is correct without it.
    pub fn purge(&self) {
        let mut state = self.shared.state.lock();
        let state = &mut *state;
        let total = state.heap.len();
        if total > state.jobs.len() {
            let heap = std::mem::take(&mut state.heap);
            let jobs = &state.jobs;
            state.heap = heap
                .into_iter()
                .filter(|Reverse(entry)| jobs.contains_key(&entry.uid))
                .collect();
        }
        // The dispatcher never waits on a cancelled head, so no notify.
        let purged = total - state.heap.len();
        debug!(purged, "purged cancelled timers");
    }

    /// Drop every entry, cancelled or not. Subsequent `cancel` calls for
    /// prior uids return false; dropped entries' futures report
    /// [`JobError::Abandoned`].
    pub fn clear(&self) {
        let (jobs, heap) = {
            let mut state = self.shared.state.lock();
            (
                std::mem::take(&mut state.jobs),
                std::mem::take(&mut state.heap),
            )
        };
        let live = jobs.len();
        let cancelled = heap.len().saturating_sub(live);
        if live > 0 {
            self.shared.wakeup.notify_one();
        }
        // Entry promises drop outside the lock.
        drop(jobs);
        debug!(live, cancelled, "cleared timer queue");
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }
}

impl<E, C> Drop for TimerQueue<E, C>
where
    E: Executor + 'static,
    E::Output: Clone,
    C: Clock,
{
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(unix)]
fn apply_sched_params(handle: &JoinHandle<()>, params: SchedParams) {
    use std::os::unix::thread::JoinHandleExt;

    match crate::sched::set_pthread_params(handle.as_pthread_t(), params) {
        Ok(()) => info!(?params, "dispatcher scheduling parameters applied"),
        Err(err) => warn!(error = %err, "failed to set dispatcher scheduling parameters"),
    }
}

#[cfg(not(unix))]
fn apply_sched_params(_handle: &JoinHandle<()>, params: SchedParams) {
    let err = Error::SchedUnsupported;
    warn!(error = %err, ?params, "failed to set dispatcher scheduling parameters");
}

fn dispatch_loop<E, C>(shared: Arc<QueueShared<E::Output>>, executor: Arc<E>, clock: Arc<C>)
where
    E: Executor + 'static,
    E::Output: Clone,
    C: Clock,
{
    info!("dispatcher started");
    let mut state = shared.state.lock();
    while state.running {
        let mut deadline_expired = false;
        while let Some(&Reverse(head)) = state.heap.peek() {
            if !state.jobs.contains_key(&head.uid) {
                trace!(uid = head.uid, "dropping cancelled timer");
                state.heap.pop();
                deadline_expired = false;
                continue;
            }
            if !deadline_expired {
                deadline_expired = head.deadline <= clock.now();
            }
            if deadline_expired {
                debug!(uid = head.uid, "dispatching timer");
                state.heap.pop();
                let entry = state.jobs.remove(&head.uid);
                MutexGuard::unlocked(&mut state, || {
                    if let Some(MapEntry { job, promise }) = entry {
                        match executor.execute(job) {
                            Ok(executed) => {
                                executed.then(LaunchPolicy::Sync, move |finished| {
                                    promise.complete_from(&finished)
                                });
                            }
                            Err(err) => promise.set_error(JobError::Rejected(err.to_string())),
                        }
                    }
                });
                deadline_expired = false;
            } else {
                let uid = head.uid;
                let timeout = head
                    .deadline
                    .duration_since(clock.now())
                    .unwrap_or(Duration::ZERO);
                trace!(uid, "waiting for deadline");
                let timed_out = shared.wakeup.wait_for(&mut state, timeout).timed_out();
                trace!("wake-up");
                if !state.running {
                    if !state.jobs.is_empty() {
                        warn!(pending = state.jobs.len(), "stopping with unprocessed timers");
                    }
                    info!("dispatcher stopped");
                    return;
                }
                // A timeout verdict is only trusted while the head is
                // unchanged; re-read the clock otherwise.
                deadline_expired =
                    timed_out && matches!(state.heap.peek(), Some(Reverse(h)) if h.uid == uid);
            }
        }
        trace!("queue empty; waiting");
        while state.heap.is_empty() && state.running {
            shared.wakeup.wait(&mut state);
        }
        trace!("wake-up");
    }
    info!("dispatcher stopped");
}
