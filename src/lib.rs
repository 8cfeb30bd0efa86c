//! # chime
//!
//! Composable in-process job scheduling: a deadline-ordered
//! [`TimerQueue`] that hands ready jobs to an attached [`Executor`]
//! (typically the fixed-size [`ThreadPool`]), with every submission
//! tracked by a chainable [`Future`].
//!
//! ## Model
//! * **Parallel OS threads.** One dedicated dispatcher thread per timer
//!   queue, one worker thread per configured pool slot. No event loop;
//!   embedders poll [`Future::is_ready`] or attach continuations.
//! * **At-most-once firing.** Every enqueued timer either fires exactly
//!   once on the executor or is cancelled/cleared and never fires.
//! * **FIFO tie-break.** Equal deadlines dispatch in enqueue order;
//!   execution order is only guaranteed for a single-threaded executor.
//! * **Errors stay in futures.** A panicking job fulfills its future
//!   with the captured payload and never kills a worker.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use std::time::{Duration, SystemTime};
//! use chime::{ThreadPool, TimerQueue};
//!
//! let pool: Arc<ThreadPool<i32>> = Arc::new(ThreadPool::new());
//! pool.start(4).unwrap();
//!
//! let queue = TimerQueue::new(Arc::clone(&pool));
//! queue.start().unwrap();
//!
//! let handle = queue
//!     .enqueue(SystemTime::now() + Duration::from_millis(100), || 41 + 1)
//!     .unwrap();
//! assert_eq!(handle.result.get(), Ok(42));
//!
//! queue.stop();
//! pool.stop();
//! ```

pub mod clock;
pub mod error;
pub mod executor;
pub mod future;
pub mod sched;
pub mod thread_pool;
pub mod timer_queue;

pub use clock::{Clock, SystemClock};
pub use error::{Error, JobError, Result};
pub use executor::{Executor, InlineExecutor, Job, Spawn};
pub use future::{Future, LaunchPolicy, Promise};
pub use sched::{SchedParams, SchedPolicy, SchedPriority};
pub use thread_pool::ThreadPool;
pub use timer_queue::{TimerHandle, TimerQueue, Uid};
