//! End-to-end walkthrough: a timer queue over an 8-worker pool, with a
//! real-time dispatcher request, a cancelled timer, and a panicking job.
//!
//! Run with `cargo run --example demo`; set `RUST_LOG=chime=trace` for
//! the dispatcher's wake/fire log.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chime::{SchedParams, SchedPolicy, ThreadPool, TimerQueue};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let pool: Arc<ThreadPool<String>> = Arc::new(ThreadPool::new());
    pool.start(8).unwrap();

    let queue = TimerQueue::new(Arc::clone(&pool));
    // Needs privilege; falls back to the default policy with a warning.
    queue.start_with(SchedParams::max(SchedPolicy::Fifo)).unwrap();

    let deadline = SystemTime::now() + Duration::from_millis(100);
    let handle = queue.enqueue(deadline, || "test".to_string()).unwrap();
    let cancelled = queue
        .enqueue(deadline, || "won't make it".to_string())
        .unwrap();
    let failing = queue.enqueue(deadline, || panic!("test")).unwrap();

    assert!(queue.cancel(cancelled.uid));

    match handle.result.get() {
        Ok(value) => println!("return_value={value}"),
        Err(err) => println!("error={err}"),
    }
    println!("cancelled={:?}", cancelled.result.get().unwrap_err());
    println!("failing={:?}", failing.result.get().unwrap_err());

    queue.stop();
    pool.stop();
}
