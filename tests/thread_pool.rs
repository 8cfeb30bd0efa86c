//! Thread pool lifecycle and job-queue semantics.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use parking_lot::Mutex;

use chime::{Error, JobError, ThreadPool};

#[test]
fn test_execute_returns_job_value() {
    let pool: ThreadPool<i32> = ThreadPool::new();
    pool.start(2).unwrap();

    let future = pool.execute(|| 6 * 7).unwrap();
    assert_eq!(future.get(), Ok(42));

    pool.stop();
}

#[test]
fn test_panic_is_captured_and_worker_survives() {
    let pool: ThreadPool<i32> = ThreadPool::new();
    pool.start(1).unwrap();

    let failed = pool.execute(|| panic!("job failed")).unwrap();
    assert_eq!(
        failed.get(),
        Err(JobError::Panicked("job failed".to_string()))
    );

    // the single worker is still alive
    let ok = pool.execute(|| 1).unwrap();
    assert_eq!(ok.get(), Ok(1));

    pool.stop();
}

#[test]
fn test_single_worker_runs_jobs_in_fifo_order() {
    let pool: ThreadPool<()> = ThreadPool::new();
    pool.start(1).unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut last = None;
    for i in 0..10 {
        let order = Arc::clone(&order);
        last = Some(pool.execute(move || order.lock().push(i)).unwrap());
    }
    last.unwrap().wait();

    assert_eq!(*order.lock(), (0..10).collect::<Vec<_>>());
    pool.stop();
}

#[test]
fn test_stop_lets_running_job_finish_and_discards_queued() {
    let pool: ThreadPool<i32> = ThreadPool::new();
    pool.start(1).unwrap();

    let (started_tx, started_rx) = bounded(1);
    let running = pool
        .execute(move || {
            started_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(200));
            1
        })
        .unwrap();
    let queued: Vec<_> = (0..5)
        .map(|i| pool.execute(move || i).unwrap())
        .collect();

    // stop once the first job is definitely running
    started_rx.recv().unwrap();
    assert_eq!(pool.queued_jobs(), 5);
    pool.stop();
    assert_eq!(pool.queued_jobs(), 0);

    assert_eq!(running.get(), Ok(1));
    for future in queued {
        assert_eq!(future.get(), Err(JobError::Abandoned));
    }
}

#[test]
fn test_execute_after_stop_is_rejected() {
    let pool: ThreadPool<i32> = ThreadPool::new();
    pool.start(1).unwrap();
    pool.stop();

    assert!(matches!(pool.execute(|| 1), Err(Error::NotRunning)));
}

#[test]
fn test_restart_after_stop() {
    let pool: ThreadPool<i32> = ThreadPool::new();
    pool.start(1).unwrap();
    assert!(matches!(pool.start(1), Err(Error::AlreadyRunning)));
    pool.stop();

    pool.start(2).unwrap();
    assert_eq!(pool.execute(|| 3).unwrap().get(), Ok(3));
    pool.stop();
}
