//! Timer queue behavior against a single-worker pool, where dispatch
//! order equals execution order.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use chime::{ThreadPool, TimerQueue};

fn fixture() -> (Arc<ThreadPool<()>>, Arc<TimerQueue<ThreadPool<()>>>) {
    let pool = Arc::new(ThreadPool::new());
    pool.start(1).unwrap();
    let queue = Arc::new(TimerQueue::new(Arc::clone(&pool)));
    queue.start().unwrap();
    (pool, queue)
}

fn in_ms(ms: u64) -> SystemTime {
    SystemTime::now() + Duration::from_millis(ms)
}

fn sleep_ms(ms: u64) {
    thread::sleep(Duration::from_millis(ms));
}

#[test]
fn test_smoke() {
    let (pool, queue) = fixture();
    let x = Arc::new(Mutex::new(2));

    let seen = Arc::clone(&x);
    queue.enqueue(in_ms(300), move || *seen.lock() += 1).unwrap();

    sleep_ms(100);
    assert_eq!(*x.lock(), 2);

    sleep_ms(400);
    assert_eq!(*x.lock(), 3);

    queue.stop();
    pool.stop();
}

#[test]
fn test_cancel() {
    let (pool, queue) = fixture();
    let x = Arc::new(Mutex::new(2));

    let seen = Arc::clone(&x);
    let handle = queue.enqueue(in_ms(150), move || *seen.lock() += 1).unwrap();
    assert!(queue.cancel(handle.uid));

    sleep_ms(300);
    assert_eq!(*x.lock(), 2);
    assert!(!queue.cancel(handle.uid));

    queue.stop();
    pool.stop();
}

#[test]
fn test_two_timers_equal_deadline_fifo() {
    let (pool, queue) = fixture();
    let x = Arc::new(Mutex::new(2));
    let deadline = in_ms(150);

    let seen = Arc::clone(&x);
    queue.enqueue(deadline, move || *seen.lock() += 1).unwrap();
    let seen = Arc::clone(&x);
    queue.enqueue(deadline, move || *seen.lock() *= 2).unwrap();

    sleep_ms(400);
    // (2 + 1) * 2: equal deadlines run in enqueue order
    assert_eq!(*x.lock(), 6);

    queue.stop();
    pool.stop();
}

#[test]
fn test_enqueue_prepend_respects_deadlines() {
    let (pool, queue) = fixture();
    let x = Arc::new(Mutex::new(2));

    let seen = Arc::clone(&x);
    queue.enqueue(in_ms(300), move || *seen.lock() += 1).unwrap();
    let seen = Arc::clone(&x);
    queue.enqueue(in_ms(150), move || *seen.lock() *= 2).unwrap();

    sleep_ms(500);
    // 2 * 2 + 1: the later-enqueued, earlier-deadline job runs first
    assert_eq!(*x.lock(), 5);

    queue.stop();
    pool.stop();
}

#[test]
fn test_cancel_first_of_equal_deadlines() {
    let (pool, queue) = fixture();
    let x = Arc::new(Mutex::new(2));
    let deadline = in_ms(150);

    let seen = Arc::clone(&x);
    let handle = queue.enqueue(deadline, move || *seen.lock() += 1).unwrap();
    let seen = Arc::clone(&x);
    queue.enqueue(deadline, move || *seen.lock() *= 2).unwrap();
    assert!(queue.cancel(handle.uid));

    sleep_ms(300);
    assert_eq!(*x.lock(), 4);

    queue.stop();
    pool.stop();
}

#[test]
fn test_cancel_non_first_of_equal_deadlines() {
    let (pool, queue) = fixture();
    let x = Arc::new(Mutex::new(2));
    let deadline = in_ms(150);

    let seen = Arc::clone(&x);
    queue.enqueue(deadline, move || *seen.lock() += 1).unwrap();
    let seen = Arc::clone(&x);
    let handle = queue.enqueue(deadline, move || *seen.lock() *= 2).unwrap();
    assert!(queue.cancel(handle.uid));

    sleep_ms(300);
    assert_eq!(*x.lock(), 3);

    queue.stop();
    pool.stop();
}

#[test]
fn test_enqueue_from_callback() {
    let (pool, queue) = fixture();
    let x = Arc::new(Mutex::new(2));

    let seen = Arc::clone(&x);
    let requeue = Arc::clone(&queue);
    queue
        .enqueue(in_ms(150), move || {
            requeue
                .enqueue(in_ms(150), move || *seen.lock() += 1)
                .unwrap();
        })
        .unwrap();

    sleep_ms(500);
    assert_eq!(*x.lock(), 3);

    queue.stop();
    pool.stop();
}

#[test]
fn test_cancel_from_callback() {
    let (pool, queue) = fixture();
    let x = Arc::new(Mutex::new(2));

    let seen = Arc::clone(&x);
    let target = queue.enqueue(in_ms(400), move || *seen.lock() += 1).unwrap();
    let canceller = Arc::clone(&queue);
    let uid = target.uid;
    queue
        .enqueue(in_ms(150), move || {
            assert!(canceller.cancel(uid));
        })
        .unwrap();

    sleep_ms(600);
    assert_eq!(*x.lock(), 2);

    queue.stop();
    pool.stop();
}

#[test]
fn test_get_does_not_block_the_dispatcher() {
    let (pool, queue) = fixture();
    let x = Arc::new(Mutex::new(2));

    let seen = Arc::clone(&x);
    let long = queue.enqueue(in_ms(400), move || *seen.lock() += 1).unwrap();
    let seen = Arc::clone(&x);
    queue.enqueue(in_ms(200), move || *seen.lock() += 1).unwrap();

    long.result.get().unwrap();
    // the short timer fired while we were blocked on the long one
    assert_eq!(*x.lock(), 4);

    queue.stop();
    pool.stop();
}

#[test]
fn test_wait_does_not_block_the_dispatcher() {
    let (pool, queue) = fixture();
    let x = Arc::new(Mutex::new(2));

    let seen = Arc::clone(&x);
    let long = queue.enqueue(in_ms(400), move || *seen.lock() += 1).unwrap();
    let seen = Arc::clone(&x);
    queue.enqueue(in_ms(200), move || *seen.lock() += 1).unwrap();

    long.result.wait();
    assert_eq!(*x.lock(), 4);

    queue.stop();
    pool.stop();
}

#[test]
fn test_handle_result_carries_job_value() {
    let pool: Arc<ThreadPool<String>> = Arc::new(ThreadPool::new());
    pool.start(1).unwrap();
    let queue = TimerQueue::new(Arc::clone(&pool));
    queue.start().unwrap();

    let handle = queue
        .enqueue(in_ms(100), || "done".to_string())
        .unwrap();
    assert_eq!(handle.result.get(), Ok("done".to_string()));

    queue.stop();
    pool.stop();
}

#[test]
fn test_panicking_job_surfaces_in_handle() {
    let (pool, queue) = fixture();

    let handle = queue.enqueue(in_ms(100), || panic!("timer job")).unwrap();
    let err = handle.result.get().unwrap_err();
    assert_eq!(err.to_string(), "job panicked: timer job");

    queue.stop();
    pool.stop();
}
