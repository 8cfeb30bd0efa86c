//! Time source abstraction for the timer queue.
//!
//! Deadlines are absolute [`SystemTime`] points: callers schedule against
//! the wall clock and the dispatcher converts to relative waits. The wall
//! clock is not monotonic — a retroactive system time change can delay or
//! early-fire pending timers. Embedders needing different behavior (or
//! deterministic tests) substitute their own [`Clock`].

use std::time::SystemTime;

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> SystemTime;
}

/// The process wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}
