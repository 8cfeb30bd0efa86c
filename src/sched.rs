//! OS scheduling parameters for the dispatcher thread.
//!
//! Real-time policies need privilege; failure to apply them is reported
//! to the caller, who typically logs it and keeps the default policy.

#[cfg(unix)]
use crate::error::{Error, Result};

/// OS scheduling policy for a dispatcher thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    /// The default time-sharing policy (`SCHED_OTHER`).
    Other,
    /// Real-time first-in first-out (`SCHED_FIFO`).
    Fifo,
    /// Real-time round-robin (`SCHED_RR`).
    RoundRobin,
}

/// Priority within a policy; `Min`/`Max` resolve to the policy's
/// platform-specific bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPriority {
    Min,
    Max,
    Explicit(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedParams {
    pub policy: SchedPolicy,
    pub priority: SchedPriority,
}

impl SchedParams {
    pub fn new(policy: SchedPolicy, priority: SchedPriority) -> Self {
        Self { policy, priority }
    }

    /// The policy at its maximum priority.
    pub fn max(policy: SchedPolicy) -> Self {
        Self::new(policy, SchedPriority::Max)
    }
}

#[cfg(unix)]
pub(crate) fn set_pthread_params(handle: libc::pthread_t, params: SchedParams) -> Result<()> {
    let policy = match params.policy {
        SchedPolicy::Other => libc::SCHED_OTHER,
        SchedPolicy::Fifo => libc::SCHED_FIFO,
        SchedPolicy::RoundRobin => libc::SCHED_RR,
    };
    let sched_priority = match params.priority {
        SchedPriority::Min => unsafe { libc::sched_get_priority_min(policy) },
        SchedPriority::Max => unsafe { libc::sched_get_priority_max(policy) },
        SchedPriority::Explicit(value) => value,
    };
    let param = libc::sched_param { sched_priority };
    let rc = unsafe { libc::pthread_setschedparam(handle, policy, &param) };
    if rc == 0 {
        Ok(())
    } else {
        Err(Error::Sched { errno: rc })
    }
}
