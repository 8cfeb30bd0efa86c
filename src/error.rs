use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Lifecycle and OS-level errors reported synchronously to the caller.
///
/// Failures of user jobs are never reported through this type; those are
/// captured into the owning future as a [`JobError`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("already running")]
    AlreadyRunning,

    #[error("not running")]
    NotRunning,

    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("scheduling parameters not supported on this platform")]
    SchedUnsupported,

    #[error("failed to set scheduling parameters: errno {errno}")]
    Sched { errno: i32 },
}

/// A failure produced while running a job or a continuation.
///
/// Stored inside the future that owns the job and surfaced by
/// [`Future::get`](crate::Future::get). Cloneable so that every observer
/// of a shared future can retrieve the error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The job panicked; the payload message is preserved.
    #[error("job panicked: {0}")]
    Panicked(String),

    /// The producer was dropped before fulfilling the future. Happens to
    /// timers that are cancelled or discarded by `clear`/`stop`, and to
    /// pool jobs discarded by `stop`.
    #[error("job abandoned before completion")]
    Abandoned,

    /// The executor refused the hand-off, e.g. a pool stopped between
    /// dispatch and execution.
    #[error("job rejected by executor: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_error_is_cloneable() {
        let err = JobError::Panicked("boom".to_string());
        assert_eq!(err.clone(), err);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(Error::AlreadyRunning.to_string(), "already running");
        assert_eq!(
            JobError::Abandoned.to_string(),
            "job abandoned before completion"
        );
    }
}
