//! Error types for the job scheduler.

use thiserror::Error;

/// Result type alias for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Error kinds raised by registration, triggering, and introspection (spec §4.I).
#[derive(Error, Debug, Clone)]
pub enum SchedulerError {
    /// A job id referenced by `depends_on` or an admin lookup does not exist.
    #[error("job '{0}' not found")]
    NotFound(String),

    /// A job with this id is already registered for this plugin.
    #[error("job '{0}' is already registered")]
    AlreadyRegistered(String),

    /// `depends_on` forms a cycle, detected at registration time.
    #[error("circular dependency detected involving job '{0}'")]
    CircularDependency(String),

    /// A `depends_on` entry names a job id that was never registered.
    #[error("job '{job}' depends on unknown job '{depends_on}'")]
    UnknownDependency { job: String, depends_on: String },

    /// The cron expression in a trigger failed to parse.
    #[error("invalid cron expression '{0}': {1}")]
    InvalidCron(String, String),

    /// The configured timezone name is not recognized.
    #[error("invalid timezone '{0}'")]
    InvalidTimezone(String),

    /// Neither worker pool had capacity and the job was skipped this tick.
    #[error("pool saturated for job '{0}'")]
    PoolSaturated(String),
}
