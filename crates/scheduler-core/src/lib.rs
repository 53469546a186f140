//! Job scheduler for the plugin host runtime.
//!
//! Owns the recurring/one-shot job space declared by plugin manifests: interval, cron,
//! and one-shot triggers; three fixed-priority FIFO queues; dependency ordering with
//! cycle detection at registration; two worker pools (I/O and CPU); exponential-backoff
//! retries with optional alerting; and graceful, grace-deadlined shutdown.

pub mod alert;
pub mod dag;
pub mod error;
pub mod history;
pub mod pool;
pub mod queue;
pub mod retry;
pub mod scheduler;

pub use alert::{AlertSink, JobAlert, NoopAlertSink};
pub use error::{SchedulerError, SchedulerResult};
pub use history::{JobHistory, JobOutcome, JobRun};
pub use pool::Pools;
pub use queue::PriorityQueue;
pub use retry::retry_backoff;
pub use scheduler::{JobRunner, JobStatus, Scheduler};
