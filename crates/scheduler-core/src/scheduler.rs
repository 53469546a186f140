//! The job scheduler driver (spec §4.I): registration, triggers, priority/dependency
//! dispatch, retries, and graceful shutdown.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;

use crate::alert::{AlertSink, JobAlert, NoopAlertSink};
use crate::dag;
use crate::error::{SchedulerError, SchedulerResult};
use crate::history::{JobHistory, JobOutcome, JobRun};
use crate::pool::Pools;
use crate::queue::PriorityQueue;
use crate::retry::retry_backoff;
use plugin_core::traits::{JobDescriptor, JobTrigger};

/// Collaborator that actually invokes a job's `callable_ref` on its owning plugin. A host
/// binary implements this over [`plugin_core::manager::PluginManager::call`]; tests use a
/// stub.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(&self, plugin: &str, callable_ref: &str) -> Result<(), String>;
}

fn job_key(plugin: &str, job_id: &str) -> String {
    format!("{plugin}::{job_id}")
}

struct RegisteredJob {
    plugin: String,
    descriptor: JobDescriptor,
    paused: bool,
    in_flight: bool,
    next_due: Option<DateTime<Utc>>,
    last_outcome: Option<bool>,
    attempt: u32,
    history: JobHistory,
}

/// Point-in-time view of one job, for the administration surface (spec §4.I
/// Introspection).
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobStatus {
    pub job_id: String,
    pub plugin: String,
    pub priority: plugin_core::traits::JobPriority,
    pub paused: bool,
    pub in_flight: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub retry_count: u32,
}

/// Owns the recurring/one-shot job space for every mounted plugin.
pub struct Scheduler {
    jobs: Arc<RwLock<HashMap<String, RegisteredJob>>>,
    runner: Arc<dyn JobRunner>,
    alert_sink: Arc<dyn AlertSink>,
    pools: Arc<Pools>,
    timezone: Tz,
    history_capacity: usize,
    shutting_down: Arc<AtomicBool>,
    in_flight_count: Arc<AtomicU32>,
    tick_guard: AsyncMutex<()>,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn JobRunner>, timezone_name: &str, io_pool_capacity: usize) -> SchedulerResult<Self> {
        let timezone = Tz::from_str(timezone_name)
            .map_err(|_| SchedulerError::InvalidTimezone(timezone_name.to_string()))?;
        Ok(Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            runner,
            alert_sink: Arc::new(NoopAlertSink),
            pools: Arc::new(Pools::sized_to_machine(io_pool_capacity)),
            timezone,
            history_capacity: 20,
            shutting_down: Arc::new(AtomicBool::new(false)),
            in_flight_count: Arc::new(AtomicU32::new(0)),
            tick_guard: AsyncMutex::new(()),
        })
    }

    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = sink;
        self
    }

    /// Register one plugin's job at plugin start (spec §4.I: "Jobs are registered at
    /// plugin start").
    pub fn register(&self, plugin: &str, descriptor: JobDescriptor) -> SchedulerResult<()> {
        if let JobTrigger::Cron { expression } = &descriptor.trigger {
            if let Err(err) = CronSchedule::from_str(expression) {
                return Err(SchedulerError::InvalidCron(expression.clone(), err.to_string()));
            }
        }

        let key = job_key(plugin, &descriptor.id);
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&key) {
            return Err(SchedulerError::AlreadyRegistered(key));
        }

        let mut edges: HashMap<String, Vec<String>> = jobs
            .iter()
            .filter(|(_, job)| job.plugin == plugin)
            .map(|(id, job)| (id.clone(), job.descriptor.depends_on.iter().map(|d| job_key(plugin, d)).collect()))
            .collect();
        edges.insert(
            key.clone(),
            descriptor.depends_on.iter().map(|d| job_key(plugin, d)).collect(),
        );
        dag::validate_dependencies(&key, &edges)?;

        let next_due = next_run_after(&descriptor.trigger, Utc::now(), &self.timezone);
        jobs.insert(
            key,
            RegisteredJob {
                plugin: plugin.to_string(),
                descriptor,
                paused: false,
                in_flight: false,
                next_due,
                last_outcome: None,
                attempt: 0,
                history: JobHistory::new(self.history_capacity),
            },
        );
        Ok(())
    }

    /// Deregister every job owned by `plugin`, at plugin stop.
    pub fn deregister_plugin(&self, plugin: &str) {
        self.jobs.write().retain(|_, job| job.plugin != plugin);
    }

    pub fn pause(&self, plugin: &str, job_id: &str) -> SchedulerResult<()> {
        let key = job_key(plugin, job_id);
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&key).ok_or_else(|| SchedulerError::NotFound(key.clone()))?;
        job.paused = true;
        Ok(())
    }

    pub fn resume(&self, plugin: &str, job_id: &str) -> SchedulerResult<()> {
        let key = job_key(plugin, job_id);
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&key).ok_or_else(|| SchedulerError::NotFound(key.clone()))?;
        job.paused = false;
        if job.next_due.is_none() {
            job.next_due = next_run_after(&job.descriptor.trigger, Utc::now(), &self.timezone);
        }
        Ok(())
    }

    /// Run `job_id` right away. Manual runs count as attempt 1 and never change the
    /// job's regular schedule (spec §4.I Introspection).
    pub fn trigger_manually(self: &Arc<Self>, plugin: &str, job_id: &str) -> SchedulerResult<()> {
        let key = job_key(plugin, job_id);
        let descriptor = {
            let jobs = self.jobs.read();
            let job = jobs.get(&key).ok_or_else(|| SchedulerError::NotFound(key.clone()))?;
            if job.in_flight {
                return Err(SchedulerError::PoolSaturated(key.clone()));
            }
            job.descriptor.clone()
        };
        {
            let mut jobs = self.jobs.write();
            if let Some(job) = jobs.get_mut(&key) {
                job.in_flight = true;
            }
        }
        let this = self.clone();
        let plugin = plugin.to_string();
        tokio::spawn(async move {
            this.execute_with_retries(key, plugin, descriptor).await;
        });
        Ok(())
    }

    pub fn list(&self) -> Vec<JobStatus> {
        self.jobs
            .read()
            .iter()
            .map(|(key, job)| JobStatus {
                job_id: key.clone(),
                plugin: job.plugin.clone(),
                priority: job.descriptor.priority,
                paused: job.paused,
                in_flight: job.in_flight,
                next_run: job.next_due,
                retry_count: job.attempt,
            })
            .collect()
    }

    pub fn history(&self, plugin: &str, job_id: &str) -> Vec<JobRun> {
        let key = job_key(plugin, job_id);
        self.jobs
            .read()
            .get(&key)
            .map(|job| job.history.recent())
            .unwrap_or_default()
    }

    /// The driver loop: ticks on `period`, dispatching every due and eligible job in
    /// priority order bounded by pool capacity. Runs until [`Scheduler::shutdown`] is
    /// called.
    pub async fn run(self: Arc<Self>, period: std::time::Duration) {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            self.tick().await;
        }
    }

    async fn tick(self: &Arc<Self>) {
        let _guard = self.tick_guard.lock().await;
        let now = Utc::now();

        let mut queue = PriorityQueue::new();

        {
            let jobs = self.jobs.read();

            let in_flight_ids: HashSet<String> =
                jobs.iter().filter(|(_, j)| j.in_flight).map(|(k, _)| k.clone()).collect();

            // A job due this same tick is about to be queued for dispatch (pool capacity
            // permitting) but hasn't been marked `in_flight` yet — that only happens once
            // its turn comes up in the dispatch loop below. Without folding it into the
            // blocking set here, a dependency and its dependent due in the same tick would
            // both pass `dependencies_satisfied` against last tick's `last_outcome` and get
            // queued together, letting the dependent start before the dependency's
            // current-period run has even begun. Treat "due this tick" the same as
            // "in flight" for the purposes of this tick's eligibility check; a deferred
            // dependent keeps its `next_due` and is reconsidered next tick.
            let due_this_tick: HashSet<String> = jobs
                .iter()
                .filter(|(_, j)| !j.paused && !j.in_flight && j.next_due.map(|due| due <= now).unwrap_or(false))
                .map(|(k, _)| k.clone())
                .collect();
            let blocking: HashSet<String> = in_flight_ids.union(&due_this_tick).cloned().collect();

            for key in &due_this_tick {
                let Some(job) = jobs.get(key) else { continue };
                let deps_ok = dag::dependencies_satisfied(&job.descriptor.depends_on, &blocking, |dep_id| {
                    let dep_key = job_key(&job.plugin, dep_id);
                    jobs.get(&dep_key).and_then(|d| d.last_outcome)
                });
                if deps_ok {
                    queue.push(key.clone(), job.descriptor.priority);
                }
            }
        }

        while let Some(key) = queue.pop_next() {
            let (plugin, descriptor, execution) = {
                let jobs = self.jobs.read();
                let Some(job) = jobs.get(&key) else { continue };
                (job.plugin.clone(), job.descriptor.clone(), job.descriptor.execution)
            };

            let Some(permit) = self.pools.try_acquire(execution) else {
                continue;
            };

            {
                let mut jobs = self.jobs.write();
                if let Some(job) = jobs.get_mut(&key) {
                    job.in_flight = true;
                    job.next_due = None;
                }
            }

            let this = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                this.execute_with_retries(key, plugin, descriptor).await;
            });
        }
    }

    async fn execute_with_retries(self: Arc<Self>, key: String, plugin: String, descriptor: JobDescriptor) {
        self.in_flight_count.fetch_add(1, Ordering::SeqCst);
        let mut attempt = 1u32;
        let run_started = Utc::now();

        let outcome = loop {
            let started_at = Utc::now();
            let result = self.runner.run_job(&plugin, &descriptor.callable_ref).await;
            let finished_at = Utc::now();

            match result {
                Ok(()) => {
                    break JobRun {
                        attempt,
                        started_at,
                        finished_at,
                        outcome: JobOutcome::Success,
                        error: None,
                    };
                }
                Err(_) if attempt < descriptor.max_retries => {
                    let delay = retry_backoff(attempt, descriptor.retry_backoff_ms);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                Err(err) => {
                    if descriptor.alert_on_failure {
                        self.alert_sink
                            .send(JobAlert {
                                plugin: plugin.clone(),
                                job_id: descriptor.id.clone(),
                                attempt,
                                error: err.clone(),
                                occurred_at: Utc::now(),
                            })
                            .await;
                    }
                    break JobRun {
                        attempt,
                        started_at,
                        finished_at,
                        outcome: JobOutcome::Failed,
                        error: Some(err),
                    };
                }
            }
        };

        let succeeded = outcome.outcome == JobOutcome::Success;
        let deletes_self = matches!(descriptor.trigger, JobTrigger::Once { .. });

        {
            let mut jobs = self.jobs.write();
            if let Some(job) = jobs.get_mut(&key) {
                job.history.push(outcome);
                job.last_outcome = Some(succeeded);
                job.attempt = attempt;
                job.in_flight = false;
                if deletes_self {
                    jobs.remove(&key);
                } else if job.next_due.is_none() {
                    job.next_due = next_run_after(&job.descriptor.trigger, run_started, &self.timezone);
                }
            }
        }

        self.in_flight_count.fetch_sub(1, Ordering::SeqCst);
    }

    /// Stop accepting new runs and wait up to `grace` for in-flight jobs to finish. Runs
    /// still in flight past the deadline are recorded as cancelled (spec §4.I
    /// Cancellation and shutdown).
    pub async fn shutdown(&self, grace: std::time::Duration) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + grace;
        while self.in_flight_count.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }

        let mut jobs = self.jobs.write();
        for job in jobs.values_mut() {
            if job.in_flight {
                job.history.push(JobRun {
                    attempt: job.attempt.max(1),
                    started_at: Utc::now(),
                    finished_at: Utc::now(),
                    outcome: JobOutcome::Cancelled,
                    error: Some("shutdown grace period expired".to_string()),
                });
                job.in_flight = false;
            }
        }
    }
}

/// Compute the next run time after `from`, per trigger kind (spec §4.I Triggers).
/// Interval triggers schedule from the previous *start* to avoid drift.
fn next_run_after(trigger: &JobTrigger, from: DateTime<Utc>, timezone: &Tz) -> Option<DateTime<Utc>> {
    match trigger {
        JobTrigger::Interval { period_ms } => Some(from + chrono::Duration::milliseconds(*period_ms as i64)),
        JobTrigger::Cron { expression } => {
            let schedule = CronSchedule::from_str(expression).ok()?;
            schedule.after(&from.with_timezone(timezone)).next().map(|t| t.with_timezone(&Utc))
        }
        JobTrigger::Once { at } => {
            if *at > from {
                Some(*at)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugin_core::traits::{JobExecution, JobPriority};
    use std::sync::atomic::AtomicUsize;

    struct CountingRunner {
        calls: Arc<AtomicUsize>,
        fail_first_n: u32,
    }

    #[async_trait]
    impl JobRunner for CountingRunner {
        async fn run_job(&self, _plugin: &str, _callable_ref: &str) -> Result<(), String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as u32;
            if n < self.fail_first_n {
                Err("boom".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn descriptor(id: &str, trigger: JobTrigger) -> JobDescriptor {
        JobDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            callable_ref: "run".to_string(),
            trigger,
            priority: JobPriority::Normal,
            depends_on: vec![],
            execution: JobExecution::Io,
            max_retries: 3,
            retry_backoff_ms: 1,
            alert_on_failure: false,
        }
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate() {
        let runner = Arc::new(CountingRunner { calls: Arc::new(AtomicUsize::new(0)), fail_first_n: 0 });
        let scheduler = Scheduler::new(runner, "UTC", 4).unwrap();
        scheduler.register("demo", descriptor("job1", JobTrigger::Interval { period_ms: 1000 })).unwrap();
        let err = scheduler.register("demo", descriptor("job1", JobTrigger::Interval { period_ms: 1000 }));
        assert!(matches!(err, Err(SchedulerError::AlreadyRegistered(_))));
    }

    #[tokio::test]
    async fn test_register_rejects_cycle() {
        let runner = Arc::new(CountingRunner { calls: Arc::new(AtomicUsize::new(0)), fail_first_n: 0 });
        let scheduler = Scheduler::new(runner, "UTC", 4).unwrap();
        let mut a = descriptor("a", JobTrigger::Interval { period_ms: 1000 });
        a.depends_on = vec!["b".to_string()];
        let mut b = descriptor("b", JobTrigger::Interval { period_ms: 1000 });
        b.depends_on = vec!["a".to_string()];
        scheduler.register("demo", b).unwrap();
        let err = scheduler.register("demo", a);
        assert!(matches!(err, Err(SchedulerError::CircularDependency(_))));
    }

    #[tokio::test]
    async fn test_manual_trigger_runs_job_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = Arc::new(CountingRunner { calls: calls.clone(), fail_first_n: 0 });
        let scheduler = Arc::new(Scheduler::new(runner, "UTC", 4).unwrap());
        scheduler
            .register("demo", descriptor("job1", JobTrigger::Interval { period_ms: 3_600_000 }))
            .unwrap();
        scheduler.trigger_manually("demo", "job1").unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_then_success_records_one_history_entry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = Arc::new(CountingRunner { calls: calls.clone(), fail_first_n: 2 });
        let scheduler = Arc::new(Scheduler::new(runner, "UTC", 4).unwrap());
        scheduler
            .register("demo", descriptor("job1", JobTrigger::Interval { period_ms: 3_600_000 }))
            .unwrap();
        scheduler.trigger_manually("demo", "job1").unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let history = scheduler.history("demo", "job1");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, JobOutcome::Success);
        assert_eq!(history[0].attempt, 3);
    }

    struct OrderRunner {
        order: Arc<parking_lot::Mutex<Vec<String>>>,
        run_ms: u64,
    }

    #[async_trait]
    impl JobRunner for OrderRunner {
        async fn run_job(&self, _plugin: &str, callable_ref: &str) -> Result<(), String> {
            tokio::time::sleep(std::time::Duration::from_millis(self.run_ms)).await;
            self.order.lock().push(callable_ref.to_string());
            Ok(())
        }
    }

    /// A dependency and its dependent due in the same tick must not dispatch together:
    /// `report` has to wait for `stats`'s current-period run to finish, not just for its
    /// previous-period success.
    #[tokio::test]
    async fn test_same_tick_dependency_is_deferred() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let runner = Arc::new(OrderRunner { order: order.clone(), run_ms: 30 });
        let scheduler = Arc::new(Scheduler::new(runner, "UTC", 4).unwrap());

        let mut stats = descriptor("stats", JobTrigger::Interval { period_ms: 3_600_000 });
        stats.priority = JobPriority::High;
        stats.callable_ref = "stats".to_string();
        scheduler.register("demo", stats).unwrap();

        let mut report = descriptor("report", JobTrigger::Interval { period_ms: 3_600_000 });
        report.depends_on = vec!["stats".to_string()];
        report.callable_ref = "report".to_string();
        scheduler.register("demo", report).unwrap();

        // Force both jobs due "now" in the same tick, with `report` never having observed
        // a `stats` success before.
        {
            let mut jobs = scheduler.jobs.write();
            let now = Utc::now();
            jobs.get_mut("demo::stats").unwrap().next_due = Some(now);
            jobs.get_mut("demo::report").unwrap().next_due = Some(now);
        }

        scheduler.tick().await;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(*order.lock(), vec!["stats".to_string()]);

        scheduler.tick().await;
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        assert_eq!(*order.lock(), vec!["stats".to_string(), "report".to_string()]);
    }
}
