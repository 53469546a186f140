//! Per-plugin supervisor: spawn/observe/restart/stop, apply resource policy (spec §4.E).

use rand::Rng;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock as SyncRwLock;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::timeout;

use crate::error::{PluginError, PluginResult};
use crate::ipc::{ChildEvent, ControlAction, IpcChannel};
use crate::isolation::{CrashHistory, ResourceMonitor};
use crate::traits::{ActionOutcome, Plugin, PluginDescriptor};

/// A per-plugin state (spec §3 `PluginState`). Valid transitions are enforced by
/// [`Supervisor`] itself; this type is a plain value readers snapshot.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PluginState {
    Unloaded,
    Loaded,
    Starting,
    Running,
    Failing { consecutive_crashes: u32, last_error: String },
    Stopping,
    Stopped,
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginState::Unloaded => write!(f, "unloaded"),
            PluginState::Loaded => write!(f, "loaded"),
            PluginState::Starting => write!(f, "starting"),
            PluginState::Running => write!(f, "running"),
            PluginState::Failing { .. } => write!(f, "failing"),
            PluginState::Stopping => write!(f, "stopping"),
            PluginState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Constructs a fresh in-process instance for a `trusted` plugin. Restart means dropping
/// the old instance and calling this again, then `on_load` (spec §4.E trusted mode).
pub type TrustedFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub startup_grace: Duration,
    pub shutdown_grace: Duration,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub max_restarts: u32,
    pub crash_window: Duration,
    pub restart_base: Duration,
    pub restart_cap: Duration,
    pub ipc_queue_capacity: usize,
    pub sandbox_worker_bin: std::path::PathBuf,
    pub max_parallel_requests: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_millis(5_000),
            shutdown_grace: Duration::from_millis(5_000),
            ping_interval: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(2),
            max_restarts: 5,
            crash_window: Duration::from_secs(60),
            restart_base: Duration::from_millis(500),
            restart_cap: Duration::from_secs(30),
            ipc_queue_capacity: 1_024,
            sandbox_worker_bin: std::path::PathBuf::from("sandbox-worker"),
            max_parallel_requests: 16,
        }
    }
}

/// A read-only view published for operators and the reload engine (spec §4.E).
#[derive(Debug, Clone, serde::Serialize)]
pub struct SupervisorStats {
    pub plugin: String,
    pub state: PluginState,
    /// `true` once the restart budget has been exhausted (spec §4.E/§8 scenario 3:
    /// "administration surface reports `terminal_failure`"). A plugin reaches `stopped`
    /// this way or via an ordinary [`Supervisor::stop`]; this flag is how operators tell
    /// the two apart without inferring it from `recent_crashes`.
    pub terminal_failure: bool,
    pub uptime: Option<Duration>,
    pub recent_crashes: Vec<crate::isolation::CrashRecord>,
    pub latest_memory_bytes: Option<u64>,
    pub latest_cpu_seconds: Option<f64>,
    pub pending_call_count: usize,
}

struct Inner {
    state: SyncRwLock<PluginState>,
    started_at: SyncRwLock<Option<Instant>>,
    crash_history: parking_lot::Mutex<CrashHistory>,
    crash_times: parking_lot::Mutex<VecDeque<Instant>>,
    channel: SyncRwLock<Option<Arc<IpcChannel>>>,
    trusted: AsyncMutex<Option<Box<dyn Plugin>>>,
    child: AsyncMutex<Option<Child>>,
    shutting_down: AtomicBool,
    terminal_failure: AtomicBool,
}

/// One supervisor per plugin, owning that plugin's state machine (spec §4.E).
#[derive(Clone)]
pub struct Supervisor {
    descriptor: Arc<PluginDescriptor>,
    config: SupervisorConfig,
    resource_monitor: ResourceMonitor,
    trusted_factory: Option<TrustedFactory>,
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        descriptor: PluginDescriptor,
        config: SupervisorConfig,
        trusted_factory: Option<TrustedFactory>,
        resource_monitor: ResourceMonitor,
    ) -> Self {
        resource_monitor.set_limits(
            &descriptor.name,
            descriptor.resources.max_memory_bytes,
            descriptor.resources.max_cpu_seconds,
        );
        Self {
            descriptor: Arc::new(descriptor),
            config,
            resource_monitor,
            trusted_factory,
            inner: Arc::new(Inner {
                state: SyncRwLock::new(PluginState::Loaded),
                started_at: SyncRwLock::new(None),
                crash_history: parking_lot::Mutex::new(CrashHistory::new(10)),
                crash_times: parking_lot::Mutex::new(VecDeque::new()),
                channel: SyncRwLock::new(None),
                trusted: AsyncMutex::new(None),
                child: AsyncMutex::new(None),
                shutting_down: AtomicBool::new(false),
                terminal_failure: AtomicBool::new(false),
            }),
        }
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> PluginState {
        self.inner.state.read().clone()
    }

    fn set_state(&self, state: PluginState) {
        *self.inner.state.write() = state;
    }

    pub fn stats(&self) -> SupervisorStats {
        let sample = self.resource_monitor.latest(&self.descriptor.name);
        SupervisorStats {
            plugin: self.descriptor.name.clone(),
            state: self.state(),
            terminal_failure: self.inner.terminal_failure.load(Ordering::SeqCst),
            uptime: self.inner.started_at.read().map(|t| t.elapsed()),
            recent_crashes: self.inner.crash_history.lock().recent(),
            latest_memory_bytes: sample.map(|s| s.memory_bytes),
            latest_cpu_seconds: sample.map(|s| s.cpu_seconds),
            pending_call_count: self
                .inner
                .channel
                .read()
                .as_ref()
                .map(|c| c.pending_call_count())
                .unwrap_or(0),
        }
    }

    /// Spawn the worker (or construct the trusted instance), open the channel, and wait
    /// for `event:ready` within the startup grace period (spec §4.E Start).
    pub async fn start(&self) -> PluginResult<()> {
        self.set_state(PluginState::Starting);

        let result = match self.descriptor.execution_mode {
            crate::traits::ExecutionMode::Trusted => self.start_trusted().await,
            crate::traits::ExecutionMode::Sandboxed => self.start_sandboxed().await,
        };

        match result {
            Ok(()) => {
                self.set_state(PluginState::Running);
                *self.inner.started_at.write() = Some(Instant::now());
                self.spawn_health_loop();
                Ok(())
            }
            Err(err) => {
                self.record_crash(err.to_string());
                Err(err)
            }
        }
    }

    async fn start_trusted(&self) -> PluginResult<()> {
        let factory = self.trusted_factory.as_ref().ok_or_else(|| PluginError::Config {
            plugin: self.descriptor.name.clone(),
            reason: "trusted plugin has no registered factory".to_string(),
        })?;
        let mut instance = factory();
        timeout(self.config.startup_grace, instance.on_load())
            .await
            .map_err(|_| PluginError::OperationTimeout {
                plugin: self.descriptor.name.clone(),
            })??;
        *self.inner.trusted.lock().await = Some(instance);
        Ok(())
    }

    async fn start_sandboxed(&self) -> PluginResult<()> {
        let mut command = Command::new(&self.config.sandbox_worker_bin);
        command
            .arg("--plugin")
            .arg(&self.descriptor.name)
            .arg("--entry")
            .arg(&self.descriptor.entry)
            .arg("--max-parallel")
            .arg(self.config.max_parallel_requests.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        for (key, value) in &self.descriptor.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|err| PluginError::Config {
            plugin: self.descriptor.name.clone(),
            reason: format!("failed to spawn sandbox worker: {err}"),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| PluginError::Internal("child stdin missing".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| PluginError::Internal("child stdout missing".into()))?;

        let (events_tx, mut events_rx) = mpsc::channel::<ChildEvent>(64);
        let channel = IpcChannel::spawn(
            self.descriptor.name.clone(),
            stdin,
            stdout,
            self.config.ipc_queue_capacity,
            events_tx,
        );

        let ready = timeout(self.config.startup_grace, async {
            while let Some(event) = events_rx.recv().await {
                if event.event == "ready" {
                    return true;
                }
            }
            false
        })
        .await;

        *self.inner.child.lock().await = Some(child);
        *self.inner.channel.write() = Some(Arc::new(channel));
        self.spawn_event_drain(events_rx);
        self.spawn_exit_watch();

        match ready {
            Ok(true) => Ok(()),
            _ => Err(PluginError::OperationTimeout {
                plugin: self.descriptor.name.clone(),
            }),
        }
    }

    /// Poll the child for exit independently of the ping interval, so a crash is observed
    /// within a tick rather than waiting for the next health sample (spec §4.E: "on child
    /// exit ... increment consecutive_crashes").
    fn spawn_exit_watch(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut poll = tokio::time::interval(Duration::from_millis(50));
            loop {
                poll.tick().await;
                if this.inner.shutting_down.load(Ordering::SeqCst) {
                    return;
                }
                if !matches!(this.state(), PluginState::Running) {
                    return;
                }
                let exited = {
                    let mut guard = this.inner.child.lock().await;
                    match guard.as_mut() {
                        Some(child) => matches!(child.try_wait(), Ok(Some(_))),
                        None => true,
                    }
                };
                if exited {
                    if this.inner.shutting_down.load(Ordering::SeqCst) {
                        return;
                    }
                    this.on_unhealthy("child process exited".to_string()).await;
                    return;
                }
            }
        });
    }

    fn spawn_event_drain(&self, mut events_rx: mpsc::Receiver<ChildEvent>) {
        let resource_monitor = self.resource_monitor.clone();
        let plugin = self.descriptor.name.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                if event.event == "resource" {
                    let memory = event
                        .payload
                        .get("memory_bytes")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0);
                    let cpu = event
                        .payload
                        .get("cpu_seconds")
                        .and_then(|v| v.as_f64())
                        .unwrap_or(0.0);
                    resource_monitor.record(&plugin, memory, cpu);
                }
            }
        });
    }

    /// Dispatch one call: direct invocation for trusted plugins, an IPC request for
    /// sandboxed ones (spec §4.G `call`).
    pub async fn call(&self, action: &str, payload: serde_json::Value) -> PluginResult<ActionOutcome> {
        let deadline = Duration::from_millis(self.descriptor.resources.timeout_ms);

        match self.descriptor.execution_mode {
            crate::traits::ExecutionMode::Trusted => {
                let mut guard = self.inner.trusted.lock().await;
                let instance = guard.as_mut().ok_or_else(|| PluginError::NotFound {
                    plugin: self.descriptor.name.clone(),
                })?;
                match timeout(deadline, instance.handle(action, payload)).await {
                    Ok(Ok(outcome)) => Ok(outcome),
                    Ok(Err(err)) => Ok(ActionOutcome::failure("plugin_failure", err.to_string())),
                    Err(_) => Err(PluginError::IpcTimeout {
                        plugin: self.descriptor.name.clone(),
                        correlation_id: "trusted-call".to_string(),
                    }),
                }
            }
            crate::traits::ExecutionMode::Sandboxed => {
                let channel = self.inner.channel.read().clone();
                let channel = channel.ok_or_else(|| PluginError::NotFound {
                    plugin: self.descriptor.name.clone(),
                })?;
                channel.call(action, payload, deadline).await
            }
        }
    }

    /// Sample the child via `control:ping`; three consecutive failures, a memory-limit
    /// breach, or a sustained CPU overrun mark the plugin unhealthy and trigger a restart
    /// (spec §4.E Health).
    fn spawn_health_loop(&self) {
        if self.descriptor.execution_mode != crate::traits::ExecutionMode::Sandboxed {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            let mut consecutive_failures = 0u32;
            let mut interval = tokio::time::interval(this.config.ping_interval);
            loop {
                interval.tick().await;
                if this.inner.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                if !matches!(this.state(), PluginState::Running) {
                    break;
                }

                let unhealthy_frames = this
                    .inner
                    .channel
                    .read()
                    .as_ref()
                    .map(|c| c.is_unhealthy())
                    .unwrap_or(false);

                // A true round trip through the request/response machinery, not just a
                // fire-and-forget control frame, so "expect a response within a timeout"
                // (spec §4.E Health) actually observes the child, not just the local queue.
                let ping_ok = {
                    let channel = this.inner.channel.read().clone();
                    match channel {
                        Some(channel) => channel
                            .call(crate::ipc::PING_ACTION, serde_json::Value::Null, this.config.ping_timeout)
                            .await
                            .is_ok(),
                        None => false,
                    }
                };

                let memory_exceeded = this.resource_monitor.memory_exceeded(&this.descriptor.name);

                if !ping_ok {
                    consecutive_failures += 1;
                } else {
                    consecutive_failures = 0;
                }

                if unhealthy_frames || memory_exceeded || consecutive_failures >= 3 {
                    let reason = if memory_exceeded {
                        "memory limit exceeded".to_string()
                    } else if unhealthy_frames {
                        "repeated malformed IPC frames".to_string()
                    } else {
                        "three consecutive ping failures".to_string()
                    };
                    this.on_unhealthy(reason).await;
                    break;
                }
            }
        });
    }

    async fn on_unhealthy(&self, reason: String) {
        self.record_crash(reason);
        self.maybe_restart().await;
    }

    fn record_crash(&self, reason: String) {
        self.inner.crash_history.lock().push(reason.clone());
        let mut times = self.inner.crash_times.lock();
        let now = Instant::now();
        times.push_back(now);
        while times
            .front()
            .map(|t| now.duration_since(*t) > self.config.crash_window)
            .unwrap_or(false)
        {
            times.pop_front();
        }
        let consecutive = times.len() as u32;
        self.set_state(PluginState::Failing {
            consecutive_crashes: consecutive,
            last_error: reason,
        });
    }

    /// If `consecutive_crashes` within the rolling window exceeds `max_restarts`, the
    /// plugin transitions to `stopped` permanently; otherwise it backs off and restarts
    /// (spec §4.E Restart policy, jitter ±25%, base 500ms, cap 30s).
    async fn maybe_restart(&self) {
        let consecutive = self.inner.crash_times.lock().len() as u32;

        if consecutive > self.config.max_restarts {
            self.inner.terminal_failure.store(true, Ordering::SeqCst);
            self.set_state(PluginState::Stopped);
            tracing::error!(plugin = %self.descriptor.name, "terminal failure: restart budget exhausted");
            return;
        }

        let backoff = restart_backoff(consecutive, self.config.restart_base, self.config.restart_cap);
        tokio::time::sleep(backoff).await;

        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        if let Err(err) = self.start().await {
            tracing::warn!(plugin = %self.descriptor.name, error = %err, "restart attempt failed");
        } else {
            // A run that lasts past the window resets the crash counter on the next crash
            // check, since `record_crash` recomputes the window from `crash_times`.
        }
    }

    /// Send `control:shutdown`, wait up to the grace deadline, then terminate/kill. Always
    /// frees the IPC channel and fails pending calls with `process_dead` (spec §4.E Stop).
    pub async fn stop(&self) -> PluginResult<()> {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        self.set_state(PluginState::Stopping);

        match self.descriptor.execution_mode {
            crate::traits::ExecutionMode::Trusted => {
                let mut guard = self.inner.trusted.lock().await;
                if let Some(mut instance) = guard.take() {
                    let _ = timeout(self.config.shutdown_grace, instance.on_unload()).await;
                }
            }
            crate::traits::ExecutionMode::Sandboxed => {
                let channel = self.inner.channel.read().clone();
                if let Some(channel) = &channel {
                    let _ = channel.send_control(ControlAction::Shutdown).await;
                }

                let mut child_guard = self.inner.child.lock().await;
                if let Some(mut child) = child_guard.take() {
                    let exited = timeout(self.config.shutdown_grace, child.wait()).await;
                    if exited.is_err() {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                    }
                }

                if let Some(channel) = &channel {
                    channel.fail_all_pending(|| PluginError::ProcessDead {
                        plugin: self.descriptor.name.clone(),
                    });
                }
                *self.inner.channel.write() = None;
            }
        }

        self.set_state(PluginState::Stopped);
        self.resource_monitor.clear(&self.descriptor.name);
        Ok(())
    }
}

/// `min(base * 2^(n-1), cap)` with a signed jitter of up to ±25 % (spec §4.E).
fn restart_backoff(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = 2u64.saturating_pow(attempt.saturating_sub(1));
    let raw = base.saturating_mul(exp as u32).min(cap);
    let raw_ms = raw.as_millis() as i64;
    let jitter_range = raw_ms / 4; // 25%
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(-jitter_range..=jitter_range)
    } else {
        0
    };
    let jittered_ms = (raw_ms + jitter).max(0) as u64;
    Duration::from_millis(jittered_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_backoff_caps() {
        let base = Duration::from_millis(500);
        let cap = Duration::from_secs(30);
        let backoff = restart_backoff(10, base, cap);
        assert!(backoff <= cap + cap / 4);
    }

    #[test]
    fn test_restart_backoff_grows() {
        let base = Duration::from_millis(500);
        let cap = Duration::from_secs(30);
        let first = restart_backoff(1, base, cap).as_millis() as i64;
        let third = restart_backoff(3, base, cap).as_millis() as i64;
        // third attempt's un-jittered midpoint (2000ms) exceeds the first's (500ms) even
        // after worst-case opposite jitter.
        assert!(third + 500 > first);
    }
}
