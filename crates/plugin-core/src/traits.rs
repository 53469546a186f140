//! The SDK surface plugin authors implement, and the descriptor types built from it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::PluginResult;

/// Execution mode declared by a plugin's manifest (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Runs in-process, sharing the host's address space.
    Trusted,
    /// Runs in a child process, reached only through the IPC channel.
    Sandboxed,
}

/// A resource-pattern permission entry (`permissions[]` in §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub resource: String,
    pub actions: Vec<String>,
    pub effect: PermissionEffect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionEffect {
    Allow,
    Deny,
}

/// `resources.rate_limit` from §6. Accepts either the `calls_per_period`/`period_ms`
/// spelling (§3/§8) or the manifest's own `calls`/`period_seconds` spelling (§6) on the
/// way in, through [`RawRateLimit`]; always serializes back out in the `_ms` form.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(from = "RawRateLimit")]
pub struct RateLimit {
    pub calls_per_period: u32,
    pub period_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
struct RawRateLimit {
    calls_per_period: Option<u32>,
    calls: Option<u32>,
    period_ms: Option<u64>,
    period_seconds: Option<u64>,
}

impl From<RawRateLimit> for RateLimit {
    fn from(raw: RawRateLimit) -> Self {
        Self {
            calls_per_period: raw.calls_per_period.or(raw.calls).unwrap_or(0),
            period_ms: raw
                .period_ms
                .or_else(|| raw.period_seconds.map(|secs| secs * 1_000))
                .unwrap_or(0),
        }
    }
}

/// `resources` policy fields from §3. Deserialized through [`RawResourcePolicy`] so a
/// manifest may spell the timeout as `timeout_ms` (§3/§8) or `timeout_seconds` (§6) without
/// the two documented key sets silently diverging — whichever is present wins, `timeout_ms`
/// taking precedence if a manifest somehow sets both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawResourcePolicy")]
pub struct ResourcePolicy {
    pub timeout_ms: u64,
    pub rate_limit: Option<RateLimit>,
    pub max_memory_bytes: Option<u64>,
    pub max_cpu_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawResourcePolicy {
    timeout_ms: Option<u64>,
    timeout_seconds: Option<u64>,
    rate_limit: Option<RawRateLimit>,
    max_memory_bytes: Option<u64>,
    max_cpu_seconds: Option<u64>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl From<RawResourcePolicy> for ResourcePolicy {
    fn from(raw: RawResourcePolicy) -> Self {
        Self {
            timeout_ms: raw
                .timeout_ms
                .or_else(|| raw.timeout_seconds.map(|secs| secs * 1_000))
                .unwrap_or_else(default_timeout_ms),
            rate_limit: raw.rate_limit.map(RateLimit::from),
            max_memory_bytes: raw.max_memory_bytes,
            max_cpu_seconds: raw.max_cpu_seconds,
        }
    }
}

impl Default for ResourcePolicy {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            rate_limit: None,
            max_memory_bytes: None,
            max_cpu_seconds: None,
        }
    }
}

/// One entry of `jobs[]` in a plugin manifest (spec §3 `JobDescriptor`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: String,
    pub name: String,
    pub callable_ref: String,
    pub trigger: JobTrigger,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub execution: JobExecution,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub alert_on_failure: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum JobTrigger {
    Interval { period_ms: u64 },
    Cron { expression: String },
    Once { at: chrono::DateTime<chrono::Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    High,
    #[default]
    Normal,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobExecution {
    Io,
    Cpu,
}

/// The validated, immutable manifest of one plugin (spec §3 `PluginDescriptor`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub version: semver::Version,
    pub author: Option<String>,
    pub execution_mode: ExecutionMode,
    pub entry: String,
    pub route_prefix: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub resources: ResourcePolicy,
    #[serde(default)]
    pub required_services: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub jobs: Vec<JobDescriptor>,
}

impl PluginDescriptor {
    /// A sandboxed plugin may not declare a service key reserved for trusted plugins
    /// (spec §3 invariant). By convention, keys prefixed `trusted.` are trusted-only.
    pub fn validate_sandboxed_services(&self) -> PluginResult<()> {
        if self.execution_mode == ExecutionMode::Sandboxed {
            if let Some(bad) = self
                .required_services
                .iter()
                .find(|s| s.starts_with("trusted."))
            {
                return Err(crate::error::PluginError::Config {
                    plugin: self.name.clone(),
                    reason: format!("sandboxed plugin may not require trusted-only service '{bad}'"),
                });
            }
        }
        Ok(())
    }
}

/// Payload exchanged over a plugin call: arbitrary JSON in, structured result or error out.
pub type ActionPayload = serde_json::Value;

/// Result of dispatching one action to a plugin instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionError {
    pub code: String,
    pub message: String,
}

impl ActionOutcome {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ActionError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// The trait every plugin implementation provides, in both execution modes (spec §4.D).
///
/// For `trusted` plugins the supervisor holds a boxed instance directly. For `sandboxed`
/// plugins the same trait is implemented by whatever the sandbox worker's `entry`
/// resolution constructs inside the child process; the parent never sees the instance.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Called once after construction, before any request is dispatched.
    async fn on_load(&mut self) -> PluginResult<()>;

    /// Dispatch one action. Handler panics/errors must be caught by the caller and turned
    /// into `ActionOutcome::failure` — a failing handler never tears down the plugin.
    async fn handle(&mut self, action: &str, payload: ActionPayload) -> PluginResult<ActionOutcome>;

    /// Called once, after the last in-flight request has drained, before the instance
    /// (or its hosting process) is discarded.
    async fn on_unload(&mut self) -> PluginResult<()>;
}
