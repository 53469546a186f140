//! Resource accounting for sandboxed plugins (spec §4.E resource accounting, §5 resource caps).
//!
//! OS-level memory accounting is per-process for sandboxed plugins; this module tracks
//! the samples the supervisor receives over `event:resource` frames (or, for trusted
//! plugins, whatever the in-process instance self-reports) and checks them against the
//! descriptor's declared limits.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A single resource sample: current memory bytes, cumulative CPU seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceSample {
    pub memory_bytes: u64,
    pub cpu_seconds: f64,
    pub sampled_at: Option<Instant>,
}

/// Tracks the latest resource sample and declared limits for every running plugin.
#[derive(Clone, Default)]
pub struct ResourceMonitor {
    samples: Arc<RwLock<HashMap<String, ResourceSample>>>,
    limits: Arc<RwLock<HashMap<String, (Option<u64>, Option<u64>)>>>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_limits(&self, plugin: &str, max_memory_bytes: Option<u64>, max_cpu_seconds: Option<u64>) {
        self.limits
            .write()
            .insert(plugin.to_string(), (max_memory_bytes, max_cpu_seconds));
    }

    pub fn clear(&self, plugin: &str) {
        self.samples.write().remove(plugin);
        self.limits.write().remove(plugin);
    }

    pub fn record(&self, plugin: &str, memory_bytes: u64, cpu_seconds: f64) {
        self.samples.write().insert(
            plugin.to_string(),
            ResourceSample {
                memory_bytes,
                cpu_seconds,
                sampled_at: Some(Instant::now()),
            },
        );
    }

    pub fn latest(&self, plugin: &str) -> Option<ResourceSample> {
        self.samples.read().get(plugin).copied()
    }

    /// Whether the latest sample exceeds the declared `max_memory_bytes` for this plugin.
    /// The supervisor samples on a timer so this is advisory, checked rather than enforced
    /// by the OS (spec §5 resource caps: "CPU caps are advisory").
    pub fn memory_exceeded(&self, plugin: &str) -> bool {
        let samples = self.samples.read();
        let limits = self.limits.read();
        match (samples.get(plugin), limits.get(plugin)) {
            (Some(sample), Some((Some(max), _))) => sample.memory_bytes > *max,
            _ => false,
        }
    }

    pub fn cpu_exceeded(&self, plugin: &str) -> bool {
        let samples = self.samples.read();
        let limits = self.limits.read();
        match (samples.get(plugin), limits.get(plugin)) {
            (Some(sample), Some((_, Some(max)))) => sample.cpu_seconds > *max as f64,
            _ => false,
        }
    }
}

/// A bounded ring of the last N crash reasons, used for the supervisor's read-only view
/// (spec §4.E: "last ten crashes with reasons").
#[derive(Debug, Clone, Default)]
pub struct CrashHistory {
    entries: std::collections::VecDeque<CrashRecord>,
    capacity: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CrashRecord {
    pub at: chrono::DateTime<chrono::Utc>,
    pub reason: String,
}

impl CrashHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: std::collections::VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, reason: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(CrashRecord {
            at: chrono::Utc::now(),
            reason: reason.into(),
        });
    }

    pub fn recent(&self) -> Vec<CrashRecord> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_limit_check() {
        let monitor = ResourceMonitor::new();
        monitor.set_limits("calc", Some(1024), None);
        monitor.record("calc", 2048, 0.0);
        assert!(monitor.memory_exceeded("calc"));

        monitor.record("calc", 512, 0.0);
        assert!(!monitor.memory_exceeded("calc"));
    }

    #[test]
    fn test_crash_history_bounded() {
        let mut history = CrashHistory::new(2);
        history.push("crash 1");
        history.push("crash 2");
        history.push("crash 3");

        let recent = history.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].reason, "crash 2");
        assert_eq!(recent[1].reason, "crash 3");
    }
}
