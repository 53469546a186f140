//! Alert emission on exhausted retries (spec §4.I Retries: "if `alert_on_failure`, the
//! scheduler emits a structured alert event").

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A structured alert describing one job that exhausted its retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAlert {
    pub plugin: String,
    pub job_id: String,
    pub attempt: u32,
    pub error: String,
    pub occurred_at: DateTime<Utc>,
}

/// Collaborator seam for delivering `JobAlert`s out of the scheduler. A host binary wires
/// a real sink (log, webhook, admin event stream); tests use [`NoopAlertSink`] or a
/// recording stub.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: JobAlert);
}

/// Logs the alert at `warn` and otherwise drops it. The default until a host wires
/// something that actually reaches an operator.
#[derive(Debug, Default)]
pub struct NoopAlertSink;

#[async_trait]
impl AlertSink for NoopAlertSink {
    async fn send(&self, alert: JobAlert) {
        tracing::warn!(
            plugin = %alert.plugin,
            job_id = %alert.job_id,
            attempt = alert.attempt,
            error = %alert.error,
            "job exhausted retries"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink(Arc<AtomicUsize>);

    #[async_trait]
    impl AlertSink for CountingSink {
        async fn send(&self, _alert: JobAlert) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_sink_receives_alert() {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = CountingSink(count.clone());
        sink.send(JobAlert {
            plugin: "demo".to_string(),
            job_id: "cleanup".to_string(),
            attempt: 4,
            error: "timed out".to_string(),
            occurred_at: Utc::now(),
        })
        .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
