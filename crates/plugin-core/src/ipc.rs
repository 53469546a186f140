//! Framed JSON duplex over a child's stdin/stdout (spec §4.C).
//!
//! Each frame is one line of UTF-8 JSON. Writing is serialized through a bounded queue
//! (back-pressure, default capacity 1024); reading is owned by a single background task
//! that demultiplexes by `kind` and resolves pending calls out of order by correlation id.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::{PluginError, PluginResult};
use crate::traits::{ActionError, ActionOutcome};

/// The reserved action name the sandbox worker answers immediately, without touching the
/// plugin instance, so the supervisor's health loop measures a genuine round trip rather
/// than a locally-queued send (spec §4.E Health: "expect a response within a timeout").
pub const PING_ACTION: &str = "__ping__";

/// One line of the wire protocol (spec §6 example frames).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    Request {
        id: String,
        action: String,
        payload: serde_json::Value,
        deadline_ms: u64,
    },
    Response {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ActionError>,
    },
    Event {
        event: String,
        payload: serde_json::Value,
    },
    Control {
        action: ControlAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Ping,
    Shutdown,
    Cancel,
}

/// An event emitted out-of-band by the child: a log line, a resource sample, a health
/// ping reply, or `ready` at startup.
#[derive(Debug, Clone)]
pub struct ChildEvent {
    pub event: String,
    pub payload: serde_json::Value,
}

/// A request awaiting a correlated response, owned by the channel until the response
/// arrives or the deadline fires (spec §3 `PendingCall`).
struct PendingCall {
    reply: oneshot::Sender<PluginResult<ActionOutcome>>,
}

/// The parent-side handle to one child's IPC channel.
pub struct IpcChannel {
    plugin: String,
    writer_tx: mpsc::Sender<Frame>,
    pending: Arc<DashMap<String, PendingCall>>,
    consecutive_malformed: Arc<AtomicU32>,
    unhealthy: Arc<std::sync::atomic::AtomicBool>,
}

impl IpcChannel {
    /// Spawn the writer and reader tasks over the child's stdio handles.
    ///
    /// `queue_capacity` bounds the writer queue (spec §4.C back-pressure default 1024).
    /// `events` receives every `event` frame for the supervisor's health sampling.
    pub fn spawn(
        plugin: String,
        stdin: ChildStdin,
        stdout: ChildStdout,
        queue_capacity: usize,
        events: mpsc::Sender<ChildEvent>,
    ) -> Self {
        let pending: Arc<DashMap<String, PendingCall>> = Arc::new(DashMap::new());
        let consecutive_malformed = Arc::new(AtomicU32::new(0));
        let unhealthy = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let (writer_tx, mut writer_rx) = mpsc::channel::<Frame>(queue_capacity);

        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(frame) = writer_rx.recv().await {
                let Ok(mut line) = serde_json::to_string(&frame) else {
                    continue;
                };
                line.push('\n');
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        {
            let pending = pending.clone();
            let consecutive_malformed = consecutive_malformed.clone();
            let unhealthy = unhealthy.clone();
            let plugin = plugin.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<Frame>(&line) {
                                Ok(Frame::Response { id, ok, data, error }) => {
                                    consecutive_malformed.store(0, Ordering::SeqCst);
                                    if let Some((_, call)) = pending.remove(&id) {
                                        let outcome = if ok {
                                            ActionOutcome { ok: true, data, error: None }
                                        } else {
                                            ActionOutcome { ok: false, data: None, error }
                                        };
                                        let _ = call.reply.send(Ok(outcome));
                                    }
                                    // A late response for an already-cancelled id finds
                                    // nothing in `pending` and is discarded, per spec.
                                }
                                Ok(Frame::Event { event, payload }) => {
                                    consecutive_malformed.store(0, Ordering::SeqCst);
                                    let _ = events.send(ChildEvent { event, payload }).await;
                                }
                                Ok(Frame::Request { .. }) | Ok(Frame::Control { .. }) => {
                                    // Parent never receives these kinds; treat as protocol noise.
                                    tracing::warn!(plugin = %plugin, "unexpected frame kind from child");
                                }
                                Err(err) => {
                                    tracing::warn!(plugin = %plugin, error = %err, "malformed IPC frame");
                                    if consecutive_malformed.fetch_add(1, Ordering::SeqCst) + 1 >= 3 {
                                        unhealthy.store(true, Ordering::SeqCst);
                                    }
                                }
                            }
                        }
                        Ok(None) => {
                            // Child closed its stdout: process is dead. Fail every pending call.
                            for entry in pending.iter() {
                                let _ = entry.value().reply.send(Err(PluginError::ProcessDead {
                                    plugin: plugin.clone(),
                                }));
                            }
                            pending.clear();
                            unhealthy.store(true, Ordering::SeqCst);
                            break;
                        }
                        Err(_) => break,
                    }
                }
            });
        }

        Self {
            plugin,
            writer_tx,
            pending,
            consecutive_malformed,
            unhealthy,
        }
    }

    /// Three malformed frames in a row escalate to *process unhealthy* (spec §4.C).
    pub fn is_unhealthy(&self) -> bool {
        self.unhealthy.load(Ordering::SeqCst)
    }

    pub fn pending_call_count(&self) -> usize {
        self.pending.len()
    }

    /// Issue a request and await its correlated response up to `deadline`. On timeout,
    /// dispatches `control:cancel` and fails locally with `ipc_timeout`; a late response
    /// is discarded because the pending slot has already been removed.
    pub async fn call(
        &self,
        action: &str,
        payload: serde_json::Value,
        deadline: Duration,
    ) -> PluginResult<ActionOutcome> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), PendingCall { reply: tx });

        let request = Frame::Request {
            id: id.clone(),
            action: action.to_string(),
            payload,
            deadline_ms: deadline.as_millis() as u64,
        };

        if self.writer_tx.send(request).await.is_err() {
            self.pending.remove(&id);
            return Err(PluginError::ProcessDead {
                plugin: self.plugin.clone(),
            });
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                // Sender dropped without a reply: the reader task saw the child die.
                Err(PluginError::ProcessDead {
                    plugin: self.plugin.clone(),
                })
            }
            Err(_) => {
                self.pending.remove(&id);
                let _ = self
                    .writer_tx
                    .send(Frame::Control {
                        action: ControlAction::Cancel,
                        id: Some(id.clone()),
                    })
                    .await;
                Err(PluginError::IpcTimeout {
                    plugin: self.plugin.clone(),
                    correlation_id: id,
                })
            }
        }
    }

    /// Send a control frame with no correlated response expected (`ping`, `shutdown`).
    pub async fn send_control(&self, action: ControlAction) -> PluginResult<()> {
        self.writer_tx
            .send(Frame::Control { action, id: None })
            .await
            .map_err(|_| PluginError::ProcessDead {
                plugin: self.plugin.clone(),
            })
    }

    /// Fail every pending call locally (used on shutdown grace expiry or forced kill).
    pub fn fail_all_pending(&self, err_factory: impl Fn() -> PluginError) {
        for entry in self.pending.iter() {
            let _ = entry.value().reply.send(Err(err_factory()));
        }
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_request_round_trip() {
        let frame = Frame::Request {
            id: "c-17".to_string(),
            action: "add".to_string(),
            payload: serde_json::json!({"a": 10, "b": 5}),
            deadline_ms: 30_000,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"kind\":\"request\""));
        let parsed: Frame = serde_json::from_str(&json).unwrap();
        match parsed {
            Frame::Request { id, action, .. } => {
                assert_eq!(id, "c-17");
                assert_eq!(action, "add");
            }
            _ => panic!("expected Request"),
        }
    }

    #[test]
    fn test_frame_response_error_shape() {
        let raw = r#"{"kind":"response","id":"c-17","ok":false,"error":{"code":"divide_by_zero","message":"division by zero"}}"#;
        let parsed: Frame = serde_json::from_str(raw).unwrap();
        match parsed {
            Frame::Response { ok, error, .. } => {
                assert!(!ok);
                assert_eq!(error.unwrap().code, "divide_by_zero");
            }
            _ => panic!("expected Response"),
        }
    }

    #[test]
    fn test_control_cancel_shape() {
        let frame = Frame::Control {
            action: ControlAction::Cancel,
            id: Some("c-17".to_string()),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"action\":\"cancel\""));
        assert!(json.contains("\"id\":\"c-17\""));
    }
}
