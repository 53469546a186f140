//! Child-process entry point for a `sandboxed` plugin (spec §4.D).
//!
//! Reads framed JSON requests from stdin, dispatches them to a boxed [`Plugin`] instance
//! behind a semaphore that bounds request parallelism, and writes framed JSON responses and
//! events to stdout. The parent never sees this process's memory; everything it learns
//! about the plugin crosses this wire.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use plugin_core::demo::{CalcPlugin, FlakyPlugin};
use plugin_core::ipc::{ControlAction, Frame, PING_ACTION};
use plugin_core::traits::{ActionError, ActionOutcome, Plugin};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex, Semaphore};

#[derive(Parser, Debug)]
#[command(name = "sandbox-worker")]
struct Args {
    /// Plugin name, used only for log context.
    #[arg(long)]
    plugin: String,

    /// Entry string from the manifest, resolved against the built-in registry below.
    #[arg(long)]
    entry: String,

    /// Upper bound on requests dispatched to the plugin instance concurrently.
    #[arg(long, default_value_t = 16)]
    max_parallel: usize,
}

/// The built-in entry registry. A real deployment would resolve `entry` to a dynamically
/// loaded or compiled-in plugin; this worker only ever hosts the reference plugins named
/// in spec §8's acceptance scenarios.
fn construct(entry: &str) -> Option<Box<dyn Plugin>> {
    match entry {
        "demo::calc" => Some(Box::new(CalcPlugin)),
        "demo::flaky" => Some(Box::new(FlakyPlugin::new(5))),
        _ => None,
    }
}

fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    let exit_code = runtime.block_on(run(args));
    std::process::exit(exit_code);
}

async fn run(args: Args) -> i32 {
    let Some(mut instance) = construct(&args.entry) else {
        tracing::error!(entry = %args.entry, "unknown entry, cannot construct plugin");
        return 1;
    };

    if let Err(err) = instance.on_load().await {
        tracing::error!(plugin = %args.plugin, error = %err, "on_load failed");
        return 1;
    }

    let plugin = Arc::new(Mutex::new(instance));
    let semaphore = Arc::new(Semaphore::new(args.max_parallel));
    let in_flight = Arc::new(AtomicU32::new(0));
    let shutting_down = Arc::new(AtomicBool::new(false));

    let (writer_tx, mut writer_rx) = mpsc::channel::<Frame>(1_024);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(frame) = writer_rx.recv().await {
            let Ok(mut line) = serde_json::to_string(&frame) else {
                continue;
            };
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let _ = writer_tx
        .send(Frame::Event {
            event: "ready".to_string(),
            payload: serde_json::json!({ "plugin": args.plugin }),
        })
        .await;

    spawn_resource_sampler(writer_tx.clone(), shutting_down.clone());

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break, // parent closed stdin; treat like shutdown with no grace.
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }
        let frame: Frame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(error = %err, "malformed frame from parent, ignoring");
                continue;
            }
        };

        match frame {
            Frame::Request { id, action, payload, deadline_ms } => {
                if action == PING_ACTION {
                    // Answered inline: never touches the plugin mutex or the parallelism
                    // semaphore, so a health ping is never queued behind real work.
                    let _ = writer_tx
                        .send(Frame::Response {
                            id,
                            ok: true,
                            data: Some(serde_json::Value::Null),
                            error: None,
                        })
                        .await;
                    continue;
                }

                if shutting_down.load(Ordering::SeqCst) {
                    let _ = writer_tx
                        .send(Frame::Response {
                            id,
                            ok: false,
                            data: None,
                            error: Some(ActionError {
                                code: "shutting_down".to_string(),
                                message: "worker is draining for shutdown".to_string(),
                            }),
                        })
                        .await;
                    continue;
                }

                let plugin = plugin.clone();
                let semaphore = semaphore.clone();
                let in_flight = in_flight.clone();
                let writer_tx = writer_tx.clone();
                in_flight.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    let deadline = Duration::from_millis(deadline_ms);
                    let outcome = dispatch(&plugin, &action, payload, deadline).await;
                    let response = match outcome {
                        Ok(outcome) => Frame::Response {
                            id,
                            ok: outcome.ok,
                            data: outcome.data,
                            error: outcome.error,
                        },
                        Err(message) => Frame::Response {
                            id,
                            ok: false,
                            data: None,
                            error: Some(ActionError {
                                code: "plugin_failure".to_string(),
                                message,
                            }),
                        },
                    };
                    let _ = writer_tx.send(response).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                });
            }
            Frame::Control { action: ControlAction::Shutdown, .. } => {
                shutting_down.store(true, Ordering::SeqCst);
                break;
            }
            Frame::Control { action: ControlAction::Cancel, id } => {
                // No cooperative cancellation inside a dispatched handler; the parent has
                // already stopped waiting on this id and will discard a late response.
                tracing::debug!(?id, "cancel requested, no in-flight handle to interrupt");
            }
            Frame::Control { action: ControlAction::Ping, .. } => {
                // Superseded by the request/response PING_ACTION round trip; tolerated for
                // protocol forward-compatibility but otherwise a no-op.
            }
            Frame::Response { .. } | Frame::Event { .. } => {
                tracing::warn!("unexpected frame kind received by child");
            }
        }
    }

    shutting_down.store(true, Ordering::SeqCst);
    wait_for_drain(&in_flight, Duration::from_secs(5)).await;

    {
        let mut guard = plugin.lock().await;
        let _ = tokio::time::timeout(Duration::from_secs(5), guard.on_unload()).await;
    }

    drop(writer_tx);
    let _ = writer.await;
    0
}

async fn dispatch(
    plugin: &Arc<Mutex<Box<dyn Plugin>>>,
    action: &str,
    payload: serde_json::Value,
    deadline: Duration,
) -> Result<ActionOutcome, String> {
    let plugin = plugin.clone();
    let action = action.to_string();
    let handle = tokio::spawn(async move {
        let mut guard = plugin.lock().await;
        guard.handle(&action, payload).await
    });

    match tokio::time::timeout(deadline, handle).await {
        Ok(Ok(Ok(outcome))) => Ok(outcome),
        Ok(Ok(Err(err))) => Err(err.to_string()),
        Ok(Err(join_err)) => Err(format!("handler panicked: {join_err}")),
        Err(_) => Err("handler exceeded deadline".to_string()),
    }
}

async fn wait_for_drain(in_flight: &Arc<AtomicU32>, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    while in_flight.load(Ordering::SeqCst) > 0 {
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!("shutdown grace expired with requests still in flight");
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Emits `event:resource` frames every 5s, read from `/proc/self` without adding a new
/// dependency for something this small (spec §4.E Health: memory/CPU sampling).
fn spawn_resource_sampler(writer_tx: mpsc::Sender<Frame>, shutting_down: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            if shutting_down.load(Ordering::SeqCst) {
                return;
            }
            if let Some(sample) = sample_self() {
                let _ = writer_tx
                    .send(Frame::Event {
                        event: "resource".to_string(),
                        payload: serde_json::json!({
                            "memory_bytes": sample.0,
                            "cpu_seconds": sample.1,
                        }),
                    })
                    .await;
            }
        }
    });
}

/// Returns `(memory_bytes, cpu_seconds)`, or `None` if `/proc` isn't available on this
/// platform. `CLK_TCK` is assumed to be 100, true on every Linux target this worker ships
/// to.
fn sample_self() -> Option<(u64, f64)> {
    const CLK_TCK: f64 = 100.0;

    let memory_bytes = std::fs::read_to_string("/proc/self/status").ok().and_then(|status| {
        status.lines().find_map(|line| {
            line.strip_prefix("VmRSS:").map(|rest| {
                let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().unwrap_or(0);
                kb * 1024
            })
        })
    })?;

    let cpu_seconds = std::fs::read_to_string("/proc/self/stat").ok().and_then(|stat| {
        let fields: Vec<&str> = stat.rsplit(')').next()?.split_whitespace().collect();
        // Fields after the closing paren of comm start at index 0 = state(3rd overall);
        // utime is field 14, stime is field 15 counting from 1 in the full record, i.e.
        // indices 11 and 12 here.
        let utime: f64 = fields.get(11)?.parse().ok()?;
        let stime: f64 = fields.get(12)?.parse().ok()?;
        Some((utime + stime) / CLK_TCK)
    })?;

    Some((memory_bytes, cpu_seconds))
}
