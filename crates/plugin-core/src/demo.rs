//! Reference plugins used by acceptance scenarios and by the workspace's integration tests.
//! Not a business-domain plugin pack — just the `calc` and `flaky` examples, available in
//! both trusted and sandboxed mode.

use async_trait::async_trait;
use serde_json::json;

use crate::error::PluginResult;
use crate::traits::{ActionOutcome, Plugin};

/// Scenario 1/2/6 of spec §8: `add`/`divide` over two numbers.
#[derive(Default)]
pub struct CalcPlugin;

#[async_trait]
impl Plugin for CalcPlugin {
    async fn on_load(&mut self) -> PluginResult<()> {
        Ok(())
    }

    async fn handle(&mut self, action: &str, payload: serde_json::Value) -> PluginResult<ActionOutcome> {
        let a = payload.get("a").and_then(|v| v.as_f64());
        let b = payload.get("b").and_then(|v| v.as_f64());
        let (Some(a), Some(b)) = (a, b) else {
            return Ok(ActionOutcome::failure("invalid_payload", "expected numeric fields 'a' and 'b'"));
        };

        match action {
            "add" => Ok(ActionOutcome::success(json!({ "result": a + b }))),
            "divide" => {
                if b == 0.0 {
                    Ok(ActionOutcome::failure("divide_by_zero", "division by zero"))
                } else {
                    Ok(ActionOutcome::success(json!({ "result": a / b })))
                }
            }
            other => Ok(ActionOutcome::failure("unknown_action", format!("no such action '{other}'"))),
        }
    }

    async fn on_unload(&mut self) -> PluginResult<()> {
        Ok(())
    }
}

/// Scenario 3 of spec §8: a plugin that panics on `on_load` a fixed number of times, to
/// drive the supervisor's crash-and-restart policy in tests.
pub struct FlakyPlugin {
    crashes_remaining: std::sync::atomic::AtomicU32,
}

impl FlakyPlugin {
    pub fn new(crashes: u32) -> Self {
        Self {
            crashes_remaining: std::sync::atomic::AtomicU32::new(crashes),
        }
    }
}

#[async_trait]
impl Plugin for FlakyPlugin {
    async fn on_load(&mut self) -> PluginResult<()> {
        let remaining = self.crashes_remaining.load(std::sync::atomic::Ordering::SeqCst);
        if remaining > 0 {
            self.crashes_remaining.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            return Err(crate::error::PluginError::Internal("simulated crash on load".to_string()));
        }
        Ok(())
    }

    async fn handle(&mut self, _action: &str, _payload: serde_json::Value) -> PluginResult<ActionOutcome> {
        Ok(ActionOutcome::success(json!({ "ok": true })))
    }

    async fn on_unload(&mut self) -> PluginResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_calc_add() {
        let mut plugin = CalcPlugin;
        let outcome = plugin.handle("add", json!({"a": 10, "b": 5})).await.unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.data.unwrap()["result"], 15.0);
    }

    #[tokio::test]
    async fn test_calc_divide_by_zero() {
        let mut plugin = CalcPlugin;
        let outcome = plugin.handle("divide", json!({"a": 1, "b": 0})).await.unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.error.unwrap().code, "divide_by_zero");
    }
}
