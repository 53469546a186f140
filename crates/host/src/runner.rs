//! Bridges the scheduler's [`JobRunner`] collaborator seam onto [`PluginManager::call`]
//! (spec §4.I: "a host binary implements this over `PluginManager::call`").

use plugin_core::PluginManager;
use scheduler_core::JobRunner;

pub struct PluginManagerJobRunner {
    manager: PluginManager,
}

impl PluginManagerJobRunner {
    pub fn new(manager: PluginManager) -> Self {
        Self { manager }
    }
}

#[async_trait::async_trait]
impl JobRunner for PluginManagerJobRunner {
    async fn run_job(&self, plugin: &str, callable_ref: &str) -> Result<(), String> {
        let outcome = self
            .manager
            .call(plugin, callable_ref, serde_json::Value::Null)
            .await
            .map_err(|err| err.to_string())?;

        if outcome.ok {
            Ok(())
        } else {
            let err = outcome.error.unwrap_or(plugin_core::traits::ActionError {
                code: "unknown".to_string(),
                message: "job action reported failure with no error detail".to_string(),
            });
            Err(format!("{}: {}", err.code, err.message))
        }
    }
}
