//! Descriptor loader: reads one plugin directory and yields a `PluginDescriptor` or a
//! structured error. Never executes plugin code (spec §4.B).

use std::collections::HashMap;
use std::path::Path;

use crate::config::expand_env_vars;
use crate::error::{PluginError, PluginResult};
use crate::traits::PluginDescriptor;

/// Manifest file names recognized at the root of a plugin directory, checked in order.
const MANIFEST_NAMES: &[&str] = &["plugin.yaml", "plugin.yml", "plugin.json"];

/// Load and validate the descriptor for the plugin directory at `plugin_dir`.
///
/// `process_env` supplies values for `${VAR}` expansion inside string fields (currently
/// applied to `env{}` values, which are the common place a manifest references secrets
/// or per-deployment endpoints).
pub fn load(plugin_dir: &Path, process_env: &HashMap<String, String>) -> PluginResult<PluginDescriptor> {
    let dir_name = plugin_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let manifest_path = MANIFEST_NAMES
        .iter()
        .map(|name| plugin_dir.join(name))
        .find(|p| p.exists())
        .ok_or_else(|| PluginError::Config {
            plugin: dir_name.clone(),
            reason: format!(
                "no manifest found (expected one of {MANIFEST_NAMES:?}) in {}",
                plugin_dir.display()
            ),
        })?;

    let raw = std::fs::read_to_string(&manifest_path)?;

    let mut descriptor: PluginDescriptor = if manifest_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e == "json")
        .unwrap_or(false)
    {
        serde_json::from_str(&raw).map_err(|e| PluginError::Config {
            plugin: dir_name.clone(),
            reason: format!("invalid JSON manifest: {e}"),
        })?
    } else {
        serde_yaml::from_str(&raw).map_err(|e| PluginError::Config {
            plugin: dir_name.clone(),
            reason: format!("invalid YAML manifest: {e}"),
        })?
    };

    if descriptor.name != dir_name {
        return Err(PluginError::Config {
            plugin: dir_name.clone(),
            reason: format!(
                "manifest name '{}' does not match directory name '{}'",
                descriptor.name, dir_name
            ),
        });
    }

    if descriptor.route_prefix.trim().is_empty() {
        return Err(PluginError::Config {
            plugin: descriptor.name.clone(),
            reason: "route_prefix must be non-empty".to_string(),
        });
    }

    descriptor.validate_sandboxed_services()?;

    let mut expanded_env = HashMap::with_capacity(descriptor.env.len());
    for (key, value) in &descriptor.env {
        let expanded = expand_env_vars(value, process_env, &descriptor.name)?;
        expanded_env.insert(key.clone(), expanded);
    }
    descriptor.env = expanded_env;

    for job in &descriptor.jobs {
        if job.id.trim().is_empty() {
            return Err(PluginError::Config {
                plugin: descriptor.name.clone(),
                reason: "job id must be non-empty".to_string(),
            });
        }
    }

    // Note: `name` and `route_prefix` global uniqueness is checked by the plugin
    // manager at mount time, not here, because two loaders may race (spec §4.B).

    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(dir: &Path, contents: &str) {
        std::fs::write(dir.join("plugin.yaml"), contents).unwrap();
    }

    #[test]
    fn test_load_valid_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let plugin_dir = tmp.path().join("calc");
        std::fs::create_dir(&plugin_dir).unwrap();
        write_manifest(
            &plugin_dir,
            r#"
name: calc
version: 1.0.0
execution_mode: trusted
entry: calc::entry
route_prefix: /calc
resources:
  timeout_ms: 10000
"#,
        );

        let descriptor = load(&plugin_dir, &HashMap::new()).unwrap();
        assert_eq!(descriptor.name, "calc");
        assert_eq!(descriptor.route_prefix, "/calc");
    }

    #[test]
    fn test_name_mismatch_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let plugin_dir = tmp.path().join("calc");
        std::fs::create_dir(&plugin_dir).unwrap();
        write_manifest(
            &plugin_dir,
            r#"
name: other
version: 1.0.0
execution_mode: trusted
entry: calc::entry
route_prefix: /calc
"#,
        );

        assert!(load(&plugin_dir, &HashMap::new()).is_err());
    }

    #[test]
    fn test_missing_env_var_fails_load() {
        let tmp = tempfile::tempdir().unwrap();
        let plugin_dir = tmp.path().join("calc");
        std::fs::create_dir(&plugin_dir).unwrap();
        write_manifest(
            &plugin_dir,
            r#"
name: calc
version: 1.0.0
execution_mode: trusted
entry: calc::entry
route_prefix: /calc
env:
  API_KEY: "${MISSING_VAR}"
"#,
        );

        assert!(load(&plugin_dir, &HashMap::new()).is_err());
    }
}
