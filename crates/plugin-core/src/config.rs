//! Host-wide runtime configuration (spec §6 environment surface) and manifest helpers.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{PluginError, PluginResult};

/// The enumerated `PLUGHOST_*` environment variables, all defaulted, all validated at
/// startup. Invalid values fail loudly with exit code `1` (handled by the `host` binary).
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub plugin_root: std::path::PathBuf,
    pub scan_period: Duration,
    pub startup_grace: Duration,
    pub shutdown_grace: Duration,
    pub max_parallel_requests: usize,
    pub ipc_queue_capacity: usize,
    pub admin_bind: String,
    pub timezone: String,
}

impl HostConfig {
    /// Load from the process environment, applying the defaults from spec §6.
    pub fn from_env() -> PluginResult<Self> {
        let plugin_root = env_or("PLUGHOST_PLUGIN_ROOT", "./plugins").into();
        let scan_period = Duration::from_millis(env_parse("PLUGHOST_SCAN_PERIOD_MS", 2_000)?);
        let startup_grace = Duration::from_millis(env_parse("PLUGHOST_STARTUP_GRACE_MS", 5_000)?);
        let shutdown_grace = Duration::from_millis(env_parse("PLUGHOST_SHUTDOWN_GRACE_MS", 5_000)?);
        let max_parallel_requests: usize = env_parse("PLUGHOST_MAX_PARALLEL_REQUESTS", 16)?;
        let ipc_queue_capacity: usize = env_parse("PLUGHOST_IPC_QUEUE_CAPACITY", 1_024)?;
        let admin_bind = env_or("PLUGHOST_ADMIN_BIND", "127.0.0.1:7777");
        let timezone = env_or("PLUGHOST_TIMEZONE", "UTC");

        let config = Self {
            plugin_root,
            scan_period,
            startup_grace,
            shutdown_grace,
            max_parallel_requests,
            ipc_queue_capacity,
            admin_bind,
            timezone,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> PluginResult<()> {
        if self.max_parallel_requests == 0 {
            return Err(PluginError::Config {
                plugin: "host".to_string(),
                reason: "PLUGHOST_MAX_PARALLEL_REQUESTS must be at least 1".to_string(),
            });
        }
        if self.ipc_queue_capacity == 0 {
            return Err(PluginError::Config {
                plugin: "host".to_string(),
                reason: "PLUGHOST_IPC_QUEUE_CAPACITY must be at least 1".to_string(),
            });
        }
        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(PluginError::Config {
                plugin: "host".to_string(),
                reason: format!("PLUGHOST_TIMEZONE '{}' is not a recognized time zone", self.timezone),
            });
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> PluginResult<T> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse().map_err(|_| PluginError::Config {
            plugin: "host".to_string(),
            reason: format!("{key}='{raw}' is not a valid value"),
        }),
    }
}

/// Expand `${VAR}` references in `text` against `env`. Missing required variables fail
/// loading (spec §4.B) rather than silently interpolating an empty string.
pub fn expand_env_vars(
    text: &str,
    env: &HashMap<String, String>,
    plugin: &str,
) -> PluginResult<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '$' && text[i..].starts_with("${") {
            let rest = &text[i + 2..];
            let end = rest.find('}').ok_or_else(|| PluginError::Config {
                plugin: plugin.to_string(),
                reason: format!("unterminated variable reference in '{text}'"),
            })?;
            let var_name = &rest[..end];
            let value = env.get(var_name).ok_or_else(|| PluginError::Config {
                plugin: plugin.to_string(),
                reason: format!("missing required environment variable '{var_name}'"),
            })?;
            out.push_str(value);
            for _ in 0..(var_name.len() + 3) {
                chars.next();
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        let mut env = HashMap::new();
        env.insert("DB_HOST".to_string(), "localhost".to_string());

        let expanded = expand_env_vars("postgres://${DB_HOST}/db", &env, "test").unwrap();
        assert_eq!(expanded, "postgres://localhost/db");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let env = HashMap::new();
        assert!(expand_env_vars("${MISSING}", &env, "test").is_err());
    }

    #[test]
    fn test_host_config_defaults() {
        std::env::remove_var("PLUGHOST_PLUGIN_ROOT");
        let config = HostConfig::from_env().unwrap();
        assert_eq!(config.plugin_root, std::path::PathBuf::from("./plugins"));
        assert_eq!(config.max_parallel_requests, 16);
    }
}
