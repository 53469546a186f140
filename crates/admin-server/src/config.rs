//! Administration server configuration
//!
//! Handles loading and validation of the admin HTTP surface's configuration from
//! environment variables, configuration files, and defaults, the same layered way the
//! host binary loads `PLUGHOST_*` values (spec §6).

use serde::{Deserialize, Serialize};

/// Configuration for the administration HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host, e.g. `127.0.0.1`.
    pub host: String,

    /// Bind port, e.g. `7777` (spec §6 `PLUGHOST_ADMIN_BIND` default `127.0.0.1:7777`).
    pub port: u16,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,

    /// CORS configuration.
    pub cors: CorsConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// The operator identity seam (spec §6: "a permissive pass-through layer ships for
    /// local development only, never for production use").
    pub operator_identity: OperatorIdentityConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allow any origin (development only).
    pub allow_any_origin: bool,

    /// List of allowed origins.
    pub allowed_origins: Vec<String>,

    /// Allowed HTTP methods.
    pub allowed_methods: Vec<String>,

    /// Allowed headers.
    pub allowed_headers: Vec<String>,

    /// Allow credentials.
    pub allow_credentials: bool,

    /// Max age for preflight cache (seconds).
    pub max_age_secs: u64,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Requests per minute per caller IP.
    pub requests_per_minute: u32,

    /// Burst size.
    pub burst_size: u32,
}

/// The operator identity extractor seam (spec §6). The administration surface performs
/// no identity checks itself; a host composer supplies a tower layer that populates
/// [`crate::middleware::auth::OperatorIdentity`]. `permissive` is the only layer shipped
/// here, and it must never run in production.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorIdentityConfig {
    /// When `true`, every request is stamped with `default_operator` unauthenticated.
    /// Local development only.
    pub permissive: bool,

    /// The operator name the permissive layer stamps onto every request.
    pub default_operator: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Log format (json, pretty, compact).
    pub format: String,

    /// Enable per-request logging.
    pub log_requests: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7777,
            request_timeout_secs: 30,
            max_body_size: 2 * 1024 * 1024,
            cors: CorsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            operator_identity: OperatorIdentityConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_any_origin: false,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            allowed_methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "OPTIONS".to_string(),
            ],
            allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
            allow_credentials: false,
            max_age_secs: 3600,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 120,
            burst_size: 20,
        }
    }
}

impl Default for OperatorIdentityConfig {
    fn default() -> Self {
        Self {
            permissive: true,
            default_operator: "local-dev".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            log_requests: true,
        }
    }
}

impl ServerConfig {
    /// Load configuration layered defaults -> config file -> `PLUGHOST_ADMIN__*`
    /// environment variables, following the same `config`-crate pattern the rest of the
    /// workspace uses for its ambient configuration.
    pub fn load() -> Result<Self, config::ConfigError> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&ServerConfig::default())?)
            .add_source(config::File::with_name("config/admin-server").required(false))
            .add_source(config::Environment::with_prefix("PLUGHOST_ADMIN").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    /// Bind the admin surface to the given host/port, overriding whatever `load()`
    /// produced — used by the `host` binary to honor `PLUGHOST_ADMIN_BIND` (spec §6).
    pub fn with_bind_addr(mut self, addr: &str) -> Result<Self, String> {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| format!("invalid bind address '{addr}', expected host:port"))?;
        self.host = host.to_string();
        self.port = port
            .parse()
            .map_err(|_| format!("invalid port in bind address '{addr}'"))?;
        Ok(self)
    }

    /// Validate the configuration; a loud failure here is a configuration error (host
    /// exit code `1`, spec §6).
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("admin server port must be greater than 0".to_string());
        }
        if self.max_body_size == 0 {
            return Err("admin server max body size must be greater than 0".to_string());
        }
        if self.operator_identity.permissive {
            tracing::warn!(
                "admin server operator identity is permissive pass-through; never use this in production"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 7777);
        assert_eq!(config.host, "127.0.0.1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_zero_port() {
        let mut config = ServerConfig::default();
        config.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_bind_addr_overrides_host_and_port() {
        let config = ServerConfig::default().with_bind_addr("0.0.0.0:9000").unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
    }
}
