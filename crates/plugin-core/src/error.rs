//! Error types for the plugin host runtime.

use thiserror::Error;

/// Result type for plugin-core operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// The uniform error kinds used across the host (spec §7): `config`, `ipc_timeout`,
/// `ipc_protocol`, `process_dead`, `plugin_failure`, `capacity`, `unknown_action`,
/// `dependency`, `policy`.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Invalid manifest, duplicate route prefix, unresolved env variable.
    #[error("configuration error for plugin '{plugin}': {reason}")]
    Config { plugin: String, reason: String },

    /// A pending call's deadline elapsed without a response.
    #[error("request '{correlation_id}' to plugin '{plugin}' timed out")]
    IpcTimeout {
        plugin: String,
        correlation_id: String,
    },

    /// A malformed frame or unknown frame kind was read from the channel.
    #[error("malformed IPC frame from plugin '{plugin}': {reason}")]
    IpcProtocol { plugin: String, reason: String },

    /// The child process exited while calls were pending against it.
    #[error("plugin '{plugin}' process exited while calls were pending")]
    ProcessDead { plugin: String },

    /// The plugin handler raised; `code` is the plugin-provided error code.
    #[error("plugin '{plugin}' handler failed ({code}): {message}")]
    PluginFailure {
        plugin: String,
        code: String,
        message: String,
    },

    /// Send queue full or pool saturated.
    #[error("capacity exceeded for plugin '{plugin}': {reason}")]
    Capacity { plugin: String, reason: String },

    /// The plugin does not recognize the requested action.
    #[error("plugin '{plugin}' does not recognize action '{action}'")]
    UnknownAction { plugin: String, action: String },

    /// A job or plugin depends on something failed or missing.
    #[error("dependency error for '{id}': {reason}")]
    Dependency { id: String, reason: String },

    /// Rate limit exceeded or permission denied.
    #[error("policy violation for plugin '{plugin}': {reason}")]
    Policy { plugin: String, reason: String },

    /// The requested plugin is not registered.
    #[error("plugin '{plugin}' not found")]
    NotFound { plugin: String },

    /// The plugin has been unmounted; queued-but-undispatched requests land here.
    #[error("plugin '{plugin}' is gone")]
    PluginGone { plugin: String },

    /// A state-machine transition was attempted from a state that does not permit it.
    #[error("invalid transition for plugin '{plugin}': {from} -> {to}")]
    InvalidStateTransition {
        plugin: String,
        from: String,
        to: String,
    },

    /// A lifecycle operation exceeded its allotted time.
    #[error("operation timed out for plugin '{plugin}'")]
    OperationTimeout { plugin: String },

    /// I/O error underlying a filesystem or process operation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error that does not fit another kind.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> Self {
        PluginError::Config {
            plugin: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for PluginError {
    fn from(err: serde_yaml::Error) -> Self {
        PluginError::Config {
            plugin: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}

impl PluginError {
    /// The stable string code used to cross the IPC boundary and the administration surface.
    pub fn code(&self) -> &'static str {
        match self {
            PluginError::Config { .. } => "config",
            PluginError::IpcTimeout { .. } => "ipc_timeout",
            PluginError::IpcProtocol { .. } => "ipc_protocol",
            PluginError::ProcessDead { .. } => "process_dead",
            PluginError::PluginFailure { .. } => "plugin_failure",
            PluginError::Capacity { .. } => "capacity",
            PluginError::UnknownAction { .. } => "unknown_action",
            PluginError::Dependency { .. } => "dependency",
            PluginError::Policy { .. } => "policy",
            PluginError::NotFound { .. } => "not_found",
            PluginError::PluginGone { .. } => "plugin_gone",
            PluginError::InvalidStateTransition { .. } => "invalid_state",
            PluginError::OperationTimeout { .. } => "ipc_timeout",
            PluginError::Io(_) => "internal",
            PluginError::Internal(_) => "internal",
        }
    }
}
