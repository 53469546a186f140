//! # Plugin host core
//!
//! The hard core of a plugin host runtime: discovery, supervised lifecycle, an IPC
//! channel to sandboxed children, a service registry, a route-owning plugin manager,
//! and a hot-reload engine that swaps a plugin's running version while requests are in
//! flight.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use plugin_core::{PluginManager, ServiceRegistry};
//! use plugin_core::supervisor::{Supervisor, SupervisorConfig};
//! use plugin_core::isolation::ResourceMonitor;
//! use std::collections::HashMap;
//!
//! # async fn run() -> plugin_core::error::PluginResult<()> {
//! let registry = ServiceRegistry::new();
//! registry.seal();
//!
//! let manager = PluginManager::new();
//! let descriptor = plugin_core::descriptor::load("./plugins/calc".as_ref(), &HashMap::new())?;
//! let supervisor = Supervisor::new(descriptor, SupervisorConfig::default(), None, ResourceMonitor::new());
//! supervisor.start().await?;
//! manager.mount(supervisor)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Components
//!
//! - [`snapshot`] — content-hashed directory snapshot and diff
//! - [`descriptor`] — manifest parsing and validation, never executes plugin code
//! - [`ipc`] — framed JSON duplex over a child's stdio
//! - [`supervisor`] — per-plugin lifecycle, health, and restart policy
//! - [`registry`] — process-wide typed service lookup
//! - [`manager`] — route table and inter-plugin call routing
//! - [`reload`] — the watch-diff-plan-apply loop that drives hot reload

#![warn(missing_docs)]
#![allow(clippy::too_many_arguments)]

pub mod config;
pub mod demo;
pub mod descriptor;
pub mod error;
pub mod ipc;
pub mod isolation;
pub mod manager;
pub mod registry;
pub mod reload;
pub mod snapshot;
pub mod supervisor;
pub mod traits;

pub use config::HostConfig;
pub use error::{PluginError, PluginResult};
pub use manager::PluginManager;
pub use registry::{Capability, FilteredServiceView, ServiceRegistry};
pub use reload::{EntryResolver, ReloadConfig, ReloadEngine};
pub use snapshot::Snapshot;
pub use supervisor::{PluginState, Supervisor, SupervisorConfig, SupervisorStats, TrustedFactory};
pub use traits::{
    ActionError, ActionOutcome, ActionPayload, ExecutionMode, JobDescriptor, JobExecution,
    JobPriority, JobTrigger, Permission, PermissionEffect, Plugin, PluginDescriptor, RateLimit,
    ResourcePolicy,
};
