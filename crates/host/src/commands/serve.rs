use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use plugin_core::isolation::ResourceMonitor;
use plugin_core::reload::ReloadConfig;
use plugin_core::supervisor::SupervisorConfig;
use plugin_core::{HostConfig, PluginManager, ReloadEngine, ServiceRegistry};
use scheduler_core::Scheduler;

use super::utils::{info as print_info, success};
use super::HostExit;
use crate::resolver::BuiltinEntryResolver;
use crate::runner::PluginManagerJobRunner;

#[derive(Parser)]
pub struct ServeArgs {
    /// Plugin root directory, overriding `PLUGHOST_PLUGIN_ROOT`
    #[arg(long)]
    pub plugin_root: Option<std::path::PathBuf>,

    /// Admin surface bind address, overriding `PLUGHOST_ADMIN_BIND`
    #[arg(long)]
    pub admin_bind: Option<String>,
}

/// The composition root: boots the plugin root, the scheduler, and the admin surface
/// together, then blocks until `ctrl_c` (spec §2.1: "wires the service registry, plugin
/// manager, scheduler, and administration surface together and owns the tokio runtime's
/// main").
pub async fn execute(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = HostConfig::from_env().map_err(|err| HostExit::config(err.to_string()))?;
    if let Some(root) = args.plugin_root {
        config.plugin_root = root;
    }
    if let Some(bind) = args.admin_bind {
        config.admin_bind = bind;
    }

    print_info(&format!("plugin root: {}", config.plugin_root.display()));
    print_info(&format!("admin surface: {}", config.admin_bind));

    let registry = ServiceRegistry::new();
    // No database/cache capabilities are configured by default; a deployment wires
    // those in before `seal()` if any plugin's `required_services` needs them.
    registry.seal();

    let manager = PluginManager::new();
    let resource_monitor = ResourceMonitor::new();

    let reload = Arc::new(ReloadEngine::new(
        config.plugin_root.clone(),
        ReloadConfig {
            scan_period: config.scan_period,
            drain_grace: config.shutdown_grace,
            concurrency: 4,
        },
        manager.clone(),
        SupervisorConfig {
            startup_grace: config.startup_grace,
            shutdown_grace: config.shutdown_grace,
            ipc_queue_capacity: config.ipc_queue_capacity,
            max_parallel_requests: config.max_parallel_requests,
            ..SupervisorConfig::default()
        },
        resource_monitor,
        Arc::new(BuiltinEntryResolver),
        std::env::vars().collect::<HashMap<_, _>>(),
    ));

    reload.bootstrap().await.map_err(|err| HostExit::runtime(err.to_string()))?;
    print_info(&format!("loaded {} plugin(s)", manager.plugin_names().len()));

    let job_runner = Arc::new(PluginManagerJobRunner::new(manager.clone()));
    let scheduler = Arc::new(
        Scheduler::new(job_runner, &config.timezone, 4).map_err(|err| HostExit::config(err.to_string()))?,
    );

    for plugin in manager.plugin_names() {
        if let Some(descriptor) = manager.descriptor(&plugin) {
            for job in descriptor.jobs {
                scheduler
                    .register(&plugin, job)
                    .map_err(|err| HostExit::runtime(err.to_string()))?;
            }
        }
    }

    // The `scheduler` capability is re-entrant (spec §4.F), so registering it after
    // `seal()` is allowed.
    registry.register("scheduler", scheduler.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let reload_task = {
        let reload = reload.clone();
        tokio::spawn(async move { reload.run(shutdown_rx).await })
    };

    let scheduler_task = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(std::time::Duration::from_millis(500)).await })
    };

    let admin_config = admin_server::ServerConfig::default()
        .with_bind_addr(&config.admin_bind)
        .map_err(HostExit::config)?;
    admin_config.validate().map_err(HostExit::config)?;
    let admin_state = admin_server::AppState::new(admin_config.clone(), manager.clone(), reload.clone(), scheduler.clone());

    let admin_task = tokio::spawn(async move {
        if let Err(err) = admin_server::serve(admin_config, admin_state).await {
            tracing::error!(error = %err, "admin server exited");
        }
    });

    success("host runtime started");
    info!("press ctrl-c to shut down");

    tokio::signal::ctrl_c().await?;
    print_info("shutting down...");

    let _ = shutdown_tx.send(true);
    let _ = reload_task.await;
    admin_task.abort();

    scheduler.shutdown(config.shutdown_grace).await;
    scheduler_task.abort();

    for plugin in manager.plugin_names() {
        if let Err(err) = reload.stop_plugin(&plugin).await {
            tracing::warn!(plugin = %plugin, error = %err, "error stopping plugin during shutdown");
        }
    }

    success("host runtime stopped");
    Ok(())
}
