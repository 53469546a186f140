//! Watch loop: snapshot, diff, plan, apply (spec §4.H).
//!
//! Runs concurrently with request serving and never runs blocking plugin code itself —
//! each affected plugin's start/stop work is spawned as its own task, bounded by a small
//! concurrency cap, so one slow plugin never delays another's reload plan.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Semaphore;

use crate::descriptor;
use crate::error::PluginResult;
use crate::isolation::ResourceMonitor;
use crate::manager::PluginManager;
use crate::snapshot::Snapshot;
use crate::supervisor::{Supervisor, SupervisorConfig, TrustedFactory};

/// Resolves a descriptor's `entry` field to a constructor for trusted plugin instances.
/// Sandboxed plugins never need this — the worker binary resolves its own entry.
pub trait EntryResolver: Send + Sync {
    fn resolve_trusted(&self, entry: &str) -> Option<TrustedFactory>;
}

#[derive(Debug, Clone)]
pub struct ReloadConfig {
    pub scan_period: Duration,
    pub drain_grace: Duration,
    pub concurrency: usize,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            scan_period: Duration::from_secs(2),
            drain_grace: Duration::from_secs(5),
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Added,
    Removed,
    Modified,
}

/// The reload engine (spec §4.H). Owns the previous snapshot and drives the plugin
/// manager; the host composer spawns [`ReloadEngine::run`] as a background task.
pub struct ReloadEngine {
    plugin_root: PathBuf,
    config: ReloadConfig,
    manager: PluginManager,
    supervisor_config: SupervisorConfig,
    resource_monitor: ResourceMonitor,
    entry_resolver: Arc<dyn EntryResolver>,
    process_env: HashMap<String, String>,
    previous: RwLock<Snapshot>,
}

impl ReloadEngine {
    pub fn new(
        plugin_root: PathBuf,
        config: ReloadConfig,
        manager: PluginManager,
        supervisor_config: SupervisorConfig,
        resource_monitor: ResourceMonitor,
        entry_resolver: Arc<dyn EntryResolver>,
        process_env: HashMap<String, String>,
    ) -> Self {
        Self {
            plugin_root,
            config,
            manager,
            supervisor_config,
            resource_monitor,
            entry_resolver,
            process_env,
            previous: RwLock::new(Snapshot::default()),
        }
    }

    /// Load every plugin already present under the plugin root before serving traffic.
    /// Equivalent to the first tick of [`ReloadEngine::run`] but synchronous, so the host
    /// doesn't accept requests before its plugins are mounted.
    pub async fn bootstrap(&self) -> PluginResult<()> {
        self.tick().await
    }

    /// Force a stop-then-start reload of one plugin on demand, outside the scan loop —
    /// the administration surface's `POST /admin/plugins/:name/reload` (spec §6).
    pub async fn reload_plugin(&self, plugin_name: &str) -> PluginResult<()> {
        self.snapshot_ctx().reload(plugin_name).await
    }

    /// Unmount and stop one plugin on demand — the administration surface's
    /// `POST /admin/plugins/:name/stop` (spec §6).
    pub async fn stop_plugin(&self, plugin_name: &str) -> PluginResult<()> {
        match self.manager.unmount(plugin_name) {
            Some(supervisor) => supervisor.stop().await,
            None => Err(crate::error::PluginError::NotFound {
                plugin: plugin_name.to_string(),
            }),
        }
    }

    /// Run the scan loop forever (until the supplied token cancels it). Each tick is one
    /// take-diff-plan-apply cycle (spec §4.H Loop).
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.scan_period);
        interval.tick().await; // consume the immediate first tick; bootstrap() already ran one pass
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::warn!(error = %err, "reload tick failed; previous snapshot retained");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn tick(&self) -> PluginResult<()> {
        let new_snapshot = Snapshot::take(&self.plugin_root)?;
        let previous = self.previous.read().clone();
        let (added, removed, modified) = Snapshot::diff(&previous, &new_snapshot);

        if added.is_empty() && removed.is_empty() && modified.is_empty() {
            return Ok(());
        }

        let verdicts = self.group_by_plugin(&added, &removed, &modified);
        if verdicts.is_empty() {
            *self.previous.write() = new_snapshot;
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut handles = Vec::with_capacity(verdicts.len());
        for (plugin_name, verdict) in verdicts {
            let permit_pool = semaphore.clone();
            let this = self.snapshot_ctx();
            handles.push(tokio::spawn(async move {
                let _permit = permit_pool.acquire_owned().await.expect("semaphore closed");
                this.apply(&plugin_name, verdict).await
            }));
        }

        let mut all_ok = true;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    all_ok = false;
                    tracing::warn!(error = %err, "plugin reload plan failed");
                }
                Err(err) => {
                    all_ok = false;
                    tracing::warn!(error = %err, "reload task panicked");
                }
            }
        }

        // On full success replace the stored snapshot; a partial failure leaves the
        // previous snapshot in place so the affected plugin's change is retried next tick
        // (spec §4.H step 5). We still adopt the new snapshot for plugins whose file tree
        // didn't change at all, by only ever comparing byte-for-byte, so the next diff
        // naturally re-surfaces anything left unresolved.
        if all_ok {
            *self.previous.write() = new_snapshot;
        }
        Ok(())
    }

    /// Cheaply-cloneable view used inside the spawned per-plugin task.
    fn snapshot_ctx(&self) -> ReloadCtx {
        ReloadCtx {
            plugin_root: self.plugin_root.clone(),
            manager: self.manager.clone(),
            supervisor_config: self.supervisor_config.clone(),
            resource_monitor: self.resource_monitor.clone(),
            entry_resolver: self.entry_resolver.clone(),
            process_env: self.process_env.clone(),
            drain_grace: self.config.drain_grace,
        }
    }

    fn group_by_plugin(
        &self,
        added: &[PathBuf],
        removed: &[PathBuf],
        modified: &[PathBuf],
    ) -> HashMap<String, Verdict> {
        let mut per_plugin_added: HashSet<String> = HashSet::new();
        let mut per_plugin_removed: HashSet<String> = HashSet::new();
        let mut per_plugin_modified: HashSet<String> = HashSet::new();

        let top_level = |p: &PathBuf| -> Option<String> {
            p.components().next().map(|c| c.as_os_str().to_string_lossy().to_string())
        };

        for p in added {
            if let Some(name) = top_level(p) {
                per_plugin_added.insert(name);
            }
        }
        for p in removed {
            if let Some(name) = top_level(p) {
                per_plugin_removed.insert(name);
            }
        }
        for p in modified {
            if let Some(name) = top_level(p) {
                per_plugin_modified.insert(name);
            }
        }

        let mut verdicts = HashMap::new();
        let existing_plugins: HashSet<String> = self.manager.plugin_names().into_iter().collect();

        for name in per_plugin_removed {
            // A plugin directory is "removed" only if none of its files remain, i.e. it's
            // not also in `added` this same tick (which would mean some files were removed
            // and others added — treated as a modification instead).
            if per_plugin_added.contains(&name) {
                verdicts.insert(name, Verdict::Modified);
            } else if !self.plugin_dir_exists(&name) {
                verdicts.insert(name, Verdict::Removed);
            } else {
                verdicts.insert(name, Verdict::Modified);
            }
        }
        for name in per_plugin_added {
            verdicts.entry(name.clone()).or_insert_with(|| {
                if existing_plugins.contains(&name) {
                    Verdict::Modified
                } else {
                    Verdict::Added
                }
            });
        }
        for name in per_plugin_modified {
            verdicts.entry(name).or_insert(Verdict::Modified);
        }

        verdicts
    }

    fn plugin_dir_exists(&self, name: &str) -> bool {
        self.plugin_root.join(name).is_dir()
    }
}

/// Per-tick context handed to the spawned per-plugin task; everything here is cheap to
/// clone (`Arc`-backed handles).
struct ReloadCtx {
    plugin_root: PathBuf,
    manager: PluginManager,
    supervisor_config: SupervisorConfig,
    resource_monitor: ResourceMonitor,
    entry_resolver: Arc<dyn EntryResolver>,
    process_env: HashMap<String, String>,
    drain_grace: Duration,
}

impl ReloadCtx {
    async fn apply(&self, plugin_name: &str, verdict: Verdict) -> PluginResult<()> {
        match verdict {
            Verdict::Added => self.load_and_start(plugin_name).await,
            Verdict::Removed => {
                if let Some(old) = self.manager.unmount(plugin_name) {
                    old.stop().await?;
                }
                Ok(())
            }
            Verdict::Modified => self.reload(plugin_name).await,
        }
    }

    fn build_supervisor(
        &self,
        descriptor: crate::traits::PluginDescriptor,
    ) -> Supervisor {
        let factory = match descriptor.execution_mode {
            crate::traits::ExecutionMode::Trusted => self.entry_resolver.resolve_trusted(&descriptor.entry),
            crate::traits::ExecutionMode::Sandboxed => None,
        };
        Supervisor::new(descriptor, self.supervisor_config.clone(), factory, self.resource_monitor.clone())
    }

    async fn load_and_start(&self, plugin_name: &str) -> PluginResult<()> {
        let plugin_dir = self.plugin_root.join(plugin_name);
        let descriptor = descriptor::load(&plugin_dir, &self.process_env)?;
        let supervisor = self.build_supervisor(descriptor);

        match supervisor.start().await {
            Ok(()) => self.manager.mount(supervisor),
            Err(err) => {
                // Left in `failing` (spec §4.H Safety); registered but unmounted so
                // operators can still see it.
                self.manager.register_failing(supervisor);
                Err(err)
            }
        }
    }

    /// Stop-then-start with the new descriptor, draining the old instance in the
    /// background rather than blocking this plan on `drain_grace` (spec §4.H atomicity).
    async fn reload(&self, plugin_name: &str) -> PluginResult<()> {
        let plugin_dir = self.plugin_root.join(plugin_name);
        let descriptor = match descriptor::load(&plugin_dir, &self.process_env) {
            Ok(d) => d,
            Err(err) => {
                // Safety: a plugin whose descriptor fails to parse stays on its previous
                // version, left `failing`-equivalent only if it had none before.
                tracing::warn!(plugin = %plugin_name, error = %err, "reload: descriptor parse failed, keeping previous version");
                return Err(err);
            }
        };

        let new_supervisor = self.build_supervisor(descriptor);
        new_supervisor.start().await?;

        let old = self.manager.swap(new_supervisor)?;

        if let Some(old) = old {
            let drain_grace = self.drain_grace;
            tokio::spawn(async move {
                tokio::time::sleep(drain_grace).await;
                let _ = old.stop().await;
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::TrustedFactory;
    use crate::traits::{ActionOutcome, Plugin};
    use async_trait::async_trait;
    use std::fs;

    struct NoopPlugin;

    #[async_trait]
    impl Plugin for NoopPlugin {
        async fn on_load(&mut self) -> PluginResult<()> {
            Ok(())
        }
        async fn handle(&mut self, _action: &str, _payload: serde_json::Value) -> PluginResult<ActionOutcome> {
            Ok(ActionOutcome::success(serde_json::json!({})))
        }
        async fn on_unload(&mut self) -> PluginResult<()> {
            Ok(())
        }
    }

    struct AlwaysNoop;
    impl EntryResolver for AlwaysNoop {
        fn resolve_trusted(&self, _entry: &str) -> Option<TrustedFactory> {
            Some(Arc::new(|| Box::new(NoopPlugin) as Box<dyn Plugin>))
        }
    }

    fn write_plugin(root: &std::path::Path, name: &str, prefix: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("plugin.yaml"),
            format!(
                "name: {name}\nversion: 1.0.0\nexecution_mode: trusted\nentry: noop\nroute_prefix: {prefix}\n"
            ),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_bootstrap_mounts_existing_plugins() {
        let tmp = tempfile::tempdir().unwrap();
        write_plugin(tmp.path(), "calc", "/calc");

        let manager = PluginManager::new();
        let engine = ReloadEngine::new(
            tmp.path().to_path_buf(),
            ReloadConfig::default(),
            manager.clone(),
            SupervisorConfig::default(),
            ResourceMonitor::new(),
            Arc::new(AlwaysNoop),
            HashMap::new(),
        );

        engine.bootstrap().await.unwrap();
        assert_eq!(manager.resolve("/calc/add"), Some("calc".to_string()));
    }

    #[tokio::test]
    async fn test_tick_detects_added_plugin() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = PluginManager::new();
        let engine = ReloadEngine::new(
            tmp.path().to_path_buf(),
            ReloadConfig::default(),
            manager.clone(),
            SupervisorConfig::default(),
            ResourceMonitor::new(),
            Arc::new(AlwaysNoop),
            HashMap::new(),
        );
        engine.bootstrap().await.unwrap();
        assert!(manager.plugin_names().is_empty());

        write_plugin(tmp.path(), "calc", "/calc");
        engine.tick().await.unwrap();
        assert_eq!(manager.resolve("/calc/x"), Some("calc".to_string()));
    }

    #[tokio::test]
    async fn test_tick_detects_removed_plugin() {
        let tmp = tempfile::tempdir().unwrap();
        write_plugin(tmp.path(), "calc", "/calc");
        let manager = PluginManager::new();
        let engine = ReloadEngine::new(
            tmp.path().to_path_buf(),
            ReloadConfig::default(),
            manager.clone(),
            SupervisorConfig::default(),
            ResourceMonitor::new(),
            Arc::new(AlwaysNoop),
            HashMap::new(),
        );
        engine.bootstrap().await.unwrap();
        assert!(manager.resolve("/calc/x").is_some());

        fs::remove_dir_all(tmp.path().join("calc")).unwrap();
        engine.tick().await.unwrap();
        assert_eq!(manager.resolve("/calc/x"), None);
    }
}
