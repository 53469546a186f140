//! Plugin-wide orchestrator: mount/unmount routes, route calls, enumerate (spec §4.G).
//!
//! Route resolution is two-level: a route prefix resolves to an *instance id*, and a
//! plugin name resolves to its *current* instance id. The indirection is what makes a
//! reload atomic without a shadow-prefix reservation: the reload engine starts the new
//! instance, then swaps both maps under their write locks in one shot. Requests already
//! in flight hold an `Arc<Supervisor>` clone obtained from a lookup made before the swap,
//! so they keep running against the old instance purely through Rust's ownership — no
//! separate draining bookkeeping is needed (spec §4.H atomicity of a reload).
//!
//! Mounting a route does not by itself guarantee callers reach it: `resolve` and `call`
//! both check the current instance's live state and treat anything other than `running`
//! as absent, reaping the stale prefix out of the route table when they notice. A crash
//! or a terminal restart-budget failure therefore removes a plugin's route the moment
//! something looks it up, without the supervisor needing a separate notification path
//! back into this manager (spec §8: "route prefix appears in the route table iff its
//! state ∈ {running}").

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{PluginError, PluginResult};
use crate::supervisor::{PluginState, Supervisor, SupervisorStats};
use crate::traits::{ActionOutcome, PluginDescriptor};

type InstanceId = Uuid;

/// The plugin-wide orchestrator (spec §4.G).
#[derive(Clone)]
pub struct PluginManager {
    instances: Arc<DashMap<InstanceId, Arc<Supervisor>>>,
    current: Arc<DashMap<String, InstanceId>>,
    routes: Arc<RwLock<Arc<HashMap<String, InstanceId>>>>,
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginManager {
    pub fn new() -> Self {
        Self {
            instances: Arc::new(DashMap::new()),
            current: Arc::new(DashMap::new()),
            routes: Arc::new(RwLock::new(Arc::new(HashMap::new()))),
        }
    }

    /// Mount a brand-new plugin (no prior instance). Fails outright, with nothing
    /// registered, if the route prefix is already taken by another plugin (spec §4.G Mount).
    pub fn mount(&self, supervisor: Supervisor) -> PluginResult<()> {
        let descriptor = supervisor.descriptor().clone();
        if self.current.contains_key(&descriptor.name) {
            return Err(PluginError::Config {
                plugin: descriptor.name.clone(),
                reason: "plugin is already mounted; use reload instead".to_string(),
            });
        }

        let id = Uuid::new_v4();
        {
            let guard = self.routes.read();
            if guard.contains_key(&descriptor.route_prefix) {
                return Err(PluginError::Config {
                    plugin: descriptor.name.clone(),
                    reason: format!("route prefix '{}' is already mounted", descriptor.route_prefix),
                });
            }
        }

        self.instances.insert(id, Arc::new(supervisor));
        {
            let mut guard = self.routes.write();
            if guard.contains_key(&descriptor.route_prefix) {
                self.instances.remove(&id);
                return Err(PluginError::Config {
                    plugin: descriptor.name.clone(),
                    reason: format!("route prefix '{}' is already mounted", descriptor.route_prefix),
                });
            }
            let mut next = (**guard).clone();
            next.insert(descriptor.route_prefix.clone(), id);
            *guard = Arc::new(next);
        }
        self.current.insert(descriptor.name.clone(), id);
        Ok(())
    }

    /// Register a supervisor that failed to start without mounting its route, so the
    /// administration surface can still see it in `failing`/`stopped` state (spec §4.G:
    /// "the plugin is marked failing").
    pub fn register_failing(&self, supervisor: Supervisor) {
        let name = supervisor.descriptor().name.clone();
        let id = Uuid::new_v4();
        self.instances.insert(id, Arc::new(supervisor));
        self.current.insert(name, id);
    }

    /// Replace the currently mounted instance for `descriptor.name` with a freshly started
    /// `new_supervisor`, atomically retargeting the route prefix. Returns the old instance
    /// (if any) so the caller can stop it after a drain grace — it keeps serving in-flight
    /// requests on its own `Arc` in the meantime (spec §4.H).
    pub fn swap(&self, new_supervisor: Supervisor) -> PluginResult<Option<Arc<Supervisor>>> {
        let descriptor = new_supervisor.descriptor().clone();
        let new_id = Uuid::new_v4();

        let old_id = self.current.get(&descriptor.name).map(|e| *e.value());
        let old_prefix = old_id.and_then(|id| self.instances.get(&id).map(|s| s.descriptor().route_prefix.clone()));

        // If the route prefix changed across versions (unusual, but not forbidden), make
        // sure the new prefix isn't already owned by a *different* plugin.
        if old_prefix.as_deref() != Some(descriptor.route_prefix.as_str()) {
            let guard = self.routes.read();
            if let Some(owner_id) = guard.get(&descriptor.route_prefix) {
                if Some(*owner_id) != old_id {
                    return Err(PluginError::Config {
                        plugin: descriptor.name.clone(),
                        reason: format!("route prefix '{}' is already mounted", descriptor.route_prefix),
                    });
                }
            }
        }

        self.instances.insert(new_id, Arc::new(new_supervisor));

        {
            let mut guard = self.routes.write();
            let mut next = (**guard).clone();
            if let Some(prefix) = &old_prefix {
                if prefix != &descriptor.route_prefix {
                    next.remove(prefix);
                }
            }
            next.insert(descriptor.route_prefix.clone(), new_id);
            *guard = Arc::new(next);
        }
        self.current.insert(descriptor.name.clone(), new_id);

        let old = old_id.and_then(|id| self.instances.remove(&id)).map(|(_, v)| v);
        Ok(old)
    }

    /// Remove `plugin`'s route and current-instance entry; returns the instance the caller
    /// should stop. In-flight calls already holding the `Arc` keep draining naturally
    /// (spec §4.G Unmount).
    pub fn unmount(&self, plugin: &str) -> Option<Arc<Supervisor>> {
        let id = self.current.remove(plugin).map(|(_, v)| v)?;
        let prefix = self.instances.get(&id).map(|s| s.descriptor().route_prefix.clone());
        if let Some(prefix) = prefix {
            let mut guard = self.routes.write();
            if guard.get(&prefix) == Some(&id) {
                let mut next = (**guard).clone();
                next.remove(&prefix);
                *guard = Arc::new(next);
            }
        }
        self.instances.remove(&id).map(|(_, v)| v)
    }

    /// Resolve an HTTP request path to the plugin mounted at the longest matching prefix.
    /// Returns `None` — translated to `plugin_gone` by the caller — if nothing matches or
    /// if the matching instance is no longer `running` (a crash can leave a stale route
    /// entry behind between health-loop ticks; this is where it gets noticed and dropped,
    /// per spec §8's "route prefix appears in the route table iff its state ∈ {running}").
    pub fn resolve(&self, path: &str) -> Option<String> {
        let routes = self.routes.read().clone();
        let (prefix, id) = routes
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(prefix, id)| (prefix.clone(), *id))?;

        if !self.is_running(&id) {
            self.reap_stale_route(&prefix, id);
            return None;
        }
        self.instances.get(&id).map(|s| s.descriptor().name.clone())
    }

    /// Route a message to a plugin by name, regardless of HTTP mounting — used for
    /// inter-plugin calls and the administration surface (spec §4.G Call).
    pub async fn call(
        &self,
        plugin: &str,
        action: &str,
        payload: serde_json::Value,
    ) -> PluginResult<ActionOutcome> {
        let supervisor = self.current_instance(plugin).ok_or_else(|| PluginError::PluginGone {
            plugin: plugin.to_string(),
        })?;

        if !matches!(supervisor.state(), PluginState::Running) {
            if let Some(id) = self.current.get(plugin).map(|e| *e.value()) {
                self.reap_stale_route(&supervisor.descriptor().route_prefix, id);
            }
            return Err(PluginError::PluginGone {
                plugin: plugin.to_string(),
            });
        }

        supervisor.call(action, payload).await
    }

    fn is_running(&self, id: &InstanceId) -> bool {
        self.instances
            .get(id)
            .map(|s| matches!(s.state(), PluginState::Running))
            .unwrap_or(false)
    }

    /// Remove `prefix` from the route table if it still points at `id` — a crashed or
    /// terminally failed plugin's route disappears the next time anything looks it up,
    /// rather than lingering until an explicit `unmount`.
    fn reap_stale_route(&self, prefix: &str, id: InstanceId) {
        let mut guard = self.routes.write();
        if guard.get(prefix) == Some(&id) {
            let mut next = (**guard).clone();
            next.remove(prefix);
            *guard = Arc::new(next);
        }
    }

    fn current_instance(&self, plugin: &str) -> Option<Arc<Supervisor>> {
        let id = *self.current.get(plugin)?.value();
        self.instances.get(&id).map(|s| s.clone())
    }

    pub fn get(&self, plugin: &str) -> Option<Arc<Supervisor>> {
        self.current_instance(plugin)
    }

    pub fn descriptor(&self, plugin: &str) -> Option<PluginDescriptor> {
        self.current_instance(plugin).map(|s| s.descriptor().clone())
    }

    /// One plugin's statistics, for `GET /admin/plugins/:name` (spec §6).
    pub fn stats_for(&self, plugin: &str) -> Option<SupervisorStats> {
        self.current_instance(plugin).map(|s| s.stats())
    }

    /// List every registered plugin with its current state and statistics (spec §4.G
    /// Enumeration).
    pub fn list(&self) -> Vec<SupervisorStats> {
        self.current
            .iter()
            .filter_map(|e| self.instances.get(e.value()).map(|s| s.stats()))
            .collect()
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.current.iter().map(|e| e.key().clone()).collect()
    }

    /// Count of prefixes currently routable to a `running` instance. Computed live rather
    /// than cached, so it reflects a crash or terminal failure immediately even if nothing
    /// has called `resolve`/`call` yet to reap the stale entry out of the underlying map.
    pub fn route_count(&self) -> usize {
        self.routes.read().iter().filter(|(_, id)| self.is_running(id)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::ResourceMonitor;
    use crate::supervisor::SupervisorConfig;
    use crate::traits::{ActionOutcome, ExecutionMode, Plugin, PluginDescriptor, ResourcePolicy};
    use async_trait::async_trait;

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

    fn descriptor(name: &str, prefix: &str) -> PluginDescriptor {
        PluginDescriptor {
            name: name.to_string(),
            version: semver::Version::new(1, 0, 0),
            author: None,
            execution_mode: ExecutionMode::Trusted,
            entry: "noop".to_string(),
            route_prefix: prefix.to_string(),
            tags: vec![],
            resources: ResourcePolicy::default(),
            required_services: vec![],
            permissions: vec![],
            env: Default::default(),
            jobs: vec![],
        }
    }

    /// A mounted supervisor only counts toward routing once it's actually `running`, so
    /// tests build one the same way production code does: construct, then `start`.
    async fn running_supervisor(name: &str, prefix: &str) -> Supervisor {
        let supervisor = Supervisor::new(
            descriptor(name, prefix),
            SupervisorConfig::default(),
            Some(Arc::new(|| Box::new(NoopPlugin) as Box<dyn Plugin>)),
            ResourceMonitor::new(),
        );
        supervisor.start().await.unwrap();
        supervisor
    }

    #[tokio::test]
    async fn test_mount_conflict_rejected() {
        let manager = PluginManager::new();
        assert!(manager.mount(running_supervisor("a", "/shared").await).is_ok());
        assert!(manager.mount(running_supervisor("b", "/shared").await).is_err());
        assert_eq!(manager.route_count(), 1);
    }

    #[tokio::test]
    async fn test_mount_unmount_mount_round_trip() {
        let manager = PluginManager::new();
        manager.mount(running_supervisor("a", "/a").await).unwrap();
        assert_eq!(manager.resolve("/a/foo"), Some("a".to_string()));

        manager.unmount("a");
        assert_eq!(manager.resolve("/a/foo"), None);

        manager.mount(running_supervisor("a", "/a").await).unwrap();
        assert_eq!(manager.resolve("/a/foo"), Some("a".to_string()));
        assert_eq!(manager.route_count(), 1);
    }

    #[tokio::test]
    async fn test_longest_prefix_wins() {
        let manager = PluginManager::new();
        manager.mount(running_supervisor("root", "/api").await).unwrap();
        manager.mount(running_supervisor("nested", "/api/v2").await).unwrap();
        assert_eq!(manager.resolve("/api/v2/things"), Some("nested".to_string()));
        assert_eq!(manager.resolve("/api/v1/things"), Some("root".to_string()));
    }

    #[tokio::test]
    async fn test_swap_keeps_old_instance_alive_for_caller() {
        let manager = PluginManager::new();
        manager.mount(running_supervisor("a", "/a").await).unwrap();
        let old = manager.get("a").unwrap();

        let old_returned = manager.swap(running_supervisor("a", "/a").await).unwrap();
        assert!(old_returned.is_some());
        assert!(Arc::ptr_eq(&old, &old_returned.unwrap()));
        assert_eq!(manager.route_count(), 1);

        let new = manager.get("a").unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
    }

    #[tokio::test]
    async fn test_resolve_drops_route_for_non_running_instance() {
        let manager = PluginManager::new();
        let supervisor = running_supervisor("flaky", "/flaky").await;
        manager.mount(supervisor).unwrap();
        assert_eq!(manager.resolve("/flaky/x"), Some("flaky".to_string()));

        // Simulate the supervisor transitioning out of `running` (a crash, or a restart
        // budget exhausted) without going through `unmount`.
        manager.get("flaky").unwrap().stop().await.unwrap();

        assert_eq!(manager.resolve("/flaky/x"), None);
        assert_eq!(manager.route_count(), 0);
    }

    #[tokio::test]
    async fn test_call_reports_plugin_gone_for_non_running_instance() {
        let manager = PluginManager::new();
        let supervisor = running_supervisor("flaky", "/flaky").await;
        manager.mount(supervisor).unwrap();

        manager.get("flaky").unwrap().stop().await.unwrap();

        let err = manager.call("flaky", "noop", serde_json::Value::Null).await;
        assert!(matches!(err, Err(PluginError::PluginGone { .. })));
    }
}
