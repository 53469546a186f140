//! Process-wide service registry: typed lookup of shared collaborators (spec §4.F).
//!
//! Immutable after boot except for the `scheduler` key, which is re-entrant (a running
//! scheduler handle may be replaced, e.g. across a test harness instantiating the host
//! twice in the same process per spec §9 "Global state").

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{PluginError, PluginResult};

/// A type-erased capability object, looked up by string key (`db.<name>`, `cache`,
/// `scheduler`, `ext.<name>`).
pub type Capability = Arc<dyn Any + Send + Sync>;

/// The process-wide map from service key to capability.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: Arc<RwLock<HashMap<String, Capability>>>,
    sealed: Arc<std::sync::atomic::AtomicBool>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service under `key`. Panics if called after [`ServiceRegistry::seal`]
    /// for any key other than `scheduler`, which stays re-entrant per spec §4.F.
    pub fn register<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        let key = key.into();
        if self.sealed.load(std::sync::atomic::Ordering::SeqCst) && key != "scheduler" {
            panic!("service registry is sealed: cannot register '{key}' after boot");
        }
        self.services.write().insert(key, Arc::new(value));
    }

    /// Seal the registry: called once by the host composer after every service has been
    /// registered and before any plugin starts (spec §4.F).
    pub fn seal(&self) {
        self.sealed.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.services
            .read()
            .get(key)
            .and_then(|v| v.clone().downcast::<T>().ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.services.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.services.read().keys().cloned().collect()
    }

    /// A view of the registry that only exposes the keys a plugin declared in
    /// `required_services` (spec §4.F: "the supervisor passes a filtered view that hides
    /// services the plugin did not declare").
    pub fn filtered_view(&self, required: &[String]) -> FilteredServiceView {
        FilteredServiceView {
            registry: self.clone(),
            allowed: required.iter().cloned().collect(),
        }
    }
}

/// A per-plugin restricted view over the registry.
#[derive(Clone)]
pub struct FilteredServiceView {
    registry: ServiceRegistry,
    allowed: std::collections::HashSet<String>,
}

impl FilteredServiceView {
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> PluginResult<Option<Arc<T>>> {
        if !self.allowed.contains(key) {
            return Err(PluginError::Policy {
                plugin: "unknown".to_string(),
                reason: format!("service '{key}' was not declared in required_services"),
            });
        }
        Ok(self.registry.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let registry = ServiceRegistry::new();
        registry.register("cache", 42i32);
        assert_eq!(*registry.get::<i32>("cache").unwrap(), 42);
        assert!(registry.get::<String>("cache").is_none());
    }

    #[test]
    fn test_filtered_view_hides_undeclared() {
        let registry = ServiceRegistry::new();
        registry.register("db.primary", "conn".to_string());
        registry.register("cache", "redis".to_string());

        let view = registry.filtered_view(&["db.primary".to_string()]);
        assert!(view.get::<String>("db.primary").unwrap().is_some());
        assert!(view.get::<String>("cache").is_err());
    }

    #[test]
    #[should_panic(expected = "sealed")]
    fn test_sealed_registry_rejects_late_register() {
        let registry = ServiceRegistry::new();
        registry.seal();
        registry.register("late", 1i32);
    }

    #[test]
    fn test_scheduler_key_reentrant_after_seal() {
        let registry = ServiceRegistry::new();
        registry.seal();
        registry.register("scheduler", 1i32);
        registry.register("scheduler", 2i32);
        assert_eq!(*registry.get::<i32>("scheduler").unwrap(), 2);
    }
}
