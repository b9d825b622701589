//! Service container with singleton, session, and transient scopes
//!
//! Services are stored type-erased; the conventional payload for a pipeline
//! port is an `Arc<dyn Trait>`, so resolution clones the handle out of the
//! cache. Session-scoped instances are cached under the composite key
//! `"{session_id}:{name}"` and evicted wholesale by `cleanup_session`.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::RuntimeError;

type AnyService = Arc<dyn Any + Send + Sync>;
type SingletonFactory = Arc<dyn Fn() -> Result<AnyService, RuntimeError> + Send + Sync>;
type SessionFactory = Arc<dyn Fn(&str) -> Result<AnyService, RuntimeError> + Send + Sync>;
type TransientFactory =
    Arc<dyn Fn(serde_json::Value) -> Result<AnyService, RuntimeError> + Send + Sync>;

/// Scoped service registry
#[derive(Default)]
pub struct DiContainer {
    singleton_factories: RwLock<HashMap<String, SingletonFactory>>,
    session_factories: RwLock<HashMap<String, SessionFactory>>,
    transient_factories: RwLock<HashMap<String, TransientFactory>>,
    /// Lazily constructed singletons, keyed by name
    singletons: DashMap<String, AnyService>,
    /// Session instances, keyed by `"{session_id}:{name}"`
    session_cache: DashMap<String, AnyService>,
}

impl DiContainer {
    pub fn new() -> Self {
        Self::default()
    }

    fn session_key(session_id: &str, name: &str) -> String {
        format!("{}:{}", session_id, name)
    }

    /// Register a process-wide service factory
    pub fn register_singleton<T, F>(&self, name: impl Into<String>, factory: F)
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> voice_fleet_core::Result<T> + Send + Sync + 'static,
    {
        let name = name.into();
        let factory_name = name.clone();
        self.singleton_factories.write().insert(
            name,
            Arc::new(move || {
                factory()
                    .map(|v| Arc::new(v) as AnyService)
                    .map_err(|source| RuntimeError::Factory {
                        name: factory_name.clone(),
                        source,
                    })
            }),
        );
    }

    /// Register a per-session service factory
    pub fn register_session<T, F>(&self, name: impl Into<String>, factory: F)
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&str) -> voice_fleet_core::Result<T> + Send + Sync + 'static,
    {
        let name = name.into();
        let factory_name = name.clone();
        self.session_factories.write().insert(
            name,
            Arc::new(move |session_id| {
                factory(session_id)
                    .map(|v| Arc::new(v) as AnyService)
                    .map_err(|source| RuntimeError::Factory {
                        name: factory_name.clone(),
                        source,
                    })
            }),
        );
    }

    /// Register a per-call service factory
    pub fn register_transient<T, F>(&self, name: impl Into<String>, factory: F)
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(serde_json::Value) -> voice_fleet_core::Result<T> + Send + Sync + 'static,
    {
        let name = name.into();
        let factory_name = name.clone();
        self.transient_factories.write().insert(
            name,
            Arc::new(move |args| {
                factory(args)
                    .map(|v| Arc::new(v) as AnyService)
                    .map_err(|source| RuntimeError::Factory {
                        name: factory_name.clone(),
                        source,
                    })
            }),
        );
    }

    /// Resolve a singleton, constructing it on first use
    pub fn resolve<T>(&self, name: &str) -> Result<T, RuntimeError>
    where
        T: Clone + Send + Sync + 'static,
    {
        if let Some(hit) = self.singletons.get(name) {
            return Self::downcast(name, hit.value().clone());
        }
        let factory = self
            .singleton_factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::NotRegistered(name.to_string()))?;
        let instance = factory()?;
        // A racing resolve may have inserted first; keep whichever is cached.
        let cached = self
            .singletons
            .entry(name.to_string())
            .or_insert(instance)
            .value()
            .clone();
        Self::downcast(name, cached)
    }

    /// Resolve a session-scoped service, constructing and caching on first use
    pub fn resolve_session<T>(&self, session_id: &str, name: &str) -> Result<T, RuntimeError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let key = Self::session_key(session_id, name);
        if let Some(hit) = self.session_cache.get(&key) {
            return Self::downcast(name, hit.value().clone());
        }
        let factory = self
            .session_factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::NotRegistered(name.to_string()))?;
        let instance = factory(session_id)?;
        let cached = self
            .session_cache
            .entry(key)
            .or_insert(instance)
            .value()
            .clone();
        Self::downcast(name, cached)
    }

    /// Resolve a transient service with caller-supplied arguments
    pub fn resolve_transient<T>(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<T, RuntimeError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let factory = self
            .transient_factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::NotRegistered(name.to_string()))?;
        Self::downcast(name, factory(args)?)
    }

    /// Atomically replace a cached session entry (provider hot-swap)
    pub fn update_session_service<T>(&self, session_id: &str, name: &str, service: T)
    where
        T: Clone + Send + Sync + 'static,
    {
        let key = Self::session_key(session_id, name);
        self.session_cache.insert(key, Arc::new(service));
    }

    /// Drop one cached session entry so the next resolve rebuilds it
    pub fn invalidate_session_service(&self, session_id: &str, name: &str) -> bool {
        self.session_cache
            .remove(&Self::session_key(session_id, name))
            .is_some()
    }

    /// Drop every cached entry belonging to a session; returns how many
    pub fn cleanup_session(&self, session_id: &str) -> usize {
        let prefix = format!("{}:", session_id);
        let before = self.session_cache.len();
        self.session_cache.retain(|key, _| !key.starts_with(&prefix));
        before - self.session_cache.len()
    }

    /// Cached session entry count (diagnostics and tests)
    pub fn session_entry_count(&self, session_id: &str) -> usize {
        let prefix = format!("{}:", session_id);
        self.session_cache
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .count()
    }

    fn downcast<T>(name: &str, any: AnyService) -> Result<T, RuntimeError>
    where
        T: Clone + Send + Sync + 'static,
    {
        any.downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| RuntimeError::TypeMismatch {
                name: name.to_string(),
            })
    }
}
