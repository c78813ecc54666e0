//! The Implementation Registry of spec §4.4: "given a service name and
//! method name, invoke the method with arguments and return a result or
//! error" — the contract through which this crate talks to embedder-
//! provided service implementations (spec §1: the only boundary it
//! crosses into application code).
//!
//! There is no runtime reflection in Rust, so a "service implementation"
//! here is a type-erased instance plus a table of method handlers that
//! know how to call into it; the embedder builds both at registration
//! time (spec §9: "a single generic dispatcher driven by a reflection-
//! like registry").

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::mesh::collections::HashMap;
use crate::mesh::communication::ScopeId;
use crate::mesh::error::{Error, ErrorKind, Result};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
/// A type-erased service implementation instance.
pub type Instance = Arc<dyn Any + Send + Sync>;
/// Invokes one method on a resolved instance with serialized arguments,
/// returning the serialized result (spec §4.5 step 2-4, run in reverse on
/// the serving side).
pub type MethodHandler =
    Arc<dyn Fn(Instance, Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>>> + Send + Sync>;
/// Builds a fresh instance of a service implementation.
pub type Factory = Arc<dyn Fn() -> Instance + Send + Sync>;

/// One method on a service (spec §3 "Service descriptor"): name, ordered
/// parameter types, and return type, carried for documentation/advertising
/// purposes — dispatch itself goes through the type-erased [`MethodHandler`].
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub name: String,
    pub param_types: Vec<String>,
    pub return_type: Option<String>,
}

/// A service's immutable name and method set (spec §3).
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub name: String,
    pub methods: Vec<MethodDescriptor>,
}

/// Instance lifetime policy (spec §4.4).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Lifetime {
    /// One instance, created on first resolution, shared forever.
    Singleton,
    /// One instance per `ScopeId`, held weakly and created on demand.
    Scoped,
    /// A fresh instance on every resolution.
    Transient,
}

struct ServiceEntry {
    descriptor: ServiceDescriptor,
    lifetime: Lifetime,
    factory: Factory,
    handlers: HashMap<String, MethodHandler>,
    singleton: Mutex<Option<Instance>>,
    scoped: DashMap<ScopeId, Weak<dyn Any + Send + Sync>>,
}

impl ServiceEntry {
    fn resolve(&self, scope: Option<ScopeId>) -> Instance {
        match self.lifetime {
            Lifetime::Transient => (self.factory)(),
            Lifetime::Singleton => {
                let mut slot = self.singleton.lock();
                slot.get_or_insert_with(|| (self.factory)()).clone()
            }
            Lifetime::Scoped => {
                let scope = scope.unwrap_or(ScopeId::from(0));
                if let Some(existing) = self.scoped.get(&scope).and_then(|w| w.upgrade()) {
                    return existing;
                }
                let instance = (self.factory)();
                self.scoped.insert(scope, Arc::downgrade(&instance));
                instance
            }
        }
    }

    /// Drops scoped entries whose weak reference no longer upgrades (spec
    /// §4.4: "eligible for eviction and must be swept asynchronously").
    fn sweep(&self) {
        if self.lifetime != Lifetime::Scoped {
            return;
        }
        self.scoped.retain(|_, weak| weak.strong_count() > 0);
    }
}

/// Holds every service implementation this node hosts locally.
pub struct ImplementationRegistry {
    services: DashMap<String, ServiceEntry>,
}

impl ImplementationRegistry {
    pub fn new() -> Self {
        ImplementationRegistry { services: DashMap::new() }
    }

    /// Registers a local service implementation. `handlers` must cover
    /// every method named in `descriptor`; methods missing a handler
    /// simply can never be dispatched to (caught at [`Self::invoke`] time
    /// as `BadProcedure`, not at registration time, since catching it here
    /// would require parsing the descriptor's own method list as ground
    /// truth rather than the handler table).
    pub fn register(
        &self,
        descriptor: ServiceDescriptor,
        lifetime: Lifetime,
        factory: Factory,
        handlers: HashMap<String, MethodHandler>,
    ) {
        let name = descriptor.name.clone();
        self.services.insert(
            name,
            ServiceEntry {
                descriptor,
                lifetime,
                factory,
                handlers,
                singleton: Mutex::new(None),
                scoped: DashMap::new(),
            },
        );
    }

    /// The payload of the initial catalogue exchange (spec §4.4, §6.3).
    pub fn iterate_service_names(&self) -> Vec<String> {
        self.services.iter().map(|e| e.key().clone()).collect()
    }

    pub fn contains(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    pub fn descriptor(&self, service: &str) -> Option<ServiceDescriptor> {
        self.services.get(service).map(|e| e.descriptor.clone())
    }

    /// Resolves an instance and invokes `method` on it with `args` (spec
    /// §4.4, §4.9 step 2). `BadProcedure` if the service or method is
    /// unknown here.
    pub async fn invoke(
        &self,
        service: &str,
        method: &str,
        scope: Option<ScopeId>,
        args: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let (instance, handler) = {
            let entry = self
                .services
                .get(service)
                .ok_or_else(|| Error::simple(ErrorKind::BadProcedure))?;
            let handler = entry
                .handlers
                .get(method)
                .cloned()
                .ok_or_else(|| Error::simple(ErrorKind::BadProcedure))?;
            (entry.resolve(scope), handler)
        };
        handler(instance, args).await
    }

    /// Removes dead weak references from every scoped service's instance
    /// table (spec §4.4, §5 "sweeper"). Intended to be called periodically
    /// by a task spawned alongside the owning `Runtime`.
    pub fn sweep_scoped(&self) {
        for entry in self.services.iter() {
            entry.sweep();
        }
    }
}

impl Default for ImplementationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::collections::hash_map;

    struct Echo;

    fn echo_descriptor() -> ServiceDescriptor {
        ServiceDescriptor {
            name: "Echo".into(),
            methods: vec![MethodDescriptor {
                name: "ping".into(),
                param_types: vec!["String".into()],
                return_type: Some("String".into()),
            }],
        }
    }

    fn echo_handlers() -> HashMap<String, MethodHandler> {
        let mut handlers = hash_map();
        handlers.insert(
            "ping".to_string(),
            Arc::new(|_instance: Instance, args: Vec<u8>| -> BoxFuture<'static, Result<Vec<u8>>> {
                Box::pin(async move { Ok(args) })
            }) as MethodHandler,
        );
        handlers
    }

    #[tokio::test]
    async fn invokes_registered_method() {
        let registry = ImplementationRegistry::new();
        registry.register(
            echo_descriptor(),
            Lifetime::Singleton,
            Arc::new(|| Arc::new(Echo) as Instance),
            echo_handlers(),
        );

        let result = registry.invoke("Echo", "ping", None, b"hi".to_vec()).await.unwrap();
        assert_eq!(result, b"hi");
    }

    #[tokio::test]
    async fn unknown_service_is_bad_procedure() {
        let registry = ImplementationRegistry::new();
        let err = registry.invoke("Nope", "ping", None, vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadProcedure);
    }

    #[tokio::test]
    async fn unknown_method_is_bad_procedure() {
        let registry = ImplementationRegistry::new();
        registry.register(
            echo_descriptor(),
            Lifetime::Singleton,
            Arc::new(|| Arc::new(Echo) as Instance),
            echo_handlers(),
        );
        let err = registry.invoke("Echo", "nope", None, vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadProcedure);
    }

    #[test]
    fn singleton_resolves_to_same_instance() {
        let registry = ImplementationRegistry::new();
        registry.register(
            echo_descriptor(),
            Lifetime::Singleton,
            Arc::new(|| Arc::new(Echo) as Instance),
            echo_handlers(),
        );
        let entry = registry.services.get("Echo").unwrap();
        let a = entry.resolve(None);
        let b = entry.resolve(None);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn scoped_instances_are_swept_once_dropped() {
        let registry = ImplementationRegistry::new();
        registry.register(
            echo_descriptor(),
            Lifetime::Scoped,
            Arc::new(|| Arc::new(Echo) as Instance),
            echo_handlers(),
        );
        let entry = registry.services.get("Echo").unwrap();
        let scope = ScopeId::from(1);
        let instance = entry.resolve(Some(scope));
        assert_eq!(entry.scoped.len(), 1);
        drop(instance);
        entry.sweep();
        assert_eq!(entry.scoped.len(), 0);
    }
}
