//! `meshrpc`: a distributed RPC runtime over encrypted peer-to-peer
//! connections, with a service catalogue and mesh-forwarding invocation
//! engine (spec §1, §2). The top-level [`Runtime`] owns every subsystem
//! as an instance field rather than reaching for process-globals (spec
//! §9's explicit design note, and a deliberate departure from the ground
//! truth's own `static INITIALIZED` / `unsafe fn init` pattern).

pub mod mesh;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use mesh::async_runtime as rt;
use mesh::catalogue::ServiceCatalogue;
use mesh::communication::socket;
use mesh::config::{Config, PeerConfig};
use mesh::crypto::KeyPair;
use mesh::dispatcher::Dispatcher;
use mesh::error::ResultWrappedExt;
use mesh::events::EventBus;
use mesh::invocation::{InvocationEngine, PendingQueryTable};
use mesh::lifecycle::LifecycleManager;
use mesh::pool::ConnectionPool;
use mesh::registry::ImplementationRegistry;
use mesh::timeouts::new_timeouts;
use mesh::trust::{PeerName, TrustedKeyStore};

pub use mesh::catalogue::ServiceCatalogue as Catalogue;
pub use mesh::config::{Config as RuntimeConfig, KeyPathConfig, PeerConfig as RuntimePeerConfig};
pub use mesh::error::{Error, ErrorKind, Result};
pub use mesh::events::Event;
pub use mesh::invocation::InvocationEngine as Engine;
pub use mesh::proxy::RemoteProxy;
pub use mesh::registry::{
    BoxFuture, Factory, ImplementationRegistry as Registry, Instance, Lifetime, MethodDescriptor,
    MethodHandler, ServiceDescriptor,
};
pub use mesh::trust::PeerName as Peer;

/// How often the scoped-instance sweeper runs (spec §4.4, §5 "sweeper").
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A single running node: its identity, the peers it trusts, the services
/// it hosts, and the background tasks that keep its connections alive
/// (spec §1 "a single running process of this system").
pub struct Runtime {
    keys: Arc<KeyPair>,
    trust: Arc<TrustedKeyStore>,
    catalogue: Arc<ServiceCatalogue>,
    registry: Arc<ImplementationRegistry>,
    pool: Arc<ConnectionPool>,
    engine: Arc<InvocationEngine>,
    lifecycle: Arc<LifecycleManager>,
    events: EventBus,
    peers: Vec<PeerConfig>,
}

impl Runtime {
    /// Builds a `Runtime` from a loaded [`Config`], generating or loading
    /// this node's key pair (spec §6.6) and wiring every subsystem
    /// together. Does not yet listen or dial anything — call [`Self::run`]
    /// for that.
    pub async fn new(config: Config) -> Result<Self> {
        let key_path = config.my_keys.private_key_path.clone();
        let bits = config.my_keys.bits;
        let keys = Arc::new(rt::spawn_blocking(move || KeyPair::load_or_generate(&key_path, bits)).await??);

        let trust = Arc::new(TrustedKeyStore::new());
        for peer in &config.peers {
            let key = mesh::crypto::PublicKey::from_der(peer.trusted_public_key.clone())?;
            trust.insert(PeerName::from(peer.friendly_name.clone()), key)?;
        }

        let catalogue = Arc::new(ServiceCatalogue::new());
        let registry = Arc::new(ImplementationRegistry::new());
        let events = EventBus::default();
        let pending = Arc::new(PendingQueryTable::new());

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let pool = Arc::new(ConnectionPool::new(pending.clone(), inbound_tx, events.clone()));

        let (timeouts, timeout_rx) = new_timeouts();
        let engine = Arc::new(InvocationEngine::new(
            catalogue.clone(),
            pool.clone(),
            pending,
            timeouts,
            config.request_timeout(),
        ));

        let lifecycle = Arc::new(LifecycleManager::new(
            keys.clone(),
            trust.clone(),
            catalogue.clone(),
            registry.clone(),
            pool.clone(),
            engine.clone(),
            events.clone(),
            config.reconnect_delay(),
        ));

        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            engine.clone(),
            catalogue.clone(),
            events.clone(),
            config.allow_mesh,
        ));

        let runtime = Runtime {
            keys,
            trust,
            catalogue,
            registry,
            pool,
            engine,
            lifecycle,
            events,
            peers: config.peers,
        };

        rt::spawn(dispatcher.run(inbound_rx));
        rt::spawn(Self::drain_timeouts(runtime.engine.clone(), timeout_rx));
        rt::spawn(Self::sweep_periodically(runtime.registry.clone()));

        let listen_addr = format!("{}:{}", config.listen_address, config.listen_port)
            .parse()
            .wrapped(ErrorKind::Other)?;
        let listener = socket::bind(listen_addr).await?;
        rt::spawn(runtime.lifecycle.clone().accept_loop(listener));

        for peer in runtime.peers.clone() {
            rt::spawn(runtime.lifecycle.clone().supervise_reconnects(peer));
        }

        Ok(runtime)
    }

    /// Drains fired timeouts off the shared dispatcher and resolves them
    /// against the invocation engine's pending query table (spec §4.8 step
    /// 5). Runs for the lifetime of the `Runtime`.
    async fn drain_timeouts(
        engine: Arc<InvocationEngine>,
        mut rx: mpsc::UnboundedReceiver<mesh::timeouts::TimeoutKind>,
    ) {
        while let Some(kind) = rx.recv().await {
            engine.dispatch_timeout(kind);
        }
    }

    /// Periodically evicts dead scoped service instances (spec §4.4).
    async fn sweep_periodically(registry: Arc<ImplementationRegistry>) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            registry.sweep_scoped();
        }
    }

    /// Registers a local service implementation (spec §4.4). Must be
    /// called before a peer's catalogue exchange runs, or the freshly
    /// connected peer won't learn about it until it reconnects.
    pub fn register_service(
        &self,
        descriptor: ServiceDescriptor,
        lifetime: Lifetime,
        factory: Factory,
        handlers: mesh::collections::HashMap<String, MethodHandler>,
    ) {
        self.registry.register(descriptor, lifetime, factory, handlers);
    }

    /// Invokes a `"service.method"` procedure through the invocation engine
    /// (spec §4.8), routed to whichever peer the catalogue or root fallback
    /// names.
    pub async fn call(
        &self,
        scope: Option<mesh::communication::ScopeId>,
        procedure: &str,
        args: Vec<u8>,
    ) -> Result<Vec<u8>> {
        self.engine.call(scope, procedure, args).await
    }

    /// Builds a typed [`RemoteProxy`] bound to `service`.
    pub fn proxy(&self, service: impl Into<String>) -> RemoteProxy {
        RemoteProxy::new(self.engine.clone(), service)
    }

    /// Subscribes to this runtime's lifecycle/call events (spec §4.9,
    /// §4.10, §7).
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn catalogue(&self) -> &Arc<ServiceCatalogue> {
        &self.catalogue
    }

    pub fn trust_store(&self) -> &Arc<TrustedKeyStore> {
        &self.trust
    }

    pub fn public_key(&self) -> &mesh::crypto::PublicKey {
        self.keys.public_key()
    }

    /// Disconnects a configured peer and stops its reconnect supervisor
    /// from being (re)started; in-flight supervision tasks already running
    /// will still attempt one more reconnect cycle before noticing on
    /// their next failure, since there's no cancellation token threaded
    /// through them (spec §9 leaves task cancellation out of scope).
    pub fn disconnect(&self, peer: &PeerName) {
        self.lifecycle.disconnect(peer);
    }

    /// Fails every in-flight pending query (spec §4.10 "process exit").
    /// Does not stop the accept loop or reconnect supervisors; dropping
    /// the `Runtime` itself (and the tasks it spawned going out of scope
    /// along with the process) is what actually tears the node down.
    pub fn shutdown(&self) {
        self.lifecycle.shutdown();
    }
}
