//! The Lifecycle Manager of spec §4.10: accept/connect handshakes,
//! catalogue exchange, disconnect teardown, and the client-side reconnect
//! supervisor (spec §7: "reconnects ... attempted indefinitely at
//! `reconnect_delay` intervals").

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::mesh::async_runtime as rt;
use crate::mesh::catalogue::ServiceCatalogue;
use crate::mesh::communication::socket::{self, Listener, Socket};
use crate::mesh::communication::{handshake, CatalogueFrame, SecureChannel};
use crate::mesh::config::PeerConfig;
use crate::mesh::crypto::{KeyPair, PublicKey};
use crate::mesh::error::{Error, ErrorKind, Result};
use crate::mesh::events::{Event, EventBus};
use crate::mesh::invocation::InvocationEngine;
use crate::mesh::pool::ConnectionPool;
use crate::mesh::registry::ImplementationRegistry;
use crate::mesh::trust::{PeerName, TrustedKeyStore};

pub struct LifecycleManager {
    keys: Arc<KeyPair>,
    trust: Arc<TrustedKeyStore>,
    catalogue: Arc<ServiceCatalogue>,
    registry: Arc<ImplementationRegistry>,
    pool: Arc<ConnectionPool>,
    engine: Arc<InvocationEngine>,
    events: EventBus,
    reconnect_delay: Duration,
}

impl LifecycleManager {
    pub fn new(
        keys: Arc<KeyPair>,
        trust: Arc<TrustedKeyStore>,
        catalogue: Arc<ServiceCatalogue>,
        registry: Arc<ImplementationRegistry>,
        pool: Arc<ConnectionPool>,
        engine: Arc<InvocationEngine>,
        events: EventBus,
        reconnect_delay: Duration,
    ) -> Self {
        LifecycleManager { keys, trust, catalogue, registry, pool, engine, events, reconnect_delay }
    }

    /// Accepts connections off `listener` forever, handshaking each one on
    /// its own task so a slow or hostile peer can't stall the others (spec
    /// §4.10 accept path).
    pub async fn accept_loop(self: Arc<Self>, listener: Listener) {
        loop {
            let (socket, addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let this = self.clone();
            rt::spawn(async move {
                if let Err(e) = this.accept_one(socket).await {
                    tracing::warn!(peer_addr = %addr, error = %e, "inbound handshake failed");
                }
            });
        }
    }

    async fn accept_one(&self, mut socket: Socket) -> Result<()> {
        let outcome = handshake::accept(&mut socket, &self.keys, &self.trust).await?;
        let (read, write) = socket.into_split();
        let channel = Arc::new(SecureChannel::new(read, write, &outcome.seed, false));
        self.exchange_catalogue(&channel, &outcome.peer_name).await?;
        self.pool.add_channel(outcome.peer_name.clone(), channel);
        self.events.emit(Event::Connected { peer: outcome.peer_name.to_string() });
        Ok(())
    }

    async fn exchange_catalogue(&self, channel: &SecureChannel, peer: &PeerName) -> Result<()> {
        let local = CatalogueFrame { services: self.registry.iterate_service_names() };
        channel.send(&local.encode()).await?;
        let bytes = channel
            .recv()
            .await?
            .ok_or_else(|| Error::simple(ErrorKind::PeerDisconnected))?;
        let remote = CatalogueFrame::decode(&bytes)?;
        for service in remote.services {
            self.catalogue.add(&service, peer.clone());
        }
        Ok(())
    }

    /// Opens every configured channel to `peer` (spec §4.10 connect path):
    /// `peer.connections` forward channels, plus `peer.open_reverse_channels`
    /// additional channels that immediately signal a role reversal. Marks
    /// the peer as a root route if configured. Registers it in the trusted
    /// key store so a later inbound connection from the same key (e.g. this
    /// peer dialing back) is accepted too.
    ///
    /// Returns the teardown notification of the first forward channel
    /// opened: since any one channel's terminal failure tears down the
    /// entire per-peer pool entry (spec §4.7), that single notification is
    /// enough to learn "this peer is now fully disconnected" without
    /// tracking every channel's own notify separately.
    pub async fn connect(&self, peer: &PeerConfig) -> Result<Arc<tokio::sync::Notify>> {
        let peer_name = PeerName::from(peer.friendly_name.clone());
        let responder_key = PublicKey::from_der(peer.trusted_public_key.clone())?;
        self.trust.insert(peer_name.clone(), responder_key.clone())?;

        let mut first_notify = None;
        for _ in 0..peer.connections.max(1) {
            let notify = self.open_channel(peer, &peer_name, &responder_key, false).await?;
            first_notify.get_or_insert(notify);
        }
        for _ in 0..peer.open_reverse_channels {
            self.open_channel(peer, &peer_name, &responder_key, true).await?;
        }

        if peer.is_root {
            self.engine.mark_root(peer_name);
        }
        Ok(first_notify.expect("at least one forward channel is always opened"))
    }

    async fn open_channel(
        &self,
        peer: &PeerConfig,
        peer_name: &PeerName,
        responder_key: &PublicKey,
        reverse: bool,
    ) -> Result<Arc<tokio::sync::Notify>> {
        let addr: SocketAddr = peer
            .address
            .parse()
            .map_err(|_| Error::message(ErrorKind::Other, format!("bad peer address: {}", peer.address)))?;
        let mut socket = socket::connect(addr).await?;
        let seed = handshake::initiate(&mut socket, &self.keys, responder_key).await?;
        let (read, write) = socket.into_split();
        let channel = Arc::new(SecureChannel::new(read, write, &seed, true));

        if reverse {
            channel.send_reversal_signal().await?;
        }
        self.exchange_catalogue(&channel, peer_name).await?;

        let notify = self.pool.add_channel(peer_name.clone(), channel);
        Ok(notify)
    }

    /// Tears down a peer (spec §4.10 disconnect path): removes it from the
    /// catalogue and trusted key store, fails every pending query targeted
    /// at it, and un-marks it as a root route. Does not touch the
    /// connection pool's own entry — that's the pool's job when its reader
    /// observes the disconnect.
    pub fn disconnect(&self, peer: &PeerName) {
        self.catalogue.remove_by_peer(peer);
        self.trust.remove(peer);
        self.engine.unmark_root(peer);
        self.events.emit(Event::Disconnected { peer: peer.to_string() });
    }

    /// Fails every in-flight pending query on process shutdown (spec §4.10
    /// "process exit").
    pub fn shutdown(&self) {
        self.engine.pending_table().fail_all(ErrorKind::Shutdown);
    }

    /// Supervises a client-originated peer: reconnects indefinitely at
    /// `reconnect_delay` intervals whenever every channel to it has been
    /// torn down (spec §7). Intended to run as its own task for the
    /// lifetime of the `Runtime`.
    pub async fn supervise_reconnects(self: Arc<Self>, peer: PeerConfig) {
        let peer_name = PeerName::from(peer.friendly_name.clone());
        loop {
            let notify = match self.connect(&peer).await {
                Ok(notify) => notify,
                Err(e) => {
                    self.report_reconnect_failure(&peer_name, e.kind()).await;
                    continue;
                }
            };

            notify.notified().await;
            self.disconnect(&peer_name);
        }
    }

    async fn report_reconnect_failure(&self, peer: &PeerName, kind: ErrorKind) {
        self.events.emit(Event::ReconnectFailed { peer: peer.to_string(), kind });
        tokio::time::sleep(self.reconnect_delay).await;
    }
}
