//! The Inbound Dispatcher of spec §4.9: for each request frame handed off
//! by the connection pool, try the local Implementation Registry first,
//! then mesh-forward through the Invocation Engine, then give up with
//! `NoRoute` — always replying on the same channel the request arrived on.

use std::sync::Arc;
use std::time::Instant;

use crate::mesh::catalogue::ServiceCatalogue;
use crate::mesh::communication::{ResponseFrame, TransactionFrame};
use crate::mesh::error::{Error, ErrorKind, Result};
use crate::mesh::events::{Event, EventBus};
use crate::mesh::invocation::{parse_procedure, InvocationEngine};
use crate::mesh::pool::InboundItem;
use crate::mesh::registry::ImplementationRegistry;

/// Mesh forwarding retries a request up to this many times before giving
/// up (spec §4.9 step 3). The caller's own timeout budget, set on the
/// `InvocationEngine` each attempt goes through, covers all three attempts
/// combined rather than being reset per attempt (spec §9 open question,
/// resolved toward the recommended option: a single retry burns into one
/// shared budget instead of compounding into up to 3x the configured
/// timeout).
const MESH_FORWARD_ATTEMPTS: u32 = 3;

pub struct Dispatcher {
    registry: Arc<ImplementationRegistry>,
    engine: Arc<InvocationEngine>,
    catalogue: Arc<ServiceCatalogue>,
    events: EventBus,
    allow_mesh: bool,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ImplementationRegistry>,
        engine: Arc<InvocationEngine>,
        catalogue: Arc<ServiceCatalogue>,
        events: EventBus,
        allow_mesh: bool,
    ) -> Self {
        Dispatcher { registry, engine, catalogue, events, allow_mesh }
    }

    /// Drains `inbound_rx` until its sender side (the connection pool) is
    /// dropped, servicing one [`InboundItem`] at a time. Spawned as its own
    /// task by the owning `Runtime`; each item's own handling is also
    /// spawned off so one slow or forwarding call doesn't stall replies to
    /// others arriving concurrently.
    pub async fn run(self: Arc<Self>, mut inbound_rx: tokio::sync::mpsc::UnboundedReceiver<InboundItem>) {
        while let Some(item) = inbound_rx.recv().await {
            let dispatcher = self.clone();
            crate::mesh::async_runtime::spawn(async move {
                dispatcher.handle(item).await;
            });
        }
    }

    async fn handle(&self, item: InboundItem) {
        let InboundItem { peer, channel, frame } = item;
        let started = Instant::now();

        let (service, method) = match parse_procedure(&frame.procedure) {
            Ok(parts) => parts,
            Err(e) => {
                self.reply(&channel, frame.id, Err(e), &peer, &frame.procedure, frame.scope, false, started)
                    .await;
                return;
            }
        };

        if self.registry.contains(service) {
            let result = self.registry.invoke(service, method, frame.scope, frame.args).await;
            self.reply(&channel, frame.id, result, &peer, &frame.procedure, frame.scope, false, started)
                .await;
            return;
        }

        if self.allow_mesh && self.catalogue.contains(service) {
            let mut result = Err(Error::simple(ErrorKind::NoRoute));
            for _ in 0..MESH_FORWARD_ATTEMPTS {
                result = self.engine.call(frame.scope, &frame.procedure, frame.args.clone()).await;
                if result.is_ok() {
                    break;
                }
            }
            self.reply(&channel, frame.id, result, &peer, &frame.procedure, frame.scope, true, started)
                .await;
            return;
        }

        self.reply(
            &channel,
            frame.id,
            Err(Error::simple(ErrorKind::NoRoute)),
            &peer,
            &frame.procedure,
            frame.scope,
            false,
            started,
        )
        .await;
    }

    async fn reply(
        &self,
        channel: &crate::mesh::communication::SecureChannel,
        id: crate::mesh::communication::RequestId,
        result: Result<Vec<u8>>,
        peer: &crate::mesh::trust::PeerName,
        procedure: &str,
        scope: Option<crate::mesh::communication::ScopeId>,
        forwarded: bool,
        started: Instant,
    ) {
        let error_kind = result.as_ref().err().map(|e| e.kind());
        let response = match &result {
            Ok(bytes) => ResponseFrame { id, result: Some(bytes.clone()), error: None },
            Err(e) => ResponseFrame { id, result: None, error: Some(e.into()) },
        };
        let frame = TransactionFrame::Response(response);
        let _ = channel.send(&frame.encode()).await;

        self.events.emit(Event::InboundCompleted {
            peer: peer.to_string(),
            procedure: procedure.to_owned(),
            scope: scope.map(u64::from),
            duration_micros: started.elapsed().as_micros() as u64,
            forwarded,
            error: error_kind,
        });
    }
}
