//! Observability events, delivered both as `tracing` events (for log
//! sinks) and as typed values on a broadcast channel (for embedders that
//! want to react programmatically, e.g. a dashboard counting reconnects).

use tokio::sync::broadcast;

use crate::mesh::error::ErrorKind;

/// A lifecycle or call-completion event, as named throughout spec §4.9,
/// §4.10 and §7.
#[derive(Debug, Clone)]
pub enum Event {
    /// A peer finished its handshake and catalogue exchange (spec §4.10
    /// accept/connect paths).
    Connected { peer: String },
    /// A peer's connection pool entry was torn down (spec §4.10 disconnect
    /// path).
    Disconnected { peer: String },
    /// A channel's `can_request` flag flipped from `false` to `true` (spec
    /// §4.3 role reversal).
    Reverted { peer: String },
    /// A scheduled reconnect attempt to a configured peer failed (spec §7).
    ReconnectFailed { peer: String, kind: ErrorKind },
    /// An inbound request was serviced, forwarded, or rejected (spec §4.9).
    InboundCompleted {
        peer: String,
        procedure: String,
        scope: Option<u64>,
        duration_micros: u64,
        forwarded: bool,
        error: Option<ErrorKind>,
    },
}

/// A broadcast bus of [`Event`]s. Cloning an `EventBus` shares the same
/// underlying channel; subscribers that lag behind the bus's capacity
/// silently miss old events (acceptable: these are observability signals,
/// not a source of truth callers can rely on for correctness).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        EventBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Emits an event to subscribers and to `tracing`. Send failures (no
    /// subscribers) are expected and silently ignored.
    pub fn emit(&self, event: Event) {
        match &event {
            Event::Connected { peer } => tracing::info!(peer, "peer connected"),
            Event::Disconnected { peer } => tracing::info!(peer, "peer disconnected"),
            Event::Reverted { peer } => tracing::debug!(peer, "channel role-reverted"),
            Event::ReconnectFailed { peer, kind } => {
                tracing::warn!(peer, ?kind, "reconnect failed")
            }
            Event::InboundCompleted {
                peer,
                procedure,
                duration_micros,
                forwarded,
                error,
                ..
            } => {
                tracing::debug!(
                    peer,
                    procedure,
                    duration_micros,
                    forwarded,
                    ?error,
                    "inbound call completed"
                );
            }
        }
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
