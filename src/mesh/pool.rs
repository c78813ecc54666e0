//! The Connection Pool of spec §4.7: per peer, a set of forward/reverse
//! secure channels sharing one outbound request queue, each with a
//! dedicated outbound worker and inbound reader.
//!
//! CPU affinity is spread evenly across channel worker tasks where the
//! platform supports it (`core_affinity`, already a ground-truth
//! dependency used the same way there); its absence is tolerated, per
//! spec. Each channel's outbound/inbound worker pair pins the OS thread
//! that first polls it via `core_affinity::set_for_current` — a
//! best-effort placement under tokio's work-stealing scheduler rather
//! than a hard per-channel guarantee, since tasks here aren't bound to
//! one dedicated OS thread for their whole lifetime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex, Notify};

use crate::mesh::async_runtime as rt;
use crate::mesh::communication::channel::{self, ChannelRx, ChannelTx};
use crate::mesh::communication::{ResponseFrame, SecureChannel, TransactionFrame};
use crate::mesh::error::{Error, ErrorKind, Result};
use crate::mesh::events::{Event, EventBus};
use crate::mesh::invocation::PendingQueryTable;
use crate::mesh::trust::PeerName;

/// A request frame paired with the channel it arrived on, handed off to
/// whoever drains [`ConnectionPool`]'s inbound queue (the dispatcher,
/// spec §4.9) — kept here rather than in `dispatcher` so `pool` doesn't
/// need to depend on it.
pub struct InboundItem {
    pub peer: PeerName,
    pub channel: Arc<SecureChannel>,
    pub frame: crate::mesh::communication::RequestFrame,
}

struct PoolEntry {
    queue_tx: ChannelTx,
    shared_rx: Arc<Mutex<ChannelRx>>,
    queue_depth: AtomicUsize,
    channel_count: AtomicUsize,
}

/// Per-peer outbound queues and the secure channels draining them.
pub struct ConnectionPool {
    entries: DashMap<PeerName, Arc<PoolEntry>>,
    pending: Arc<PendingQueryTable>,
    inbound_tx: mpsc::UnboundedSender<InboundItem>,
    events: EventBus,
    affinity_cursor: AtomicUsize,
}

impl ConnectionPool {
    pub fn new(
        pending: Arc<PendingQueryTable>,
        inbound_tx: mpsc::UnboundedSender<InboundItem>,
        events: EventBus,
    ) -> Self {
        ConnectionPool {
            entries: DashMap::new(),
            pending,
            inbound_tx,
            events,
            affinity_cursor: AtomicUsize::new(0),
        }
    }

    fn entry_for(&self, peer: &PeerName) -> Arc<PoolEntry> {
        self.entries
            .entry(peer.clone())
            .or_insert_with(|| {
                let (queue_tx, queue_rx) = channel::new_channel();
                Arc::new(PoolEntry {
                    queue_tx,
                    shared_rx: Arc::new(Mutex::new(queue_rx)),
                    queue_depth: AtomicUsize::new(0),
                    channel_count: AtomicUsize::new(0),
                })
            })
            .clone()
    }

    /// Pushes `frame` onto `peer`'s outbound queue (spec §4.8 step 4).
    /// Fails if the peer has no pool entry at all, i.e. it was never
    /// connected or has already been torn down.
    pub fn enqueue(&self, peer: &PeerName, frame: TransactionFrame) -> Result<()> {
        let entry = self
            .entries
            .get(peer)
            .ok_or_else(|| Error::simple(ErrorKind::PeerDisconnected))?;
        entry.queue_tx.send(frame).map_err(|_| Error::simple(ErrorKind::PeerDisconnected))?;
        entry.queue_depth.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// The current depth of `peer`'s outbound queue (spec §4.8 step 3),
    /// or `usize::MAX` if the peer has no pool entry (so it's never
    /// chosen as the minimum).
    pub fn queue_depth(&self, peer: &PeerName) -> usize {
        self.entries.get(peer).map_or(usize::MAX, |e| e.queue_depth.load(Ordering::Relaxed))
    }

    pub fn contains(&self, peer: &PeerName) -> bool {
        self.entries.contains_key(peer)
    }

    fn next_affinity_core(&self) -> Option<core_affinity::CoreId> {
        let cores = core_affinity::get_core_ids()?;
        if cores.is_empty() {
            return None;
        }
        let idx = self.affinity_cursor.fetch_add(1, Ordering::Relaxed) % cores.len();
        Some(cores[idx])
    }

    /// Registers a newly-connected or newly-accepted channel for `peer`
    /// and spawns its dedicated outbound worker and inbound reader (spec
    /// §4.7). Returns a `Notify` fired once this peer's entire entry is
    /// torn down, so a lifecycle supervisor can decide whether to
    /// reconnect.
    pub fn add_channel(self: &Arc<Self>, peer: PeerName, channel: Arc<SecureChannel>) -> Arc<Notify> {
        let entry = self.entry_for(&peer);
        entry.channel_count.fetch_add(1, Ordering::Relaxed);
        let notify = Arc::new(Notify::new());
        let core = self.next_affinity_core();

        Self::spawn_outbound_worker(self.clone(), peer.clone(), entry.clone(), channel.clone(), core);
        Self::spawn_inbound_worker(self.clone(), peer, channel, notify.clone(), core);
        notify
    }

    fn spawn_outbound_worker(
        pool: Arc<Self>,
        peer: PeerName,
        entry: Arc<PoolEntry>,
        channel: Arc<SecureChannel>,
        core: Option<core_affinity::CoreId>,
    ) {
        rt::spawn(async move {
            if let Some(core) = core {
                core_affinity::set_for_current(core);
            }
            channel.wait_for_reversal().await;
            loop {
                let frame = {
                    let mut rx = entry.shared_rx.lock().await;
                    match rx.recv().await {
                        Some(frame) => frame,
                        None => return,
                    }
                };
                entry.queue_depth.fetch_sub(1, Ordering::Relaxed);
                if channel.send(&frame.encode()).await.is_err() {
                    pool.teardown(&peer, ErrorKind::PeerDisconnected);
                    return;
                }
            }
        });
    }

    fn spawn_inbound_worker(
        pool: Arc<Self>,
        peer: PeerName,
        channel: Arc<SecureChannel>,
        notify: Arc<Notify>,
        core: Option<core_affinity::CoreId>,
    ) {
        rt::spawn(async move {
            if let Some(core) = core {
                core_affinity::set_for_current(core);
            }
            loop {
                let bytes = match channel.recv().await {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) | Err(_) => {
                        pool.teardown(&peer, ErrorKind::PeerDisconnected);
                        notify.notify_waiters();
                        return;
                    }
                };
                let frame = match TransactionFrame::decode(&bytes) {
                    Ok(f) => f,
                    Err(_) => continue,
                };
                match frame {
                    TransactionFrame::Request(req) => {
                        let _ = pool.inbound_tx.send(InboundItem {
                            peer: peer.clone(),
                            channel: channel.clone(),
                            frame: req,
                        });
                    }
                    TransactionFrame::Response(ResponseFrame { id, result, error }) => {
                        let outcome = match error {
                            Some(wire_err) => Err(crate::mesh::error::Error::from(wire_err)),
                            None => Ok(result.unwrap_or_default()),
                        };
                        pool.pending.complete(id, outcome);
                    }
                }
            }
        });
    }

    /// Tears down a peer's entire pool entry on any channel's terminal
    /// failure (spec §4.7): closes the queue and fails every pending
    /// query targeted at it.
    fn teardown(&self, peer: &PeerName, kind: ErrorKind) {
        if self.entries.remove(peer).is_some() {
            self.pending.fail_peer(peer, kind);
            self.events.emit(Event::Disconnected { peer: peer.to_string() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::communication::{RequestFrame, RequestId};

    fn new_pool() -> (Arc<ConnectionPool>, mpsc::UnboundedReceiver<InboundItem>) {
        let pending = Arc::new(PendingQueryTable::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let pool = Arc::new(ConnectionPool::new(pending, tx, EventBus::default()));
        (pool, rx)
    }

    #[test]
    fn unconnected_peer_has_max_queue_depth() {
        let (pool, _rx) = new_pool();
        assert_eq!(pool.queue_depth(&PeerName::from("ghost")), usize::MAX);
    }

    #[test]
    fn enqueue_without_entry_fails() {
        let (pool, _rx) = new_pool();
        let frame = TransactionFrame::Request(RequestFrame {
            id: RequestId::from(1),
            scope: None,
            procedure: "Echo.ping".into(),
            args: vec![],
        });
        let err = pool.enqueue(&PeerName::from("ghost"), frame).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PeerDisconnected);
    }
}
