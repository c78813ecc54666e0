//! Per-peer outbound request queue (spec §4.7 "outbound worker"),
//! generalized from the ground truth's `MessageChannelTx`/`MessageChannelRx`
//! pair (`communication::channel`) down to a single unbounded MPSC channel,
//! since this protocol has no message priority classes to arbitrate between.

use tokio::sync::mpsc;

use crate::mesh::communication::message::TransactionFrame;

/// The sending half held by callers that want to push a frame onto a
/// peer's outbound queue.
pub type ChannelTx = mpsc::UnboundedSender<TransactionFrame>;

/// The receiving half held by the outbound worker that drains the queue
/// onto the wire (spec §4.7).
pub type ChannelRx = mpsc::UnboundedReceiver<TransactionFrame>;

/// Creates a fresh outbound queue for one peer.
pub fn new_channel() -> (ChannelTx, ChannelRx) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::communication::message::{RequestFrame, RequestId};

    #[tokio::test]
    async fn queued_frames_drain_in_order() {
        let (tx, mut rx) = new_channel();
        for i in 0..3u64 {
            tx.send(TransactionFrame::Request(RequestFrame {
                id: RequestId::from(i),
                scope: None,
                procedure: "Echo.ping".into(),
                args: vec![],
            }))
            .unwrap();
        }
        drop(tx);

        let mut ids = Vec::new();
        while let Some(TransactionFrame::Request(r)) = rx.recv().await {
            ids.push(u64::from(r.id));
        }
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
