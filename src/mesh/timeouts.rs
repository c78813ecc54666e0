//! A timeout scheduler generalizing the ground truth's `timeouts` module
//! (there keyed on state-transfer timeout kinds, here on call timeouts):
//! callers register a duration and a `TimeoutKind`, and receive that kind
//! back on a channel once the duration elapses, without blocking on it
//! themselves.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::mesh::communication::RequestId;

/// What a fired timeout refers back to.
#[derive(Debug, Clone)]
pub enum TimeoutKind {
    /// A pending query's global timeout elapsed (spec §4.8 step 5).
    Call(RequestId),
}

/// Schedules [`TimeoutKind`] deliveries onto a channel.
#[derive(Clone)]
pub struct Timeouts {
    tx: mpsc::UnboundedSender<TimeoutKind>,
}

impl Timeouts {
    pub fn new(tx: mpsc::UnboundedSender<TimeoutKind>) -> Self {
        Timeouts { tx }
    }

    /// Schedules `kind` to be delivered after `dur`. A negative/disabled
    /// duration (spec's `-1` sentinel) should be filtered out by the
    /// caller before calling this; there is no "never" duration here.
    pub fn timeout(&self, dur: Duration, kind: TimeoutKind) {
        let tx = self.tx.clone();
        crate::mesh::async_runtime::spawn(async move {
            tokio::time::sleep(dur).await;
            let _ = tx.send(kind);
        });
    }
}

/// Builds a fresh `(Timeouts, receiver)` pair.
pub fn new_timeouts() -> (Timeouts, mpsc::UnboundedReceiver<TimeoutKind>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Timeouts::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fires_after_duration() {
        let (timeouts, mut rx) = new_timeouts();
        timeouts.timeout(Duration::from_millis(5), TimeoutKind::Call(RequestId::from(1)));
        let kind = rx.recv().await.unwrap();
        matches!(kind, TimeoutKind::Call(id) if id == RequestId::from(1));
    }
}
