//! Small synchronization primitives shared across the pool, invocation
//! engine and secure channel, generalizing the ground truth's `sync`
//! module.

use oneshot::{Receiver as OneshotRx, Sender as OneshotTx};

use crate::mesh::error::{Error, ErrorKind, Result};

/// The sending half of a pending query's completion: fulfilled exactly
/// once, by the inbound dispatcher path that matches a response to its
/// request id, or by whichever code path cancels the query (disconnect,
/// timeout, shutdown).
pub type CompletionTx<T> = OneshotTx<T>;
/// The awaiting half, held by the caller of the invocation engine.
pub type CompletionRx<T> = OneshotRx<T>;

/// Creates a fresh completion pair. A thin re-export of the `oneshot` crate
/// (already a ground-truth dependency) so call sites don't need to import
/// it directly.
pub fn completion<T>() -> (CompletionTx<T>, CompletionRx<T>) {
    oneshot::channel()
}

/// Awaits a completion, translating a dropped sender (which only happens
/// when the completing side panics or is torn down without fulfilling the
/// handle) into a `Shutdown` error rather than propagating a raw recv
/// error.
pub async fn await_completion<T: Send + 'static>(rx: CompletionRx<T>) -> Result<T> {
    rx.await.map_err(|_| Error::simple(ErrorKind::Shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fulfilled_completion_resolves() {
        let (tx, rx) = completion::<u32>();
        tx.send(42).unwrap();
        assert_eq!(await_completion(rx).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn dropped_sender_yields_shutdown() {
        let (tx, rx) = completion::<u32>();
        drop(tx);
        let err = await_completion(rx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Shutdown);
    }
}
