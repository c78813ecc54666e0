//! The secure channel of spec §4.3: per-frame AES-GCM encryption keyed
//! from a deterministic stream, independent send/receive locks, and the
//! single-byte role-reversal signal.
//!
//! **Directional key streams.** The spec describes "the" generator
//! advancing once per send and once per receive, as if sender and
//! receiver shared a single sequence. That holds for a half-duplex
//! exchange, but this channel is full duplex (responses may ride back on
//! any channel, spec §5) with independent send/receive locks, so the two
//! directions of traffic have no shared total order to stay in lockstep
//! over. This implementation derives two independent key streams from the
//! shared seed — one per direction — via a one-byte domain separator, so
//! each direction keeps its own internal lockstep without requiring
//! cross-direction ordering. See DESIGN.md for this Open Question
//! resolution.

use std::sync::atomic::{AtomicBool, Ordering};

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, Notify};

use crate::mesh::communication::socket::{SocketReadHalf, SocketWriteHalf};
use crate::mesh::crypto::FrameCipher;
use crate::mesh::error::Result;

const DIR_INITIATOR_TO_ACCEPTOR: u8 = 1;
const DIR_ACCEPTOR_TO_INITIATOR: u8 = 2;

fn directional_seed(seed: &[u8], direction: u8) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update([direction]);
    hasher.finalize().into()
}

struct Writer {
    socket: SocketWriteHalf,
    cipher: FrameCipher,
}

struct Reader {
    socket: SocketReadHalf,
    cipher: FrameCipher,
}

/// One authenticated, encrypted duplex stream (spec GLOSSARY "Channel").
pub struct SecureChannel {
    writer: Mutex<Writer>,
    reader: Mutex<Reader>,
    /// Whether this side may originate requests on this channel (spec
    /// §4.3 "Role reversal").
    can_request: AtomicBool,
    reverted: Notify,
    /// `true` if this side opened the underlying TCP connection. Only
    /// client-originated channels attempt to reconnect on failure (spec
    /// §4.3 "Reconnect").
    client_originated: bool,
}

impl SecureChannel {
    /// Builds a channel from an already-handshaken socket. `is_initiator`
    /// picks this side's directional key stream; `can_request` is `true`
    /// for the TCP initiator and `false` for the acceptor, per spec §4.3.
    pub fn new(
        socket_read: SocketReadHalf,
        socket_write: SocketWriteHalf,
        seed: &[u8],
        is_initiator: bool,
    ) -> Self {
        let (tx_dir, rx_dir) = if is_initiator {
            (DIR_INITIATOR_TO_ACCEPTOR, DIR_ACCEPTOR_TO_INITIATOR)
        } else {
            (DIR_ACCEPTOR_TO_INITIATOR, DIR_INITIATOR_TO_ACCEPTOR)
        };
        let tx_cipher = FrameCipher::new(&directional_seed(seed, tx_dir));
        let rx_cipher = FrameCipher::new(&directional_seed(seed, rx_dir));

        SecureChannel {
            writer: Mutex::new(Writer { socket: socket_write, cipher: tx_cipher }),
            reader: Mutex::new(Reader { socket: socket_read, cipher: rx_cipher }),
            can_request: AtomicBool::new(is_initiator),
            reverted: Notify::new(),
            client_originated: is_initiator,
        }
    }

    pub fn can_request(&self) -> bool {
        self.can_request.load(Ordering::Acquire)
    }

    pub fn is_client_originated(&self) -> bool {
        self.client_originated
    }

    /// Waits until this channel is reverted (spec §4.3 "reverted
    /// notification"). No-ops immediately if already request-capable.
    pub async fn wait_for_reversal(&self) {
        if self.can_request() {
            return;
        }
        self.reverted.notified().await;
    }

    /// Encrypts and sends `payload` under the send-lock.
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        let mut w = self.writer.lock().await;
        let ct = w.cipher.seal(payload);
        w.socket.write_frame(&ct).await
    }

    /// Sends the single-byte role-reversal signal, unencrypted, on the
    /// send path (spec §4.3/§6.1). Does not advance the tx cipher: the
    /// signal never entered the cipher stream on either side.
    pub async fn send_reversal_signal(&self) -> Result<()> {
        let mut w = self.writer.lock().await;
        w.socket.write_frame(&[0u8]).await
    }

    /// Reads and decrypts the next frame under the receive-lock. Returns
    /// `Ok(None)` on peer disconnect (spec §4.1). A role-reversal signal
    /// is handled internally (flips `can_request`, notifies waiters) and
    /// this method loops to read the next real frame rather than
    /// returning it to the caller.
    pub async fn recv(&self) -> Result<Option<Vec<u8>>> {
        let mut r = self.reader.lock().await;
        loop {
            let frame = match r.socket.read_frame().await? {
                Some(f) => f,
                None => return Ok(None),
            };
            if frame.len() == 1 && frame[0] == 0 {
                self.can_request.store(true, Ordering::Release);
                self.reverted.notify_waiters();
                continue;
            }
            return r.cipher.open(&frame).map(Some);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::communication::socket;

    async fn loopback_channels(seed: &[u8]) -> (SecureChannel, SecureChannel) {
        let listener = socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_fut = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let initiator_sock = socket::connect(addr).await.unwrap();
        let acceptor_sock = accept_fut.await.unwrap();

        let (init_r, init_w) = initiator_sock.into_split();
        let (acc_r, acc_w) = acceptor_sock.into_split();

        let initiator = SecureChannel::new(init_r, init_w, seed, true);
        let acceptor = SecureChannel::new(acc_r, acc_w, seed, false);
        (initiator, acceptor)
    }

    #[tokio::test]
    async fn request_capable_flags_match_roles() {
        let (initiator, acceptor) = loopback_channels(b"0123456789abcdef0123456789abcdef").await;
        assert!(initiator.can_request());
        assert!(!acceptor.can_request());
    }

    #[tokio::test]
    async fn encrypted_payload_round_trips() {
        let (initiator, acceptor) = loopback_channels(b"0123456789abcdef0123456789abcdef").await;
        initiator.send(b"hello").await.unwrap();
        let received = acceptor.recv().await.unwrap().unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn reversal_signal_flips_remote_flag_without_reaching_recv() {
        let (initiator, acceptor) = loopback_channels(b"0123456789abcdef0123456789abcdef").await;
        assert!(!acceptor.can_request());

        initiator.send_reversal_signal().await.unwrap();
        initiator.send(b"after reversal").await.unwrap();

        let received = acceptor.recv().await.unwrap().unwrap();
        assert_eq!(received, b"after reversal");
        assert!(acceptor.can_request());
    }

    #[tokio::test]
    async fn wait_for_reversal_resolves_once_the_signal_is_read() {
        let (initiator, acceptor) = loopback_channels(b"0123456789abcdef0123456789abcdef").await;
        let acceptor = std::sync::Arc::new(acceptor);

        // a reader loop, as the connection pool would run one in production,
        // is what actually observes the signal frame off the wire.
        let reader_acceptor = acceptor.clone();
        let reader = tokio::spawn(async move { reader_acceptor.recv().await });

        let waiter_acceptor = acceptor.clone();
        let waiter = tokio::spawn(async move { waiter_acceptor.wait_for_reversal().await });

        initiator.send_reversal_signal().await.unwrap();
        initiator.send(b"unblock the reader").await.unwrap();

        waiter.await.unwrap();
        assert!(acceptor.can_request());
        assert_eq!(reader.await.unwrap().unwrap().unwrap(), b"unblock the reader");
    }
}
