//! Per-frame authenticated encryption for the secure channel (spec §4.3).
//!
//! A plain stream cipher has no way to signal "decrypt failed"; spec §9
//! resolves the desynchronization open question by requiring exactly that
//! signal, so frames are sealed with AES-256-GCM, keyed from the
//! deterministic [`super::KeyStream`] rather than a random per-message
//! nonce.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key as GcmKey, Nonce as GcmNonce};

use crate::mesh::crypto::stream_keys::KeyStream;
use crate::mesh::error::{Error, ErrorKind, Result};

/// Wraps a [`KeyStream`] with the AES-GCM sealing/opening operations that
/// consume it one frame at a time.
pub struct FrameCipher {
    stream: KeyStream,
}

impl FrameCipher {
    pub fn new(seed: &[u8]) -> Self {
        FrameCipher { stream: KeyStream::new(seed) }
    }

    /// Encrypts `plaintext` with the next `(key, nonce)` pair, advancing
    /// the stream. Mirrors "after every successful send, the sender
    /// advances the generator" (spec §4.3) — the advance happens as part
    /// of deriving the pair here, before the write is attempted, since a
    /// write failure tears down the whole channel anyway (spec: reconnect
    /// resets the generator from scratch).
    pub fn seal(&mut self, plaintext: &[u8]) -> Vec<u8> {
        let (key, nonce) = self.stream.next_pair();
        let cipher = Aes256Gcm::new(GcmKey::<Aes256Gcm>::from_slice(&key));
        cipher
            .encrypt(GcmNonce::from_slice(&nonce), plaintext)
            .expect("AES-GCM sealing with a fixed-size key/nonce cannot fail")
    }

    /// Decrypts `ciphertext` with the next `(key, nonce)` pair. A GCM tag
    /// mismatch means the two sides have desynchronized (or the peer is
    /// hostile); either way, spec §9 says to treat this as "disconnect",
    /// surfaced here as `ErrorKind::Communication`.
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let (key, nonce) = self.stream.next_pair();
        let cipher = Aes256Gcm::new(GcmKey::<Aes256Gcm>::from_slice(&key));
        cipher
            .decrypt(GcmNonce::from_slice(&nonce), ciphertext)
            .map_err(|_| Error::simple(ErrorKind::Communication))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_round_trips_in_lockstep() {
        let seed = b"0123456789abcdef0123456789abcdef";
        let mut sender = FrameCipher::new(seed);
        let mut receiver = FrameCipher::new(seed);

        for msg in [&b"hello"[..], b"world", b"a third frame"] {
            let ct = sender.seal(msg);
            let pt = receiver.open(&ct).unwrap();
            assert_eq!(pt, msg);
        }
    }

    #[test]
    fn desync_surfaces_as_open_failure() {
        let seed = b"some other 32+ byte handshake seed";
        let mut sender = FrameCipher::new(seed);
        let mut receiver = FrameCipher::new(seed);

        // receiver misses a frame -> falls out of lockstep
        let _dropped = sender.seal(b"lost in transit");
        let ct = sender.seal(b"this one arrives");
        assert!(receiver.open(&ct).is_err());
    }
}
