//! The deterministic per-frame key stream of spec §4.3: "a deterministic
//! pseudo-random generator is seeded identically on both ends ... After
//! every successful send, the sender advances the generator and derives
//! the next `(key, iv)`; the receiver advances identically after every
//! successful receive."

use rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use zeroize::Zeroize;

/// A 256-bit AES-GCM key.
pub type Key = [u8; 32];
/// A 96-bit AES-GCM nonce.
pub type Nonce = [u8; 12];

/// Draws successive `(key, nonce)` pairs from a PRNG seeded once from the
/// handshake seed. Two `KeyStream`s seeded with the same bytes produce
/// identical sequences (spec §8's "keystream is deterministic from the
/// seed" property).
pub struct KeyStream {
    rng: ChaCha20Rng,
}

impl KeyStream {
    /// Seeds the generator from `seed` (spec requires the handshake seed
    /// to be at least 32 bytes; only the first 32 are used to seed the
    /// generator itself, since that's the input width `ChaCha20Rng`
    /// takes — the full seed is still what was authenticated during the
    /// handshake).
    pub fn new(seed: &[u8]) -> Self {
        let mut buf = [0u8; 32];
        let n = seed.len().min(32);
        buf[..n].copy_from_slice(&seed[..n]);
        let rng = ChaCha20Rng::from_seed(buf);
        buf.zeroize();
        KeyStream { rng }
    }

    /// Draws the next `(key, nonce)` pair, advancing the generator.
    pub fn next_pair(&mut self) -> (Key, Nonce) {
        let mut key = [0u8; 32];
        let mut nonce = [0u8; 12];
        self.rng.fill_bytes(&mut key);
        self.rng.fill_bytes(&mut nonce);
        (key, nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_seeds_produce_identical_streams() {
        let seed = b"0123456789abcdef0123456789abcdef";
        let mut a = KeyStream::new(seed);
        let mut b = KeyStream::new(seed);
        for _ in 0..8 {
            assert_eq!(a.next_pair(), b.next_pair());
        }
    }

    #[test]
    fn successive_pairs_differ() {
        let mut ks = KeyStream::new(b"some handshake seed, 32+ bytes!");
        let (k1, n1) = ks.next_pair();
        let (k2, n2) = ks.next_pair();
        assert_ne!(k1, k2);
        assert_ne!(n1, n2);
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = KeyStream::new(b"seed-one-that-is-32-bytes-long!");
        let mut b = KeyStream::new(b"seed-two-that-is-32-bytes-long!");
        assert_ne!(a.next_pair(), b.next_pair());
    }
}
