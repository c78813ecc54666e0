//! Cryptographic primitives backing the handshake (§4.2) and secure
//! channel (§4.3). Generalizes the ground truth's `crypto` module, which
//! wrapped `ring`-based ed25519 signatures and SHA-256/blake3 hashing for a
//! BFT log; here the same RSA key pair both signs the handshake and
//! encrypts the session seed, and per-frame confidentiality/integrity is
//! provided by AES-256-GCM keyed from a deterministic stream.

pub mod keys;
pub mod stream_keys;
pub mod cipher;

pub use keys::{KeyPair, PublicKey, Signature};
pub use stream_keys::KeyStream;
pub use cipher::FrameCipher;
