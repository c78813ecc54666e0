//! RSA key pairs: the identity primitive for handshake authentication
//! (spec §3 "Peer identity", §4.2 "Handshake").
//!
//! The same key pair signs the handshake token (PKCS#1 v1.5 / SHA-256) and
//! decrypts the session seed (RSA-OAEP / SHA-256), per spec §6.2.

use std::fs;
use std::path::Path;

use rand_core::OsRng;
use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey};
use rsa::pkcs1v15::{Signature as Pkcs1v15Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use signature::{SignatureEncoding, Signer, Verifier};
use zeroize::Zeroizing;

use crate::mesh::error::{Error, ErrorKind, Result, ResultWrappedExt};

/// The default modulus size used when generating a fresh key pair, per
/// spec §6.6 ("my_keys ... generated to disk if absent, 8192-bit").
pub const DEFAULT_KEY_BITS: usize = 8192;

/// A PKCS#1-encoded RSA public key, as exchanged during the handshake and
/// stored in the trusted key store.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct PublicKey {
    der: Vec<u8>,
}

impl PublicKey {
    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        // validate eagerly so a malformed key is rejected at the handshake
        // boundary rather than later, deep in a signature check.
        RsaPublicKey::from_pkcs1_der(&der).wrapped(ErrorKind::BadHandshake)?;
        Ok(PublicKey { der })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.der
    }

    fn to_rsa(&self) -> Result<RsaPublicKey> {
        RsaPublicKey::from_pkcs1_der(&self.der).wrapped(ErrorKind::BadHandshake)
    }

    /// Verifies `signature` over `message`, per spec §6.2.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        let key = self.to_rsa()?;
        let verifying_key = VerifyingKey::<Sha256>::new(key);
        verifying_key
            .verify(message, &signature.inner)
            .simple(ErrorKind::BadHandshake)
    }

    /// Encrypts `plaintext` (expected to be the handshake seed, a small
    /// fixed-size buffer, never the whole token) with RSA-OAEP/SHA-256 to
    /// this public key.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = self.to_rsa()?;
        key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
            .wrapped(ErrorKind::BadHandshake)
    }
}

/// A signature produced by [`KeyPair::sign`].
#[derive(Clone)]
pub struct Signature {
    inner: Pkcs1v15Signature,
}

impl Signature {
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.to_bytes().to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let inner = Pkcs1v15Signature::try_from(bytes).wrapped(ErrorKind::BadHandshake)?;
        Ok(Signature { inner })
    }
}

/// The local node's RSA key pair: the private half never leaves this type.
pub struct KeyPair {
    private: RsaPrivateKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generates a fresh key pair of `bits` modulus size. Expensive
    /// (seconds, for 8192-bit keys); run via
    /// [`crate::mesh::async_runtime::spawn_blocking`] from async contexts.
    pub fn generate(bits: usize) -> Result<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, bits).wrapped(ErrorKind::Other)?;
        Self::from_private(private)
    }

    fn from_private(private: RsaPrivateKey) -> Result<Self> {
        let rsa_public = RsaPublicKey::from(&private);
        let der = rsa_public
            .to_pkcs1_der()
            .wrapped(ErrorKind::Other)?
            .as_bytes()
            .to_vec();
        let public = PublicKey { der };
        Ok(KeyPair { private, public })
    }

    /// Loads a key pair from a PKCS#8 DER-encoded private key file,
    /// generating and persisting a fresh one if `path` doesn't exist, per
    /// spec §6.6.
    pub fn load_or_generate(path: &Path, bits: usize) -> Result<Self> {
        if path.exists() {
            let der = Zeroizing::new(fs::read(path).wrapped(ErrorKind::Other)?);
            let private =
                RsaPrivateKey::from_pkcs8_der(&der).wrapped(ErrorKind::Other)?;
            return Self::from_private(private);
        }
        let pair = Self::generate(bits)?;
        let der = pair
            .private
            .to_pkcs8_der()
            .wrapped(ErrorKind::Other)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).wrapped(ErrorKind::Other)?;
        }
        fs::write(path, der.as_bytes()).wrapped(ErrorKind::Other)?;
        Ok(pair)
    }

    /// Returns this node's public key, as exchanged during the handshake.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Signs `message` (the handshake seed) with PKCS#1 v1.5 / SHA-256.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let signing_key = SigningKey::<Sha256>::new(self.private.clone());
        Signature { inner: signing_key.sign(message) }
    }

    /// Decrypts an RSA-OAEP/SHA-256 ciphertext (the handshake seed) with
    /// this node's private key.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.private
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map(Zeroizing::new)
            .map_err(|e| Error::wrapped(ErrorKind::BadHandshake, format!("{e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1024 bits keeps these tests fast; production defaults to
    // `DEFAULT_KEY_BITS`.
    const TEST_BITS: usize = 1024;

    #[test]
    fn sign_and_verify_round_trip() {
        let pair = KeyPair::generate(TEST_BITS).unwrap();
        let msg = b"handshake seed goes here........";
        let sig = pair.sign(msg);
        pair.public_key().verify(msg, &sig).unwrap();
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let pair = KeyPair::generate(TEST_BITS).unwrap();
        let sig = pair.sign(b"original message");
        assert!(pair.public_key().verify(b"tampered message", &sig).is_err());
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let pair = KeyPair::generate(TEST_BITS).unwrap();
        let seed = b"0123456789abcdef0123456789abcdef";
        let ct = pair.public_key().encrypt(seed).unwrap();
        let pt = pair.decrypt(&ct).unwrap();
        assert_eq!(&pt[..], &seed[..]);
    }

    #[test]
    fn public_key_der_round_trips() {
        let pair = KeyPair::generate(TEST_BITS).unwrap();
        let der = pair.public_key().as_bytes().to_vec();
        let reloaded = PublicKey::from_der(der).unwrap();
        assert_eq!(reloaded.as_bytes(), pair.public_key().as_bytes());
    }
}
