//! The mutual-authentication handshake of spec §4.2 / §6.2.
//!
//! Only the session seed is RSA-OAEP-encrypted; the accompanying public
//! key and signature travel in the clear within the same frame. See
//! `SPEC_FULL.md` §4.2 for why: embedding a serialized `{seed, pubkey,
//! signature}` tuple inside a single OAEP block doesn't fit once the
//! modulus is large enough to hold a meaningful RSA public key DER
//! alongside a 32+ byte seed and OAEP's own padding overhead, and only the
//! seed needs confidentiality in the first place.

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::mesh::communication::socket::Socket;
use crate::mesh::crypto::{KeyPair, PublicKey, Signature};
use crate::mesh::error::{Error, ErrorKind, Result, ResultWrappedExt};
use crate::mesh::trust::{PeerName, TrustedKeyStore};

/// Bytes of random seed material generated by the initiator (spec §6.2:
/// "seed: bytes[≥32]").
pub const SEED_LEN: usize = 32;

#[derive(Serialize, Deserialize)]
struct HandshakeToken {
    encrypted_seed: Vec<u8>,
    public_key: Vec<u8>,
    signature: Vec<u8>,
}

/// The outcome of a successful handshake from either side: the shared
/// seed, and (for the acceptor) the friendly name resolved from the
/// trusted key store.
pub struct HandshakeOutcome {
    pub peer_name: PeerName,
    pub seed: Vec<u8>,
}

/// Runs the initiator side of the handshake (spec §4.2: "Initiated by the
/// connecting side"). `my_name` is this node's own friendly name, sent
/// back by no one — the acceptor learns the initiator's identity purely
/// from the signed public key, per spec.
pub async fn initiate(
    sock: &mut Socket,
    my_keys: &KeyPair,
    responder_key: &PublicKey,
) -> Result<Vec<u8>> {
    let mut seed = vec![0u8; SEED_LEN];
    OsRng.fill_bytes(&mut seed);

    let signature = my_keys.sign(&seed);
    let encrypted_seed = responder_key.encrypt(&seed).wrapped(ErrorKind::BadHandshake)?;

    let token = HandshakeToken {
        encrypted_seed,
        public_key: my_keys.public_key().as_bytes().to_vec(),
        signature: signature.to_bytes(),
    };
    let bytes = bincode::serialize(&token).wrapped(ErrorKind::BadHandshake)?;
    sock.write_frame(&bytes).await?;

    Ok(seed)
}

/// Runs the acceptor side of the handshake (spec §4.2): decrypts the
/// seed, verifies the signature, and resolves the claimed public key
/// against `trust`, failing with `UntrustedPeer`/`AmbiguousPeer` as
/// appropriate.
pub async fn accept(
    sock: &mut Socket,
    my_keys: &KeyPair,
    trust: &TrustedKeyStore,
) -> Result<HandshakeOutcome> {
    let bytes = sock
        .read_frame()
        .await?
        .ok_or_else(|| Error::simple(ErrorKind::PeerDisconnected))?;
    let token: HandshakeToken = bincode::deserialize(&bytes).wrapped(ErrorKind::BadHandshake)?;

    let seed = my_keys.decrypt(&token.encrypted_seed)?.to_vec();

    let claimed_key = PublicKey::from_der(token.public_key)?;
    let signature = Signature::from_bytes(&token.signature)?;
    claimed_key.verify(&seed, &signature)?;

    let peer_name = trust.find_name_by_key(claimed_key.as_bytes())?;

    Ok(HandshakeOutcome { peer_name, seed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::communication::socket;

    async fn loopback_pair() -> (Socket, Socket) {
        let listener = socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_fut = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let client = socket::connect(addr).await.unwrap();
        let server = accept_fut.await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn handshake_succeeds_for_trusted_peer() {
        let (mut initiator_sock, mut acceptor_sock) = loopback_pair().await;

        let initiator_keys = KeyPair::generate(1024).unwrap();
        let acceptor_keys = KeyPair::generate(1024).unwrap();

        let trust = TrustedKeyStore::new();
        trust.insert(
            PeerName::from("initiator"),
            initiator_keys.public_key().clone(),
        ).unwrap();

        let acceptor_pub = acceptor_keys.public_key().clone();
        let init_task = tokio::spawn(async move {
            initiate(&mut initiator_sock, &initiator_keys, &acceptor_pub).await
        });

        let outcome = accept(&mut acceptor_sock, &acceptor_keys, &trust).await.unwrap();
        let initiator_seed = init_task.await.unwrap().unwrap();

        assert_eq!(outcome.peer_name, PeerName::from("initiator"));
        assert_eq!(outcome.seed, initiator_seed);
    }

    #[tokio::test]
    async fn untrusted_key_is_rejected() {
        let (mut initiator_sock, mut acceptor_sock) = loopback_pair().await;

        let initiator_keys = KeyPair::generate(1024).unwrap();
        let acceptor_keys = KeyPair::generate(1024).unwrap();
        let trust = TrustedKeyStore::new(); // nothing registered

        let acceptor_pub = acceptor_keys.public_key().clone();
        tokio::spawn(async move {
            let _ = initiate(&mut initiator_sock, &initiator_keys, &acceptor_pub).await;
        });

        let err = accept(&mut acceptor_sock, &acceptor_keys, &trust).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UntrustedPeer);
    }

    #[tokio::test]
    async fn duplicate_key_registration_is_ambiguous() {
        let (mut initiator_sock, mut acceptor_sock) = loopback_pair().await;

        let initiator_keys = KeyPair::generate(1024).unwrap();
        let acceptor_keys = KeyPair::generate(1024).unwrap();
        let trust = TrustedKeyStore::new();
        // `insert` itself refuses to create this state (see
        // `re_inserting_under_another_name_is_rejected` in trust.rs), so
        // reaching it here to exercise `accept`'s `AmbiguousPeer` path
        // requires the test-only unchecked insert.
        trust.insert_unchecked(PeerName::from("a"), initiator_keys.public_key().clone());
        trust.insert_unchecked(PeerName::from("b"), initiator_keys.public_key().clone());

        let acceptor_pub = acceptor_keys.public_key().clone();
        tokio::spawn(async move {
            let _ = initiate(&mut initiator_sock, &initiator_keys, &acceptor_pub).await;
        });

        let err = accept(&mut acceptor_sock, &acceptor_keys, &trust).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousPeer);
    }
}
