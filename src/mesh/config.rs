//! Configuration surface of spec §6.6: deserialized from TOML via `serde`,
//! the same way the ground truth loads its node configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::mesh::error::{ErrorKind, Result, ResultWrappedExt};

fn default_reconnect_delay_ms() -> u64 {
    5000
}

/// One remote peer this node knows about up front (spec §6.6 "Per-peer").
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub friendly_name: String,
    /// `host:port` of the peer's RPC backchannel, as handed back by the
    /// sign-in HTTP endpoint (spec §6.5) — that exchange itself is an
    /// external collaborator contract this crate only consumes, not a
    /// core module, so the resolved address is taken here as given.
    pub address: String,
    /// Number of forward channels to open to this peer (1-255).
    pub connections: u8,
    /// PKCS#1 DER-encoded public key, base64 in the config file.
    #[serde(with = "base64_bytes")]
    pub trusted_public_key: Vec<u8>,
    pub sign_in_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    /// Whether to open additional reverse channels after connecting (spec
    /// §4.10 connect path).
    #[serde(default)]
    pub open_reverse_channels: u8,
    /// Whether this peer is usable as a fallback route for services absent
    /// from the catalogue (spec §4.8 step 2, §6.6 `is_root`).
    #[serde(default)]
    pub is_root: bool,
}

/// Top-level configuration (spec §6.6).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub listen_address: String,
    pub listen_port: u16,
    /// Shared secret checked at sign-in; empty/absent disables the check.
    #[serde(default)]
    pub token: Option<String>,
    pub my_keys: KeyPathConfig,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    /// Milliseconds; `-1` disables the timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: i64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default)]
    pub allow_mesh: bool,
}

fn default_request_timeout_ms() -> i64 {
    30_000
}

/// Where this node's own RSA key pair lives on disk (spec §6.6: "generated
/// to disk if absent").
#[derive(Debug, Clone, Deserialize)]
pub struct KeyPathConfig {
    pub private_key_path: PathBuf,
    #[serde(default = "default_key_bits")]
    pub bits: usize,
}

fn default_key_bits() -> usize {
    crate::mesh::crypto::keys::DEFAULT_KEY_BITS
}

impl Config {
    /// Loads and parses a TOML configuration file (spec §6.6).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref()).wrapped(ErrorKind::Other)?;
        toml::from_str(&text).wrapped(ErrorKind::Other)
    }

    /// `None` if the configured timeout is the `-1` "infinite" sentinel.
    pub fn request_timeout(&self) -> Option<Duration> {
        if self.request_timeout_ms < 0 {
            None
        } else {
            Some(Duration::from_millis(self.request_timeout_ms as u64))
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinite_timeout_sentinel_maps_to_none() {
        let cfg = Config {
            listen_address: "127.0.0.1".into(),
            listen_port: 9000,
            token: None,
            my_keys: KeyPathConfig { private_key_path: PathBuf::from("keys.der"), bits: 2048 },
            peers: vec![],
            request_timeout_ms: -1,
            reconnect_delay_ms: 5000,
            allow_mesh: false,
        };
        assert!(cfg.request_timeout().is_none());
    }

    #[test]
    fn finite_timeout_converts_to_duration() {
        let cfg = Config {
            listen_address: "127.0.0.1".into(),
            listen_port: 9000,
            token: None,
            my_keys: KeyPathConfig { private_key_path: PathBuf::from("keys.der"), bits: 2048 },
            peers: vec![],
            request_timeout_ms: 2500,
            reconnect_delay_ms: 5000,
            allow_mesh: false,
        };
        assert_eq!(cfg.request_timeout(), Some(Duration::from_millis(2500)));
    }
}
