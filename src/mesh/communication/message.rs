//! Wire message types (spec §3 "Request frame"/"Response frame", §6.4
//! "Transaction frame").

use serde::{Deserialize, Serialize};

use crate::mesh::error::{ErrorKind, Result, ResultWrappedExt};

/// A globally-unique request id (spec §3 "Pending query table").
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[repr(transparent)]
pub struct RequestId(u64);

impl From<u64> for RequestId {
    #[inline]
    fn from(id: u64) -> Self {
        RequestId(id)
    }
}

impl From<RequestId> for u64 {
    #[inline]
    fn from(id: RequestId) -> Self {
        id.0
    }
}

/// An opaque, caller-chosen scope id (spec §3 "Scope identity").
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ScopeId(u64);

impl From<u64> for ScopeId {
    #[inline]
    fn from(id: u64) -> Self {
        ScopeId(id)
    }
}

impl From<ScopeId> for u64 {
    #[inline]
    fn from(id: ScopeId) -> Self {
        id.0
    }
}

/// A structured error, transport-safe to carry inside a [`ResponseFrame`]
/// (spec §7: "a structured error with kind and message").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&crate::mesh::error::Error> for WireError {
    fn from(e: &crate::mesh::error::Error) -> Self {
        WireError { kind: e.kind(), message: e.wire_message() }
    }
}

impl From<WireError> for crate::mesh::error::Error {
    fn from(e: WireError) -> Self {
        crate::mesh::error::Error::message(e.kind, e.message)
    }
}

/// `ErrorKind` needs to cross the wire inside [`WireError`].
impl Serialize for ErrorKind {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for ErrorKind {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let tag = u8::deserialize(d)?;
        ErrorKind::from_tag(tag).ok_or_else(|| serde::de::Error::custom("unknown error kind tag"))
    }
}

impl ErrorKind {
    fn from_tag(tag: u8) -> Option<ErrorKind> {
        use ErrorKind::*;
        const ALL: &[ErrorKind] = &[
            UntrustedPeer,
            AmbiguousPeer,
            BadHandshake,
            BadProcedure,
            NoRoute,
            PeerDisconnected,
            Timeout,
            Shutdown,
            Communication,
            Application,
            Other,
        ];
        ALL.get(tag as usize).copied()
    }
}

/// A request to invoke `procedure` (spec §3: `"service.method"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: RequestId,
    pub scope: Option<ScopeId>,
    pub procedure: String,
    pub args: Vec<u8>,
}

/// A response to a previously-sent [`RequestFrame`] with the same `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: RequestId,
    pub result: Option<Vec<u8>>,
    pub error: Option<WireError>,
}

/// The tagged union carried over the wire once a channel is authenticated
/// (spec §6.4: "tag `0` = request, `1` = response").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransactionFrame {
    Request(RequestFrame),
    Response(ResponseFrame),
}

impl TransactionFrame {
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("transaction frames always serialize")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).wrapped(ErrorKind::Communication)
    }
}

/// The catalogue frame exchanged once, right after the handshake, by both
/// sides (spec §6.3): the set of service names this node hosts locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogueFrame {
    pub services: Vec<String>,
}

impl CatalogueFrame {
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("catalogue frames always serialize")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).wrapped(ErrorKind::Communication)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_frame_round_trips_request() {
        let frame = TransactionFrame::Request(RequestFrame {
            id: RequestId::from(7),
            scope: Some(ScopeId::from(3)),
            procedure: "Echo.ping".into(),
            args: vec![1, 2, 3],
        });
        let bytes = frame.encode();
        let decoded = TransactionFrame::decode(&bytes).unwrap();
        match decoded {
            TransactionFrame::Request(r) => {
                assert_eq!(r.id, RequestId::from(7));
                assert_eq!(r.scope, Some(ScopeId::from(3)));
                assert_eq!(r.procedure, "Echo.ping");
                assert_eq!(r.args, vec![1, 2, 3]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn transaction_frame_round_trips_response_without_optionals() {
        let frame = TransactionFrame::Response(ResponseFrame {
            id: RequestId::from(1),
            result: None,
            error: None,
        });
        let bytes = frame.encode();
        let decoded = TransactionFrame::decode(&bytes).unwrap();
        match decoded {
            TransactionFrame::Response(r) => {
                assert!(r.result.is_none());
                assert!(r.error.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn catalogue_frame_round_trips() {
        let frame = CatalogueFrame { services: vec!["Echo".into(), "Stock".into()] };
        let bytes = frame.encode();
        let decoded = CatalogueFrame::decode(&bytes).unwrap();
        assert_eq!(decoded.services, frame.services);
    }

    #[test]
    fn error_kind_round_trips_through_wire_error() {
        let err = crate::mesh::error::Error::simple(ErrorKind::NoRoute);
        let wire: WireError = (&err).into();
        let bytes = bincode::serialize(&wire).unwrap();
        let back: WireError = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.kind, ErrorKind::NoRoute);
    }
}
