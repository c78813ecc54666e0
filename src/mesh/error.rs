//! Error handling for `meshrpc`, covering the authentication, routing,
//! transport and application error taxonomies of the wire protocol.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// Extension of the standard library's `Result` type, used to wrap its
/// error in a [`Error`].
pub trait ResultWrappedExt {
    type T;

    fn wrapped_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T>;
    fn wrapped(self, kind: ErrorKind) -> Result<Self::T>;
}

/// Extension of the standard library's `Result` type.
///
/// Different from [`ResultWrappedExt`], this trait drops the underlying
/// error type, which is useful when that type doesn't implement `Send`.
pub trait ResultSimpleExt {
    type T;

    fn simple(self, kind: ErrorKind) -> Result<Self::T>;
    fn simple_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T>;
}

impl<T, E> ResultWrappedExt for result::Result<T, E>
where
    E: Into<Box<dyn error::Error + Send + Sync>>,
{
    type T = T;

    fn wrapped(self, kind: ErrorKind) -> Result<Self::T> {
        self.map_err(|e| Error::wrapped(kind, e))
    }

    fn wrapped_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T> {
        self.map_err(|e| Error::wrapped(kind, format!("{}: {}", msg, e.into())))
    }
}

impl<T, E> ResultSimpleExt for result::Result<T, E> {
    type T = T;

    fn simple(self, kind: ErrorKind) -> Result<Self::T> {
        self.map_err(|_| Error::simple(kind))
    }

    fn simple_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T> {
        self.map_err(|_| Error::wrapped(kind, msg.to_owned()))
    }
}

/// Wrapper result type used throughout this crate.
pub type Result<T> = result::Result<T, Error>;

/// The error kinds carried on the wire inside response frames, grouped by
/// the taxonomy of spec §7.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    // -- authentication --
    /// The peer's public key is not present in the trusted key store.
    UntrustedPeer,
    /// The peer's public key is present under more than one friendly name.
    AmbiguousPeer,
    /// Handshake decryption or signature verification failed.
    BadHandshake,

    // -- routing --
    /// The `"service.method"` procedure string was malformed.
    BadProcedure,
    /// No peer (local, catalogued, root, or mesh) can service the call.
    NoRoute,

    // -- transport --
    /// The target peer disconnected while a call was in flight.
    PeerDisconnected,
    /// The call's configured timeout elapsed before a response arrived.
    Timeout,
    /// The runtime is shutting down.
    Shutdown,
    /// A lower-level I/O or codec failure.
    Communication,

    // -- application --
    /// An error surfaced by a local service implementation.
    Application,

    /// Catch-all for errors not otherwise classified (configuration,
    /// serialization, etc).
    Other,
}

/// The error type used throughout this crate.
pub struct Error {
    inner: ErrorInner,
}

enum ErrorInner {
    Simple(ErrorKind),
    Wrapped(ErrorKind, Box<dyn error::Error + Send + Sync>),
    Message(ErrorKind, String),
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ErrorInner::Simple(k) => write!(f, "Error::Simple({:?})", k),
            ErrorInner::Wrapped(k, e) => write!(f, "Error::Wrapped({:?}, {})", k, e),
            ErrorInner::Message(k, m) => write!(f, "Error::Message({:?}, {})", k, m),
        }
    }
}

impl Error {
    /// Returns an error not wrapping another error implementation, with
    /// kind `ErrorKind`.
    pub fn simple(kind: ErrorKind) -> Self {
        Error { inner: ErrorInner::Simple(kind) }
    }

    /// Wraps an arbitrary error in an `Error`, with kind `ErrorKind`.
    pub fn wrapped<E>(kind: ErrorKind, e: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Error { inner: ErrorInner::Wrapped(kind, e.into()) }
    }

    /// Builds an error from a plain message, with kind `ErrorKind`. Used
    /// for errors that cross the wire, where the original cause (if any)
    /// isn't `Send`/`'static` or doesn't need to be preserved.
    pub fn message<M: Into<String>>(kind: ErrorKind, msg: M) -> Self {
        Error { inner: ErrorInner::Message(kind, msg.into()) }
    }

    /// Returns a copy of the `ErrorKind` of this `Error`.
    pub fn kind(&self) -> ErrorKind {
        match &self.inner {
            ErrorInner::Simple(k) => *k,
            ErrorInner::Wrapped(k, _) => *k,
            ErrorInner::Message(k, _) => *k,
        }
    }

    /// Swaps the `ErrorKind` of this `Error`, keeping the underlying cause.
    pub fn swap_kind(self, k: ErrorKind) -> Self {
        let inner = match self.inner {
            ErrorInner::Simple(_) => ErrorInner::Simple(k),
            ErrorInner::Wrapped(_, e) => ErrorInner::Wrapped(k, e),
            ErrorInner::Message(_, m) => ErrorInner::Message(k, m),
        };
        Error { inner }
    }

    /// The message that should be carried in a wire response frame: the
    /// kind and cause, without any local stack context.
    pub fn wire_message(&self) -> String {
        match &self.inner {
            ErrorInner::Simple(k) => format!("{:?}", k),
            ErrorInner::Wrapped(k, e) => format!("{:?}: {}", k, e),
            ErrorInner::Message(k, m) => format!("{:?}: {}", k, m),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.wire_message())
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::wrapped(ErrorKind::Communication, e)
    }
}

impl error::Error for Error {}
