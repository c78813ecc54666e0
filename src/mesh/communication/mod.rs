//! Wire-level building blocks: framing, the handshake, the encrypted
//! channel built on top of it, message types, and the outbound queue.

pub mod channel;
pub mod handshake;
pub mod message;
pub mod secure_channel;
pub mod socket;

pub use channel::{ChannelRx, ChannelTx};
pub use message::{
    CatalogueFrame, RequestFrame, RequestId, ResponseFrame, ScopeId, TransactionFrame, WireError,
};
pub use secure_channel::SecureChannel;
pub use socket::{Listener, Socket, SocketReadHalf, SocketWriteHalf};
