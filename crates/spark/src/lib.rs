//! spark
//!
//! The inter-service RPC fabric. One framed TCP connection multiplexes
//! up to 255 logical channels; channel 0 is reserved for control
//! traffic (banner exchange, channel management, liveness pings).
//! Requests carry a 16-byte token correlating them with their reply;
//! each tracked request resolves exactly once, with a payload or an
//! enumerated error.

#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_import_braces
)]

mod channel;
mod handler;
mod message;
mod peer;
mod server;

pub use channel::ChannelHandle;
pub use handler::{Handler, HandlerRegistry, Link};
pub use message::{ControlMessage, MessageHeader, OpenResult, Token};
pub use peer::{Peer, PeerConfig};
pub use server::Server;

/// Outcomes delivered to request continuations. A tracked request ends
/// in a payload or exactly one of these.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcError {
    #[error("the remote peer is gone")]
    LinkGone,
    #[error("the request timed out")]
    TimedOut,
    #[error("the request was cancelled")]
    Cancelled,
    #[error("a network error occurred")]
    NetError,
    #[error("the channel was closed")]
    ChannelClosed,
    #[error("the peer sent an unexpected message type")]
    WrongMessageType,
}

/// Serialization options for spark payloads. The envelope is a fixed
/// binary layout (see [`MessageHeader`]); payloads are schema-encoded
/// with bincode's default varint options.
pub(crate) fn codec() -> impl bincode::Options + Copy {
    bincode::options()
}
