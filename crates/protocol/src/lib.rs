//! protocol
//!
//! Wire-level definitions for the client-facing protocols: opcodes and
//! result codes for the login protocol, opcodes and response codes for
//! the gateway protocol, and the post-authentication header obfuscator.
//! Packet bodies live with the services that parse them; this crate
//! holds what both ends of a test need to agree on.

use bincode::{config, DefaultOptions, Options};

#[cfg(feature = "auth")]
pub mod auth;

#[cfg(feature = "world")]
pub mod obfuscator;
#[cfg(feature = "world")]
pub mod world;

/// The bincode options every packet codec uses: fixed-width
/// little-endian integers, trailing bytes tolerated so structs can be
/// peeled off the front of a frame. Strings never go through this;
/// they are written explicitly with their terminating null.
pub fn wow_bincode() -> config::WithOtherTrailing<
    config::WithOtherIntEncoding<DefaultOptions, config::FixintEncoding>,
    config::AllowTrailing,
> {
    DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

/// Hard cap on a buffered inbound client message. The two-byte size
/// field makes anything larger unrepresentable.
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;
