//! wow-srp6
//!
//! Implementation of the SRP6 variation used by the game's login
//! protocol, plus an RFC5054-compliant path selectable by [`Mode`].
//! Both the server and client roles are provided; the client role
//! exists so that handshakes can be exercised end to end.

#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_import_braces,
    unused_qualifications
)]

use num_bigint::BigUint;
use rand::{
    distributions::{Distribution, Standard},
    Rng,
};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

mod client;
mod generator;
mod server;
pub mod util;

pub use client::Client;
pub use generator::{Generator, Group};
pub use server::Server;
pub use util::Mode;

/// A salt is stored per-user and prevents dictionary attacks.
///
/// The bytes are kept in wire order: the order in which the client
/// receives them, which for the game variant is the little-endian
/// encoding of the salt integer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(pub [u8; 32]);

impl Distribution<Salt> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Salt {
        Salt(rng.gen())
    }
}

/// A verifier allows the server to check the validity of a password
/// proof without ever storing the password. Wire (little-endian) order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verifier(pub [u8; 32]);

impl From<&Verifier> for BigUint {
    fn from(v: &Verifier) -> Self {
        Self::from_bytes_le(&v.0)
    }
}

impl Verifier {
    /// Derive a verifier from a set of credentials and a salt using the
    /// game variant of the protocol.
    pub fn from_credentials(username: &str, password: &str, salt: &Salt) -> Self {
        let gen = Generator::new(Group::Game256);
        let v = util::generate_verifier(username, password, &gen, &salt.0, Mode::Game);
        Self(util::encode_le_padded(&v, 32).try_into().expect("padded to 32"))
    }

    /// Wrap raw little-endian verifier bytes, e.g. from an account store.
    pub fn from_raw(data: [u8; 32]) -> Self {
        Self(data)
    }
}

/// The shared key negotiated by a completed handshake.
///
/// The game variant always derives 40 bytes via the interleaved hash;
/// the RFC5054 path keeps the raw premaster bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionKey(pub Vec<u8>);

impl SessionKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 40]> for SessionKey {
    fn from(bytes: [u8; 40]) -> Self {
        Self(bytes.to_vec())
    }
}

/// Errors surfaced by the handshake.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Srp6Error {
    /// The peer's public ephemeral was zero or a multiple of the prime.
    #[error("public ephemeral key is zero or a multiple of the prime")]
    InvalidEphemeral,
}

/// Generate a fresh random salt.
pub fn generate_salt() -> Salt {
    rand::thread_rng().gen()
}

pub(crate) fn sha1_digest_20(data: impl AsRef<[u8]>) -> [u8; 20] {
    Sha1::digest(data.as_ref())
        .as_slice()
        .try_into()
        .expect("sha1 digests are 20 bytes")
}
