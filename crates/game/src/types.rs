//! types
//!
//! This module contains types shared across services that don't
//! really fit elsewhere.

use std::fmt;

use num_enum::IntoPrimitive;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use strum_macros::EnumString;

#[allow(non_camel_case_types)]
#[repr(u8)]
#[derive(EnumString, IntoPrimitive, Copy, Clone, Debug, PartialEq, Eq)]
pub enum Locale {
    enUS = 0,
    koKR,
    frFR,
    deDE,
    zhCN,
    esES,
    esMX,
    ruRU,
}

/// A game version as reported in the login challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GameVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub build: u16,
}

impl fmt::Display for GameVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{} ({})",
            self.major, self.minor, self.patch, self.build
        )
    }
}

/// A 16-byte reference identifying a connected client.
///
/// The first byte encodes the index of the I/O service that owns the
/// connection, so events can be dispatched to the right executor
/// without a lookup; equality and hashing cover all 16 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientRef([u8; 16]);

impl ClientRef {
    pub fn generate(service_index: u8) -> Self {
        let mut data = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut data);
        data[0] = service_index;
        Self(data)
    }

    pub fn from_bytes(data: [u8; 16]) -> Self {
        Self(data)
    }

    pub fn service(&self) -> u8 {
        self.0[0]
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for ClientRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Display for ClientRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::ClientRef;

    #[test]
    pub fn service_index_in_first_byte() {
        let client = ClientRef::generate(7);
        assert_eq!(client.service(), 7);
        assert_eq!(client.as_bytes()[0], 7);
    }

    #[test]
    pub fn equality_covers_all_bytes() {
        let a = ClientRef::from_bytes([1; 16]);
        let mut bytes = [1; 16];
        bytes[15] = 2;
        let b = ClientRef::from_bytes(bytes);
        assert_ne!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.contains(&b));
        assert!(set.contains(&ClientRef::from_bytes([1; 16])));
    }
}
