//! characters
//!
//! Character records and the trait through which the gateway talks to
//! the character service, plus name policing.

use std::collections::HashMap;

use derive_more::Display;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::accounts::AccountId;

#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CharacterId(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    pub account: AccountId,
    pub name: String,
    pub level: u8,
    pub race: u8,
    pub class: u8,
    pub gender: u8,

    pub skin_color: u8,
    pub face: u8,
    pub hair_style: u8,
    pub hair_color: u8,
    pub facial_style: u8,

    pub zone: u32,
    pub map: u32,
    pub position_x: f32,
    pub position_y: f32,
    pub position_z: f32,

    pub first_login: bool,
}

/// The payload of a character-creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterCreate {
    pub name: String,
    pub race: u8,
    pub class: u8,
    pub gender: u8,
    pub skin_color: u8,
    pub face: u8,
    pub hair_style: u8,
    pub hair_color: u8,
    pub facial_style: u8,
}

/// Per-realm character counts keyed by realm id, as shown on the realm
/// list screen.
pub type CharacterCounts = HashMap<u32, u8>;

#[derive(Error, Debug, Display, PartialEq, Eq, Clone)]
pub enum CharacterOpError {
    NameInUse,
    NameInvalid,
    NameReserved,
    NameProfane,
    Unknown(CharacterId),
    PersistError(String),
}

/// Compiled name policy, built once at startup and shared read-only.
///
/// Structural rules run first; the reserved and profanity sets are
/// regex lists from configuration.
#[derive(Debug)]
pub struct NamePolicy {
    reserved: RegexSet,
    profane: RegexSet,
}

impl NamePolicy {
    pub fn new<I, S>(reserved: I, profane: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            reserved: RegexSet::new(reserved)?,
            profane: RegexSet::new(profane)?,
        })
    }

    pub fn validate(&self, name: &str) -> Result<(), CharacterOpError> {
        if name.is_empty() || name.len() < 2 || name.len() > 12 {
            return Err(CharacterOpError::NameInvalid);
        }

        if !name.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CharacterOpError::NameInvalid);
        }

        let mut proper = name.to_ascii_lowercase();
        if let Some(first) = proper.get_mut(0..1) {
            first.make_ascii_uppercase();
        }

        if proper != name {
            return Err(CharacterOpError::NameInvalid);
        }

        let lowered = name.to_ascii_lowercase();

        if self.reserved.is_match(&lowered) {
            return Err(CharacterOpError::NameReserved);
        }

        if self.profane.is_match(&lowered) {
            return Err(CharacterOpError::NameProfane);
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use test_case::test_case;

    use super::{CharacterOpError, NamePolicy};

    fn policy() -> NamePolicy {
        NamePolicy::new(vec!["^admin", "^gamemaster$"], vec!["rude"]).expect("valid patterns")
    }

    #[test_case("Thrall", Ok(()) ; "proper name")]
    #[test_case("thrall", Err(CharacterOpError::NameInvalid) ; "missing capital")]
    #[test_case("ThRall", Err(CharacterOpError::NameInvalid) ; "stray capital")]
    #[test_case("A", Err(CharacterOpError::NameInvalid) ; "too short")]
    #[test_case("Abcdefghijklm", Err(CharacterOpError::NameInvalid) ; "too long")]
    #[test_case("Adm1n", Err(CharacterOpError::NameInvalid) ; "non alphabetic")]
    #[test_case("Adminthrall", Err(CharacterOpError::NameReserved) ; "reserved prefix")]
    #[test_case("Ruderick", Err(CharacterOpError::NameProfane) ; "profane substring")]
    pub fn name_policy(name: &str, expected: Result<(), CharacterOpError>) {
        assert_eq!(policy().validate(name), expected);
    }
}
