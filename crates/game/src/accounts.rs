//! accounts
//!
//! The accounts module models user records as the login service sees
//! them and the trait through which they are fetched.

use derive_more::Display;
use enumflags2::{bitflags, BitFlags};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use wow_srp6::{Salt, Verifier};

/// An id for an account.
#[derive(
    Debug, Display, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct AccountId(pub u32);

/// The second factor configured for an account.
#[repr(u8)]
#[derive(
    TryFromPrimitive, IntoPrimitive, Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize,
)]
pub enum PinMethod {
    None = 0,
    Fixed = 1,
    Totp = 2,
}

/// Per-account status flags.
#[repr(u8)]
#[bitflags]
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum AccountFlags {
    Banned = 0b0000_0001,
    Suspended = 0b0000_0010,
    SurveyRequested = 0b0000_0100,
    Subscriber = 0b0000_1000,
    Verified = 0b0001_0000,
}

/// A user record as stored by the account service.
#[derive(Debug, PartialEq, Clone)]
pub struct Account {
    pub id: AccountId,
    /// Uppercased before any SRP6 calculation.
    pub username: String,
    pub salt: Salt,
    pub verifier: Verifier,
    pub pin_method: PinMethod,
    /// Fixed PIN digits, when `pin_method` is [`PinMethod::Fixed`].
    pub pin: Option<u32>,
    /// Base32 TOTP seed, when `pin_method` is [`PinMethod::Totp`].
    pub totp_token: Option<String>,
    pub flags: BitFlags<AccountFlags>,
    pub email: String,
}

impl Account {
    pub fn banned(&self) -> bool {
        self.flags.contains(AccountFlags::Banned)
    }

    pub fn suspended(&self) -> bool {
        self.flags.contains(AccountFlags::Suspended)
    }

    pub fn subscriber(&self) -> bool {
        self.flags.contains(AccountFlags::Subscriber)
    }

    pub fn survey_requested(&self) -> bool {
        self.flags.contains(AccountFlags::SurveyRequested)
    }
}

/// Errors surfaced to a client attempting to log in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoginFailure {
    Suspended,
    Banned,
    NoSubscription,
    UnknownAccount,
    IncorrectPassword,
    AlreadyOnline,
    NoAccess,
    VersionInvalid,
    DatabaseError,
}

#[cfg(test)]
mod test {
    use enumflags2::BitFlags;

    use super::AccountFlags;

    #[test]
    pub fn flag_roundtrip() {
        let flags = AccountFlags::Banned | AccountFlags::Subscriber;
        let bits = flags.bits();
        assert_eq!(BitFlags::<AccountFlags>::from_bits(bits).unwrap(), flags);
        assert!(flags.contains(AccountFlags::Banned));
        assert!(!flags.contains(AccountFlags::Suspended));
    }
}
