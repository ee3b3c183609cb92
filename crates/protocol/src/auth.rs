//! The login ("grunt") protocol: opcodes and result codes.
//!
//! Frame layout, shared by every message in both directions:
//! a big-endian u16 size covering the opcode and payload, a one-byte
//! opcode, then `size - 1` bytes of payload.

use ebonhold_game::accounts::LoginFailure;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

/// All the known opcodes.
#[repr(u8)]
#[derive(TryFromPrimitive, IntoPrimitive, Debug, Serialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(into = "u8")]
pub enum AuthCommand {
    LoginChallenge = 0x00,
    LoginProof = 0x01,
    ReconnectChallenge = 0x02,
    ReconnectProof = 0x03,
    SurveyResult = 0x04,
    RealmList = 0x10,
    TransferInitiate = 0x30,
    TransferData = 0x31,
    TransferAccept = 0x32,
    TransferResume = 0x33,
    TransferCancel = 0x34,
}

/// Result codes shown to the client. The numeric values are dictated
/// by the client binary and must not change.
#[repr(u8)]
#[derive(Serialize, IntoPrimitive, TryFromPrimitive, Debug, PartialEq, Eq, Clone, Copy)]
#[serde(into = "u8")]
pub enum ReturnCode {
    Success = 0x00,
    FailGeneric = 0x01,
    FailCancelled = 0x02,
    FailBanned = 0x03,
    FailUnknownAccount = 0x04,
    FailIncorrectPassword = 0x05,
    FailAlreadyOnline = 0x06,
    SuccessSurvey = 0x07,
    FailDbBusy = 0x08,
    FailVersionInvalid = 0x09,
    FailVersionUpdate = 0x0A,
    FailInvalidServer = 0x0B,
    FailSuspended = 0x0C,
    FailNoTime = 0x0D,
    FailNoAccess = 0x0E,
    FailParentalControls = 0x0F,
}

impl From<LoginFailure> for ReturnCode {
    fn from(f: LoginFailure) -> Self {
        match f {
            LoginFailure::Suspended => ReturnCode::FailSuspended,
            LoginFailure::Banned => ReturnCode::FailBanned,
            LoginFailure::NoSubscription => ReturnCode::FailNoTime,
            LoginFailure::UnknownAccount => ReturnCode::FailUnknownAccount,
            LoginFailure::IncorrectPassword => ReturnCode::FailIncorrectPassword,
            LoginFailure::AlreadyOnline => ReturnCode::FailAlreadyOnline,
            LoginFailure::NoAccess => ReturnCode::FailNoAccess,
            LoginFailure::VersionInvalid => ReturnCode::FailVersionInvalid,
            LoginFailure::DatabaseError => ReturnCode::FailDbBusy,
        }
    }
}

/// Largest chunk a single `TransferData` message may carry.
pub const MAX_TRANSFER_CHUNK: usize = 1500;

/// Security flag bits advertised in the login challenge.
pub const SECURITY_FLAG_PIN: u8 = 0x01;
