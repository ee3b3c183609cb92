//! The gateway protocol: opcodes and response codes.
//!
//! Frame layout in both directions: a big-endian u16 size covering the
//! opcode and payload, then a little-endian u16 opcode. Once a session
//! is authenticated those four header bytes pass through the
//! [`crate::obfuscator::Obfuscator`]; payloads are never obfuscated.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

/// Size of the wire header (u16 size + u16 opcode) in each direction.
pub const HEADER_SIZE: usize = 4;

/// The opcodes the gateway session handles.
#[repr(u16)]
#[derive(TryFromPrimitive, IntoPrimitive, Debug, Serialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(into = "u16")]
pub enum OpCode {
    CmsgCharCreate = 0x036,
    CmsgCharEnum = 0x037,
    CmsgCharDelete = 0x038,
    SmsgCharCreate = 0x03A,
    SmsgCharEnum = 0x03B,
    SmsgCharDelete = 0x03C,
    CmsgPlayerLogin = 0x03D,
    SmsgCharacterLoginFailed = 0x041,
    CmsgPing = 0x1DC,
    SmsgPong = 0x1DD,
    SmsgAuthChallenge = 0x1EC,
    CmsgAuthSession = 0x1ED,
    SmsgAuthResponse = 0x1EE,
    CmsgCharRename = 0x2C7,
    SmsgCharRename = 0x2C8,
}

/// Response codes carried by the auth and character messages.
#[repr(u8)]
#[derive(Serialize, IntoPrimitive, TryFromPrimitive, Debug, PartialEq, Eq, Clone, Copy)]
#[serde(into = "u8")]
pub enum ResponseCode {
    AuthOk = 0x0C,
    AuthFailed = 0x0D,
    AuthReject = 0x0E,
    AuthBadServerProof = 0x0F,
    AuthUnavailable = 0x10,
    AuthSystemError = 0x11,
    AuthWaitQueue = 0x1B,

    CharCreateSuccess = 0x2E,
    CharCreateError = 0x2F,
    CharCreateFailed = 0x30,
    CharCreateNameInUse = 0x31,

    CharDeleteSuccess = 0x39,
    CharDeleteFailed = 0x3A,

    CharLoginSuccess = 0x3D,
    CharLoginFailed = 0x41,

    CharNameSuccess = 0x57,
    CharNameFailure = 0x58,
    CharNameNoName = 0x59,
    CharNameTooShort = 0x5A,
    CharNameInvalid = 0x60,
    CharNameReserved = 0x63,
    CharNameProfane = 0x62,
}

#[cfg(test)]
mod test {
    use super::OpCode;

    #[test]
    pub fn opcode_roundtrip() {
        assert_eq!(OpCode::try_from(0x1EDu16).unwrap(), OpCode::CmsgAuthSession);
        assert_eq!(u16::from(OpCode::SmsgAuthResponse), 0x1EE);
    }
}
