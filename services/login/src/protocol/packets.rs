//! Packet bodies for the login protocol and their codecs.
//!
//! Fixed-layout parts go through the shared bincode options; strings
//! and variable tails are read and written explicitly.

use bincode::Options;
use ebonhold_game::types::GameVersion;
use ebonhold_protocol::{
    auth::{AuthCommand, ReturnCode, SECURITY_FLAG_PIN},
    wow_bincode,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wow_srp6::Salt;

/// Protocol revision carried in the challenge; older clients are close
/// enough that patch transfers still work.
pub const PROTOCOL_VERSION: u8 = 8;

#[derive(Error, Debug)]
pub enum PacketError {
    #[error("payload truncated: wanted {wanted} bytes, got {got}")]
    Truncated { wanted: usize, got: usize },

    #[error("could not decode packet: {0}")]
    Decode(#[from] Box<bincode::ErrorKind>),

    #[error("username is not valid utf-8")]
    BadUsername,

    #[error("unexpected opcode {0:?}")]
    UnexpectedOpcode(AuthCommand),
}

/// The fixed prefix of a (re)connect challenge, before the username.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
struct ChallengeWire {
    protocol_version: u8,
    game: [u8; 4],
    major: u8,
    minor: u8,
    patch: u8,
    build: u16,
    platform: [u8; 4],
    os: [u8; 4],
    locale: [u8; 4],
    timezone_bias: u32,
    ip: [u8; 4],
    username_len: u8,
}

const CHALLENGE_WIRE_SIZE: usize = 31;

/// A login or reconnect challenge from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRequest {
    pub protocol_version: u8,
    pub game: [u8; 4],
    pub version: GameVersion,
    pub platform: [u8; 4],
    pub os: [u8; 4],
    pub locale: [u8; 4],
    pub timezone_bias: u32,
    pub ip: [u8; 4],
    pub username: String,
}

impl ChallengeRequest {
    fn read(payload: &[u8]) -> Result<Self, PacketError> {
        if payload.len() < CHALLENGE_WIRE_SIZE {
            return Err(PacketError::Truncated {
                wanted: CHALLENGE_WIRE_SIZE,
                got: payload.len(),
            });
        }

        let wire: ChallengeWire = wow_bincode().deserialize(payload)?;
        let name_end = CHALLENGE_WIRE_SIZE + wire.username_len as usize;

        if payload.len() < name_end {
            return Err(PacketError::Truncated {
                wanted: name_end,
                got: payload.len(),
            });
        }

        let username = std::str::from_utf8(&payload[CHALLENGE_WIRE_SIZE..name_end])
            .map_err(|_| PacketError::BadUsername)?
            .to_string();

        Ok(Self {
            protocol_version: wire.protocol_version,
            game: wire.game,
            version: GameVersion {
                major: wire.major,
                minor: wire.minor,
                patch: wire.patch,
                build: wire.build,
            },
            platform: wire.platform,
            os: wire.os,
            locale: wire.locale,
            timezone_bias: wire.timezone_bias,
            ip: wire.ip,
            username,
        })
    }

    /// Serialize for the wire; used by the tests that drive a full
    /// handshake as a client.
    pub fn write(&self) -> Vec<u8> {
        let wire = ChallengeWire {
            protocol_version: self.protocol_version,
            game: self.game,
            major: self.version.major,
            minor: self.version.minor,
            patch: self.version.patch,
            build: self.version.build,
            platform: self.platform,
            os: self.os,
            locale: self.locale,
            timezone_bias: self.timezone_bias,
            ip: self.ip,
            username_len: self.username.len() as u8,
        };

        let mut payload = wow_bincode().serialize(&wire).expect("fixed layout");
        payload.extend_from_slice(self.username.as_bytes());
        payload
    }
}

/// Second-factor block appended to a login proof.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinProof {
    pub client_salt: [u8; 16],
    pub pin_hash: [u8; 20],
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
struct LoginProofWire {
    public_key: [u8; 32],
    proof: [u8; 20],
    client_checksum: [u8; 20],
    key_count: u8,
    security_flags: u8,
}

const LOGIN_PROOF_WIRE_SIZE: usize = 74;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginProof {
    pub public_key: [u8; 32],
    pub proof: [u8; 20],
    pub client_checksum: [u8; 20],
    pub key_count: u8,
    pub pin: Option<PinProof>,
}

impl LoginProof {
    fn read(payload: &[u8]) -> Result<Self, PacketError> {
        if payload.len() < LOGIN_PROOF_WIRE_SIZE {
            return Err(PacketError::Truncated {
                wanted: LOGIN_PROOF_WIRE_SIZE,
                got: payload.len(),
            });
        }

        let wire: LoginProofWire = wow_bincode().deserialize(payload)?;

        let pin = if wire.security_flags & SECURITY_FLAG_PIN != 0 {
            let rest = &payload[LOGIN_PROOF_WIRE_SIZE..];
            if rest.len() < 36 {
                return Err(PacketError::Truncated {
                    wanted: LOGIN_PROOF_WIRE_SIZE + 36,
                    got: payload.len(),
                });
            }
            Some(wow_bincode().deserialize(rest)?)
        } else {
            None
        };

        Ok(Self {
            public_key: wire.public_key,
            proof: wire.proof,
            client_checksum: wire.client_checksum,
            key_count: wire.key_count,
            pin,
        })
    }

    pub fn write(&self) -> Vec<u8> {
        let wire = LoginProofWire {
            public_key: self.public_key,
            proof: self.proof,
            client_checksum: self.client_checksum,
            key_count: self.key_count,
            security_flags: if self.pin.is_some() {
                SECURITY_FLAG_PIN
            } else {
                0
            },
        };

        let mut payload = wow_bincode().serialize(&wire).expect("fixed layout");
        if let Some(pin) = &self.pin {
            payload.extend_from_slice(&wow_bincode().serialize(pin).expect("fixed layout"));
        }
        payload
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectProof {
    pub proof_data: [u8; 16],
    pub client_proof: [u8; 20],
    pub client_checksum: [u8; 20],
    pub key_count: u8,
}

const RECONNECT_PROOF_WIRE_SIZE: usize = 57;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurveyResult {
    pub survey_id: u32,
    pub error: u8,
    pub data: Vec<u8>,
}

impl SurveyResult {
    fn read(payload: &[u8]) -> Result<Self, PacketError> {
        if payload.len() < 7 {
            return Err(PacketError::Truncated {
                wanted: 7,
                got: payload.len(),
            });
        }

        let (survey_id, error, len): (u32, u8, u16) = wow_bincode().deserialize(payload)?;
        let end = 7 + len as usize;

        if payload.len() < end {
            return Err(PacketError::Truncated {
                wanted: end,
                got: payload.len(),
            });
        }

        Ok(Self {
            survey_id,
            error,
            data: payload[7..end].to_vec(),
        })
    }
}

/// The messages the login server accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    LoginChallenge(ChallengeRequest),
    ReconnectChallenge(ChallengeRequest),
    LoginProof(LoginProof),
    ReconnectProof(ReconnectProof),
    SurveyResult(SurveyResult),
    RealmListRequest,
    TransferAccept,
    TransferResume { offset: u64 },
    TransferCancel,
}

impl ClientMessage {
    pub fn read(command: AuthCommand, payload: &[u8]) -> Result<Self, PacketError> {
        match command {
            AuthCommand::LoginChallenge => {
                ChallengeRequest::read(payload).map(ClientMessage::LoginChallenge)
            }
            AuthCommand::ReconnectChallenge => {
                ChallengeRequest::read(payload).map(ClientMessage::ReconnectChallenge)
            }
            AuthCommand::LoginProof => LoginProof::read(payload).map(ClientMessage::LoginProof),
            AuthCommand::ReconnectProof => {
                if payload.len() < RECONNECT_PROOF_WIRE_SIZE {
                    return Err(PacketError::Truncated {
                        wanted: RECONNECT_PROOF_WIRE_SIZE,
                        got: payload.len(),
                    });
                }
                Ok(ClientMessage::ReconnectProof(
                    wow_bincode().deserialize(payload)?,
                ))
            }
            AuthCommand::SurveyResult => {
                SurveyResult::read(payload).map(ClientMessage::SurveyResult)
            }
            AuthCommand::RealmList => Ok(ClientMessage::RealmListRequest),
            AuthCommand::TransferAccept => Ok(ClientMessage::TransferAccept),
            AuthCommand::TransferResume => {
                if payload.len() < 8 {
                    return Err(PacketError::Truncated {
                        wanted: 8,
                        got: payload.len(),
                    });
                }
                let offset: u64 = wow_bincode().deserialize(payload)?;
                Ok(ClientMessage::TransferResume { offset })
            }
            AuthCommand::TransferCancel => Ok(ClientMessage::TransferCancel),
            c => Err(PacketError::UnexpectedOpcode(c)),
        }
    }
}

/// Second-factor data advertised in the login challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinChallenge {
    pub grid_seed: u32,
    pub salt: [u8; 16],
}

/// One realm as sent in the realm list.
#[derive(Debug, Clone, PartialEq)]
pub struct RealmEntry {
    pub realm_type: u8,
    pub locked: bool,
    pub flags: u8,
    pub name: String,
    pub address: String,
    pub population: f32,
    pub character_count: u8,
    pub category: u8,
    pub realm_id: u8,
}

impl RealmEntry {
    fn write(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.realm_type);
        buffer.push(self.locked as u8);
        buffer.push(self.flags);
        buffer.extend_from_slice(self.name.as_bytes());
        buffer.push(0);
        buffer.extend_from_slice(self.address.as_bytes());
        buffer.push(0);
        buffer.extend_from_slice(&self.population.to_le_bytes());
        buffer.push(self.character_count);
        buffer.push(self.category);
        buffer.push(self.realm_id);
    }

    fn wire_size(&self) -> usize {
        3 + self.name.len() + 1 + self.address.len() + 1 + 4 + 3
    }
}

/// The messages the login server sends.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    LoginChallengeOk {
        b_pub: [u8; 32],
        g: Vec<u8>,
        n: Vec<u8>,
        salt: Salt,
        checksum_salt: [u8; 16],
        pin: Option<PinChallenge>,
    },
    LoginChallengeFail {
        result: ReturnCode,
    },
    LoginProofOk {
        server_proof: [u8; 20],
        account_flags: u32,
        survey_id: u32,
        login_flags: u16,
    },
    LoginProofFail {
        result: ReturnCode,
    },
    ReconnectChallengeOk {
        salt: [u8; 16],
        checksum_salt: [u8; 16],
    },
    ReconnectChallengeFail {
        result: ReturnCode,
    },
    ReconnectProof {
        result: ReturnCode,
    },
    RealmList {
        realms: Vec<RealmEntry>,
    },
    TransferInitiate {
        name: String,
        size: u64,
        md5: [u8; 16],
    },
    TransferData {
        chunk: Vec<u8>,
    },
}

impl ServerMessage {
    pub fn opcode(&self) -> AuthCommand {
        match self {
            ServerMessage::LoginChallengeOk { .. } | ServerMessage::LoginChallengeFail { .. } => {
                AuthCommand::LoginChallenge
            }
            ServerMessage::LoginProofOk { .. } | ServerMessage::LoginProofFail { .. } => {
                AuthCommand::LoginProof
            }
            ServerMessage::ReconnectChallengeOk { .. }
            | ServerMessage::ReconnectChallengeFail { .. } => AuthCommand::ReconnectChallenge,
            ServerMessage::ReconnectProof { .. } => AuthCommand::ReconnectProof,
            ServerMessage::RealmList { .. } => AuthCommand::RealmList,
            ServerMessage::TransferInitiate { .. } => AuthCommand::TransferInitiate,
            ServerMessage::TransferData { .. } => AuthCommand::TransferData,
        }
    }

    fn body(&self) -> Vec<u8> {
        let mut body = Vec::new();

        match self {
            ServerMessage::LoginChallengeOk {
                b_pub,
                g,
                n,
                salt,
                checksum_salt,
                pin,
            } => {
                body.push(0); // unknown
                body.push(ReturnCode::Success.into());
                body.extend_from_slice(b_pub);
                body.push(g.len() as u8);
                body.extend_from_slice(g);
                body.push(n.len() as u8);
                body.extend_from_slice(n);
                body.extend_from_slice(&salt.0);
                body.extend_from_slice(checksum_salt);

                match pin {
                    Some(pin) => {
                        body.push(SECURITY_FLAG_PIN);
                        body.extend_from_slice(&pin.grid_seed.to_le_bytes());
                        body.extend_from_slice(&pin.salt);
                    }
                    None => body.push(0),
                }
            }
            ServerMessage::LoginChallengeFail { result } => {
                body.push(0); // unknown
                body.push((*result).into());
            }
            ServerMessage::LoginProofOk {
                server_proof,
                account_flags,
                survey_id,
                login_flags,
            } => {
                body.push(ReturnCode::Success.into());
                body.extend_from_slice(server_proof);
                body.extend_from_slice(&account_flags.to_le_bytes());
                body.extend_from_slice(&survey_id.to_le_bytes());
                body.extend_from_slice(&login_flags.to_le_bytes());
            }
            ServerMessage::LoginProofFail { result } => {
                body.push((*result).into());
            }
            ServerMessage::ReconnectChallengeOk {
                salt,
                checksum_salt,
            } => {
                body.push(ReturnCode::Success.into());
                body.extend_from_slice(salt);
                body.extend_from_slice(checksum_salt);
            }
            ServerMessage::ReconnectChallengeFail { result } => {
                body.push((*result).into());
            }
            ServerMessage::ReconnectProof { result } => {
                body.push((*result).into());
            }
            ServerMessage::RealmList { realms } => {
                let entries: usize = realms.iter().map(RealmEntry::wire_size).sum();
                // trailing unknown u16 is included in the size field
                let size = (4 + 2 + entries + 2) as u16;
                body.extend_from_slice(&size.to_le_bytes());
                body.extend_from_slice(&0u32.to_le_bytes());
                body.extend_from_slice(&(realms.len() as u16).to_le_bytes());

                for realm in realms {
                    realm.write(&mut body);
                }

                body.extend_from_slice(&0u16.to_le_bytes());
            }
            ServerMessage::TransferInitiate { name, size, md5 } => {
                body.push(name.len() as u8);
                body.extend_from_slice(name.as_bytes());
                body.extend_from_slice(&size.to_le_bytes());
                body.extend_from_slice(md5);
            }
            ServerMessage::TransferData { chunk } => {
                body.extend_from_slice(&(chunk.len() as u16).to_le_bytes());
                body.extend_from_slice(chunk);
            }
        }

        body
    }

    /// The complete frame: size, opcode, body.
    pub fn to_frame(&self) -> Vec<u8> {
        super::write_frame(self.opcode(), &self.body())
    }
}

#[cfg(test)]
mod test {
    use bincode::Options;
    use ebonhold_game::types::GameVersion;
    use ebonhold_protocol::{auth::AuthCommand, wow_bincode};
    use wow_srp6::Salt;

    use super::{
        ChallengeRequest, ChallengeWire, ClientMessage, LoginProof, PinProof, RealmEntry,
        ReturnCode, ServerMessage, CHALLENGE_WIRE_SIZE,
    };

    fn challenge() -> ChallengeRequest {
        ChallengeRequest {
            protocol_version: 8,
            game: *b"WoW\0",
            version: GameVersion {
                major: 1,
                minor: 12,
                patch: 1,
                build: 5875,
            },
            platform: *b"68x\0",
            os: *b"niW\0",
            locale: *b"SUne",
            timezone_bias: 60,
            ip: [127, 0, 0, 1],
            username: "ALICE".to_string(),
        }
    }

    #[test]
    pub fn challenge_wire_size_matches() {
        let wire = ChallengeWire {
            protocol_version: 0,
            game: [0; 4],
            major: 0,
            minor: 0,
            patch: 0,
            build: 0,
            platform: [0; 4],
            os: [0; 4],
            locale: [0; 4],
            timezone_bias: 0,
            ip: [0; 4],
            username_len: 0,
        };
        let size = wow_bincode().serialized_size(&wire).unwrap();
        assert_eq!(size as usize, CHALLENGE_WIRE_SIZE);
    }

    #[test]
    pub fn challenge_roundtrip() {
        let request = challenge();
        let payload = request.write();
        let parsed = ClientMessage::read(AuthCommand::LoginChallenge, &payload).unwrap();
        assert_eq!(parsed, ClientMessage::LoginChallenge(request));
    }

    #[test]
    pub fn challenge_truncated_username_rejected() {
        let mut payload = challenge().write();
        payload.truncate(payload.len() - 2);
        assert!(ClientMessage::read(AuthCommand::LoginChallenge, &payload).is_err());
    }

    #[test]
    pub fn login_proof_with_pin_roundtrip() {
        let proof = LoginProof {
            public_key: [1; 32],
            proof: [2; 20],
            client_checksum: [3; 20],
            key_count: 0,
            pin: Some(PinProof {
                client_salt: [4; 16],
                pin_hash: [5; 20],
            }),
        };

        let payload = proof.write();
        assert_eq!(payload.len(), 74 + 36);
        let parsed = ClientMessage::read(AuthCommand::LoginProof, &payload).unwrap();
        assert_eq!(parsed, ClientMessage::LoginProof(proof));
    }

    #[test]
    pub fn login_proof_without_pin_roundtrip() {
        let proof = LoginProof {
            public_key: [1; 32],
            proof: [2; 20],
            client_checksum: [3; 20],
            key_count: 0,
            pin: None,
        };

        let payload = proof.write();
        assert_eq!(payload.len(), 74);
        let parsed = ClientMessage::read(AuthCommand::LoginProof, &payload).unwrap();
        assert_eq!(parsed, ClientMessage::LoginProof(proof));
    }

    #[test]
    pub fn challenge_ok_layout() {
        let message = ServerMessage::LoginChallengeOk {
            b_pub: [7; 32],
            g: vec![7],
            n: vec![9; 32],
            salt: Salt([1; 32]),
            checksum_salt: [2; 16],
            pin: None,
        };

        let frame = message.to_frame();
        // size (2) + opcode + unknown + result + B(32) + g_len + g(1)
        // + n_len + n(32) + salt(32) + checksum_salt(16) + flags
        assert_eq!(frame.len(), 2 + 1 + 2 + 32 + 2 + 33 + 32 + 16 + 1);
        assert_eq!(frame[2], 0x00); // opcode
        assert_eq!(&frame[3..5], &[0, 0]); // unknown, SUCCESS
        assert_eq!(&frame[5..37], &[7; 32]); // B
        assert_eq!(frame[37], 1); // g_len
        assert_eq!(frame[38], 7); // g
        assert_eq!(frame[39], 32); // n_len
        assert_eq!(&frame[72..104], &[1; 32]); // salt
        assert_eq!(&frame[104..120], &[2; 16]); // checksum salt
        assert_eq!(frame[120], 0); // security flags
    }

    #[test]
    pub fn proof_response_layout() {
        let message = ServerMessage::LoginProofOk {
            server_proof: [
                177, 50, 224, 237, 37, 4, 196, 159, 100, 31, 30, 14, 198, 45, 137, 158, 228, 82,
                244, 140,
            ],
            account_flags: 0x0080_0000,
            survey_id: 0,
            login_flags: 0,
        };

        let expected = [
            0x00, 0x20, // size 32, big-endian
            1, 0, // opcode, result
            177, 50, 224, 237, 37, 4, 196, 159, 100, 31, 30, 14, 198, 45, 137, 158, 228, 82, 244,
            140, // M2
            0, 0, 128, 0, // account flags
            0, 0, 0, 0, // survey id
            0, 0, // login flags
        ];

        assert_eq!(message.to_frame(), expected);
    }

    #[test]
    pub fn realm_entry_layout() {
        let realm = RealmEntry {
            realm_type: 0x01,
            locked: false,
            flags: 0,
            name: "Blackrock".into(),
            address: "51.178.64.97:8095".into(),
            population: 0f32,
            character_count: 0,
            category: 8,
            realm_id: 2,
        };

        let expected = [
            0x01, 0x00, 0x00, 0x42, 0x6c, 0x61, 0x63, 0x6b, 0x72, 0x6f, 0x63, 0x6b, 0x00, 0x35,
            0x31, 0x2e, 0x31, 0x37, 0x38, 0x2e, 0x36, 0x34, 0x2e, 0x39, 0x37, 0x3a, 0x38, 0x30,
            0x39, 0x35, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0x02,
        ];

        let mut buffer = Vec::new();
        realm.write(&mut buffer);
        assert_eq!(buffer, expected);
        assert_eq!(realm.wire_size(), expected.len());
    }

    #[test]
    pub fn realm_list_sizes() {
        let empty = ServerMessage::RealmList { realms: Vec::new() };
        let frame = empty.to_frame();
        // body: size u16, unknown u32, count u16, footer u16
        assert_eq!(&frame[3..], &[8, 0, 0, 0, 0, 0, 0, 0, 0, 0]);

        let one = ServerMessage::RealmList {
            realms: vec![RealmEntry {
                realm_type: 0x01,
                locked: false,
                flags: 0,
                name: "Blackrock".into(),
                address: "51.178.64.97:8095".into(),
                population: 0f32,
                character_count: 0,
                category: 8,
                realm_id: 3,
            }],
        };
        let frame = one.to_frame();
        assert_eq!(&frame[3..11], &[46, 0, 0, 0, 0, 0, 1, 0]);
    }

    #[test]
    pub fn unknown_account_reply_layout() {
        let message = ServerMessage::LoginChallengeFail {
            result: ReturnCode::FailUnknownAccount,
        };
        assert_eq!(message.to_frame(), [0x00, 0x03, 0x00, 0x00, 0x04]);
    }

    #[test]
    pub fn transfer_initiate_layout() {
        let message = ServerMessage::TransferInitiate {
            name: "Patch".into(),
            size: 0x1234,
            md5: [9; 16],
        };

        let frame = message.to_frame();
        assert_eq!(frame[2], 0x30);
        assert_eq!(frame[3], 5); // name length
        assert_eq!(&frame[4..9], b"Patch");
        assert_eq!(&frame[9..17], &0x1234u64.to_le_bytes());
        assert_eq!(&frame[17..33], &[9; 16]);
    }
}
