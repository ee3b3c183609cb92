//! Packets received from the game client.

use bincode::Options;
use ebonhold_game::characters::CharacterCreate;
use ebonhold_protocol::{wow_bincode, world::OpCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum PacketError {
    #[error("payload truncated: wanted {wanted} bytes, got {got}")]
    Truncated { wanted: usize, got: usize },

    #[error("could not decode packet: {0}")]
    Decode(#[from] Box<bincode::ErrorKind>),

    #[error("string field is not valid utf-8")]
    BadString,

    #[error("missing string terminator")]
    UnterminatedString,

    #[error("addon block did not decompress: {0}")]
    AddonDecompress(String),

    #[error("unsupported opcode: {0:?}")]
    UnsupportedOpcode(OpCode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addon {
    pub name: String,
    pub has_signature: bool,
    pub crc: u32,
    pub crc2: u32,
}

/// CMSG_AUTH_SESSION: the world-auth packet sent right after the
/// gateway's challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub build: u32,
    pub server_id: u32,
    pub username: String,
    pub client_seed: [u8; 4],
    pub client_proof: [u8; 20],
    pub addons: Vec<Addon>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientPacket {
    AuthSession(AuthSession),
    Ping { seq: u32, latency: u32 },
    CharEnum,
    CharCreate(CharacterCreate),
    CharDelete { id: u64 },
    CharRename { id: u64, name: String },
    PlayerLogin { id: u64 },
}

/// Parse a payload for the given opcode.
pub fn read_packet(opcode: OpCode, payload: &[u8]) -> Result<ClientPacket, PacketError> {
    match opcode {
        OpCode::CmsgAuthSession => read_auth_session(payload),
        OpCode::CmsgPing => {
            let (seq, latency) = deserialize_exact(payload, 8)?;
            Ok(ClientPacket::Ping { seq, latency })
        }
        OpCode::CmsgCharEnum => Ok(ClientPacket::CharEnum),
        OpCode::CmsgCharCreate => read_char_create(payload),
        OpCode::CmsgCharDelete => {
            let id = deserialize_exact(payload, 8)?;
            Ok(ClientPacket::CharDelete { id })
        }
        OpCode::CmsgCharRename => {
            let (id, rest) = split_u64(payload)?;
            let (name, _) = read_cstring(rest)?;
            Ok(ClientPacket::CharRename { id, name })
        }
        OpCode::CmsgPlayerLogin => {
            let id = deserialize_exact(payload, 8)?;
            Ok(ClientPacket::PlayerLogin { id })
        }
        opcode => Err(PacketError::UnsupportedOpcode(opcode)),
    }
}

fn deserialize_exact<'a, T: Deserialize<'a>>(
    payload: &'a [u8],
    wanted: usize,
) -> Result<T, PacketError> {
    if payload.len() < wanted {
        return Err(PacketError::Truncated {
            wanted,
            got: payload.len(),
        });
    }

    Ok(wow_bincode().deserialize(payload)?)
}

fn split_u64(payload: &[u8]) -> Result<(u64, &[u8]), PacketError> {
    if payload.len() < 8 {
        return Err(PacketError::Truncated {
            wanted: 8,
            got: payload.len(),
        });
    }

    let value = u64::from_le_bytes(payload[..8].try_into().expect("sized slice"));
    Ok((value, &payload[8..]))
}

fn read_cstring(payload: &[u8]) -> Result<(String, &[u8]), PacketError> {
    let end = payload
        .iter()
        .position(|&b| b == 0)
        .ok_or(PacketError::UnterminatedString)?;

    let value = std::str::from_utf8(&payload[..end])
        .map_err(|_| PacketError::BadString)?
        .to_string();

    Ok((value, &payload[end + 1..]))
}

fn read_auth_session(payload: &[u8]) -> Result<ClientPacket, PacketError> {
    let (build, server_id): (u32, u32) = deserialize_exact(payload, 8)?;
    let (username, rest) = read_cstring(&payload[8..])?;

    if rest.len() < 24 {
        return Err(PacketError::Truncated {
            wanted: 24,
            got: rest.len(),
        });
    }

    let client_seed: [u8; 4] = rest[..4].try_into().expect("sized slice");
    let client_proof: [u8; 20] = rest[4..24].try_into().expect("sized slice");
    let addons = read_addons(&rest[24..])?;

    trace!("read auth session packet for {}", username);

    Ok(ClientPacket::AuthSession(AuthSession {
        build,
        server_id,
        username,
        client_seed,
        client_proof,
        addons,
    }))
}

fn read_char_create(payload: &[u8]) -> Result<ClientPacket, PacketError> {
    let (name, rest) = read_cstring(payload)?;

    if rest.len() < 8 {
        return Err(PacketError::Truncated {
            wanted: 8,
            got: rest.len(),
        });
    }

    Ok(ClientPacket::CharCreate(CharacterCreate {
        name,
        race: rest[0],
        class: rest[1],
        gender: rest[2],
        skin_color: rest[3],
        face: rest[4],
        hair_style: rest[5],
        hair_color: rest[6],
        facial_style: rest[7],
    }))
}

/// The addon block: a u32 decompressed size then a zlib stream of
/// null-terminated names with signature flags and CRCs.
fn read_addons(block: &[u8]) -> Result<Vec<Addon>, PacketError> {
    use std::io::Read;

    if block.is_empty() {
        return Ok(Vec::new());
    }

    if block.len() < 4 {
        return Err(PacketError::Truncated {
            wanted: 4,
            got: block.len(),
        });
    }

    let expected: u32 = wow_bincode().deserialize(&block[..4])?;
    let mut decoder = flate2::read::ZlibDecoder::new(&block[4..]);
    let mut unzipped = Vec::with_capacity(expected as usize);
    decoder
        .read_to_end(&mut unzipped)
        .map_err(|e| PacketError::AddonDecompress(e.to_string()))?;

    if unzipped.len() != expected as usize {
        return Err(PacketError::AddonDecompress(format!(
            "expected length {} got {}",
            expected,
            unzipped.len()
        )));
    }

    let count: u32 = deserialize_exact(&unzipped, 4)?;
    let mut rest = &unzipped[4..];
    let mut addons = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let (name, tail) = read_cstring(rest)?;

        if tail.len() < 9 {
            return Err(PacketError::Truncated {
                wanted: 9,
                got: tail.len(),
            });
        }

        let (has_sig, crc, crc2): (u8, u32, u32) = wow_bincode().deserialize(tail)?;
        addons.push(Addon {
            name,
            has_signature: has_sig == 1,
            crc,
            crc2,
        });
        rest = &tail[9..];
    }

    Ok(addons)
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use ebonhold_protocol::world::OpCode;

    use super::{read_packet, ClientPacket};

    fn compress(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    pub fn auth_session_payload(
        username: &str,
        client_seed: [u8; 4],
        client_proof: [u8; 20],
    ) -> Vec<u8> {
        let mut addons = Vec::new();
        addons.extend_from_slice(&1u32.to_le_bytes()); // count
        addons.extend_from_slice(b"Blizzard_AuctionUI\0");
        addons.push(1); // has signature
        addons.extend_from_slice(&0x4C1C_776Du32.to_le_bytes());
        addons.extend_from_slice(&0u32.to_le_bytes());

        let mut payload = Vec::new();
        payload.extend_from_slice(&5875u32.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(username.as_bytes());
        payload.push(0);
        payload.extend_from_slice(&client_seed);
        payload.extend_from_slice(&client_proof);
        payload.extend_from_slice(&(addons.len() as u32).to_le_bytes());
        payload.extend_from_slice(&compress(&addons));
        payload
    }

    #[test]
    pub fn auth_session_parses() {
        let payload = auth_session_payload("ALICE", [1, 2, 3, 4], [9; 20]);
        let packet = read_packet(OpCode::CmsgAuthSession, &payload).unwrap();

        let ClientPacket::AuthSession(session) = packet else {
            panic!("expected an auth session");
        };

        assert_eq!(session.build, 5875);
        assert_eq!(session.username, "ALICE");
        assert_eq!(session.client_seed, [1, 2, 3, 4]);
        assert_eq!(session.client_proof, [9; 20]);
        assert_eq!(session.addons.len(), 1);
        assert_eq!(session.addons[0].name, "Blizzard_AuctionUI");
        assert_eq!(session.addons[0].crc, 0x4C1C_776D);
    }

    #[test]
    pub fn truncated_auth_session_rejected() {
        let payload = auth_session_payload("ALICE", [1, 2, 3, 4], [9; 20]);
        assert!(read_packet(OpCode::CmsgAuthSession, &payload[..20]).is_err());
    }

    #[test]
    pub fn char_create_parses() {
        let mut payload = b"Thrall\0".to_vec();
        payload.extend_from_slice(&[2, 7, 0, 1, 2, 3, 4, 5]);

        let packet = read_packet(OpCode::CmsgCharCreate, &payload).unwrap();
        let ClientPacket::CharCreate(create) = packet else {
            panic!("expected a char create");
        };
        assert_eq!(create.name, "Thrall");
        assert_eq!(create.race, 2);
        assert_eq!(create.class, 7);
    }

    #[test]
    pub fn ping_parses() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&7u32.to_le_bytes());
        payload.extend_from_slice(&45u32.to_le_bytes());

        let packet = read_packet(OpCode::CmsgPing, &payload).unwrap();
        assert_eq!(packet, ClientPacket::Ping { seq: 7, latency: 45 });
    }

    #[test]
    pub fn server_opcodes_rejected() {
        assert!(read_packet(OpCode::SmsgPong, &[]).is_err());
    }
}
