//! Packets sent to the game client.

use ebonhold_game::characters::Character;
use ebonhold_protocol::world::{OpCode, ResponseCode};

#[derive(Debug, Clone, PartialEq)]
pub enum ServerPacket {
    /// Sent once on connect; carries the seed the client folds into
    /// its world-auth proof.
    AuthChallenge { seed: [u8; 4] },
    AuthResponse {
        code: ResponseCode,
        queue_position: Option<u32>,
    },
    Pong { seq: u32 },
    CharEnum(Vec<Character>),
    CharCreate(ResponseCode),
    CharDelete(ResponseCode),
    CharRename {
        code: ResponseCode,
        id: u64,
        name: String,
    },
    CharacterLoginFailed(ResponseCode),
}

impl ServerPacket {
    pub fn opcode(&self) -> OpCode {
        match self {
            ServerPacket::AuthChallenge { .. } => OpCode::SmsgAuthChallenge,
            ServerPacket::AuthResponse { .. } => OpCode::SmsgAuthResponse,
            ServerPacket::Pong { .. } => OpCode::SmsgPong,
            ServerPacket::CharEnum(_) => OpCode::SmsgCharEnum,
            ServerPacket::CharCreate(_) => OpCode::SmsgCharCreate,
            ServerPacket::CharDelete(_) => OpCode::SmsgCharDelete,
            ServerPacket::CharRename { .. } => OpCode::SmsgCharRename,
            ServerPacket::CharacterLoginFailed(_) => OpCode::SmsgCharacterLoginFailed,
        }
    }

    pub fn body(&self) -> Vec<u8> {
        let mut body = Vec::new();

        match self {
            ServerPacket::AuthChallenge { seed } => {
                body.extend_from_slice(seed);
            }
            ServerPacket::AuthResponse {
                code,
                queue_position,
            } => {
                body.push((*code).into());
                if let Some(position) = queue_position {
                    body.extend_from_slice(&position.to_le_bytes());
                }
            }
            ServerPacket::Pong { seq } => {
                body.extend_from_slice(&seq.to_le_bytes());
            }
            ServerPacket::CharEnum(characters) => {
                body.push(characters.len() as u8);
                for character in characters {
                    write_character(&mut body, character);
                }
            }
            ServerPacket::CharCreate(code)
            | ServerPacket::CharDelete(code)
            | ServerPacket::CharacterLoginFailed(code) => {
                body.push((*code).into());
            }
            ServerPacket::CharRename { code, id, name } => {
                body.push((*code).into());
                if *code == ResponseCode::CharNameSuccess {
                    body.extend_from_slice(&id.to_le_bytes());
                    body.extend_from_slice(name.as_bytes());
                    body.push(0);
                }
            }
        }

        body
    }
}

fn write_character(body: &mut Vec<u8>, character: &Character) {
    body.extend_from_slice(&character.id.0.to_le_bytes());
    body.extend_from_slice(character.name.as_bytes());
    body.push(0);
    body.push(character.race);
    body.push(character.class);
    body.push(character.gender);
    body.push(character.skin_color);
    body.push(character.face);
    body.push(character.hair_style);
    body.push(character.hair_color);
    body.push(character.facial_style);
    body.push(character.level);
    body.extend_from_slice(&character.zone.to_le_bytes());
    body.extend_from_slice(&character.map.to_le_bytes());
    body.extend_from_slice(&character.position_x.to_le_bytes());
    body.extend_from_slice(&character.position_y.to_le_bytes());
    body.extend_from_slice(&character.position_z.to_le_bytes());
    // guild, flags, first login, pet and equipment slots are not
    // populated by the character service yet
    body.extend_from_slice(&0u32.to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes());
    body.push(character.first_login as u8);
    body.extend_from_slice(&0u32.to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes());

    for _ in 0..20 {
        body.extend_from_slice(&0u32.to_le_bytes());
        body.push(0);
    }
}

#[cfg(test)]
mod test {
    use ebonhold_protocol::world::{OpCode, ResponseCode};

    use super::ServerPacket;

    #[test]
    pub fn auth_response_with_queue_position() {
        let packet = ServerPacket::AuthResponse {
            code: ResponseCode::AuthWaitQueue,
            queue_position: Some(3),
        };

        assert_eq!(packet.opcode(), OpCode::SmsgAuthResponse);
        assert_eq!(packet.body(), vec![0x1B, 3, 0, 0, 0]);
    }

    #[test]
    pub fn auth_ok_has_no_position() {
        let packet = ServerPacket::AuthResponse {
            code: ResponseCode::AuthOk,
            queue_position: None,
        };
        assert_eq!(packet.body(), vec![0x0C]);
    }

    #[test]
    pub fn rename_failure_omits_details() {
        let packet = ServerPacket::CharRename {
            code: ResponseCode::CharNameFailure,
            id: 7,
            name: "Thrall".into(),
        };
        assert_eq!(packet.body(), vec![0x58]);
    }
}
