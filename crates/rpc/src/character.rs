//! The character service contract used by the gateway's character-list
//! state.

use std::{sync::Arc, time::Duration};

use ebonhold_game::{
    accounts::AccountId,
    characters::{Character, CharacterCreate, CharacterCounts, CharacterId},
};
use ebonhold_spark::{ChannelHandle, Peer, RpcError};
use serde::{Deserialize, Serialize};

use crate::{decode, encode, ClientHandler};

pub const SERVICE: &str = "character";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ok,
    NameInUse,
    NameInvalid,
    NameReserved,
    NameProfane,
    UnknownCharacter,
    IllformedMessage,
    UnknownError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CharacterRequest {
    Enumerate {
        account_id: u32,
        realm_id: u32,
    },
    Counts {
        account_id: u32,
    },
    Create {
        account_id: u32,
        realm_id: u32,
        character: CharacterCreate,
    },
    Delete {
        character_id: u64,
    },
    Rename {
        character_id: u64,
        name: String,
    },
    Load {
        character_id: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CharacterResponse {
    Enumerate {
        status: Status,
        characters: Vec<Character>,
    },
    Counts {
        status: Status,
        counts: Vec<(u32, u8)>,
    },
    Create {
        status: Status,
        character_id: u64,
    },
    Delete {
        status: Status,
    },
    Rename {
        status: Status,
        character_id: u64,
        name: String,
    },
    Load {
        status: Status,
        character: Option<Character>,
    },
}

/// Typed client for the character service.
#[derive(Debug, Clone)]
pub struct CharacterClient {
    channel: ChannelHandle,
}

impl CharacterClient {
    pub async fn connect(peer: &Peer) -> Result<Self, RpcError> {
        let channel = peer
            .open_channel(SERVICE, Arc::new(ClientHandler::new(SERVICE)))
            .await?;
        Ok(Self { channel })
    }

    pub fn from_channel(channel: ChannelHandle) -> Self {
        Self { channel }
    }

    async fn request(&self, request: &CharacterRequest) -> Result<CharacterResponse, RpcError> {
        let reply = self
            .channel
            .request(encode(request)?, REQUEST_TIMEOUT)
            .await?;
        decode(&reply)
    }

    pub async fn characters(
        &self,
        account: AccountId,
        realm: u32,
    ) -> Result<(Status, Vec<Character>), RpcError> {
        match self
            .request(&CharacterRequest::Enumerate {
                account_id: account.0,
                realm_id: realm,
            })
            .await?
        {
            CharacterResponse::Enumerate { status, characters } => Ok((status, characters)),
            _ => Err(RpcError::WrongMessageType),
        }
    }

    /// Per-realm character counts shown on the realm list.
    pub async fn counts(&self, account: AccountId) -> Result<(Status, CharacterCounts), RpcError> {
        match self
            .request(&CharacterRequest::Counts {
                account_id: account.0,
            })
            .await?
        {
            CharacterResponse::Counts { status, counts } => {
                Ok((status, counts.into_iter().collect()))
            }
            _ => Err(RpcError::WrongMessageType),
        }
    }

    pub async fn create(
        &self,
        account: AccountId,
        realm: u32,
        character: CharacterCreate,
    ) -> Result<(Status, Option<CharacterId>), RpcError> {
        match self
            .request(&CharacterRequest::Create {
                account_id: account.0,
                realm_id: realm,
                character,
            })
            .await?
        {
            CharacterResponse::Create {
                status,
                character_id,
            } => {
                let id = (status == Status::Ok).then_some(CharacterId(character_id));
                Ok((status, id))
            }
            _ => Err(RpcError::WrongMessageType),
        }
    }

    pub async fn delete(&self, id: CharacterId) -> Result<Status, RpcError> {
        match self
            .request(&CharacterRequest::Delete { character_id: id.0 })
            .await?
        {
            CharacterResponse::Delete { status } => Ok(status),
            _ => Err(RpcError::WrongMessageType),
        }
    }

    pub async fn rename(&self, id: CharacterId, name: &str) -> Result<Status, RpcError> {
        match self
            .request(&CharacterRequest::Rename {
                character_id: id.0,
                name: name.to_string(),
            })
            .await?
        {
            CharacterResponse::Rename { status, .. } => Ok(status),
            _ => Err(RpcError::WrongMessageType),
        }
    }

    /// Load a character for world entry.
    pub async fn load(&self, id: CharacterId) -> Result<(Status, Option<Character>), RpcError> {
        match self
            .request(&CharacterRequest::Load { character_id: id.0 })
            .await?
        {
            CharacterResponse::Load { status, character } => Ok((status, character)),
            _ => Err(RpcError::WrongMessageType),
        }
    }
}
