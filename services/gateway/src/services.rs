//! The seam between the gateway session machine and the account and
//! character services.

use async_trait::async_trait;
use ebonhold_game::{
    accounts::AccountId,
    characters::{Character, CharacterCreate, CharacterId},
};
use ebonhold_rpc::{
    account::{AccountClient, Status as AccountStatus},
    character::{CharacterClient, Status as CharacterStatus},
};
use thiserror::Error;
use tracing::error;
use wow_srp6::SessionKey;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceError {
    #[error("the account has no live session")]
    NoSession,
    #[error("the account does not exist")]
    UnknownAccount,
    #[error("the character does not exist")]
    UnknownCharacter,
    #[error("the character name was rejected")]
    NameRejected,
    #[error("the backing service is unavailable")]
    Unavailable,
}

#[async_trait]
pub trait GatewayServices: Send + Sync {
    /// Resolve a world-auth username to its account id and the session
    /// key registered at login.
    async fn account_session(&self, username: &str)
        -> Result<(AccountId, SessionKey), ServiceError>;

    /// Evict the account's session when its world session ends.
    async fn evict_session(&self, account: AccountId);

    async fn characters(&self, account: AccountId) -> Result<Vec<Character>, ServiceError>;
    async fn create_character(
        &self,
        account: AccountId,
        create: CharacterCreate,
    ) -> Result<(), ServiceError>;
    async fn delete_character(&self, id: CharacterId) -> Result<(), ServiceError>;
    async fn rename_character(&self, id: CharacterId, name: String) -> Result<(), ServiceError>;
    async fn load_character(&self, id: CharacterId) -> Result<Character, ServiceError>;
}

/// Production implementation backed by the fabric clients.
#[derive(Debug, Clone)]
pub struct SparkServices {
    accounts: AccountClient,
    characters: CharacterClient,
    realm_id: u32,
}

impl SparkServices {
    pub fn new(accounts: AccountClient, characters: CharacterClient, realm_id: u32) -> Self {
        Self {
            accounts,
            characters,
            realm_id,
        }
    }
}

#[async_trait]
impl GatewayServices for SparkServices {
    async fn account_session(
        &self,
        username: &str,
    ) -> Result<(AccountId, SessionKey), ServiceError> {
        let account = match self.accounts.account_id(username).await {
            Ok((AccountStatus::Ok, Some(id))) => id,
            Ok((AccountStatus::AccountNotFound, _)) => return Err(ServiceError::UnknownAccount),
            Ok((status, _)) => {
                error!("account lookup for {} failed: {:?}", username, status);
                return Err(ServiceError::Unavailable);
            }
            Err(e) => {
                error!("account lookup for {} failed: {}", username, e);
                return Err(ServiceError::Unavailable);
            }
        };

        match self.accounts.session_key(account).await {
            Ok((AccountStatus::Ok, Some(key))) => Ok((account, key)),
            Ok((AccountStatus::SessionNotFound, _)) => Err(ServiceError::NoSession),
            Ok((status, _)) => {
                error!("session lookup for {} failed: {:?}", username, status);
                Err(ServiceError::Unavailable)
            }
            Err(e) => {
                error!("session lookup for {} failed: {}", username, e);
                Err(ServiceError::Unavailable)
            }
        }
    }

    async fn evict_session(&self, account: AccountId) {
        if let Err(e) = self.accounts.evict_session(account).await {
            error!("session eviction for {} failed: {}", account, e);
        }
    }

    async fn characters(&self, account: AccountId) -> Result<Vec<Character>, ServiceError> {
        match self.characters.characters(account, self.realm_id).await {
            Ok((CharacterStatus::Ok, characters)) => Ok(characters),
            Ok((status, _)) => {
                error!("character enumerate failed: {:?}", status);
                Err(ServiceError::Unavailable)
            }
            Err(e) => {
                error!("character enumerate failed: {}", e);
                Err(ServiceError::Unavailable)
            }
        }
    }

    async fn create_character(
        &self,
        account: AccountId,
        create: CharacterCreate,
    ) -> Result<(), ServiceError> {
        match self.characters.create(account, self.realm_id, create).await {
            Ok((CharacterStatus::Ok, _)) => Ok(()),
            Ok((CharacterStatus::NameInUse, _))
            | Ok((CharacterStatus::NameInvalid, _))
            | Ok((CharacterStatus::NameReserved, _))
            | Ok((CharacterStatus::NameProfane, _)) => Err(ServiceError::NameRejected),
            Ok((status, _)) => {
                error!("character create failed: {:?}", status);
                Err(ServiceError::Unavailable)
            }
            Err(e) => {
                error!("character create failed: {}", e);
                Err(ServiceError::Unavailable)
            }
        }
    }

    async fn delete_character(&self, id: CharacterId) -> Result<(), ServiceError> {
        match self.characters.delete(id).await {
            Ok(CharacterStatus::Ok) => Ok(()),
            Ok(CharacterStatus::UnknownCharacter) => Err(ServiceError::UnknownCharacter),
            Ok(status) => {
                error!("character delete failed: {:?}", status);
                Err(ServiceError::Unavailable)
            }
            Err(e) => {
                error!("character delete failed: {}", e);
                Err(ServiceError::Unavailable)
            }
        }
    }

    async fn rename_character(&self, id: CharacterId, name: String) -> Result<(), ServiceError> {
        match self.characters.rename(id, &name).await {
            Ok(CharacterStatus::Ok) => Ok(()),
            Ok(CharacterStatus::UnknownCharacter) => Err(ServiceError::UnknownCharacter),
            Ok(_) => Err(ServiceError::NameRejected),
            Err(e) => {
                error!("character rename failed: {}", e);
                Err(ServiceError::Unavailable)
            }
        }
    }

    async fn load_character(&self, id: CharacterId) -> Result<Character, ServiceError> {
        match self.characters.load(id).await {
            Ok((CharacterStatus::Ok, Some(character))) => Ok(character),
            Ok((CharacterStatus::UnknownCharacter, _)) | Ok((CharacterStatus::Ok, None)) => {
                Err(ServiceError::UnknownCharacter)
            }
            Ok((status, _)) => {
                error!("character load failed: {:?}", status);
                Err(ServiceError::Unavailable)
            }
            Err(e) => {
                error!("character load failed: {}", e);
                Err(ServiceError::Unavailable)
            }
        }
    }
}
