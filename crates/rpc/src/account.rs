//! The account service contract: user lookups and the session-key
//! registry used by login and gateway.

use std::{sync::Arc, time::Duration};

use ebonhold_game::accounts::{Account, AccountFlags, AccountId, PinMethod};
use ebonhold_spark::{ChannelHandle, Peer, RpcError};
use enumflags2::BitFlags;
use serde::{Deserialize, Serialize};
use wow_srp6::{Salt, SessionKey, Verifier};

use crate::{decode, encode, ClientHandler};

pub const SERVICE: &str = "account";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ok,
    AlreadyLoggedIn,
    SessionNotFound,
    AccountNotFound,
    IllformedMessage,
    UnknownError,
}

/// A user record on the wire. Field layout mirrors what the account
/// service persists; see the `game` crate for the domain form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: u32,
    pub username: String,
    pub salt: [u8; 32],
    pub verifier: [u8; 32],
    pub pin_method: u8,
    pub pin: Option<u32>,
    pub totp_token: Option<String>,
    pub flags: u8,
    pub email: String,
}

impl UserRecord {
    pub fn into_account(self) -> Option<Account> {
        Some(Account {
            id: AccountId(self.id),
            username: self.username,
            salt: Salt(self.salt),
            verifier: Verifier(self.verifier),
            pin_method: PinMethod::try_from(self.pin_method).ok()?,
            pin: self.pin,
            totp_token: self.totp_token,
            flags: BitFlags::<AccountFlags>::from_bits(self.flags).ok()?,
            email: self.email,
        })
    }

    pub fn from_account(account: &Account) -> Self {
        Self {
            id: account.id.0,
            username: account.username.clone(),
            salt: account.salt.0,
            verifier: account.verifier.0,
            pin_method: account.pin_method.into(),
            pin: account.pin,
            totp_token: account.totp_token.clone(),
            flags: account.flags.bits(),
            email: account.email.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AccountRequest {
    RegisterSession { account_id: u32, key: Vec<u8> },
    SessionLookup { account_id: u32 },
    EvictSession { account_id: u32 },
    LookupId { account_name: String },
    LookupUser { account_name: String },
    SaveSurvey {
        account_id: u32,
        survey_id: u32,
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AccountResponse {
    Register {
        status: Status,
    },
    Session {
        status: Status,
        account_id: u32,
        key: Vec<u8>,
    },
    Evict {
        status: Status,
    },
    AccountId {
        status: Status,
        account_id: u32,
    },
    User {
        status: Status,
        user: Option<UserRecord>,
    },
    Survey {
        status: Status,
    },
}

/// Typed client for the account service.
#[derive(Debug, Clone)]
pub struct AccountClient {
    channel: ChannelHandle,
}

impl AccountClient {
    /// Open an account channel on an established fabric connection.
    pub async fn connect(peer: &Peer) -> Result<Self, RpcError> {
        let channel = peer
            .open_channel(SERVICE, Arc::new(ClientHandler::new(SERVICE)))
            .await?;
        Ok(Self { channel })
    }

    pub fn from_channel(channel: ChannelHandle) -> Self {
        Self { channel }
    }

    async fn request(&self, request: &AccountRequest) -> Result<AccountResponse, RpcError> {
        let reply = self
            .channel
            .request(encode(request)?, REQUEST_TIMEOUT)
            .await?;
        decode(&reply)
    }

    /// Publish a freshly derived session key. Fails with
    /// `AlreadyLoggedIn` if the account holds a live session.
    pub async fn register_session(
        &self,
        account_id: AccountId,
        key: &SessionKey,
    ) -> Result<Status, RpcError> {
        let response = self
            .request(&AccountRequest::RegisterSession {
                account_id: account_id.0,
                key: key.as_bytes().to_vec(),
            })
            .await?;

        match response {
            AccountResponse::Register { status } => Ok(status),
            _ => Err(RpcError::WrongMessageType),
        }
    }

    /// Fetch the live session key for an account, if any.
    pub async fn session_key(
        &self,
        account_id: AccountId,
    ) -> Result<(Status, Option<SessionKey>), RpcError> {
        let response = self
            .request(&AccountRequest::SessionLookup {
                account_id: account_id.0,
            })
            .await?;

        match response {
            AccountResponse::Session { status, key, .. } => {
                let key = (status == Status::Ok).then(|| SessionKey(key));
                Ok((status, key))
            }
            _ => Err(RpcError::WrongMessageType),
        }
    }

    /// Drop an account's session, allowing it to log in again.
    pub async fn evict_session(&self, account_id: AccountId) -> Result<Status, RpcError> {
        let response = self
            .request(&AccountRequest::EvictSession {
                account_id: account_id.0,
            })
            .await?;

        match response {
            AccountResponse::Evict { status } => Ok(status),
            _ => Err(RpcError::WrongMessageType),
        }
    }

    pub async fn account_id(
        &self,
        account_name: &str,
    ) -> Result<(Status, Option<AccountId>), RpcError> {
        let response = self
            .request(&AccountRequest::LookupId {
                account_name: account_name.to_string(),
            })
            .await?;

        match response {
            AccountResponse::AccountId { status, account_id } => {
                let id = (status == Status::Ok).then_some(AccountId(account_id));
                Ok((status, id))
            }
            _ => Err(RpcError::WrongMessageType),
        }
    }

    /// Persist a submitted survey; at most one per account sticks.
    pub async fn save_survey(
        &self,
        account_id: AccountId,
        survey_id: u32,
        data: Vec<u8>,
    ) -> Result<Status, RpcError> {
        let response = self
            .request(&AccountRequest::SaveSurvey {
                account_id: account_id.0,
                survey_id,
                data,
            })
            .await?;

        match response {
            AccountResponse::Survey { status } => Ok(status),
            _ => Err(RpcError::WrongMessageType),
        }
    }

    /// Fetch the full user record backing an account name.
    pub async fn user(&self, account_name: &str) -> Result<(Status, Option<Account>), RpcError> {
        let response = self
            .request(&AccountRequest::LookupUser {
                account_name: account_name.to_string(),
            })
            .await?;

        match response {
            AccountResponse::User { status, user } => {
                Ok((status, user.and_then(UserRecord::into_account)))
            }
            _ => Err(RpcError::WrongMessageType),
        }
    }
}
