//! The seam between the login state machine and its collaborators.
//!
//! The state machine only sees this trait; production wires it to the
//! account and character services over the fabric, the tests to
//! in-memory stores.

use async_trait::async_trait;
use ebonhold_game::{
    accounts::{Account, AccountId, LoginFailure},
    characters::CharacterCounts,
};
use ebonhold_rpc::{
    account::{AccountClient, Status},
    character::CharacterClient,
};
use tracing::{error, warn};
use wow_srp6::SessionKey;

#[async_trait]
pub trait LoginServices: Send + Sync {
    /// Fetch the user record for a username, or `None` if unknown.
    async fn user(&self, username: &str) -> Result<Option<Account>, LoginFailure>;

    /// Publish a freshly derived session key.
    async fn register_session(
        &self,
        account: AccountId,
        key: &SessionKey,
    ) -> Result<(), LoginFailure>;

    /// Look up the cached session key for a reconnecting account.
    async fn session_key(&self, account: AccountId) -> Result<Option<SessionKey>, LoginFailure>;

    /// Per-realm character counts; failures degrade to empty counts
    /// rather than failing the login.
    async fn character_counts(&self, account: AccountId) -> CharacterCounts;

    /// Persist a survey submission; best-effort.
    async fn save_survey(&self, account: AccountId, survey_id: u32, data: Vec<u8>);
}

/// Production implementation backed by the fabric clients.
#[derive(Debug, Clone)]
pub struct SparkServices {
    accounts: AccountClient,
    characters: CharacterClient,
}

impl SparkServices {
    pub fn new(accounts: AccountClient, characters: CharacterClient) -> Self {
        Self {
            accounts,
            characters,
        }
    }
}

#[async_trait]
impl LoginServices for SparkServices {
    async fn user(&self, username: &str) -> Result<Option<Account>, LoginFailure> {
        match self.accounts.user(username).await {
            Ok((Status::Ok, user)) => Ok(user),
            Ok((Status::AccountNotFound, _)) => Ok(None),
            Ok((status, _)) => {
                error!("user lookup for {} failed: {:?}", username, status);
                Err(LoginFailure::DatabaseError)
            }
            Err(e) => {
                error!("user lookup for {} failed: {}", username, e);
                Err(LoginFailure::DatabaseError)
            }
        }
    }

    async fn register_session(
        &self,
        account: AccountId,
        key: &SessionKey,
    ) -> Result<(), LoginFailure> {
        match self.accounts.register_session(account, key).await {
            Ok(Status::Ok) => Ok(()),
            Ok(Status::AlreadyLoggedIn) => Err(LoginFailure::AlreadyOnline),
            Ok(status) => {
                error!("session registration for {} failed: {:?}", account, status);
                Err(LoginFailure::DatabaseError)
            }
            Err(e) => {
                error!("session registration for {} failed: {}", account, e);
                Err(LoginFailure::DatabaseError)
            }
        }
    }

    async fn session_key(&self, account: AccountId) -> Result<Option<SessionKey>, LoginFailure> {
        match self.accounts.session_key(account).await {
            Ok((Status::Ok, key)) => Ok(key),
            Ok((Status::SessionNotFound, _)) => Ok(None),
            Ok(status) => {
                error!("session lookup for {} failed: {:?}", account, status.0);
                Err(LoginFailure::DatabaseError)
            }
            Err(e) => {
                error!("session lookup for {} failed: {}", account, e);
                Err(LoginFailure::DatabaseError)
            }
        }
    }

    async fn character_counts(&self, account: AccountId) -> CharacterCounts {
        match self.characters.counts(account).await {
            Ok((_, counts)) => counts,
            Err(e) => {
                // not fatal, the realm list just shows zero characters
                warn!("character counts for {} unavailable: {}", account, e);
                CharacterCounts::default()
            }
        }
    }

    async fn save_survey(&self, account: AccountId, survey_id: u32, data: Vec<u8>) {
        if let Err(e) = self.accounts.save_survey(account, survey_id, data).await {
            error!("survey write for {} failed: {}", account, e);
        }
    }
}
