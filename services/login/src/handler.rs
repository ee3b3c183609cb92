//! The per-connection login state machine.
//!
//! Consumes parsed client messages and yields the packets to send
//! back. Every protocol violation collapses the state to `Closed`;
//! the connection loop drops the socket once it observes that.

use std::{str::FromStr, sync::Arc};

use ebonhold_game::{
    accounts::{Account, LoginFailure, PinMethod},
    characters::CharacterCounts,
    realms::RealmList,
    types::Locale,
};
use ebonhold_protocol::auth::{ReturnCode, MAX_TRANSFER_CHUNK};
use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, error, warn};

use crate::{
    authenticator::{LoginAuthenticator, ReconnectAuthenticator},
    integrity::{fourcc_to_string, IntegrityData},
    patcher::{FileMeta, PatchLevel, Patcher},
    pin::PinAuthenticator,
    protocol::packets::{
        ChallengeRequest, ClientMessage, LoginProof, PinChallenge, RealmEntry, ReconnectProof,
        ServerMessage, SurveyResult,
    },
    services::LoginServices,
};

const GAME_MAGIC: [u8; 4] = *b"WoW\0";

/// Account flag word sent in the proof response.
const ACCOUNT_FLAGS: u32 = 0x0080_0000;

/// Where transfer chunk bytes come from.
pub enum TransferSource {
    File(tokio::fs::File),
    Memory(Arc<Vec<u8>>),
}

/// An in-flight (or pending) file transfer.
pub struct Transfer {
    source: TransferSource,
    size: u64,
    offset: u64,
}

impl Transfer {
    pub fn from_file(file: tokio::fs::File, size: u64) -> Self {
        Self {
            source: TransferSource::File(file),
            size,
            offset: 0,
        }
    }

    pub fn from_memory(data: Arc<Vec<u8>>) -> Self {
        let size = data.len() as u64;
        Self {
            source: TransferSource::Memory(data),
            size,
            offset: 0,
        }
    }

    fn complete(&self) -> bool {
        self.offset >= self.size
    }

    async fn resume_at(&mut self, offset: u64) -> std::io::Result<()> {
        self.offset = offset.min(self.size);

        if let TransferSource::File(file) = &mut self.source {
            file.seek(std::io::SeekFrom::Start(self.offset)).await?;
        }

        Ok(())
    }

    async fn read_chunk(&mut self) -> std::io::Result<Vec<u8>> {
        let remaining = self.size - self.offset;
        let len = (MAX_TRANSFER_CHUNK as u64).min(remaining) as usize;

        let chunk = match &mut self.source {
            TransferSource::File(file) => {
                let mut chunk = vec![0u8; len];
                file.read_exact(&mut chunk).await?;
                chunk
            }
            TransferSource::Memory(data) => {
                let start = self.offset as usize;
                data[start..start + len].to_vec()
            }
        };

        self.offset += len as u64;
        Ok(chunk)
    }
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transfer")
            .field("size", &self.size)
            .field("offset", &self.offset)
            .finish()
    }
}

enum State {
    InitialChallenge,
    LoginProof {
        authenticator: Box<LoginAuthenticator>,
        pin: Option<PinAuthenticator>,
        checksum_salt: [u8; 16],
    },
    ReconnectProof {
        authenticator: Box<ReconnectAuthenticator>,
    },
    RequestRealms,
    SurveyInitiate {
        transfer: Transfer,
    },
    SurveyTransfer {
        transfer: Transfer,
    },
    SurveyResult,
    PatchInitiate {
        transfer: Transfer,
    },
    PatchTransfer {
        transfer: Transfer,
    },
    Closed,
}

pub struct LoginHandler<S> {
    services: Arc<S>,
    patcher: Arc<Patcher>,
    integrity: Option<Arc<IntegrityData>>,
    realms: Arc<dyn RealmList>,
    locale_enforce: bool,

    state: State,
    user: Option<Account>,
    challenge: Option<ChallengeRequest>,
    counts: CharacterCounts,
    source: String,
}

impl<S: LoginServices> LoginHandler<S> {
    pub fn new(
        services: Arc<S>,
        patcher: Arc<Patcher>,
        integrity: Option<Arc<IntegrityData>>,
        realms: Arc<dyn RealmList>,
        locale_enforce: bool,
        source: String,
    ) -> Self {
        Self {
            services,
            patcher,
            integrity,
            realms,
            locale_enforce,
            state: State::InitialChallenge,
            user: None,
            challenge: None,
            counts: CharacterCounts::default(),
            source,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Whether the connection loop should be pumping transfer chunks.
    pub fn transfer_active(&self) -> bool {
        matches!(
            self.state,
            State::SurveyTransfer { .. } | State::PatchTransfer { .. }
        )
    }

    /// Feed one message through the state machine. Any message that
    /// does not fit the current state closes the session.
    pub async fn handle(&mut self, message: ClientMessage) -> Vec<ServerMessage> {
        let state = std::mem::replace(&mut self.state, State::Closed);

        match (state, message) {
            (State::InitialChallenge, ClientMessage::LoginChallenge(challenge)) => {
                self.initiate_login(challenge, false).await
            }
            (State::InitialChallenge, ClientMessage::ReconnectChallenge(challenge)) => {
                self.initiate_login(challenge, true).await
            }
            (
                State::LoginProof {
                    authenticator,
                    pin,
                    checksum_salt,
                },
                ClientMessage::LoginProof(proof),
            ) => {
                self.handle_login_proof(*authenticator, pin, checksum_salt, proof)
                    .await
            }
            (State::ReconnectProof { authenticator }, ClientMessage::ReconnectProof(proof)) => {
                self.handle_reconnect_proof(*authenticator, proof).await
            }
            (State::RequestRealms, ClientMessage::RealmListRequest) => self.send_realm_list().await,
            (State::SurveyInitiate { transfer }, message) => {
                self.handle_transfer_ack(transfer, message, true).await
            }
            (State::PatchInitiate { transfer }, message) => {
                self.handle_transfer_ack(transfer, message, false).await
            }
            (State::SurveyTransfer { .. }, ClientMessage::TransferCancel) => {
                debug!("survey transfer cancelled by {}", self.source);
                self.state = State::SurveyResult;
                Vec::new()
            }
            (State::PatchTransfer { .. }, ClientMessage::TransferCancel) => {
                debug!("patch transfer cancelled by {}", self.source);
                Vec::new()
            }
            (State::SurveyResult, ClientMessage::SurveyResult(survey)) => {
                self.handle_survey_result(survey).await
            }
            (_, message) => {
                debug!("received {:?} out of sync from {}", message, self.source);
                Vec::new()
            }
        }
    }

    async fn initiate_login(
        &mut self,
        challenge: ChallengeRequest,
        reconnect: bool,
    ) -> Vec<ServerMessage> {
        if challenge.protocol_version != crate::protocol::packets::PROTOCOL_VERSION {
            debug!(
                "unsupported protocol version {} from {}",
                challenge.protocol_version, self.source
            );
        }

        if challenge.game != GAME_MAGIC {
            debug!("bad game magic from {}", self.source);
            return Vec::new();
        }

        debug!(
            "challenge: {}, {}, {}",
            challenge.username, challenge.version, self.source
        );

        match self.patcher.check_version(&challenge.version) {
            PatchLevel::Ok => {}
            PatchLevel::TooNew => {
                debug!("rejecting client version {}", challenge.version);
                return vec![ServerMessage::LoginChallengeFail {
                    result: ReturnCode::FailVersionInvalid,
                }];
            }
            PatchLevel::TooOld => return self.patch_client(&challenge).await,
        }

        let username = challenge.username.clone();
        self.challenge = Some(challenge);

        if reconnect {
            self.fetch_session(&username).await
        } else {
            self.send_login_challenge(&username).await
        }
    }

    async fn send_login_challenge(&mut self, username: &str) -> Vec<ServerMessage> {
        let user = match self.services.user(username).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                debug!("account not found: {}", username);
                return vec![ServerMessage::LoginChallengeFail {
                    result: ReturnCode::FailUnknownAccount,
                }];
            }
            Err(failure) => {
                return vec![ServerMessage::LoginChallengeFail {
                    result: failure.into(),
                }];
            }
        };

        if user.banned() {
            debug!("banned user {} attempted to log in", user.username);
            return vec![ServerMessage::LoginChallengeFail {
                result: ReturnCode::FailBanned,
            }];
        }

        if user.suspended() {
            debug!("suspended user {} attempted to log in", user.username);
            return vec![ServerMessage::LoginChallengeFail {
                result: ReturnCode::FailSuspended,
            }];
        }

        let authenticator = LoginAuthenticator::new(&user.username, user.salt, &user.verifier);
        let (b_pub, g, n, salt) = authenticator.challenge();

        let pin = match user.pin_method {
            PinMethod::None => None,
            PinMethod::Fixed | PinMethod::Totp => Some(PinAuthenticator::new()),
        };

        let mut checksum_salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut checksum_salt);

        let reply = ServerMessage::LoginChallengeOk {
            b_pub,
            g,
            n,
            salt,
            checksum_salt,
            pin: pin.as_ref().map(|p| PinChallenge {
                grid_seed: p.grid_seed(),
                salt: *p.server_salt(),
            }),
        };

        self.user = Some(user);
        self.state = State::LoginProof {
            authenticator: Box::new(authenticator),
            pin,
            checksum_salt,
        };

        vec![reply]
    }

    async fn fetch_session(&mut self, username: &str) -> Vec<ServerMessage> {
        let user = match self.services.user(username).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                debug!("account not found on reconnect: {}", username);
                return Vec::new();
            }
            Err(_) => {
                return vec![ServerMessage::ReconnectChallengeFail {
                    result: ReturnCode::FailDbBusy,
                }];
            }
        };

        let key = match self.services.session_key(user.id).await {
            Ok(Some(key)) => key,
            Ok(None) => {
                debug!("reconnect failed, session not found for {}", user.username);
                return vec![ServerMessage::ReconnectChallengeFail {
                    result: ReturnCode::FailNoAccess,
                }];
            }
            Err(_) => {
                return vec![ServerMessage::ReconnectChallengeFail {
                    result: ReturnCode::FailDbBusy,
                }];
            }
        };

        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);

        let authenticator = ReconnectAuthenticator::new(&user.username, key, salt);

        self.user = Some(user);
        self.state = State::ReconnectProof {
            authenticator: Box::new(authenticator),
        };

        vec![ServerMessage::ReconnectChallengeOk {
            salt,
            checksum_salt: [0u8; 16],
        }]
    }

    async fn handle_login_proof(
        &mut self,
        authenticator: LoginAuthenticator,
        pin: Option<PinAuthenticator>,
        checksum_salt: [u8; 16],
        proof: LoginProof,
    ) -> Vec<ServerMessage> {
        let (Some(user), Some(challenge)) = (self.user.clone(), self.challenge.clone()) else {
            return Vec::new();
        };

        if !self.validate_client_integrity(
            &challenge,
            &checksum_salt,
            &proof.public_key,
            &proof.client_checksum,
        ) {
            return vec![ServerMessage::LoginProofFail {
                result: ReturnCode::FailVersionInvalid,
            }];
        }

        if !self.validate_pin(&user, pin, &proof) {
            debug!("PIN authentication for {} failed", user.username);
            return vec![ServerMessage::LoginProofFail {
                result: ReturnCode::FailIncorrectPassword,
            }];
        }

        // big-integer exponentiation runs on the blocking pool
        let public_key = proof.public_key;
        let client_proof = proof.proof;
        let check = {
            let authenticator = authenticator.clone();
            ebonhold_utils::offload(move || authenticator.proof_check(&public_key, &client_proof))
                .await
        };

        let result = match check {
            Ok(Some(result)) => result,
            Ok(None) => {
                debug!("login result for {}: incorrect password", user.username);
                return vec![ServerMessage::LoginProofFail {
                    result: ReturnCode::FailIncorrectPassword,
                }];
            }
            Err(e) => {
                error!("proof check failed for {}: {}", user.username, e);
                return vec![ServerMessage::LoginProofFail {
                    result: ReturnCode::FailDbBusy,
                }];
            }
        };

        if !user.subscriber() {
            return vec![ServerMessage::LoginProofFail {
                result: ReturnCode::FailNoTime,
            }];
        }

        if let Err(failure) = self
            .services
            .register_session(user.id, &result.session_key)
            .await
        {
            let code = match failure {
                LoginFailure::AlreadyOnline => ReturnCode::FailAlreadyOnline,
                _ => ReturnCode::FailDbBusy,
            };
            debug!("login result for {}: {:?}", user.username, code);
            return vec![ServerMessage::LoginProofFail { result: code }];
        }

        self.counts = self.services.character_counts(user.id).await;

        let survey = user.survey_requested()
            && self.patcher.survey_platform(
                &fourcc_to_string(challenge.platform),
                &fourcc_to_string(challenge.os),
            );

        debug!("login result for {}: success", user.username);

        let reply = ServerMessage::LoginProofOk {
            server_proof: result.server_proof,
            account_flags: ACCOUNT_FLAGS,
            survey_id: if survey { self.patcher.survey_id() } else { 0 },
            login_flags: 0,
        };

        if survey {
            let data = self.patcher.survey_data().map(<[u8]>::to_vec);
            let meta = self.patcher.survey_meta().cloned();

            if let (Some(data), Some(meta)) = (data, meta) {
                debug!("initiating survey transfer for {}", user.username);
                self.state = State::SurveyInitiate {
                    transfer: Transfer::from_memory(Arc::new(data)),
                };
                return vec![reply, transfer_initiate(&meta, None)];
            }
        }

        self.state = State::RequestRealms;
        vec![reply]
    }

    async fn handle_reconnect_proof(
        &mut self,
        authenticator: ReconnectAuthenticator,
        proof: ReconnectProof,
    ) -> Vec<ServerMessage> {
        let (Some(user), Some(challenge)) = (self.user.clone(), self.challenge.clone()) else {
            return Vec::new();
        };

        let integrity_ok = match &self.integrity {
            Some(integrity) => integrity.verify_reconnect(
                challenge.version.build,
                challenge.platform,
                challenge.os,
                &proof.proof_data,
                &proof.client_checksum,
            ),
            None => true,
        };

        if !integrity_ok {
            return vec![ServerMessage::ReconnectProof {
                result: ReturnCode::FailVersionInvalid,
            }];
        }

        if !authenticator.proof_check(&proof.proof_data, &proof.client_proof) {
            debug!("reconnect result for {}: incorrect proof", user.username);
            return vec![ServerMessage::ReconnectProof {
                result: ReturnCode::FailIncorrectPassword,
            }];
        }

        self.counts = self.services.character_counts(user.id).await;
        self.state = State::RequestRealms;

        debug!("reconnect result for {}: success", user.username);
        vec![ServerMessage::ReconnectProof {
            result: ReturnCode::Success,
        }]
    }

    async fn send_realm_list(&mut self) -> Vec<ServerMessage> {
        let Some(challenge) = self.challenge.clone() else {
            return Vec::new();
        };
        let locale = fourcc_to_string(challenge.locale);
        let region = Locale::from_str(&locale).ok().map(|l| u8::from(l) + 1);

        if region.is_none() && self.locale_enforce {
            debug!("unknown locale {} from {}", locale, self.source);
            return Vec::new();
        }

        let realms = self.realms.realms().await;
        let entries = realms
            .iter()
            .filter(|realm| !self.locale_enforce || region == Some(realm.region))
            .map(|realm| RealmEntry {
                realm_type: realm.realm_type.into(),
                locked: false,
                flags: realm.flags.bits(),
                name: realm.name.clone(),
                address: realm.address.clone(),
                population: realm.population,
                character_count: self.counts.get(&realm.id.0).copied().unwrap_or(0),
                category: realm.category,
                realm_id: realm.id.0 as u8,
            })
            .collect();

        self.state = State::RequestRealms;
        vec![ServerMessage::RealmList { realms: entries }]
    }

    async fn patch_client(&mut self, challenge: &ChallengeRequest) -> Vec<ServerMessage> {
        let meta = self.patcher.find_patch(
            &challenge.version,
            &fourcc_to_string(challenge.locale),
            &fourcc_to_string(challenge.platform),
            &fourcc_to_string(challenge.os),
        );

        let meta = match meta {
            Some(meta) => meta,
            None => {
                debug!("rejecting unpatchable client version {}", challenge.version);
                return vec![ServerMessage::LoginChallengeFail {
                    result: ReturnCode::FailVersionInvalid,
                }];
            }
        };

        let file = match tokio::fs::File::open(&meta.file.path).await {
            Ok(file) => file,
            Err(e) => {
                error!("could not open patch {}: {}", meta.file.name, e);
                return Vec::new();
            }
        };

        debug!("initiating patch transfer, {}", meta.file.name);

        let rename = meta.mpq.then(|| "Patch".to_string());
        let reply = vec![
            ServerMessage::LoginChallengeFail {
                result: ReturnCode::FailVersionUpdate,
            },
            transfer_initiate(&meta.file, rename),
        ];

        self.state = State::PatchInitiate {
            transfer: Transfer::from_file(file, meta.file.size),
        };

        reply
    }

    async fn handle_transfer_ack(
        &mut self,
        mut transfer: Transfer,
        message: ClientMessage,
        survey: bool,
    ) -> Vec<ServerMessage> {
        match message {
            ClientMessage::TransferResume { offset } => {
                if let Err(e) = transfer.resume_at(offset).await {
                    error!("transfer resume failed: {}", e);
                    return Vec::new();
                }
                self.state = if survey {
                    State::SurveyTransfer { transfer }
                } else {
                    State::PatchTransfer { transfer }
                };
            }
            ClientMessage::TransferAccept => {
                self.state = if survey {
                    State::SurveyTransfer { transfer }
                } else {
                    State::PatchTransfer { transfer }
                };
            }
            ClientMessage::TransferCancel => {
                self.state = if survey {
                    State::SurveyResult
                } else {
                    State::Closed
                };
            }
            message => {
                debug!("received {:?} during transfer setup", message);
            }
        }

        Vec::new()
    }

    /// Pump the next transfer chunk. Returns `None` once the transfer
    /// is complete (after transitioning) or was aborted.
    pub async fn next_chunk(&mut self) -> Option<ServerMessage> {
        let state = std::mem::replace(&mut self.state, State::Closed);

        let (mut transfer, survey) = match state {
            State::SurveyTransfer { transfer } => (transfer, true),
            State::PatchTransfer { transfer } => (transfer, false),
            other => {
                self.state = other;
                return None;
            }
        };

        if transfer.complete() {
            self.state = if survey {
                State::SurveyResult
            } else {
                State::Closed
            };
            return None;
        }

        match transfer.read_chunk().await {
            Ok(chunk) => {
                self.state = if survey {
                    State::SurveyTransfer { transfer }
                } else {
                    State::PatchTransfer { transfer }
                };
                Some(ServerMessage::TransferData { chunk })
            }
            Err(e) => {
                error!("patch reading failed during transfer: {}", e);
                None
            }
        }
    }

    async fn handle_survey_result(&mut self, survey: SurveyResult) -> Vec<ServerMessage> {
        let Some(user) = self.user.clone() else {
            return Vec::new();
        };

        // the client may request the realm list regardless of the
        // survey write outcome
        self.state = State::RequestRealms;

        if survey.survey_id != self.patcher.survey_id() {
            debug!("received an invalid survey id from {}", user.username);
            return Vec::new();
        }

        // errors mean the client already answered or overflowed its
        // hardcoded compressed-size limit
        if survey.error != 0 {
            return Vec::new();
        }

        self.services
            .save_survey(user.id, survey.survey_id, survey.data)
            .await;
        Vec::new()
    }

    fn validate_client_integrity(
        &self,
        challenge: &ChallengeRequest,
        checksum_salt: &[u8; 16],
        public_key: &[u8; 32],
        client_checksum: &[u8; 20],
    ) -> bool {
        match &self.integrity {
            Some(integrity) => integrity.verify_login(
                challenge.version.build,
                challenge.platform,
                challenge.os,
                checksum_salt,
                public_key,
                client_checksum,
            ),
            None => true,
        }
    }

    fn validate_pin(
        &self,
        user: &Account,
        pin: Option<PinAuthenticator>,
        proof: &LoginProof,
    ) -> bool {
        let authenticator = match (user.pin_method, pin) {
            (PinMethod::None, _) => return true,
            (_, Some(authenticator)) => authenticator,
            (_, None) => {
                warn!("PIN required for {} but no challenge was issued", user.username);
                return false;
            }
        };

        // PIN auth is enabled for this user; the proof must carry data
        let pin_proof = match &proof.pin {
            Some(pin_proof) => pin_proof,
            None => return false,
        };

        match user.pin_method {
            PinMethod::Fixed => match user.pin {
                Some(pin) => authenticator.validate_fixed(
                    pin,
                    &pin_proof.client_salt,
                    &pin_proof.pin_hash,
                ),
                None => {
                    error!("user {} has a fixed PIN method but no PIN", user.username);
                    false
                }
            },
            PinMethod::Totp => match &user.totp_token {
                Some(token) => authenticator.validate_totp(
                    token,
                    &pin_proof.client_salt,
                    &pin_proof.pin_hash,
                    std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .map(|d| d.as_secs())
                        .unwrap_or(0),
                ),
                None => {
                    error!("user {} has a TOTP method but no token", user.username);
                    false
                }
            },
            PinMethod::None => true,
        }
    }
}

fn transfer_initiate(meta: &FileMeta, rename: Option<String>) -> ServerMessage {
    ServerMessage::TransferInitiate {
        name: rename.unwrap_or_else(|| meta.name.clone()),
        size: meta.size,
        md5: meta.md5,
    }
}
