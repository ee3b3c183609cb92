//! The per-connection session state machine for the gateway.
//!
//! A connection authenticates with the session key its login produced,
//! possibly waits in the admission queue, serves the character list
//! and finally enters the world. Packets and events both feed the
//! machine; anything out of order closes the session.

use std::{sync::Arc, time::Duration};

use ebonhold_game::{
    accounts::AccountId,
    characters::{CharacterCreate, CharacterId, CharacterOpError, NamePolicy},
    types::ClientRef,
};
use ebonhold_protocol::world::ResponseCode;
use rand::RngCore;
use sha1::{Digest, Sha1};
use tracing::{debug, warn};
use wow_srp6::SessionKey;

use crate::{
    dispatcher::EventDispatcher,
    events::Event,
    protocol::{ClientPacket, ServerPacket},
    queue::{Capacity, RealmQueue},
    services::{GatewayServices, ServiceError},
};

const AUTH_TIMEOUT: Duration = Duration::from_secs(30);
const CHARACTER_LIST_TIMEOUT: Duration = Duration::from_secs(180);
const WORLD_ENTER_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-session quirk and identity settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub realm_id: u32,
    /// Retail quirk: hide the zone of characters that have never
    /// logged in.
    pub list_zone_hide: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authentication,
    Queued,
    CharacterList,
    WorldEnter,
    InWorld,
    Closed,
}

pub struct ClientHandler<S> {
    services: Arc<S>,
    capacity: Arc<Capacity>,
    queue: RealmQueue,
    dispatcher: EventDispatcher,
    names: Arc<NamePolicy>,
    config: SessionConfig,

    client: ClientRef,
    seed: [u8; 4],
    state: SessionState,
    account: Option<AccountId>,
    has_slot: bool,
    session_key: Option<SessionKey>,
}

impl<S: GatewayServices> ClientHandler<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        services: Arc<S>,
        capacity: Arc<Capacity>,
        queue: RealmQueue,
        dispatcher: EventDispatcher,
        names: Arc<NamePolicy>,
        config: SessionConfig,
        client: ClientRef,
    ) -> Self {
        let mut seed = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut seed);

        Self {
            services,
            capacity,
            queue,
            dispatcher,
            names,
            config,
            client,
            seed,
            state: SessionState::Authentication,
            account: None,
            has_slot: false,
            session_key: None,
        }
    }

    pub fn client(&self) -> &ClientRef {
        &self.client
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// The challenge sent as soon as the socket opens.
    pub fn challenge(&self) -> ServerPacket {
        ServerPacket::AuthChallenge { seed: self.seed }
    }

    /// Once authentication succeeds this yields the session key
    /// exactly once, so the transport can arm the obfuscator before
    /// the response is framed.
    pub fn take_session_key(&mut self) -> Option<SessionKey> {
        self.session_key.take()
    }

    /// The inactivity allowance of the current state; `None` waits
    /// indefinitely (queued clients decide for themselves when to give
    /// up).
    pub fn state_timeout(&self) -> Option<Duration> {
        match self.state {
            SessionState::Authentication => Some(AUTH_TIMEOUT),
            SessionState::Queued => None,
            SessionState::CharacterList => Some(CHARACTER_LIST_TIMEOUT),
            SessionState::WorldEnter => Some(WORLD_ENTER_TIMEOUT),
            SessionState::InWorld => None,
            SessionState::Closed => None,
        }
    }

    pub async fn handle_packet(&mut self, packet: ClientPacket) -> Vec<ServerPacket> {
        // pings flow in every authenticated state
        if let ClientPacket::Ping { seq, .. } = packet {
            return vec![ServerPacket::Pong { seq }];
        }

        match (self.state, packet) {
            (SessionState::Authentication, ClientPacket::AuthSession(session)) => {
                self.authenticate(session).await
            }
            (SessionState::CharacterList, ClientPacket::CharEnum) => self.char_enum().await,
            (SessionState::CharacterList, ClientPacket::CharCreate(create)) => {
                self.char_create(create).await
            }
            (SessionState::CharacterList, ClientPacket::CharDelete { id }) => {
                self.char_delete(CharacterId(id)).await
            }
            (SessionState::CharacterList, ClientPacket::CharRename { id, name }) => {
                self.char_rename(CharacterId(id), name).await
            }
            (SessionState::CharacterList, ClientPacket::PlayerLogin { id }) => {
                self.world_enter(CharacterId(id)).await
            }
            (state, packet) => {
                debug!("packet {:?} out of order in {:?}", packet, state);
                self.close();
                Vec::new()
            }
        }
    }

    pub async fn handle_event(&mut self, event: &Event) -> Vec<ServerPacket> {
        match (self.state, event) {
            (SessionState::Queued, Event::QueuePosition(position)) => {
                vec![ServerPacket::AuthResponse {
                    code: ResponseCode::AuthWaitQueue,
                    queue_position: Some(*position as u32),
                }]
            }
            (SessionState::Queued, Event::QueueSlotFree) => {
                debug!("queue slot granted to {}", self.client);
                self.has_slot = true;
                self.state = SessionState::CharacterList;
                vec![ServerPacket::AuthResponse {
                    code: ResponseCode::AuthOk,
                    queue_position: None,
                }]
            }
            (_, Event::Broadcast(_)) => Vec::new(),
            (state, event) => {
                debug!("event {:?} ignored in {:?}", event, state);
                Vec::new()
            }
        }
    }

    /// Tear-down when the socket goes away, from any state. A held
    /// world slot passes to the queue head if anyone is waiting.
    pub async fn on_disconnect(&mut self) {
        self.dispatcher.remove(&self.client);

        match self.state {
            SessionState::Queued => self.queue.dequeue(&self.client),
            _ if self.has_slot => {
                if self.queue.is_empty() {
                    self.capacity.release();
                } else {
                    self.queue.free_slot();
                }
            }
            _ => {}
        }

        if let Some(account) = self.account.take() {
            self.services.evict_session(account).await;
        }

        self.has_slot = false;
        self.state = SessionState::Closed;
    }

    fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    async fn authenticate(&mut self, session: crate::protocol::AuthSession) -> Vec<ServerPacket> {
        let (account, key) = match self.services.account_session(&session.username).await {
            Ok(found) => found,
            Err(e) => {
                debug!("world auth for {} failed: {}", session.username, e);
                self.close();
                let code = match e {
                    ServiceError::NoSession => ResponseCode::AuthReject,
                    ServiceError::UnknownAccount => ResponseCode::AuthFailed,
                    _ => ResponseCode::AuthUnavailable,
                };
                return vec![ServerPacket::AuthResponse {
                    code,
                    queue_position: None,
                }];
            }
        };

        if !verify_world_proof(
            &session.username,
            &session.client_seed,
            &self.seed,
            &key,
            &session.client_proof,
        ) {
            warn!("world auth proof mismatch for {}", session.username);
            self.close();
            return vec![ServerPacket::AuthResponse {
                code: ResponseCode::AuthFailed,
                queue_position: None,
            }];
        }

        debug!(
            "world auth for {} on realm {} ok with {} addon(s)",
            session.username,
            self.config.realm_id,
            session.addons.len()
        );

        self.account = Some(account);
        self.session_key = Some(key);

        if self.capacity.try_acquire() {
            self.has_slot = true;
            self.state = SessionState::CharacterList;
            return vec![ServerPacket::AuthResponse {
                code: ResponseCode::AuthOk,
                queue_position: None,
            }];
        }

        // over the slot ceiling; join the wait-list
        let dispatcher = self.dispatcher.clone();
        let client = self.client;
        let on_update = Arc::new(move |position: usize| {
            dispatcher.post_event(&client, Event::QueuePosition(position));
        });

        let dispatcher = self.dispatcher.clone();
        let on_leave = Box::new(move || {
            dispatcher.post_event(&client, Event::QueueSlotFree);
        });

        self.queue.enqueue(self.client, on_update, on_leave, 0);
        self.state = SessionState::Queued;

        debug!("{} queued at position {}", session.username, self.queue.len());
        vec![ServerPacket::AuthResponse {
            code: ResponseCode::AuthWaitQueue,
            queue_position: Some(self.queue.len() as u32),
        }]
    }

    async fn char_enum(&mut self) -> Vec<ServerPacket> {
        let Some(account) = self.account else {
            self.close();
            return Vec::new();
        };

        let mut characters = match self.services.characters(account).await {
            Ok(characters) => characters,
            Err(e) => {
                debug!("character list unavailable: {}", e);
                return vec![ServerPacket::CharCreate(ResponseCode::AuthUnavailable)];
            }
        };

        if self.config.list_zone_hide {
            for character in &mut characters {
                if character.first_login {
                    character.zone = 0;
                }
            }
        }

        self.state = SessionState::CharacterList;
        vec![ServerPacket::CharEnum(characters)]
    }

    async fn char_create(&mut self, create: CharacterCreate) -> Vec<ServerPacket> {
        let Some(account) = self.account else {
            self.close();
            return Vec::new();
        };

        self.state = SessionState::CharacterList;

        if let Err(e) = self.names.validate(&create.name) {
            let code = match e {
                CharacterOpError::NameReserved => ResponseCode::CharNameReserved,
                CharacterOpError::NameProfane => ResponseCode::CharNameProfane,
                _ => ResponseCode::CharNameInvalid,
            };
            return vec![ServerPacket::CharCreate(code)];
        }

        match self.services.create_character(account, create).await {
            Ok(()) => vec![ServerPacket::CharCreate(ResponseCode::CharCreateSuccess)],
            Err(ServiceError::NameRejected) => {
                vec![ServerPacket::CharCreate(ResponseCode::CharCreateNameInUse)]
            }
            Err(e) => {
                debug!("character create failed: {}", e);
                vec![ServerPacket::CharCreate(ResponseCode::CharCreateError)]
            }
        }
    }

    async fn char_delete(&mut self, id: CharacterId) -> Vec<ServerPacket> {
        self.state = SessionState::CharacterList;

        match self.services.delete_character(id).await {
            Ok(()) => vec![ServerPacket::CharDelete(ResponseCode::CharDeleteSuccess)],
            Err(e) => {
                debug!("failed to delete character {}: {}", id, e);
                vec![ServerPacket::CharDelete(ResponseCode::CharDeleteFailed)]
            }
        }
    }

    async fn char_rename(&mut self, id: CharacterId, name: String) -> Vec<ServerPacket> {
        self.state = SessionState::CharacterList;

        if self.names.validate(&name).is_err() {
            return vec![ServerPacket::CharRename {
                code: ResponseCode::CharNameInvalid,
                id: id.0,
                name,
            }];
        }

        match self.services.rename_character(id, name.clone()).await {
            Ok(()) => vec![ServerPacket::CharRename {
                code: ResponseCode::CharNameSuccess,
                id: id.0,
                name,
            }],
            Err(e) => {
                debug!("failed to rename character {}: {}", id, e);
                vec![ServerPacket::CharRename {
                    code: ResponseCode::CharNameFailure,
                    id: id.0,
                    name,
                }]
            }
        }
    }

    /// World entry is a single opaque step here: load the character
    /// and hand the session to the world loop.
    async fn world_enter(&mut self, id: CharacterId) -> Vec<ServerPacket> {
        self.state = SessionState::WorldEnter;

        match self.services.load_character(id).await {
            Ok(character) => {
                debug!("{} entering world as {}", self.client, character.name);
                self.state = SessionState::InWorld;
                Vec::new()
            }
            Err(e) => {
                debug!("world entry failed for {}: {}", id, e);
                self.state = SessionState::CharacterList;
                vec![ServerPacket::CharacterLoginFailed(
                    ResponseCode::CharLoginFailed,
                )]
            }
        }
    }
}

/// The client's world-auth proof:
/// H(username | 0u32 | client_seed | server_seed | session_key).
pub fn verify_world_proof(
    username: &str,
    client_seed: &[u8; 4],
    server_seed: &[u8; 4],
    key: &SessionKey,
    client_proof: &[u8; 20],
) -> bool {
    let mut hasher = Sha1::new();
    hasher.update(username.as_bytes());
    hasher.update([0u8; 4]);
    hasher.update(client_seed);
    hasher.update(server_seed);
    hasher.update(key.as_bytes());
    hasher.finalize().as_slice() == client_proof
}
