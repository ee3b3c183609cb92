//! The realm status contract. Gateways publish their realm record to
//! the login process; a dropped link flips the realm offline.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use ebonhold_game::realms::{Realm, RealmId, RealmList};
use ebonhold_spark::{ChannelHandle, Handler, Link, Peer, RpcError, Token};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{decode, encode, ClientHandler};

pub const SERVICE: &str = "realm";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RealmMessage {
    /// Untracked, sent on connect and whenever population or flags
    /// change.
    StatusPublish { realm: Realm },
}

/// Gateway-side publisher.
#[derive(Debug, Clone)]
pub struct RealmClient {
    channel: ChannelHandle,
}

impl RealmClient {
    pub async fn connect(peer: &Peer) -> Result<Self, RpcError> {
        let channel = peer
            .open_channel(SERVICE, Arc::new(ClientHandler::new(SERVICE)))
            .await?;
        Ok(Self { channel })
    }

    pub fn publish(&self, realm: &Realm) -> Result<(), RpcError> {
        let message = RealmMessage::StatusPublish {
            realm: realm.clone(),
        };
        self.channel.send(encode(&message)?)
    }
}

/// Login-side service: applies status publishes to the replicated
/// realm list and flips realms offline when their link drops.
pub struct RealmListService<R> {
    realms: Arc<R>,
    /// Which realm each (peer, channel) pair published, so link loss
    /// can be attributed.
    publishers: Mutex<HashMap<(String, u8), RealmId>>,
}

impl<R: RealmList> RealmListService<R> {
    pub fn new(realms: Arc<R>) -> Self {
        Self {
            realms,
            publishers: Mutex::new(HashMap::new()),
        }
    }

    fn key(link: &Link) -> (String, u8) {
        (link.peer_banner.clone(), link.channel.id())
    }
}

impl<R> std::fmt::Debug for RealmListService<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealmListService").finish()
    }
}

#[async_trait]
impl<R: RealmList + 'static> Handler for RealmListService<R> {
    fn service_type(&self) -> &str {
        SERVICE
    }

    async fn on_link_up(&self, link: &Link) {
        debug!("realm publisher connected: {}", link.peer_banner);
    }

    async fn on_link_down(&self, link: &Link) {
        let id = {
            let mut publishers = self.publishers.lock().expect("publisher lock poisoned");
            publishers.remove(&Self::key(link))
        };

        if let Some(id) = id {
            debug!("realm {} offline, publisher {} gone", id, link.peer_banner);
            self.realms.set_offline(id).await;
        }
    }

    async fn on_message(&self, link: &Link, data: &[u8], _token: Token) {
        let message: RealmMessage = match decode(data) {
            Ok(message) => message,
            Err(_) => {
                warn!("malformed realm publish from {}", link.peer_banner);
                return;
            }
        };

        let RealmMessage::StatusPublish { realm } = message;

        {
            let mut publishers = self.publishers.lock().expect("publisher lock poisoned");
            publishers.insert(Self::key(link), realm.id);
        }

        debug!(
            "realm status: {} ({}) population {:.2}",
            realm.name, realm.address, realm.population
        );
        self.realms.upsert(realm).await;
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use ebonhold_game::realms::{Realm, RealmId, RealmList, RealmListing, RealmType};
    use ebonhold_spark::{HandlerRegistry, Peer, PeerConfig, Server};
    use enumflags2::BitFlags;

    use super::{RealmClient, RealmListService};

    fn realm() -> Realm {
        Realm {
            id: RealmId(1),
            name: "Ebonhold".to_string(),
            realm_type: RealmType::Pvp,
            ip: "127.0.0.1".to_string(),
            port: 8085,
            address: "127.0.0.1:8085".to_string(),
            flags: BitFlags::empty(),
            category: 1,
            region: 1,
            population: 0.2,
        }
    }

    #[tokio::test]
    async fn publish_updates_list_and_link_loss_flips_offline() {
        let realms = Arc::new(RealmListing::new());
        let registry = HandlerRegistry::new();
        registry.register(Arc::new(RealmListService::new(Arc::clone(&realms))));

        let server = Server::bind("127.0.0.1:0", "login", registry, PeerConfig::default())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap().to_string();
        tokio::spawn(server.run());

        let peer = Peer::connect(&addr, "gateway", HandlerRegistry::new(), PeerConfig::default())
            .await
            .unwrap();
        let client = RealmClient::connect(&peer).await.unwrap();

        client.publish(&realm()).unwrap();

        // the publish is untracked; poll until applied
        let mut listed = Vec::new();
        for _ in 0..50 {
            listed = realms.realms().await;
            if !listed.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(listed.len(), 1);
        assert!(!listed[0].offline());

        peer.close();

        let mut offline = false;
        for _ in 0..50 {
            if realms.realms().await[0].offline() {
                offline = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(offline, "realm should flip offline when the link drops");
    }
}
