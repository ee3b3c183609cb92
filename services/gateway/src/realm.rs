//! Publishes this realm's status to the login process. The realm is
//! offline from the login's point of view until the first publish
//! lands, and flips back to offline if our link drops.

use std::{sync::Arc, time::Duration};

use ebonhold_game::realms::{Realm, RealmId};
use ebonhold_rpc::realm::RealmClient;
use tracing::{debug, warn};

use crate::{conf::RealmConfig, queue::Capacity};

const PUBLISH_PERIOD: Duration = Duration::from_secs(10);

pub fn realm_record(config: &RealmConfig, port: u16, population: f32) -> Realm {
    let (ip, _) = config
        .external_address
        .split_once(':')
        .unwrap_or((config.external_address.as_str(), ""));

    Realm {
        id: RealmId(config.id),
        name: config.name.clone(),
        realm_type: config.realm_type,
        ip: ip.to_string(),
        port,
        address: config.external_address.clone(),
        flags: Default::default(),
        category: config.category,
        region: config.region,
        population,
    }
}

/// Periodic status heartbeat with the current population ratio.
pub async fn publish_status(
    client: RealmClient,
    config: RealmConfig,
    port: u16,
    capacity: Arc<Capacity>,
) {
    let mut interval = ebonhold_utils::interval(PUBLISH_PERIOD);

    loop {
        interval.tick().await;

        let population = capacity.active() as f32 / capacity.max().max(1) as f32;
        let realm = realm_record(&config, port, population);

        match client.publish(&realm) {
            Ok(()) => debug!("published realm status, population {:.2}", population),
            Err(e) => {
                warn!("realm status publish failed: {}", e);
                return;
            }
        }
    }
}
