use std::{net::Ipv4Addr, path::Path};

use anyhow::{Context, Result};
use ebonhold_game::realms::RealmType;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GatewayServerConfig {
    pub bind_address: Ipv4Addr,
    pub port: u16,

    /// The login process, which receives our realm status publishes.
    pub login_address: String,
    pub account_service_address: String,
    pub character_service_address: String,

    pub realm: RealmConfig,

    /// World slot ceiling; arrivals beyond it wait in the queue.
    pub max_slots: usize,

    pub quirks: QuirksConfig,
    pub names: NamesConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RealmConfig {
    pub id: u32,
    pub name: String,
    pub realm_type: RealmType,
    /// The address advertised in the realm list.
    pub external_address: String,
    pub category: u8,
    pub region: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct QuirksConfig {
    /// Zero the zone of first-login characters in the list, as retail
    /// did.
    pub list_zone_hide: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct NamesConfig {
    pub reserved: Vec<String>,
    pub profane: Vec<String>,
}

impl GatewayServerConfig {
    pub fn read(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("could not open {}", path.display()))?;
        serde_yaml::from_reader(file).context("could not read yaml file")
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("could not create {}", path.display()))?;
        serde_yaml::to_writer(file, self).context("could not write yaml file")
    }
}
