//! realms
//!
//! The realms module handles the replicated realm list. Realm records
//! are published by their owning gateway process and flipped offline
//! when the publishing link drops.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use derive_more::{Display, From, Into};
use enumflags2::{bitflags, BitFlags};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// The various flags that a realm can have.
#[repr(u8)]
#[bitflags]
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum RealmFlags {
    Invalid = 0b0000_0001,
    Offline = 0b0000_0010,
    SpecifyBuild = 0b0000_0100,
    Unknown1 = 0b0000_1000,
    Unknown2 = 0b0001_0000,
    Recommended = 0b0010_0000,
    New = 0b0100_0000,
    Full = 0b1000_0000,
}

/// The various types of realm.
#[repr(u8)]
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
pub enum RealmType {
    Normal = 0,
    Pvp = 1,
    Rp = 6,
    RpPvp = 8,
}

/// A marker for a realm id.
#[derive(
    Clone, Copy, Debug, Display, From, Into, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
pub struct RealmId(pub u32);

/// The basic realm object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Realm {
    pub id: RealmId,
    pub name: String,
    pub realm_type: RealmType,
    pub ip: String,
    pub port: u16,
    /// "ip:port", the form sent in the realm list.
    pub address: String,
    pub flags: BitFlags<RealmFlags>,
    pub category: u8,
    pub region: u8,
    pub population: f32,
}

impl Realm {
    pub fn offline(&self) -> bool {
        self.flags.contains(RealmFlags::Offline)
    }
}

/// A trait that models a realm list.
#[async_trait]
pub trait RealmList: Send + Sync {
    /// Return the list of realms sorted by id.
    async fn realms(&self) -> Vec<Realm>;

    /// Apply a status publish from a realm's owning process.
    async fn upsert(&self, realm: Realm);

    /// Flip a realm offline, e.g. on link loss.
    async fn set_offline(&self, id: RealmId);
}

/// The in-memory realm list replica held by the login process.
#[derive(Clone, Debug, Default)]
pub struct RealmListing {
    realms: Arc<Mutex<BTreeMap<RealmId, Realm>>>,
}

impl RealmListing {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RealmList for RealmListing {
    async fn realms(&self) -> Vec<Realm> {
        let realms = self.realms.lock().expect("realm lock poisoned");
        realms.values().cloned().collect()
    }

    async fn upsert(&self, realm: Realm) {
        let mut realms = self.realms.lock().expect("realm lock poisoned");
        realms.insert(realm.id, realm);
    }

    async fn set_offline(&self, id: RealmId) {
        let mut realms = self.realms.lock().expect("realm lock poisoned");
        if let Some(realm) = realms.get_mut(&id) {
            realm.flags |= RealmFlags::Offline;
        }
    }
}
