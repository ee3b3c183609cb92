//! sessions
//!
//! The in-memory session registry owned by the account service: one
//! session key per account, registered at login and looked up by the
//! gateway during world authentication.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use wow_srp6::SessionKey;

use crate::accounts::AccountId;

/// Registry of live session keys. A second registration for the same
/// account fails until the first is evicted.
#[derive(Clone, Debug, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<AccountId, SessionKey>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session key. Returns false if the account already
    /// holds a live session.
    pub fn register_session(&self, account: AccountId, key: SessionKey) -> bool {
        let mut sessions = self.sessions.lock().expect("session lock poisoned");

        match sessions.entry(account) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(key);
                true
            }
        }
    }

    pub fn lookup_session(&self, account: AccountId) -> Option<SessionKey> {
        let sessions = self.sessions.lock().expect("session lock poisoned");
        sessions.get(&account).cloned()
    }

    /// Drop a session, allowing the account to log in again.
    pub fn evict(&self, account: AccountId) -> bool {
        let mut sessions = self.sessions.lock().expect("session lock poisoned");
        sessions.remove(&account).is_some()
    }

    pub fn count(&self) -> usize {
        let sessions = self.sessions.lock().expect("session lock poisoned");
        sessions.len()
    }
}

#[cfg(test)]
mod test {
    use wow_srp6::SessionKey;

    use super::{AccountId, SessionRegistry};

    fn key(fill: u8) -> SessionKey {
        SessionKey(vec![fill; 40])
    }

    #[test]
    pub fn second_registration_fails() {
        let registry = SessionRegistry::new();
        assert!(registry.register_session(AccountId(1), key(1)));
        assert!(!registry.register_session(AccountId(1), key(2)));

        // the original key survives the failed registration
        assert_eq!(registry.lookup_session(AccountId(1)), Some(key(1)));
    }

    #[test]
    pub fn eviction_allows_relogin() {
        let registry = SessionRegistry::new();
        assert!(registry.register_session(AccountId(1), key(1)));
        assert!(registry.evict(AccountId(1)));
        assert!(!registry.evict(AccountId(1)));
        assert!(registry.register_session(AccountId(1), key(2)));
    }

    #[test]
    pub fn lookup_unknown_account() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.lookup_session(AccountId(42)), None);
    }
}
