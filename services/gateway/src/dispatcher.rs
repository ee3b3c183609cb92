//! Routes events to the per-connection tasks that own each client.
//!
//! Each connected client registers an event sender under its
//! [`ClientRef`]; the first byte of the ref names the owning service
//! index, which broadcast delivery groups by so one task is posted per
//! service rather than one per client.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use ebonhold_game::types::ClientRef;
use tokio::sync::mpsc;
use tracing::debug;

use crate::events::Event;

pub type EventSender = mpsc::UnboundedSender<Arc<Event>>;

#[derive(Clone, Default)]
pub struct EventDispatcher {
    handlers: Arc<Mutex<HashMap<ClientRef, EventSender>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, client: ClientRef, sender: EventSender) {
        let mut handlers = self.handlers.lock().expect("dispatcher lock poisoned");
        handlers.insert(client, sender);
    }

    pub fn remove(&self, client: &ClientRef) {
        let mut handlers = self.handlers.lock().expect("dispatcher lock poisoned");
        handlers.remove(client);
    }

    /// Deliver one event to one client. Disconnected clients are
    /// silently skipped; their events no longer matter.
    pub fn post_event(&self, client: &ClientRef, event: Event) {
        let sender = {
            let handlers = self.handlers.lock().expect("dispatcher lock poisoned");
            handlers.get(client).cloned()
        };

        match sender {
            Some(sender) => {
                let _ = sender.send(Arc::new(event));
            }
            None => debug!("client {} disconnected, event discarded", client),
        }
    }

    /// Deliver one event to many clients with a minimum of posts: the
    /// refs are grouped by owning service index and one delivery task
    /// is spawned per group.
    pub fn broadcast_event(&self, mut clients: Vec<ClientRef>, event: Event) {
        clients.sort_by_key(ClientRef::service);
        let event = Arc::new(event);

        let mut groups: HashMap<u8, Vec<EventSender>> = HashMap::new();
        {
            let handlers = self.handlers.lock().expect("dispatcher lock poisoned");
            for client in &clients {
                if let Some(sender) = handlers.get(client) {
                    groups.entry(client.service()).or_default().push(sender.clone());
                }
            }
        }

        for (service, senders) in groups {
            let event = Arc::clone(&event);
            tokio::spawn(async move {
                for sender in senders {
                    let _ = sender.send(Arc::clone(&event));
                }
                debug!(
                    "delivered broadcast to service group {}",
                    service
                );
            });
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().expect("dispatcher lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.len())
            .finish()
    }
}
