//! Service handlers and the registry that locates them when a peer
//! asks to open a channel.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{channel::ChannelHandle, message::Token};

/// A live channel as seen by a handler: who the peer is and a handle
/// to send on. Handlers hold the handle by value; there are no back
/// references into the connection.
#[derive(Debug, Clone)]
pub struct Link {
    pub peer_banner: String,
    pub service: String,
    pub channel: ChannelHandle,
}

/// A service endpoint reachable over the fabric.
///
/// `on_message` receives untracked messages and tracked requests (the
/// token distinguishes them); replies go back through
/// [`ChannelHandle::respond`] with the request's token.
#[async_trait]
pub trait Handler: Send + Sync {
    /// The service type used to locate this handler.
    fn service_type(&self) -> &str;

    async fn on_link_up(&self, link: &Link);
    async fn on_link_down(&self, link: &Link);
    async fn on_message(&self, link: &Link, data: &[u8], token: Token);
}

/// Registry of local service handlers, shared by every peer of a
/// server or client.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    services: Arc<Mutex<HashMap<String, Arc<dyn Handler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn Handler>) {
        let mut services = self.services.lock().expect("registry lock poisoned");
        services.insert(handler.service_type().to_string(), handler);
    }

    pub fn deregister(&self, service_type: &str) {
        let mut services = self.services.lock().expect("registry lock poisoned");
        services.remove(service_type);
    }

    pub fn get(&self, service_type: &str) -> Option<Arc<dyn Handler>> {
        let services = self.services.lock().expect("registry lock poisoned");
        services.get(service_type).cloned()
    }

    pub fn services(&self) -> Vec<String> {
        let services = self.services.lock().expect("registry lock poisoned");
        services.keys().cloned().collect()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("services", &self.services())
            .finish()
    }
}
