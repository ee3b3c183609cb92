//! The gateway listener: accepts client sockets and spins up a session
//! for each.

use std::sync::Arc;

use anyhow::{Context, Result};
use ebonhold_game::{characters::NamePolicy, types::ClientRef};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::{
    conf::GatewayServerConfig,
    connection::{run_session, ConnectionStats},
    dispatcher::EventDispatcher,
    handler::{ClientHandler, SessionConfig},
    queue::{Capacity, RealmQueue},
    services::GatewayServices,
};

pub struct GatewayServer<S> {
    pub services: Arc<S>,
    pub capacity: Arc<Capacity>,
    pub queue: RealmQueue,
    pub dispatcher: EventDispatcher,
    pub names: Arc<NamePolicy>,
    pub config: GatewayServerConfig,
}

impl<S: GatewayServices + 'static> GatewayServer<S> {
    pub async fn start(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("could not bind {}", addr))?;

        info!(
            "gateway for realm '{}' listening on {}, {} slot(s)",
            self.config.realm.name, addr, self.capacity.max()
        );

        loop {
            let (stream, remote) = listener.accept().await?;
            debug!("connection from {}", remote);

            let handler = ClientHandler::new(
                Arc::clone(&self.services),
                Arc::clone(&self.capacity),
                self.queue.clone(),
                self.dispatcher.clone(),
                Arc::clone(&self.names),
                SessionConfig {
                    realm_id: self.config.realm.id,
                    list_zone_hide: self.config.quirks.list_zone_hide,
                },
                // a single reactor owns every connection here
                ClientRef::generate(0),
            );

            let dispatcher = self.dispatcher.clone();
            tokio::spawn(async move {
                let stats = Arc::new(ConnectionStats::default());
                if let Err(e) = run_session(stream, handler, dispatcher, stats).await {
                    debug!("session with {} ended: {}", remote, e);
                }
            });
        }
    }
}
