//! The listening side of the fabric.

use std::{io, net::SocketAddr};

use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::{handler::HandlerRegistry, peer::PeerConfig, Peer};

/// Accepts fabric connections and runs a [`Peer`] for each. Handlers
/// registered with the shared registry become reachable by service
/// type from any connected peer.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    banner: String,
    registry: HandlerRegistry,
    config: PeerConfig,
}

impl Server {
    pub async fn bind(
        addr: &str,
        banner: &str,
        registry: HandlerRegistry,
        config: PeerConfig,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        debug!("fabric listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            banner: banner.to_string(),
            registry,
            config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the listener fails. Each accepted
    /// socket runs its banner handshake concurrently so a stalled
    /// peer cannot block the accept loop.
    pub async fn run(self) -> io::Result<()> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            debug!("inbound fabric connection from {}", addr);

            let banner = self.banner.clone();
            let registry = self.registry.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    Peer::handshake(stream, &banner, registry, config, false).await
                {
                    warn!("fabric handshake with {} failed: {}", addr, e);
                }
            });
        }
    }
}
