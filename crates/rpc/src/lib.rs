//! rpc
//!
//! The service contracts that ride on the spark fabric: message sets
//! for the account, character and realm services, plus typed clients
//! that hide the serialization and token tracking. The services
//! themselves live in their own processes; everything here is the
//! shared wire contract.

use async_trait::async_trait;
use bincode::Options;
use ebonhold_spark::{Handler, Link, RpcError, Token};
use serde::{de::DeserializeOwned, Serialize};

pub mod account;
pub mod character;
pub mod realm;

/// Serialization options for contract payloads; matches the fabric's
/// own control-message codec.
pub(crate) fn codec() -> impl Options + Copy {
    bincode::options()
}

pub(crate) fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, RpcError> {
    codec().serialize(message).map_err(|_| RpcError::NetError)
}

pub(crate) fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, RpcError> {
    codec()
        .deserialize(data)
        .map_err(|_| RpcError::WrongMessageType)
}

/// The quiet client end of a request/response channel.
#[derive(Debug, Default)]
pub struct ClientHandler {
    service: &'static str,
}

impl ClientHandler {
    pub fn new(service: &'static str) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Handler for ClientHandler {
    fn service_type(&self) -> &str {
        self.service
    }

    async fn on_link_up(&self, link: &Link) {
        tracing::debug!("link up to {} ({})", link.peer_banner, link.service);
    }

    async fn on_link_down(&self, link: &Link) {
        tracing::debug!("link down to {} ({})", link.peer_banner, link.service);
    }

    async fn on_message(&self, link: &Link, _data: &[u8], _token: Token) {
        tracing::debug!("unsolicited message from {} dropped", link.peer_banner);
    }
}
