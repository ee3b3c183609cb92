//! The login listener: accepts connections and runs one cooperative
//! session task per socket.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use ebonhold_game::realms::RealmList;
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tracing::{debug, instrument};

use crate::{
    conf::LoginServerConfig,
    handler::LoginHandler,
    integrity::IntegrityData,
    patcher::Patcher,
    protocol::{packets::ClientMessage, read_message},
    services::LoginServices,
};

/// A session that produces no complete message for this long is
/// dropped.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

pub struct LoginServer<S> {
    pub services: Arc<S>,
    pub patcher: Arc<Patcher>,
    pub integrity: Option<Arc<IntegrityData>>,
    pub realms: Arc<dyn RealmList>,
    pub config: LoginServerConfig,
}

impl<S: LoginServices + 'static> LoginServer<S> {
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("could not bind {}", addr))?;

        debug!("listening on {}", addr);

        loop {
            let (stream, remote) = listener.accept().await?;

            let handler = LoginHandler::new(
                Arc::clone(&self.services),
                Arc::clone(&self.patcher),
                self.integrity.clone(),
                Arc::clone(&self.realms),
                self.config.locale_enforce,
                remote.to_string(),
            );

            tokio::spawn(async move {
                if let Err(e) = session(stream, handler).await {
                    debug!("session with {} ended: {}", remote, e);
                }
            });
        }
    }
}

/// Drive one connection: a read pump feeds parsed messages through a
/// channel (so mid-transfer cancellation is seen without losing frame
/// boundaries) and the session task writes replies and chunks.
async fn session<S: LoginServices>(
    stream: TcpStream,
    mut handler: LoginHandler<S>,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();
    let (message_tx, mut message_rx) = mpsc::channel::<ClientMessage>(16);

    let read_pump = tokio::spawn(async move {
        loop {
            match read_message(&mut reader).await {
                Ok(message) => {
                    if message_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("read failed: {}", e);
                    break;
                }
            }
        }
    });

    while !handler.is_closed() {
        let message = if handler.transfer_active() {
            match message_rx.try_recv() {
                Ok(message) => Some(message),
                Err(mpsc::error::TryRecvError::Empty) => None,
                Err(mpsc::error::TryRecvError::Disconnected) => break,
            }
        } else {
            match tokio::time::timeout(READ_TIMEOUT, message_rx.recv()).await {
                Ok(Some(message)) => Some(message),
                // peer gone or nothing heard within the deadline
                Ok(None) | Err(_) => break,
            }
        };

        match message {
            Some(message) => {
                for reply in handler.handle(message).await {
                    writer.write_all(&reply.to_frame()).await?;
                }
            }
            None => match handler.next_chunk().await {
                Some(chunk) => {
                    writer.write_all(&chunk.to_frame()).await?;
                }
                None => continue,
            },
        }
    }

    read_pump.abort();
    Ok(())
}
