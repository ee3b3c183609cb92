//! Channel state and the value-handle through which handlers and
//! clients send on a channel.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::{message::Token, Handler, RpcError};

/// An outbound message queued on the peer's write strand.
#[derive(Debug)]
pub(crate) struct Outbound {
    pub channel: u8,
    pub token: Token,
    pub response: bool,
    pub payload: Vec<u8>,
}

/// Pending request continuations for one channel, keyed by token.
/// Each entry resolves exactly once: on reply, timeout or close.
#[derive(Default)]
pub(crate) struct Tracking {
    pending: Mutex<HashMap<Token, oneshot::Sender<Result<Vec<u8>, RpcError>>>>,
}

impl Tracking {
    pub fn track(&self, token: Token) -> oneshot::Receiver<Result<Vec<u8>, RpcError>> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().expect("tracking lock poisoned");
        pending.insert(token, tx);
        rx
    }

    /// Resolve a tracked token. Duplicate and late replies find no
    /// entry and are dropped.
    pub fn complete(&self, token: Token, result: Result<Vec<u8>, RpcError>) -> bool {
        let sender = {
            let mut pending = self.pending.lock().expect("tracking lock poisoned");
            pending.remove(&token)
        };

        match sender {
            Some(sender) => sender.send(result).is_ok(),
            None => {
                trace!("dropping reply for untracked token {}", token);
                false
            }
        }
    }

    pub fn forget(&self, token: &Token) {
        let mut pending = self.pending.lock().expect("tracking lock poisoned");
        pending.remove(token);
    }

    /// Fail every outstanding request, e.g. on channel close.
    pub fn drain(&self, error: RpcError) {
        let drained = {
            let mut pending = self.pending.lock().expect("tracking lock poisoned");
            std::mem::take(&mut *pending)
        };

        for (token, sender) in drained {
            trace!("failing in-flight request {} with {:?}", token, error);
            let _ = sender.send(Err(error));
        }
    }
}

impl fmt::Debug for Tracking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self.pending.lock().expect("tracking lock poisoned");
        f.debug_struct("Tracking").field("pending", &pending.len()).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelState {
    Empty,
    HalfOpen,
    Open,
}

/// A slot in the peer's channel arena.
pub(crate) struct Channel {
    pub state: ChannelState,
    pub service: String,
    pub handler: Option<Arc<dyn Handler>>,
    pub tracking: Arc<Tracking>,
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            state: ChannelState::Empty,
            service: String::new(),
            handler: None,
            tracking: Arc::new(Tracking::default()),
        }
    }
}

impl Channel {
    /// Close the slot, failing outstanding requests.
    pub fn reset(&mut self, error: RpcError) {
        self.tracking.drain(error);
        *self = Self::default();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("state", &self.state)
            .field("service", &self.service)
            .finish()
    }
}

/// A value handle onto one open channel. Cloneable; holding one does
/// not keep the connection alive.
#[derive(Clone)]
pub struct ChannelHandle {
    pub(crate) channel_id: u8,
    pub(crate) outbound: mpsc::UnboundedSender<Outbound>,
    pub(crate) tracking: Arc<Tracking>,
}

impl ChannelHandle {
    pub fn id(&self) -> u8 {
        self.channel_id
    }

    /// Send an untracked message (token nil, no reply expected).
    pub fn send(&self, payload: Vec<u8>) -> Result<(), RpcError> {
        self.queue(Token::nil(), false, payload)
    }

    /// Send a reply correlated with a received request token.
    pub fn respond(&self, token: Token, payload: Vec<u8>) -> Result<(), RpcError> {
        self.queue(token, true, payload)
    }

    /// Send a tracked request and await its reply. Resolves exactly
    /// once: with the reply payload, or [`RpcError::TimedOut`] after
    /// `timeout`, or [`RpcError::ChannelClosed`] if the channel dies
    /// first. A reply arriving after the timeout is silently dropped.
    pub async fn request(
        &self,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, RpcError> {
        let token = Token::new_v4();
        let rx = self.tracking.track(token);

        if let Err(e) = self.queue(token, false, payload) {
            self.tracking.forget(&token);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::ChannelClosed),
            Err(_) => {
                debug!("request {} on channel {} timed out", token, self.channel_id);
                self.tracking.forget(&token);
                Err(RpcError::TimedOut)
            }
        }
    }

    fn queue(&self, token: Token, response: bool, payload: Vec<u8>) -> Result<(), RpcError> {
        self.outbound
            .send(Outbound {
                channel: self.channel_id,
                token,
                response,
                payload,
            })
            .map_err(|_| RpcError::LinkGone)
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("channel_id", &self.channel_id)
            .finish()
    }
}
