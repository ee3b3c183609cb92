//! A remote peer: one framed TCP connection carrying multiplexed
//! channels. The read loop is the connection's strand; handlers run on
//! it one at a time, in arrival order.

use std::{
    collections::HashMap,
    fmt, io,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{mpsc, oneshot, watch},
};
use tracing::{debug, error, trace, warn};

use crate::{
    channel::{Channel, ChannelState, Outbound},
    codec,
    handler::{HandlerRegistry, Link},
    message::{ControlMessage, MessageHeader, OpenResult, Token},
    ChannelHandle, Handler, RpcError,
};

use bincode::Options;

const CHANNEL_COUNT: usize = 256;
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables for a peer connection.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Hard cap on a single buffered message, envelope included.
    pub max_message_size: usize,
    pub ping_interval: Duration,
    /// Pong latency above this threshold is logged as a warning.
    pub latency_warn: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            max_message_size: 1024 * 1024,
            ping_interval: Duration::from_secs(15),
            latency_warn: Duration::from_millis(250),
        }
    }
}

#[derive(Default)]
struct PingState {
    next_seq: u64,
    outstanding: Option<(u64, Instant)>,
}

pub(crate) struct Shared {
    banner: String,
    peer_banner: String,
    registry: HandlerRegistry,
    config: PeerConfig,
    channels: Mutex<Vec<Channel>>,
    pending_opens: Mutex<HashMap<u8, oneshot::Sender<Result<u8, RpcError>>>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    ping: Mutex<PingState>,
    closed: watch::Sender<bool>,
}

/// One end of a fabric connection. Cheap to clone; the connection
/// lives until either side closes or the link drops.
#[derive(Clone)]
pub struct Peer {
    shared: Arc<Shared>,
}

impl Peer {
    /// Connect to a listening peer and exchange banners.
    pub async fn connect(
        addr: &str,
        banner: &str,
        registry: HandlerRegistry,
        config: PeerConfig,
    ) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::handshake(stream, banner, registry, config, true).await
    }

    /// Run the banner exchange and spawn the connection tasks.
    pub(crate) async fn handshake(
        mut stream: TcpStream,
        banner: &str,
        registry: HandlerRegistry,
        config: PeerConfig,
        initiator: bool,
    ) -> io::Result<Self> {
        let hello = ControlMessage::Hello {
            banner: banner.to_string(),
        };

        let peer_banner = if initiator {
            write_control(&mut stream, &hello).await?;
            read_hello(&mut stream, config.max_message_size).await?
        } else {
            let peer = read_hello(&mut stream, config.max_message_size).await?;
            write_control(&mut stream, &hello).await?;
            peer
        };

        debug!("connected to peer '{}'", peer_banner);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(false);
        let mut channels = Vec::with_capacity(CHANNEL_COUNT);
        channels.resize_with(CHANNEL_COUNT, Channel::default);

        let shared = Arc::new(Shared {
            banner: banner.to_string(),
            peer_banner,
            registry,
            config,
            channels: Mutex::new(channels),
            pending_opens: Mutex::new(HashMap::new()),
            outbound: outbound_tx,
            ping: Mutex::new(PingState::default()),
            closed: closed_tx,
        });

        let (read_half, write_half) = stream.into_split();

        tokio::spawn(read_loop(Arc::clone(&shared), read_half));
        tokio::spawn(write_loop(Arc::clone(&shared), write_half, outbound_rx));
        tokio::spawn(ping_loop(Arc::clone(&shared)));

        Ok(Self { shared })
    }

    pub fn peer_banner(&self) -> &str {
        &self.shared.peer_banner
    }

    pub fn banner(&self) -> &str {
        &self.shared.banner
    }

    /// Ask the remote end to open a channel to the named service.
    /// Yields a handle on success; the remote may assign a different
    /// id than the one proposed.
    pub async fn open_channel(
        &self,
        service: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<ChannelHandle, RpcError> {
        let id = {
            let mut channels = self.shared.channels.lock().expect("channel lock poisoned");

            let id = match next_empty(&channels, 1) {
                Some(id) => id,
                None => {
                    error!("channel ids exhausted towards {}", self.shared.peer_banner);
                    return Err(RpcError::NetError);
                }
            };

            let slot = &mut channels[id as usize];
            slot.state = ChannelState::HalfOpen;
            slot.service = service.to_string();
            slot.handler = Some(handler);
            id
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self
                .shared
                .pending_opens
                .lock()
                .expect("pending lock poisoned");
            pending.insert(id, tx);
        }

        self.shared.send_control(ControlMessage::OpenChannel {
            id,
            service: service.to_string(),
        })?;

        let actual = match tokio::time::timeout(OPEN_TIMEOUT, rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(RpcError::LinkGone),
            Err(_) => {
                {
                    let mut pending = self
                        .shared
                        .pending_opens
                        .lock()
                        .expect("pending lock poisoned");
                    pending.remove(&id);
                }
                let mut channels = self.shared.channels.lock().expect("channel lock poisoned");
                channels[id as usize].reset(RpcError::TimedOut);
                return Err(RpcError::TimedOut);
            }
        };

        let channels = self.shared.channels.lock().expect("channel lock poisoned");
        Ok(ChannelHandle {
            channel_id: actual,
            outbound: self.shared.outbound.clone(),
            tracking: Arc::clone(&channels[actual as usize].tracking),
        })
    }

    /// Close the connection. Idempotent; all open channels observe a
    /// link-down and in-flight requests fail with `LinkGone`.
    pub fn close(&self) {
        let _ = self.shared.closed.send(true);
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("peer_banner", &self.shared.peer_banner)
            .finish()
    }
}

impl Shared {
    fn send_control(&self, message: ControlMessage) -> Result<(), RpcError> {
        let payload = codec()
            .serialize(&message)
            .map_err(|_| RpcError::NetError)?;

        self.outbound
            .send(Outbound {
                channel: 0,
                token: Token::nil(),
                response: false,
                payload,
            })
            .map_err(|_| RpcError::LinkGone)
    }

    fn link(&self, channel_id: u8, service: String, tracking: Arc<crate::channel::Tracking>) -> Link {
        Link {
            peer_banner: self.peer_banner.clone(),
            service,
            channel: ChannelHandle {
                channel_id,
                outbound: self.outbound.clone(),
                tracking,
            },
        }
    }
}

fn next_empty(channels: &[Channel], from: u8) -> Option<u8> {
    (from.max(1)..=u8::MAX).find(|&id| channels[id as usize].state == ChannelState::Empty)
}

async fn read_loop(shared: Arc<Shared>, mut stream: OwnedReadHalf) {
    let mut closed = shared.closed.subscribe();

    loop {
        if *closed.borrow() {
            break;
        }

        let result = tokio::select! {
            r = read_message(&mut stream, shared.config.max_message_size) => r,
            _ = closed.changed() => break,
        };

        let (header, payload) = match result {
            Ok(message) => message,
            Err(e) => {
                debug!("link to {} lost: {}", shared.peer_banner, e);
                break;
            }
        };

        if header.channel == 0 {
            handle_control(&shared, &payload).await;
        } else {
            handle_channel_message(&shared, header, payload).await;
        }
    }

    link_down(&shared).await;
    let _ = shared.closed.send(true);
}

async fn write_loop(
    shared: Arc<Shared>,
    mut stream: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let mut closed = shared.closed.subscribe();

    loop {
        if *closed.borrow() {
            break;
        }

        let message = tokio::select! {
            m = outbound.recv() => match m {
                Some(m) => m,
                None => break,
            },
            _ = closed.changed() => break,
        };

        let header = MessageHeader::new(
            message.channel,
            message.token,
            message.response,
            message.payload.len(),
        );

        let mut buffer = Vec::with_capacity(MessageHeader::WIRE_SIZE + message.payload.len());
        header.write_to(&mut buffer);
        buffer.extend_from_slice(&message.payload);

        if let Err(e) = stream.write_all(&buffer).await {
            debug!("write to {} failed: {}", shared.peer_banner, e);
            break;
        }
    }

    let _ = shared.closed.send(true);
}

async fn ping_loop(shared: Arc<Shared>) {
    let mut closed = shared.closed.subscribe();
    let mut interval = tokio::time::interval(shared.config.ping_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await; // immediate first tick

    loop {
        if *closed.borrow() {
            break;
        }

        tokio::select! {
            _ = interval.tick() => {}
            _ = closed.changed() => break,
        }

        let sequence = {
            let mut ping = shared.ping.lock().expect("ping lock poisoned");
            let sequence = ping.next_seq;
            ping.next_seq += 1;
            ping.outstanding = Some((sequence, Instant::now()));
            sequence
        };

        if shared
            .send_control(ControlMessage::Ping { sequence })
            .is_err()
        {
            break;
        }
    }
}

async fn read_message(
    stream: &mut (impl AsyncReadExt + Unpin),
    max_size: usize,
) -> io::Result<(MessageHeader, Vec<u8>)> {
    let mut header_bytes = [0u8; MessageHeader::WIRE_SIZE];
    stream.read_exact(&mut header_bytes).await?;

    let header = MessageHeader::read_from(&header_bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

    if header.size as usize > max_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message of {} bytes exceeds the cap", header.size),
        ));
    }

    let mut payload = vec![0u8; header.size as usize - MessageHeader::WIRE_SIZE];
    stream.read_exact(&mut payload).await?;
    Ok((header, payload))
}

async fn handle_control(shared: &Arc<Shared>, payload: &[u8]) {
    let message: ControlMessage = match codec().deserialize(payload) {
        Ok(message) => message,
        Err(e) => {
            warn!("bad control message from {}: {}", shared.peer_banner, e);
            return;
        }
    };

    trace!("control message from {}: {:?}", shared.peer_banner, message);

    match message {
        ControlMessage::Hello { banner } => {
            // banners are exchanged during the handshake only
            warn!("unexpected Hello from {} ({})", shared.peer_banner, banner);
        }
        ControlMessage::OpenChannel { id, service } => {
            handle_open_channel(shared, id, service).await;
        }
        ControlMessage::OpenChannelResponse {
            result,
            requested_id,
            actual_id,
        } => {
            handle_open_channel_response(shared, result, requested_id, actual_id).await;
        }
        ControlMessage::CloseChannel { channel } => {
            handle_close_channel(shared, channel).await;
        }
        ControlMessage::Ping { sequence } => {
            let _ = shared.send_control(ControlMessage::Pong { sequence });
        }
        ControlMessage::Pong { sequence } => {
            handle_pong(shared, sequence);
        }
    }
}

async fn handle_open_channel(shared: &Arc<Shared>, id: u8, service: String) {
    let respond = |result, actual| {
        let _ = shared.send_control(ControlMessage::OpenChannelResponse {
            result,
            requested_id: id,
            actual_id: actual,
        });
    };

    let handler = match shared.registry.get(&service) {
        Some(handler) => handler,
        None => {
            debug!("requested service ({}) does not exist", service);
            respond(OpenResult::Error, 0);
            return;
        }
    };

    if id == 0 {
        debug!("peer {} proposed reserved channel 0", shared.peer_banner);
        respond(OpenResult::Error, 0);
        return;
    }

    let (actual, tracking) = {
        let mut channels = shared.channels.lock().expect("channel lock poisoned");

        let actual = if channels[id as usize].state == ChannelState::Empty {
            id
        } else {
            match next_empty(&channels, id) {
                Some(actual) => actual,
                None => {
                    error!("channel ids exhausted towards {}", shared.peer_banner);
                    respond(OpenResult::Error, 0);
                    return;
                }
            }
        };

        let slot = &mut channels[actual as usize];
        slot.state = ChannelState::Open;
        slot.service = service.clone();
        slot.handler = Some(Arc::clone(&handler));
        (actual, Arc::clone(&slot.tracking))
    };

    respond(OpenResult::Ok, actual);
    debug!("remote channel open, {}:{}", service, actual);

    let link = shared.link(actual, service, tracking);
    handler.on_link_up(&link).await;
}

async fn handle_open_channel_response(
    shared: &Arc<Shared>,
    result: OpenResult,
    requested_id: u8,
    actual_id: u8,
) {
    let pending = {
        let mut pending = shared.pending_opens.lock().expect("pending lock poisoned");
        pending.remove(&requested_id)
    };

    if result != OpenResult::Ok {
        debug!(
            "peer {} refused channel for id {}",
            shared.peer_banner, requested_id
        );

        let mut channels = shared.channels.lock().expect("channel lock poisoned");
        channels[requested_id as usize].reset(RpcError::ChannelClosed);

        if let Some(tx) = pending {
            let _ = tx.send(Err(RpcError::ChannelClosed));
        }
        return;
    }

    let (handler, link) = {
        let mut channels = shared.channels.lock().expect("channel lock poisoned");

        if actual_id != requested_id {
            // the peer allocated a different slot; relocate ours to match
            let moved = std::mem::take(&mut channels[requested_id as usize]);
            channels[actual_id as usize] = moved;
        }

        let slot = &mut channels[actual_id as usize];

        if slot.state != ChannelState::HalfOpen {
            warn!("open response for channel {} in {:?}", actual_id, slot.state);
            let _ = shared.send_control(ControlMessage::CloseChannel { channel: actual_id });
            slot.reset(RpcError::ChannelClosed);

            if let Some(tx) = pending {
                let _ = tx.send(Err(RpcError::ChannelClosed));
            }
            return;
        }

        slot.state = ChannelState::Open;
        let handler = slot.handler.clone();
        let link = shared.link(actual_id, slot.service.clone(), Arc::clone(&slot.tracking));
        (handler, link)
    };

    debug!("channel open, {}:{}", link.service, actual_id);

    if let Some(handler) = handler {
        handler.on_link_up(&link).await;
    }

    if let Some(tx) = pending {
        let _ = tx.send(Ok(actual_id));
    }
}

async fn handle_close_channel(shared: &Arc<Shared>, channel: u8) {
    let (handler, link) = {
        let mut channels = shared.channels.lock().expect("channel lock poisoned");
        let slot = &mut channels[channel as usize];

        if slot.state == ChannelState::Empty {
            warn!("request to close empty channel {}", channel);
            return;
        }

        let handler = slot.handler.clone();
        let link = shared.link(channel, slot.service.clone(), Arc::clone(&slot.tracking));
        slot.reset(RpcError::ChannelClosed);
        (handler, link)
    };

    debug!("closed channel {}, requested by remote peer", channel);

    if let Some(handler) = handler {
        handler.on_link_down(&link).await;
    }
}

fn handle_pong(shared: &Arc<Shared>, sequence: u64) {
    let mut ping = shared.ping.lock().expect("ping lock poisoned");

    match ping.outstanding.take() {
        Some((expected, sent)) if expected == sequence => {
            let latency = sent.elapsed();
            if latency > shared.config.latency_warn {
                warn!(
                    "peer {} latency {}ms exceeds threshold",
                    shared.peer_banner,
                    latency.as_millis()
                );
            }
        }
        Some((expected, _)) => {
            warn!(
                "unexpected pong sequence {} from {}, expected {}",
                sequence, shared.peer_banner, expected
            );
        }
        None => {
            warn!("unsolicited pong from {}", shared.peer_banner);
        }
    }
}

async fn handle_channel_message(shared: &Arc<Shared>, header: MessageHeader, payload: Vec<u8>) {
    let (state, handler, link) = {
        let channels = shared.channels.lock().expect("channel lock poisoned");
        let slot = &channels[header.channel as usize];
        (
            slot.state,
            slot.handler.clone(),
            shared.link(
                header.channel,
                slot.service.clone(),
                Arc::clone(&slot.tracking),
            ),
        )
    };

    if state != ChannelState::Open {
        warn!("received message for closed channel, {}", header.channel);
        return;
    }

    if header.response && !header.token.is_nil() {
        link.channel.tracking.complete(header.token, Ok(payload));
    } else if let Some(handler) = handler {
        handler.on_message(&link, &payload, header.token).await;
    }
}

/// Fail everything when the link drops.
async fn link_down(shared: &Arc<Shared>) {
    let open = {
        let mut channels = shared.channels.lock().expect("channel lock poisoned");
        let mut open = Vec::new();

        for (id, slot) in channels.iter_mut().enumerate() {
            if slot.state == ChannelState::Empty {
                continue;
            }

            // half-open channels never saw a link-up
            if slot.state == ChannelState::Open {
                let handler = slot.handler.clone();
                let link = shared.link(
                    id as u8,
                    slot.service.clone(),
                    Arc::clone(&slot.tracking),
                );
                open.push((handler, link));
            }

            slot.reset(RpcError::LinkGone);
        }
        open
    };

    {
        let mut pending = shared.pending_opens.lock().expect("pending lock poisoned");
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(RpcError::LinkGone));
        }
    }

    for (handler, link) in open {
        if let Some(handler) = handler {
            handler.on_link_down(&link).await;
        }
    }
}

async fn write_control(stream: &mut TcpStream, message: &ControlMessage) -> io::Result<()> {
    let payload = codec()
        .serialize(message)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

    let header = MessageHeader::new(0, Token::nil(), false, payload.len());
    let mut buffer = Vec::with_capacity(MessageHeader::WIRE_SIZE + payload.len());
    header.write_to(&mut buffer);
    buffer.extend_from_slice(&payload);
    stream.write_all(&buffer).await
}

async fn read_hello(stream: &mut TcpStream, max_size: usize) -> io::Result<String> {
    let (header, payload) = read_message(stream, max_size).await?;

    if header.channel != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "expected a control message",
        ));
    }

    match codec().deserialize(&payload) {
        Ok(ControlMessage::Hello { banner }) => Ok(banner),
        Ok(_) | Err(_) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "expected a Hello banner",
        )),
    }
}
