//! The framed transport for one client connection: buffered reads with
//! header deobfuscation, double-buffered writes with a single write in
//! flight, per-connection statistics, and the session loop gluing the
//! state machine to the socket and the event dispatcher.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    Arc, Mutex,
};

use anyhow::Result;
use ebonhold_protocol::obfuscator::Obfuscator;
use tokio::{
    io::AsyncWriteExt,
    net::{tcp::OwnedWriteHalf, TcpStream},
    sync::{mpsc, Notify},
    time::Instant,
};
use tracing::{debug, trace};

use crate::{
    dispatcher::EventDispatcher,
    handler::ClientHandler,
    protocol::{client::read_packet, read_frame, write_frame, ClientPacket},
    services::GatewayServices,
};

/// Counters every connection keeps about itself.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
    pub packets_in: AtomicU64,
    pub packets_out: AtomicU64,
    pub messages_in: AtomicU64,
    pub messages_out: AtomicU64,
    pub latency: AtomicU32,
}

/// The double-buffered outbound path. Senders append to the back
/// buffer; the write task swaps it in as the front once the previous
/// front has drained, so at most one write is ever in flight.
#[derive(Clone)]
pub(crate) struct Outbound {
    inner: Arc<OutboundInner>,
}

struct OutboundInner {
    back: Mutex<Vec<u8>>,
    notify: Notify,
    closed: AtomicBool,
}

impl Outbound {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(OutboundInner {
                back: Mutex::new(Vec::new()),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn send(&self, frame: &[u8]) {
        {
            let mut back = self.inner.back.lock().expect("outbound lock poisoned");
            back.extend_from_slice(frame);
        }
        self.inner.notify.notify_one();
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_one();
    }

    fn swap_front(&self) -> Vec<u8> {
        let mut back = self.inner.back.lock().expect("outbound lock poisoned");
        std::mem::take(&mut *back)
    }
}

pub(crate) async fn write_loop(
    mut stream: OwnedWriteHalf,
    outbound: Outbound,
    stats: Arc<ConnectionStats>,
) {
    loop {
        let front = outbound.swap_front();

        if front.is_empty() {
            if outbound.inner.closed.load(Ordering::Acquire) {
                break;
            }
            outbound.inner.notify.notified().await;
            continue;
        }

        if let Err(e) = stream.write_all(&front).await {
            debug!("write failed: {}", e);
            break;
        }

        stats.bytes_out.fetch_add(front.len() as u64, Ordering::Relaxed);
        stats.packets_out.fetch_add(1, Ordering::Relaxed);
    }
}

/// Drive one authenticated-protocol connection to completion.
///
/// A read pump owns the receive half so a slow frame is never torn by
/// event arrivals; the session task serializes packets, events and
/// timer expiry onto the handler, one at a time.
pub async fn run_session<S: GatewayServices>(
    stream: TcpStream,
    mut handler: ClientHandler<S>,
    dispatcher: EventDispatcher,
    stats: Arc<ConnectionStats>,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let (mut read_half, write_half) = stream.into_split();

    let crypto = Arc::new(Mutex::new(None::<Obfuscator>));
    let outbound = Outbound::new();
    let writer = tokio::spawn(write_loop(
        write_half,
        outbound.clone(),
        Arc::clone(&stats),
    ));

    let (frame_tx, mut frame_rx) = mpsc::channel(16);
    let read_pump = {
        let crypto = Arc::clone(&crypto);
        tokio::spawn(async move {
            loop {
                match read_frame(&mut read_half, &crypto).await {
                    Ok(frame) => {
                        if frame_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("connection lost: {}", e);
                        break;
                    }
                }
            }
        })
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    dispatcher.register(*handler.client(), event_tx);

    // the pre-auth challenge goes out in the clear
    let challenge = handler.challenge();
    outbound.send(&write_frame(challenge.opcode(), &challenge.body(), &crypto));

    let mut state = handler.state();
    let mut deadline = arm_deadline(&handler);

    while !handler.is_closed() {
        let expiry = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        let replies = tokio::select! {
            frame = frame_rx.recv() => {
                let Some((opcode, payload)) = frame else {
                    break;
                };

                stats.bytes_in.fetch_add((payload.len() + 4) as u64, Ordering::Relaxed);
                stats.packets_in.fetch_add(1, Ordering::Relaxed);
                stats.messages_in.fetch_add(1, Ordering::Relaxed);

                let packet = match read_packet(opcode, &payload) {
                    Ok(packet) => packet,
                    Err(e) => {
                        debug!(
                            "malformed {:?} packet: {} ({:02X?})",
                            opcode,
                            e,
                            &payload[..payload.len().min(64)]
                        );
                        break;
                    }
                };

                if let ClientPacket::Ping { latency, .. } = &packet {
                    stats.latency.store(*latency, Ordering::Relaxed);
                }

                handler.handle_packet(packet).await
            }
            event = event_rx.recv() => {
                match event {
                    Some(event) => handler.handle_event(&event).await,
                    None => break,
                }
            }
            _ = expiry => {
                debug!("session {} timed out in {:?}", handler.client(), state);
                break;
            }
        };

        // successful world auth arms the header cipher before the
        // response is framed; bytes already buffered stay untouched
        if let Some(key) = handler.take_session_key() {
            let mut crypto = crypto.lock().expect("crypto lock poisoned");
            *crypto = Some(Obfuscator::new(key.as_bytes()));
            trace!("header obfuscation armed for {}", handler.client());
        }

        for reply in replies {
            outbound.send(&write_frame(reply.opcode(), &reply.body(), &crypto));
            stats.messages_out.fetch_add(1, Ordering::Relaxed);
        }

        if handler.state() != state {
            state = handler.state();
            deadline = arm_deadline(&handler);
        }
    }

    handler.on_disconnect().await;
    read_pump.abort();
    outbound.close();
    let _ = writer.await;
    Ok(())
}

fn arm_deadline<S: GatewayServices>(handler: &ClientHandler<S>) -> Option<Instant> {
    handler
        .state_timeout()
        .map(|timeout| Instant::now() + timeout)
}
