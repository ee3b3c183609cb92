//! End-to-end tests for the fabric: channel lifecycle, tracked
//! requests, and control-channel edge cases over loopback TCP.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bincode::Options;
use ebonhold_spark::{
    ControlMessage, Handler, HandlerRegistry, Link, MessageHeader, OpenResult, Peer, PeerConfig,
    RpcError, Server, Token,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

/// Echoes every request back with the payload reversed.
struct EchoService;

#[async_trait]
impl Handler for EchoService {
    fn service_type(&self) -> &str {
        "echo"
    }

    async fn on_link_up(&self, _link: &Link) {}
    async fn on_link_down(&self, _link: &Link) {}

    async fn on_message(&self, link: &Link, data: &[u8], token: Token) {
        let reversed: Vec<u8> = data.iter().rev().copied().collect();
        link.channel.respond(token, reversed).unwrap();
    }
}

/// Replies only after a delay, to exercise timeouts and late replies.
struct DelayedEcho {
    delay: Duration,
}

#[async_trait]
impl Handler for DelayedEcho {
    fn service_type(&self) -> &str {
        "delayed"
    }

    async fn on_link_up(&self, _link: &Link) {}
    async fn on_link_down(&self, _link: &Link) {}

    async fn on_message(&self, link: &Link, data: &[u8], token: Token) {
        let channel = link.channel.clone();
        let payload = data.to_vec();
        let delay = self.delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = channel.respond(token, payload);
        });
    }
}

/// Never replies at all.
struct SilentService;

#[async_trait]
impl Handler for SilentService {
    fn service_type(&self) -> &str {
        "silent"
    }

    async fn on_link_up(&self, _link: &Link) {}
    async fn on_link_down(&self, _link: &Link) {}
    async fn on_message(&self, _link: &Link, _data: &[u8], _token: Token) {}
}

/// Placeholder for the initiating side of a channel.
struct NullHandler;

#[async_trait]
impl Handler for NullHandler {
    fn service_type(&self) -> &str {
        "null"
    }

    async fn on_link_up(&self, _link: &Link) {}
    async fn on_link_down(&self, _link: &Link) {}
    async fn on_message(&self, _link: &Link, _data: &[u8], _token: Token) {}
}

async fn start_server(registry: HandlerRegistry) -> String {
    let server = Server::bind("127.0.0.1:0", "test-server", registry, PeerConfig::default())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap().to_string();
    tokio::spawn(server.run());
    addr
}

#[tokio::test]
async fn open_channel_and_request() {
    let registry = HandlerRegistry::new();
    registry.register(Arc::new(EchoService));
    let addr = start_server(registry).await;

    let peer = Peer::connect(
        &addr,
        "test-client",
        HandlerRegistry::new(),
        PeerConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(peer.peer_banner(), "test-server");

    let channel = peer.open_channel("echo", Arc::new(NullHandler)).await.unwrap();
    assert_ne!(channel.id(), 0);

    let reply = channel
        .request(b"grunt".to_vec(), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(reply, b"tnurg");
}

#[tokio::test]
async fn unknown_service_refused() {
    let addr = start_server(HandlerRegistry::new()).await;

    let peer = Peer::connect(
        &addr,
        "test-client",
        HandlerRegistry::new(),
        PeerConfig::default(),
    )
    .await
    .unwrap();

    let result = peer.open_channel("missing", Arc::new(NullHandler)).await;
    assert_eq!(result.unwrap_err(), RpcError::ChannelClosed);
}

#[tokio::test]
async fn tracked_request_times_out_and_late_reply_is_dropped() {
    let registry = HandlerRegistry::new();
    registry.register(Arc::new(DelayedEcho {
        delay: Duration::from_millis(200),
    }));
    let addr = start_server(registry).await;

    let peer = Peer::connect(
        &addr,
        "test-client",
        HandlerRegistry::new(),
        PeerConfig::default(),
    )
    .await
    .unwrap();

    let channel = peer
        .open_channel("delayed", Arc::new(NullHandler))
        .await
        .unwrap();

    // deadline expires before the delayed reply arrives
    let result = channel
        .request(b"first".to_vec(), Duration::from_millis(50))
        .await;
    assert_eq!(result.unwrap_err(), RpcError::TimedOut);

    // wait for the late reply to arrive and be discarded
    tokio::time::sleep(Duration::from_millis(300)).await;

    // the channel remains usable and correlation is intact
    let reply = channel
        .request(b"second".to_vec(), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(reply, b"second");
}

#[tokio::test]
async fn close_fails_inflight_requests() {
    let registry = HandlerRegistry::new();
    registry.register(Arc::new(SilentService));
    let addr = start_server(registry).await;

    let peer = Peer::connect(
        &addr,
        "test-client",
        HandlerRegistry::new(),
        PeerConfig::default(),
    )
    .await
    .unwrap();

    let channel = peer
        .open_channel("silent", Arc::new(NullHandler))
        .await
        .unwrap();

    let request = channel.request(b"hello".to_vec(), Duration::from_secs(5));
    let close = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        peer.close();
    };

    let (result, _) = tokio::join!(request, close);
    assert_eq!(result.unwrap_err(), RpcError::LinkGone);
}

// raw-socket helpers for control-channel edge cases

async fn raw_handshake(addr: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    raw_send_control(&mut stream, &ControlMessage::Hello { banner: "raw".into() }).await;
    let (_, message) = raw_read_control(&mut stream).await;
    assert!(matches!(message, ControlMessage::Hello { .. }));
    stream
}

async fn raw_send_control(stream: &mut TcpStream, message: &ControlMessage) {
    let payload = bincode::options().serialize(message).unwrap();
    let header = MessageHeader::new(0, Token::nil(), false, payload.len());
    let mut buffer = Vec::new();
    header.write_to(&mut buffer);
    buffer.extend_from_slice(&payload);
    stream.write_all(&buffer).await.unwrap();
}

async fn raw_read_control(stream: &mut TcpStream) -> (MessageHeader, ControlMessage) {
    let mut header_bytes = [0u8; MessageHeader::WIRE_SIZE];
    stream.read_exact(&mut header_bytes).await.unwrap();
    let header = MessageHeader::read_from(&header_bytes).unwrap();

    let mut payload = vec![0u8; header.size as usize - MessageHeader::WIRE_SIZE];
    stream.read_exact(&mut payload).await.unwrap();
    let message = bincode::options()
        .allow_trailing_bytes()
        .deserialize(&payload)
        .unwrap();
    (header, message)
}

#[tokio::test]
async fn channel_zero_proposal_rejected() {
    let registry = HandlerRegistry::new();
    registry.register(Arc::new(EchoService));
    let addr = start_server(registry).await;

    let mut stream = raw_handshake(&addr).await;
    raw_send_control(
        &mut stream,
        &ControlMessage::OpenChannel {
            id: 0,
            service: "echo".into(),
        },
    )
    .await;

    let (_, message) = raw_read_control(&mut stream).await;
    match message {
        ControlMessage::OpenChannelResponse {
            result,
            requested_id,
            ..
        } => {
            assert_eq!(result, OpenResult::Error);
            assert_eq!(requested_id, 0);
        }
        other => panic!("unexpected control message: {:?}", other),
    }
}

#[tokio::test]
async fn id_collision_yields_server_chosen_id() {
    let registry = HandlerRegistry::new();
    registry.register(Arc::new(EchoService));
    let addr = start_server(registry).await;

    let mut stream = raw_handshake(&addr).await;

    for expected in [1u8, 2u8] {
        raw_send_control(
            &mut stream,
            &ControlMessage::OpenChannel {
                id: 1,
                service: "echo".into(),
            },
        )
        .await;

        let (_, message) = raw_read_control(&mut stream).await;
        match message {
            ControlMessage::OpenChannelResponse {
                result,
                requested_id,
                actual_id,
            } => {
                assert_eq!(result, OpenResult::Ok);
                assert_eq!(requested_id, 1);
                assert_eq!(actual_id, expected);
            }
            other => panic!("unexpected control message: {:?}", other),
        }
    }
}

#[tokio::test]
async fn ping_pong_liveness() {
    let registry = HandlerRegistry::new();
    registry.register(Arc::new(EchoService));
    let addr = start_server(registry).await;

    let mut stream = raw_handshake(&addr).await;
    raw_send_control(&mut stream, &ControlMessage::Ping { sequence: 41 }).await;

    let (_, message) = raw_read_control(&mut stream).await;
    assert_eq!(message, ControlMessage::Pong { sequence: 41 });
}
