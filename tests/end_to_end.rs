//! Cross-role scenarios over real TCP sockets.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use neko::client::{NekoConnector, OutboundOptions, ShapingOptions, TransportOptions};
use neko::server::{FallbackOptions, InboundOptions, NekoListener};
use neko::{Inbound, SocksAddr};

const PSK_HEX: &str = "0000000000000000000000000000000000000000000000000000000000000000";

fn inbound_options(listen: &str) -> InboundOptions {
    InboundOptions {
        listen: listen.into(),
        psk: PSK_HEX.into(),
        cipher: "chacha20-poly1305".into(),
        window_size: 0,
        max_offset: 0,
        handshake_candidate_span: 0,
        replay_capacity: 0,
        replay_windows: 0,
        shaping: ShapingOptions::default(),
        transport: TransportOptions::default(),
        fallback: None,
    }
}

fn outbound_options(port: u16) -> OutboundOptions {
    OutboundOptions {
        server: "127.0.0.1".into(),
        port,
        psk: PSK_HEX.into(),
        cipher: "chacha20-poly1305".into(),
        udp: false,
        window_size: 0,
        max_offset: 0,
        shaping: ShapingOptions::default(),
        transport: TransportOptions::default(),
    }
}

async fn spawn_listener(options: InboundOptions) -> (u16, mpsc::Receiver<Inbound>) {
    let listener = NekoListener::bind(&options).await.unwrap();
    let port = listener.local_addr().port();
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(listener.serve(tx));
    (port, rx)
}

#[tokio::test]
async fn tcp_round_trip() {
    let (port, mut rx) = spawn_listener(inbound_options("127.0.0.1:0")).await;
    let connector = NekoConnector::new(&outbound_options(port)).unwrap();
    let target: SocksAddr = "127.0.0.1:80".parse().unwrap();

    let mut client = connector.connect(&target).await.unwrap();
    client.write(b"hello").await.unwrap();

    let inbound = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let Inbound::Stream {
        mut stream,
        target: seen_target,
        ..
    } = inbound
    else {
        panic!("expected a stream session");
    };
    assert_eq!(seen_target, target);

    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");

    // and the reverse direction
    stream.write(b"olleh").await.unwrap();
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"olleh");
}

#[tokio::test]
async fn udp_echo() {
    let (port, mut rx) = spawn_listener(inbound_options("127.0.0.1:0")).await;
    let connector = NekoConnector::new(&outbound_options(port)).unwrap();
    let target: SocksAddr = "1.2.3.4:9999".parse().unwrap();

    let client = connector.connect_packets(&target).await.unwrap();
    client.send_to(b"ping", &target).await.unwrap();

    let inbound = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let Inbound::Packets { conn, .. } = inbound else {
        panic!("expected a datagram session");
    };

    let (data, from) = conn.recv_from().await.unwrap();
    assert_eq!(data, b"ping");
    assert_eq!(from, target);

    conn.send_to(b"pong", &from).await.unwrap();
    let (data, from) = client.recv_from().await.unwrap();
    assert_eq!(data, b"pong");
    assert_eq!(from, target);
}

#[tokio::test]
async fn replayed_handshake_gets_probe_response() {
    // capture one valid handshake off an in-memory pipe
    let (pipe_client, mut pipe_capture) = tokio::io::duplex(16 * 1024);
    tokio::spawn(async move {
        let cfg = neko::transport::ClientConfig::new(
            [0u8; 32],
            neko::crypto::CipherKind::ChaCha20Poly1305,
        );
        let target: SocksAddr = "127.0.0.1:80".parse().unwrap();
        let _ = neko::transport::client_handshake(
            pipe_client,
            &cfg,
            &target.to_bytes(),
            neko::Mode::Tcp,
        )
        .await;
    });
    let mut captured = vec![0u8; 4096];
    let n = pipe_capture.read(&mut captured).await.unwrap();
    captured.truncate(n);

    let (port, mut rx) = spawn_listener(inbound_options("127.0.0.1:0")).await;

    // first presentation establishes a session
    let mut first = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    first.write_all(&captured).await.unwrap();
    let inbound = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert!(matches!(inbound, Some(Inbound::Stream { .. })));

    // the identical bytes replayed on a second connection must not produce
    // a session; the server absorbs it with a probe response instead
    let mut second = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    second.write_all(&captured).await.unwrap();
    let outcome = timeout(Duration::from_secs(3), rx.recv()).await;
    assert!(outcome.is_err(), "replayed handshake produced a session");
}

#[tokio::test]
async fn random_probe_is_absorbed_silently() {
    let (port, mut rx) = spawn_listener(inbound_options("127.0.0.1:0")).await;

    let mut probe = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let junk: Vec<u8> = (0..1024u32).map(|i| (i * 31 % 251) as u8).collect();
    probe.write_all(&junk).await.unwrap();

    // the prober never sees response data: either the socket stays open
    // (blackhole / fallback) or it closes cleanly (close)
    let mut buf = [0u8; 64];
    match timeout(Duration::from_millis(300), probe.read(&mut buf)).await {
        Err(_) => {}            // still open, nothing came back
        Ok(Ok(0)) => {}         // close response
        Ok(Ok(n)) => panic!("server leaked {n} response bytes to a prober"),
        Ok(Err(_)) => {}        // reset also fine
    }

    let outcome = timeout(Duration::from_secs(3), rx.recv()).await;
    assert!(outcome.is_err(), "garbage produced a session");
}

#[tokio::test]
async fn whitelist_bypasses_handshake() {
    let mut options = inbound_options("127.0.0.1:0");
    options.fallback = Some(FallbackOptions {
        dest: String::new(),
        http_response: None,
        whitelist: vec!["203.0.113.9".into()],
    });
    let (port, mut rx) = spawn_listener(options).await;

    // a fully valid client is still refused: 127.0.0.1 is not whitelisted
    let connector = NekoConnector::new(&outbound_options(port)).unwrap();
    let target: SocksAddr = "127.0.0.1:80".parse().unwrap();
    let mut client = connector.connect(&target).await.unwrap();
    client.write(b"hello").await.unwrap();

    let outcome = timeout(Duration::from_secs(3), rx.recv()).await;
    assert!(outcome.is_err(), "unlisted source produced a session");
}
