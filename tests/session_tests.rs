//! End-to-end loopback scenarios exercising two real `HudpTransport`
//! instances talking over localhost UDP sockets.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use hudp::{Config, HudpTransport};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn loopback_pair(retransmission_timeout_ms: u64, gap_skip_timeout_ms: u64) -> (HudpTransport, HudpTransport) {
    init_tracing();

    let a_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let b_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();

    // Bind both ends up front so each can learn the other's ephemeral port.
    let a_sock = std::net::UdpSocket::bind(a_addr).unwrap();
    let b_sock = std::net::UdpSocket::bind(b_addr).unwrap();
    let a_local = a_sock.local_addr().unwrap();
    let b_local = b_sock.local_addr().unwrap();
    drop(a_sock);
    drop(b_sock);

    let a = HudpTransport::new(Config {
        local_addr: a_local,
        peer_addr: b_local,
        metric: true,
        retransmission_timeout_ms,
        gap_skip_timeout_ms,
    })
    .unwrap();
    let b = HudpTransport::new(Config {
        local_addr: b_local,
        peer_addr: a_local,
        metric: true,
        retransmission_timeout_ms,
        gap_skip_timeout_ms,
    })
    .unwrap();

    a.start();
    b.start();
    (a, b)
}

#[test]
fn clean_reliable_round_trip() {
    let (a, b) = loopback_pair(50, 200);

    a.send(Bytes::from_static(b"A"), true).unwrap();
    a.send(Bytes::from_static(b"B"), true).unwrap();
    a.send(Bytes::from_static(b"C"), true).unwrap();

    let mut received = Vec::new();
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while received.len() < 3 && std::time::Instant::now() < deadline {
        received.extend(b.recv(100));
    }

    assert_eq!(received.len(), 3);
    assert_eq!(&received[0].payload[..], b"A");
    assert_eq!(&received[1].payload[..], b"B");
    assert_eq!(&received[2].payload[..], b"C");

    a.close().unwrap();
    b.close().unwrap();
}

#[test]
fn unreliable_delivers_without_registry_bookkeeping() {
    let (a, b) = loopback_pair(50, 200);

    a.send(Bytes::from_static(b"frame-0"), false).unwrap();

    let mut received = Vec::new();
    let deadline = std::time::Instant::now() + Duration::from_secs(1);
    while received.is_empty() && std::time::Instant::now() < deadline {
        received.extend(b.recv(100));
    }

    assert_eq!(received.len(), 1);
    assert_eq!(&received[0].payload[..], b"frame-0");

    a.close().unwrap();
    b.close().unwrap();
}

#[test]
fn close_drains_registry_and_is_idempotent() {
    let (a, b) = loopback_pair(20, 100);
    a.send(Bytes::from_static(b"x"), true).unwrap();

    // Give the receiver a moment to ACK before closing.
    std::thread::sleep(Duration::from_millis(100));

    a.close().unwrap();
    a.close().unwrap(); // second call must be a no-op, not a panic

    b.close().unwrap();
}

#[test]
fn config_rejection_happens_before_any_socket_binds() {
    init_tracing();
    let cfg = Config {
        local_addr: "127.0.0.1:0".parse().unwrap(),
        peer_addr: "127.0.0.1:0".parse().unwrap(),
        metric: false,
        retransmission_timeout_ms: 200,
        gap_skip_timeout_ms: 200,
    };
    let result = HudpTransport::new(cfg);
    assert!(result.is_err());
}
