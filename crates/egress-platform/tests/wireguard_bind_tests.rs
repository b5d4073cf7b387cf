//! WireGuard client bind over the default dialer's listen sockets

use egress_core::options::{DialerOptions, WireGuardObfsOptions};
use egress_core::wireguard::message::{INITIATION_SIZE, MESSAGE_INITIATION};
use egress_core::wireguard::{ClientBind, FakePacketPolicy, MessageType};
use egress_platform::DefaultDialer;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

#[tokio::test]
async fn test_handshake_burst_through_default_dialer() {
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let dialer = Arc::new(
        DefaultDialer::new(
            &DialerOptions {
                is_wireguard_listener: true,
                ..Default::default()
            },
            None,
        )
        .unwrap(),
    );
    let policy = FakePacketPolicy::from_options(&WireGuardObfsOptions {
        fake_packets: "2".into(),
        fake_packets_size: "30-40".into(),
        fake_packets_delay: "1".into(),
        fake_packets_mode: "m4".into(),
    })
    .unwrap();
    let bind = ClientBind::new(dialer, policy, [1, 2, 3], peer.local_addr().unwrap());

    let mut initiation = vec![0u8; INITIATION_SIZE];
    initiation[0] = MESSAGE_INITIATION;
    bind.send(&initiation).await.unwrap();

    let mut buf = [0u8; 256];
    let mut sizes = Vec::new();
    for _ in 0..3 {
        let (n, _) = timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        sizes.push(n);
    }
    assert!((30..=40).contains(&sizes[0]));
    assert!((30..=40).contains(&sizes[1]));
    assert_eq!(sizes[2], INITIATION_SIZE);
    assert_eq!(&buf[1..4], &[1, 2, 3]);

    // A filler from the peer is dropped, the response gets through.
    let client = bind.local_addr().unwrap();
    let client = std::net::SocketAddr::from(([127, 0, 0, 1], client.port()));
    peer.send_to(&[0xAA; 35], client).await.unwrap();
    let mut response = vec![0u8; 92];
    response[0] = 2;
    response[1..4].copy_from_slice(&[1, 2, 3]);
    peer.send_to(&response, client).await.unwrap();

    let (n, _, kind) = timeout(Duration::from_secs(2), bind.recv(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 92);
    assert_eq!(kind, MessageType::Response);
    assert_eq!(&buf[1..4], &[0, 0, 0]);
}
