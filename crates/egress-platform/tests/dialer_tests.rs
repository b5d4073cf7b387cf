//! Integration tests for the default dialer

use async_trait::async_trait;
use egress_core::options::{DialerOptions, TlsFragmentOptions, TunnelOptions};
use egress_core::{Dialer, Network, PacketListener};
use egress_platform::{DefaultDialer, TunnelForwarder, TunnelHandle};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio::time::timeout;

mod test_helpers {
    /// ClientHello record with `sni`
    pub fn client_hello(sni: &str) -> Vec<u8> {
        let host = sni.as_bytes();
        let mut ext = vec![0x00, 0x00];
        ext.extend_from_slice(&((host.len() + 5) as u16).to_be_bytes());
        ext.extend_from_slice(&((host.len() + 3) as u16).to_be_bytes());
        ext.push(0);
        ext.extend_from_slice(&(host.len() as u16).to_be_bytes());
        ext.extend_from_slice(host);

        let mut hello = vec![0x03, 0x03];
        hello.extend_from_slice(&[7u8; 32]);
        hello.push(0);
        hello.extend_from_slice(&[0x00, 0x02, 0x13, 0x01, 0x01, 0x00]);
        hello.extend_from_slice(&(ext.len() as u16).to_be_bytes());
        hello.extend_from_slice(&ext);

        let mut body = vec![0x01];
        body.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
        body.extend_from_slice(&hello);

        let mut record = vec![0x16, 0x03, 0x01];
        record.extend_from_slice(&(body.len() as u16).to_be_bytes());
        record.extend_from_slice(&body);
        record
    }
}

use test_helpers::client_hello;

#[tokio::test]
async fn test_fragmented_dial_splits_client_hello() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hello = client_hello("blocked.example.com");
    let expected = hello.len();

    let server = tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await.unwrap();
        let mut wire = Vec::new();
        conn.read_to_end(&mut wire).await.unwrap();
        wire
    });

    let options = DialerOptions {
        tls_fragment: Some(TlsFragmentOptions {
            enabled: true,
            size: "8-16".into(),
            sleep: "0".into(),
            sni_split: true,
        }),
        ..Default::default()
    };
    let dialer = DefaultDialer::new(&options, None).unwrap();
    assert!(dialer.fragments_tls());

    let mut stream = dialer
        .dial_context(Network::Tcp, addr)
        .await
        .unwrap()
        .into_stream()
        .unwrap();
    stream.write_all(&hello).await.unwrap();
    stream.shutdown().await.unwrap();
    drop(stream);

    let wire = server.await.unwrap();
    // Each extra record adds a 5-byte header.
    assert!(wire.len() > expected);
    assert_eq!(wire[0], 0x16);
    assert!(!wire.windows(19).any(|w| w == b"blocked.example.com"));
}

#[tokio::test]
async fn test_lazy_connect_failure_surfaces_on_write() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let options = DialerOptions {
        tls_fragment: Some(TlsFragmentOptions {
            enabled: true,
            size: "10".into(),
            ..Default::default()
        }),
        ..Default::default()
    };
    let dialer = DefaultDialer::new(&options, None).unwrap();
    let mut stream = dialer
        .dial_context(Network::Tcp, addr)
        .await
        .unwrap()
        .into_stream()
        .unwrap();
    assert!(stream.write_all(&client_hello("a.example")).await.is_err());
    assert!(stream.write_all(b"again").await.is_err());
}

#[tokio::test]
async fn test_dial_udp_connected() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();

    let dialer = DefaultDialer::new(&DialerOptions::default(), None).unwrap();
    let socket = dialer
        .dial_context(Network::Udp, addr)
        .await
        .unwrap()
        .into_datagram()
        .unwrap();
    assert!(!socket.is_guarded());
    socket.send(b"datagram").await.unwrap();

    let mut buf = [0u8; 16];
    let (n, from) = server.recv_from(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"datagram");
    assert_eq!(from.port(), socket.local_addr().unwrap().port());
}

#[tokio::test]
async fn test_listen_packet_family() {
    let dialer = DefaultDialer::new(&DialerOptions::default(), None).unwrap();

    let v4 = dialer.listen_packet("192.0.2.1:53".parse().unwrap()).await.unwrap();
    assert!(v4.local_addr().unwrap().is_ipv4());

    let any = dialer
        .listen_packet(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
        .await
        .unwrap();
    // Dual-stack when the host has IPv6, plain IPv4 otherwise.
    let local = any.local_addr().unwrap();
    assert!(local.ip().is_unspecified());

    if let Ok(v6) = dialer.listen_packet("[2001:db8::1]:53".parse().unwrap()).await {
        assert!(v6.local_addr().unwrap().is_ipv6());
    }
}

#[tokio::test]
async fn test_listen_packet_uses_v4_bind_address() {
    let options = DialerOptions {
        inet4_bind_address: Some(Ipv4Addr::LOCALHOST),
        ..Default::default()
    };
    let dialer = DefaultDialer::new(&options, None).unwrap();
    let socket = dialer
        .listen_packet(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
        .await
        .unwrap();
    assert_eq!(socket.local_addr().unwrap().ip(), Ipv4Addr::LOCALHOST);
}

/// Forwards one TCP connection from the local port to the destination
struct LoopbackForwarder {
    stopped: Arc<AtomicBool>,
}

struct Handle {
    task: JoinHandle<()>,
    stopped: Arc<AtomicBool>,
}

impl TunnelHandle for Handle {
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

#[async_trait]
impl TunnelForwarder for LoopbackForwarder {
    async fn start(
        &self,
        local: SocketAddr,
        destination: SocketAddr,
        _options: &TunnelOptions,
    ) -> egress_core::Result<Box<dyn TunnelHandle>> {
        let listener = TcpListener::bind(local).await?;
        let task = tokio::spawn(async move {
            if let Ok((mut inbound, _)) = listener.accept().await {
                if let Ok(mut outbound) = TcpStream::connect(destination).await {
                    let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                }
            }
        });
        Ok(Box::new(Handle {
            task,
            stopped: self.stopped.clone(),
        }))
    }
}

#[tokio::test]
async fn test_tunnel_wraps_and_stops_forwarder() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = upstream.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut conn, _) = upstream.accept().await.unwrap();
        conn.write_all(b"hello").await.unwrap();
    });

    let options = DialerOptions {
        tunnel: TunnelOptions {
            enabled: true,
            target: "wss://tunnel.example.com/ws".into(),
            ..Default::default()
        },
        ..Default::default()
    };
    let stopped = Arc::new(AtomicBool::new(false));
    let dialer = DefaultDialer::new(&options, None)
        .unwrap()
        .with_tunnel_forwarder(Arc::new(LoopbackForwarder {
            stopped: stopped.clone(),
        }));

    let mut stream = dialer
        .dial_context(Network::Tcp, addr)
        .await
        .unwrap()
        .into_stream()
        .unwrap();
    let mut buf = [0u8; 5];
    timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"hello");
    server.await.unwrap();

    assert!(!stopped.load(Ordering::SeqCst));
    drop(stream);
    assert!(stopped.load(Ordering::SeqCst));
}
