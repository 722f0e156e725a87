//! Two nodes wired back to back through in-memory transports: gossip reaches the other directory and
//! datagrams from one local client come out at the other over real loopback sockets.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::ops::Range;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ttt_core::transport::memory::MemoryTransport;
use ttt_core::{
    ConnectionStatus, Directory, ExtensionId, ExtensionRegistry, InfoHash, PeerId, Settings, Torrent,
    TransportEvent, TunnelSettings,
};

const A: PeerId = PeerId(1);
const B: PeerId = PeerId(2);

struct Node {
    id: PeerId,
    registry: ExtensionRegistry,
    transport: MemoryTransport,
    directory: Arc<Directory>,
    client: UdpSocket,
}

fn free_range(width: u16) -> Range<u16> {
    let probe = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let start = probe.local_addr().unwrap().port();
    start..start.saturating_add(width)
}

fn node(id: PeerId, remote: PeerId) -> Node {
    let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let settings = Settings {
        tick_interval: Duration::from_millis(5),
        announce_interval: Duration::from_millis(10),
        tunnel: TunnelSettings {
            port_range: free_range(100),
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            client_host: "127.0.0.1".into(),
            client_port: client.local_addr().unwrap().port(),
            // Small datagrams travel unreliably; take them on the receiving side too.
            accept_unreliable: true,
            ..TunnelSettings::default()
        },
    };
    let directory = Arc::new(Directory::new());
    let mut registry = ExtensionRegistry::standard(&settings, directory.clone()).unwrap();
    let mut transport = MemoryTransport::new();
    registry.register(&mut transport).unwrap();
    transport.set_status(remote, ConnectionStatus::Full);
    registry.push_event(TransportEvent::ConnectionStatus {
        peer: remote,
        status: ConnectionStatus::Full,
    });
    Node {
        id,
        registry,
        transport,
        directory,
        client,
    }
}

/// Both sides answer every negotiation with "compatible".
fn negotiate(a: &mut Node, b: &mut Node) {
    a.registry.tick(&mut a.transport);
    b.registry.tick(&mut b.transport);
    let (a_id, b_id) = (a.id, b.id);
    for (node, remote) in [(a, b_id), (b, a_id)] {
        for (handle, peer) in node.transport.negotiations.drain(..) {
            assert_eq!(peer, remote);
            node.registry.push_event(TransportEvent::NegotiationResult {
                handle,
                peer,
                compatible: true,
            });
        }
    }
}

/// Tick both nodes and deliver what each sent to the other.
fn exchange(a: &mut Node, b: &mut Node) {
    a.registry.tick(&mut a.transport);
    b.registry.tick(&mut b.transport);
    for event in a.transport.drain_as_events(a.id, &b.transport) {
        b.registry.push_event(event);
    }
    for event in b.transport.drain_as_events(b.id, &a.transport) {
        a.registry.push_event(event);
    }
}

fn tunnel_addr(node: &Node, remote: PeerId) -> SocketAddr {
    let port = node.directory.peer_port(remote).unwrap();
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

fn relay(a: &mut Node, b: &mut Node, payload: &[u8]) -> Vec<u8> {
    a.client.send_to(payload, tunnel_addr(a, b.id)).unwrap();
    b.client.set_nonblocking(true).unwrap();
    let mut buf = vec![0u8; 65_536];
    for _ in 0..200 {
        exchange(a, b);
        if let Ok((n, from)) = b.client.recv_from(&mut buf) {
            assert_eq!(from, tunnel_addr(b, a.id));
            return buf[..n].to_vec();
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("datagram never arrived");
}

fn connected() -> (Node, Node) {
    let mut a = node(A, B);
    let mut b = node(B, A);
    negotiate(&mut a, &mut b);
    exchange(&mut a, &mut b);
    (a, b)
}

#[test]
fn both_sides_open_tunnels() {
    let (a, b) = connected();
    assert!(a.directory.peer_port(B).is_some());
    assert!(b.directory.peer_port(A).is_some());
    assert!(a.transport.handle_of(ExtensionId::announce()).is_some());
    assert!(b.transport.handle_of(ExtensionId::tunnel_udp()).is_some());
}

#[test]
fn gossip_reaches_remote_directory() {
    let (mut a, mut b) = connected();
    let owned = Torrent::new(InfoHash::digest_v1(b"ubuntu.iso info"));
    a.directory.add_self(owned);

    for _ in 0..4 {
        exchange(&mut a, &mut b);
    }
    let entry = b.directory.entry(&owned).unwrap();
    assert!(!entry.is_self);
    assert!(entry.interested_peers.contains(&A));
    assert_eq!(b.directory.tunnel_endpoints(&owned), vec![(A, b.directory.peer_port(A).unwrap())]);
}

#[test]
fn small_datagram_relayed() {
    let (mut a, mut b) = connected();
    let payload = b"d1:ad2:id20:abcdefghij0123456789e1:q4:ping1:t2:aa1:y1:qe";
    assert_eq!(relay(&mut a, &mut b, payload), payload.to_vec());
}

#[test]
fn large_datagram_relayed_in_segments() {
    let (mut a, mut b) = connected();
    let payload: Vec<u8> = (0..3000).map(|i| (i % 253) as u8).collect();
    assert_eq!(relay(&mut a, &mut b, &payload), payload);
    // And back the other way.
    assert_eq!(relay(&mut b, &mut a, &payload[..10]), payload[..10].to_vec());
}

#[test]
fn disconnect_tears_down_tunnel() {
    let (mut a, mut b) = connected();
    a.transport.set_status(B, ConnectionStatus::Offline);
    a.registry.push_event(TransportEvent::ConnectionStatus {
        peer: B,
        status: ConnectionStatus::Offline,
    });
    exchange(&mut a, &mut b);
    assert_eq!(a.directory.peer_port(B), None);
    assert!(b.directory.peer_port(A).is_some());
}
