//! UDP tunnel data plane. Each compatible online peer gets a local UDP socket; whatever the local
//! client sends to that socket is carried to the peer over the overlay, and whatever the peer sends
//! back is written from that socket to the local client.

use std::collections::BTreeMap;
use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::directory::Directory;
use crate::negotiation::Negotiator;
use crate::protocol::ExtensionId;
use crate::registry::Extension;
use crate::settings::TunnelSettings;
use crate::torrent::PeerId;
use crate::transport::{ExtensionHandle, PacketBatch, Transport, TransportError};
use crate::wire::{self, Reassembler, TUNNEL_CHANNEL_ID};

/// Live tunnel for one peer.
#[derive(Debug)]
pub struct TunnelSession {
    socket: UdpSocket,
    local_port: u16,
    reassembly: Reassembler,
}

impl TunnelSession {
    pub fn local_port(&self) -> u16 {
        self.local_port
    }
}

pub struct TunnelDataPlane {
    negotiator: Negotiator,
    directory: Arc<Directory>,
    settings: TunnelSettings,
    client_addr: SocketAddr,
    sessions: BTreeMap<PeerId, TunnelSession>,
    recv_buf: Vec<u8>,
}

impl TunnelDataPlane {
    /// Resolves the local client address up front; fails if it does not resolve.
    pub fn new(directory: Arc<Directory>, settings: TunnelSettings) -> Result<Self, TunnelError> {
        let client_addr = resolve_client(&settings.client_host, settings.client_port, settings.bind_ip)?;
        debug!(%client_addr, "tunnel client address");
        // One spare byte so an oversized datagram shows up as longer than the limit.
        let recv_buf = vec![0; settings.max_datagram_size + 1];
        Ok(Self {
            negotiator: Negotiator::new(ExtensionId::tunnel_udp()),
            directory,
            settings,
            client_addr,
            sessions: BTreeMap::new(),
            recv_buf,
        })
    }

    pub fn negotiator(&self) -> &Negotiator {
        &self.negotiator
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn session(&self, peer: PeerId) -> Option<&TunnelSession> {
        self.sessions.get(&peer)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Carry one local datagram to `peer`: a single unreliable packet when it fits, otherwise a
    /// reliable multi-segment message.
    pub fn tunnel_send(
        &self,
        transport: &mut dyn Transport,
        peer: PeerId,
        datagram: &[u8],
    ) -> Result<(), TunnelError> {
        let handle = self.negotiator.handle().ok_or(TransportError::NotRegistered)?;
        if datagram.len() < transport.max_unreliable_packet_size() {
            let packet = wire::encode_unreliable(TUNNEL_CHANNEL_ID, datagram);
            transport.send_unreliable(peer, &packet)?;
            trace!(%peer, len = datagram.len(), "tunneled unreliable");
        } else {
            let segments = wire::fragment(datagram, transport.max_segment_size())?;
            let count = segments.len();
            let mut batch = PacketBatch::new(peer);
            for segment in segments {
                batch.append_segment(handle, segment);
            }
            transport.send(batch)?;
            trace!(%peer, len = datagram.len(), segments = count, "tunneled reliable");
        }
        Ok(())
    }

    fn open_session(&self) -> Result<TunnelSession, TunnelError> {
        let range = &self.settings.port_range;
        for port in range.clone() {
            let socket = match UdpSocket::bind(SocketAddr::new(self.settings.bind_ip, port)) {
                Ok(s) => s,
                Err(_) => continue,
            };
            socket.set_nonblocking(true)?;
            let local_port = socket.local_addr()?.port();
            return Ok(TunnelSession {
                socket,
                local_port,
                reassembly: Reassembler::new(self.settings.max_datagram_size),
            });
        }
        Err(TunnelError::PortRangeExhausted {
            start: range.start,
            end: range.end,
        })
    }

    fn close_session(&mut self, peer: PeerId) {
        // Unpublish before the socket goes away.
        self.directory.remove_peer_port(peer);
        if let Some(session) = self.sessions.remove(&peer) {
            info!(%peer, port = session.local_port, "closed tunnel");
        }
        self.negotiator.forget(peer);
    }

    /// Forward at most one pending local datagram for `peer`.
    fn pump(&mut self, transport: &mut dyn Transport, peer: PeerId) {
        let Some(session) = self.sessions.get(&peer) else {
            return;
        };
        let len = match session.socket.recv_from(&mut self.recv_buf) {
            Ok((len, _)) => len,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) => {
                warn!(%peer, error = %e, "tunnel socket read failed");
                return;
            }
        };
        if len == 0 {
            trace!(%peer, "empty datagram skipped");
            return;
        }
        if len > self.settings.max_datagram_size {
            warn!(%peer, max = self.settings.max_datagram_size, "oversized datagram dropped");
            return;
        }
        if let Err(e) = self.tunnel_send(transport, peer, &self.recv_buf[..len]) {
            warn!(%peer, len, error = %e, "failed to tunnel datagram");
        }
    }

    fn close_all(&mut self) {
        let peers: Vec<PeerId> = self.sessions.keys().copied().collect();
        for peer in peers {
            self.close_session(peer);
        }
    }
}

fn resolve_client(host: &str, port: u16, prefer: IpAddr) -> Result<SocketAddr, TunnelError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| TunnelError::Resolve(format!("{host}:{port}: {e}")))?
        .collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4() == prefer.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| TunnelError::Resolve(format!("{host}:{port}: no addresses")))
}

fn deliver(socket: &UdpSocket, client: SocketAddr, peer: PeerId, datagram: &[u8]) {
    match socket.send_to(datagram, client) {
        Ok(_) => trace!(%peer, len = datagram.len(), "delivered to client"),
        Err(e) => warn!(%peer, %client, error = %e, "failed to deliver datagram"),
    }
}

impl Extension for TunnelDataPlane {
    fn name(&self) -> &'static str {
        "tunnel-udp"
    }

    fn handle(&self) -> Option<ExtensionHandle> {
        self.negotiator.handle()
    }

    fn register(&mut self, transport: &mut dyn Transport) -> Result<(), TransportError> {
        self.negotiator.register(transport).map(|_| ())
    }

    fn deregister(&mut self, transport: &mut dyn Transport) {
        self.close_all();
        self.negotiator.deregister(transport);
    }

    fn negotiate_connection(&mut self, transport: &mut dyn Transport, peer: PeerId) {
        self.negotiator.negotiate(transport, peer);
    }

    fn on_negotiation_result(&mut self, peer: PeerId, compatible: bool) {
        self.negotiator.on_result(peer, compatible);
    }

    fn on_segment(&mut self, peer: PeerId, data: &[u8]) {
        let Some(session) = self.sessions.get_mut(&peer) else {
            debug!(%peer, "tunnel segment without session, dropped");
            return;
        };
        if !self.negotiator.is_compatible(peer) {
            warn!(%peer, "tunnel segment from incompatible peer, dropped");
            return;
        }
        let fragment = match wire::parse_fragment(data) {
            Ok(f) => f,
            Err(e) => {
                warn!(%peer, error = %e, "malformed tunnel segment");
                return;
            }
        };
        match session.reassembly.push(fragment) {
            Ok(None) => {}
            Ok(Some(datagram)) => deliver(&session.socket, self.client_addr, peer, &datagram),
            Err(e) => warn!(%peer, error = %e, "reassembly discarded"),
        }
    }

    fn on_unreliable_packet(&mut self, peer: PeerId, data: &[u8]) {
        if !self.settings.accept_unreliable || data.first() != Some(&TUNNEL_CHANNEL_ID) {
            return;
        }
        let Some(session) = self.sessions.get(&peer) else {
            debug!(%peer, "tunnel packet without session, dropped");
            return;
        };
        if !self.negotiator.is_compatible(peer) {
            warn!(%peer, "tunnel packet from incompatible peer, dropped");
            return;
        }
        match wire::decode_unreliable(TUNNEL_CHANNEL_ID, data) {
            Ok(payload) => deliver(&session.socket, self.client_addr, peer, payload),
            Err(e) => warn!(%peer, error = %e, "malformed tunnel packet"),
        }
    }

    fn tick(&mut self, transport: &mut dyn Transport, _delta: Duration) {
        let peers: Vec<PeerId> = self.sessions.keys().copied().collect();
        for &peer in &peers {
            self.pump(transport, peer);
        }

        for peer in peers {
            if !transport.connection_status(peer).is_online() || !self.negotiator.is_compatible(peer) {
                self.close_session(peer);
            }
        }

        for peer in self.negotiator.compatible_peers() {
            if self.sessions.contains_key(&peer) {
                continue;
            }
            if !transport.connection_status(peer).is_online() {
                debug!(%peer, "compatible peer offline, forgetting");
                self.negotiator.forget(peer);
                continue;
            }
            match self.open_session() {
                Ok(session) => {
                    info!(%peer, port = session.local_port, "opened tunnel");
                    self.directory.set_peer_port(peer, session.local_port);
                    self.sessions.insert(peer, session);
                }
                Err(e) => {
                    warn!(%peer, error = %e, "cannot open tunnel, retrying next tick");
                    break;
                }
            }
        }
    }
}

/// Error in the tunnel data plane.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("no free port in {start}..{end}")]
    PortRangeExhausted { start: u16, end: u16 },
    #[error("cannot resolve client address {0}")]
    Resolve(String),
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("framing error: {0}")]
    Frame(#[from] wire::FrameEncodeError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
