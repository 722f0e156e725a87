//! Runtime settings the registry and extensions are built from.

use std::net::{IpAddr, Ipv4Addr};
use std::ops::Range;
use std::time::Duration;

/// Default scheduler cadence.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(5);

/// Default time between two announces to the same peer.
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(30);

/// Largest UDP payload over IPv4.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 65_507;

/// Default port of the local BitTorrent client (Transmission's default).
pub const DEFAULT_CLIENT_PORT: u16 = 51413;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub tick_interval: Duration,
    pub announce_interval: Duration,
    pub tunnel: TunnelSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            announce_interval: DEFAULT_ANNOUNCE_INTERVAL,
            tunnel: TunnelSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSettings {
    /// Ports tried, in order, for a new tunnel socket. End is exclusive.
    pub port_range: Range<u16>,
    pub bind_ip: IpAddr,
    /// Host of the local BitTorrent client that receives tunneled datagrams.
    pub client_host: String,
    pub client_port: u16,
    pub max_datagram_size: usize,
    /// Also deliver unreliable tunnel packets, not only reassembled reliable messages. Off by
    /// default: only the reliable path is wired for inbound tunnel traffic.
    pub accept_unreliable: bool,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            port_range: 20000..60000,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            client_host: "localhost".into(),
            client_port: DEFAULT_CLIENT_PORT,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            accept_unreliable: false,
        }
    }
}
