//! Torrent gossip and UDP tunnel extensions for an authenticated peer-to-peer overlay.
//! Host-driven: the host feeds transport events in and calls [`ExtensionRegistry::tick`] at a
//! fixed cadence; extensions never block.

pub mod announce;
pub mod directory;
pub mod negotiation;
pub mod protocol;
pub mod registry;
pub mod settings;
pub mod torrent;
pub mod transport;
pub mod tunnel;
pub mod wire;

pub use announce::AnnounceGossip;
pub use directory::{Directory, DirectoryEntry};
pub use negotiation::{Compatibility, Negotiator};
pub use protocol::{AnnouncePackage, ExtensionId, PackageDecodeError, PackageEncodeError};
pub use registry::{Extension, ExtensionRegistry};
pub use settings::{Settings, TunnelSettings};
pub use torrent::{InfoHash, ParseHashError, PeerId, Torrent};
pub use transport::{ConnectionStatus, ExtensionHandle, PacketBatch, Transport, TransportError, TransportEvent};
pub use tunnel::{TunnelDataPlane, TunnelError};
pub use wire::{FrameDecodeError, FrameEncodeError, TUNNEL_CHANNEL_ID};
