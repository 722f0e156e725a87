//! Overlay transport seam. The overlay (session layer) implements [`Transport`]; its receive
//! callbacks are turned into [`TransportEvent`]s that the registry drains on the next tick.

use crate::protocol::ExtensionId;
use crate::torrent::PeerId;

/// Handle the transport assigned to a registered extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtensionHandle(pub u32);

/// Overlay connection state of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Offline,
    /// Connected through a relay.
    Partial,
    /// Direct connection.
    Full,
}

impl ConnectionStatus {
    pub fn is_online(self) -> bool {
        !matches!(self, ConnectionStatus::Offline)
    }
}

/// Ordered segments for one peer, sent as a single reliable multi-segment message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketBatch {
    pub peer: PeerId,
    pub segments: Vec<(ExtensionHandle, Vec<u8>)>,
}

impl PacketBatch {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            segments: Vec::new(),
        }
    }

    pub fn append_segment(&mut self, handle: ExtensionHandle, bytes: Vec<u8>) {
        self.segments.push((handle, bytes));
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// What the extensions need from the overlay.
pub trait Transport {
    /// Register a sub-protocol. Negotiation results and segments for it carry the returned handle.
    fn register(&mut self, id: ExtensionId) -> Result<ExtensionHandle, TransportError>;

    fn deregister(&mut self, handle: ExtensionHandle);

    /// Ask `peer` whether it speaks the sub-protocol. Fire-and-forget: the answer, if any, arrives
    /// later as [`TransportEvent::NegotiationResult`].
    fn negotiate(&mut self, handle: ExtensionHandle, peer: PeerId) -> Result<(), TransportError>;

    fn connection_status(&self, peer: PeerId) -> ConnectionStatus;

    /// Send a reliable, ordered message.
    fn send(&mut self, batch: PacketBatch) -> Result<(), TransportError>;

    /// Send one best-effort packet. The first byte is the channel id.
    fn send_unreliable(&mut self, peer: PeerId, packet: &[u8]) -> Result<(), TransportError>;

    /// Largest unreliable packet, channel id included.
    fn max_unreliable_packet_size(&self) -> usize;

    /// Largest single segment of a reliable message.
    fn max_segment_size(&self) -> usize;
}

/// Inbound overlay activity, queued until the next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    NegotiationResult {
        handle: ExtensionHandle,
        peer: PeerId,
        compatible: bool,
    },
    /// One segment of a reliable message, in order.
    Segment {
        handle: ExtensionHandle,
        peer: PeerId,
        data: Vec<u8>,
    },
    UnreliablePacket {
        peer: PeerId,
        data: Vec<u8>,
    },
    ConnectionStatus {
        peer: PeerId,
        status: ConnectionStatus,
    },
}

/// Error reported by a transport implementation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("extension not registered")]
    NotRegistered,
    #[error("peer {0} is offline")]
    PeerOffline(PeerId),
    #[error("packet of {size} bytes exceeds limit {max}")]
    TooLarge { size: usize, max: usize },
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// In-memory transport recording everything sent, for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod memory {
    use std::collections::{HashMap, HashSet};

    use super::*;

    /// Tox-like defaults.
    pub const DEFAULT_MAX_UNRELIABLE: usize = 1373;
    pub const DEFAULT_MAX_SEGMENT: usize = 1024;

    pub struct MemoryTransport {
        next_handle: u32,
        pub registered: HashMap<ExtensionHandle, ExtensionId>,
        pub status: HashMap<PeerId, ConnectionStatus>,
        pub negotiations: Vec<(ExtensionHandle, PeerId)>,
        pub sent: Vec<PacketBatch>,
        pub sent_unreliable: Vec<(PeerId, Vec<u8>)>,
        /// Peers for which every send fails.
        pub failing: HashSet<PeerId>,
        pub max_unreliable: usize,
        pub max_segment: usize,
    }

    impl MemoryTransport {
        pub fn new() -> Self {
            Self {
                next_handle: 1,
                registered: HashMap::new(),
                status: HashMap::new(),
                negotiations: Vec::new(),
                sent: Vec::new(),
                sent_unreliable: Vec::new(),
                failing: HashSet::new(),
                max_unreliable: DEFAULT_MAX_UNRELIABLE,
                max_segment: DEFAULT_MAX_SEGMENT,
            }
        }

        pub fn set_status(&mut self, peer: PeerId, status: ConnectionStatus) {
            self.status.insert(peer, status);
        }

        pub fn handle_of(&self, id: ExtensionId) -> Option<ExtensionHandle> {
            self.registered
                .iter()
                .find(|(_, v)| **v == id)
                .map(|(h, _)| *h)
        }

        /// Take everything sent so far and turn it into the events the remote side would see,
        /// mapping handles through `remote`'s registrations by extension id.
        pub fn drain_as_events(&mut self, from: PeerId, remote: &MemoryTransport) -> Vec<TransportEvent> {
            let mut out = Vec::new();
            for batch in self.sent.drain(..) {
                for (handle, data) in batch.segments {
                    let Some(id) = self.registered.get(&handle) else {
                        continue;
                    };
                    if let Some(remote_handle) = remote.handle_of(*id) {
                        out.push(TransportEvent::Segment {
                            handle: remote_handle,
                            peer: from,
                            data,
                        });
                    }
                }
            }
            for (_, data) in self.sent_unreliable.drain(..) {
                out.push(TransportEvent::UnreliablePacket { peer: from, data });
            }
            out
        }
    }

    impl Default for MemoryTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Transport for MemoryTransport {
        fn register(&mut self, id: ExtensionId) -> Result<ExtensionHandle, TransportError> {
            let handle = ExtensionHandle(self.next_handle);
            self.next_handle += 1;
            self.registered.insert(handle, id);
            Ok(handle)
        }

        fn deregister(&mut self, handle: ExtensionHandle) {
            self.registered.remove(&handle);
        }

        fn negotiate(&mut self, handle: ExtensionHandle, peer: PeerId) -> Result<(), TransportError> {
            if !self.registered.contains_key(&handle) {
                return Err(TransportError::NotRegistered);
            }
            self.negotiations.push((handle, peer));
            Ok(())
        }

        fn connection_status(&self, peer: PeerId) -> ConnectionStatus {
            self.status
                .get(&peer)
                .copied()
                .unwrap_or(ConnectionStatus::Offline)
        }

        fn send(&mut self, batch: PacketBatch) -> Result<(), TransportError> {
            if self.failing.contains(&batch.peer) {
                return Err(TransportError::SendFailed("injected failure".into()));
            }
            if !self.connection_status(batch.peer).is_online() {
                return Err(TransportError::PeerOffline(batch.peer));
            }
            for (_, seg) in &batch.segments {
                if seg.len() > self.max_segment {
                    return Err(TransportError::TooLarge {
                        size: seg.len(),
                        max: self.max_segment,
                    });
                }
            }
            self.sent.push(batch);
            Ok(())
        }

        fn send_unreliable(&mut self, peer: PeerId, packet: &[u8]) -> Result<(), TransportError> {
            if self.failing.contains(&peer) {
                return Err(TransportError::SendFailed("injected failure".into()));
            }
            if packet.len() > self.max_unreliable {
                return Err(TransportError::TooLarge {
                    size: packet.len(),
                    max: self.max_unreliable,
                });
            }
            self.sent_unreliable.push((peer, packet.to_vec()));
            Ok(())
        }

        fn max_unreliable_packet_size(&self) -> usize {
            self.max_unreliable
        }

        fn max_segment_size(&self) -> usize {
            self.max_segment
        }
    }
}
