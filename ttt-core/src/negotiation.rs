//! Per-peer capability negotiation for one sub-protocol.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::protocol::ExtensionId;
use crate::torrent::PeerId;
use crate::transport::{ExtensionHandle, Transport, TransportError};

/// Negotiated state of a peer for one sub-protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    Unknown,
    Compatible,
    Incompatible,
}

/// Tracks which peers speak one sub-protocol. State survives disconnects; only a new negotiation
/// result (or an explicit [`Negotiator::forget`]) changes it.
pub struct Negotiator {
    id: ExtensionId,
    handle: Option<ExtensionHandle>,
    peers: BTreeMap<PeerId, bool>,
}

impl Negotiator {
    pub fn new(id: ExtensionId) -> Self {
        Self {
            id,
            handle: None,
            peers: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> ExtensionId {
        self.id
    }

    pub fn handle(&self) -> Option<ExtensionHandle> {
        self.handle
    }

    pub fn register(&mut self, transport: &mut dyn Transport) -> Result<ExtensionHandle, TransportError> {
        let handle = transport.register(self.id)?;
        info!(ext = %self.id, handle = handle.0, "registered extension");
        self.handle = Some(handle);
        Ok(handle)
    }

    pub fn deregister(&mut self, transport: &mut dyn Transport) {
        if let Some(handle) = self.handle.take() {
            transport.deregister(handle);
            debug!(ext = %self.id, handle = handle.0, "deregistered extension");
        }
    }

    /// Request negotiation. Never blocks; failures are logged and leave the state as it was.
    pub fn negotiate(&mut self, transport: &mut dyn Transport, peer: PeerId) {
        let Some(handle) = self.handle else {
            warn!(ext = %self.id, %peer, "negotiate before register, ignored");
            return;
        };
        if let Err(e) = transport.negotiate(handle, peer) {
            warn!(ext = %self.id, %peer, error = %e, "negotiation request failed");
        }
    }

    pub fn on_result(&mut self, peer: PeerId, compatible: bool) {
        info!(ext = %self.id, %peer, compatible, "negotiation result");
        self.peers.insert(peer, compatible);
    }

    pub fn state(&self, peer: PeerId) -> Compatibility {
        match self.peers.get(&peer) {
            None => Compatibility::Unknown,
            Some(true) => Compatibility::Compatible,
            Some(false) => Compatibility::Incompatible,
        }
    }

    pub fn is_compatible(&self, peer: PeerId) -> bool {
        self.state(peer) == Compatibility::Compatible
    }

    /// Compatible peers in ascending order.
    pub fn compatible_peers(&self) -> Vec<PeerId> {
        self.peers
            .iter()
            .filter(|(_, c)| **c)
            .map(|(p, _)| *p)
            .collect()
    }

    /// Drop the peer's state so the next reconnect starts from `Unknown`.
    pub fn forget(&mut self, peer: PeerId) {
        self.peers.remove(&peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;

    #[test]
    fn unknown_until_result() {
        let mut n = Negotiator::new(ExtensionId::announce());
        assert_eq!(n.state(PeerId(1)), Compatibility::Unknown);
        n.on_result(PeerId(1), true);
        assert_eq!(n.state(PeerId(1)), Compatibility::Compatible);
        n.on_result(PeerId(2), false);
        assert_eq!(n.state(PeerId(2)), Compatibility::Incompatible);
        assert_eq!(n.compatible_peers(), vec![PeerId(1)]);
    }

    #[test]
    fn renegotiation_overwrites() {
        let mut n = Negotiator::new(ExtensionId::announce());
        n.on_result(PeerId(1), true);
        n.on_result(PeerId(1), false);
        assert!(!n.is_compatible(PeerId(1)));
        n.forget(PeerId(1));
        assert_eq!(n.state(PeerId(1)), Compatibility::Unknown);
    }

    #[test]
    fn negotiate_goes_through_transport() {
        let mut t = MemoryTransport::new();
        let mut n = Negotiator::new(ExtensionId::tunnel_udp());
        // Not registered yet: ignored.
        n.negotiate(&mut t, PeerId(3));
        assert!(t.negotiations.is_empty());

        let h = n.register(&mut t).unwrap();
        n.negotiate(&mut t, PeerId(3));
        assert_eq!(t.negotiations, vec![(h, PeerId(3))]);

        n.deregister(&mut t);
        assert!(n.handle().is_none());
        assert!(t.registered.is_empty());
    }
}
