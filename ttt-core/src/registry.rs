//! Extension registry: owns the extensions, routes queued transport events to them, and ticks them
//! in registration order.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::announce::AnnounceGossip;
use crate::directory::Directory;
use crate::settings::Settings;
use crate::torrent::PeerId;
use crate::transport::{ExtensionHandle, Transport, TransportError, TransportEvent};
use crate::tunnel::{TunnelDataPlane, TunnelError};

/// A sub-protocol plugged into the overlay. Implementations never block.
pub trait Extension {
    fn name(&self) -> &'static str;

    /// Handle assigned by the transport, once registered.
    fn handle(&self) -> Option<ExtensionHandle>;

    fn register(&mut self, transport: &mut dyn Transport) -> Result<(), TransportError>;

    fn deregister(&mut self, transport: &mut dyn Transport);

    /// Called when `peer` comes online.
    fn negotiate_connection(&mut self, transport: &mut dyn Transport, peer: PeerId);

    fn on_negotiation_result(&mut self, peer: PeerId, compatible: bool);

    /// One segment of a reliable message addressed to this extension's handle.
    fn on_segment(&mut self, peer: PeerId, data: &[u8]);

    /// Unreliable packets carry no handle; every extension sees them and filters on channel id.
    fn on_unreliable_packet(&mut self, _peer: PeerId, _data: &[u8]) {}

    fn tick(&mut self, transport: &mut dyn Transport, delta: Duration);
}

pub struct ExtensionRegistry {
    extensions: Vec<Box<dyn Extension>>,
    pending: VecDeque<TransportEvent>,
    online: HashSet<PeerId>,
    tick_delta: Duration,
}

impl ExtensionRegistry {
    /// `tick_delta` is the virtual time each tick advances extension timers by.
    pub fn new(tick_delta: Duration) -> Self {
        Self {
            extensions: Vec::new(),
            pending: VecDeque::new(),
            online: HashSet::new(),
            tick_delta,
        }
    }

    /// Announce gossip followed by the UDP tunnel, sharing `directory`.
    pub fn standard(settings: &Settings, directory: Arc<Directory>) -> Result<Self, TunnelError> {
        let mut registry = Self::new(settings.tick_interval);
        registry.add(Box::new(AnnounceGossip::new(
            directory.clone(),
            settings.announce_interval,
        )));
        registry.add(Box::new(TunnelDataPlane::new(directory, settings.tunnel.clone())?));
        Ok(registry)
    }

    pub fn add(&mut self, extension: Box<dyn Extension>) {
        self.extensions.push(extension);
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.extensions.iter().map(|e| e.name()).collect()
    }

    pub fn tick_delta(&self) -> Duration {
        self.tick_delta
    }

    /// Register every extension. Stops at the first failure.
    pub fn register(&mut self, transport: &mut dyn Transport) -> Result<(), TransportError> {
        for ext in &mut self.extensions {
            ext.register(transport)?;
            info!(extension = ext.name(), "extension up");
        }
        Ok(())
    }

    pub fn deregister(&mut self, transport: &mut dyn Transport) {
        for ext in &mut self.extensions {
            ext.deregister(transport);
        }
        self.online.clear();
    }

    /// Queue an event for the next tick.
    pub fn push_event(&mut self, event: TransportEvent) {
        self.pending.push_back(event);
    }

    pub fn pending_events(&self) -> usize {
        self.pending.len()
    }

    /// Ask every extension to negotiate with `peer`.
    pub fn negotiate_connection(&mut self, transport: &mut dyn Transport, peer: PeerId) {
        for ext in &mut self.extensions {
            ext.negotiate_connection(transport, peer);
        }
    }

    /// Drain queued events, then tick every extension once.
    pub fn tick(&mut self, transport: &mut dyn Transport) {
        while let Some(event) = self.pending.pop_front() {
            self.dispatch(transport, event);
        }
        for ext in &mut self.extensions {
            ext.tick(transport, self.tick_delta);
        }
    }

    fn dispatch(&mut self, transport: &mut dyn Transport, event: TransportEvent) {
        match event {
            TransportEvent::NegotiationResult {
                handle,
                peer,
                compatible,
            } => match self.by_handle(handle) {
                Some(ext) => ext.on_negotiation_result(peer, compatible),
                None => debug!(handle = handle.0, %peer, "negotiation result for unknown handle"),
            },
            TransportEvent::Segment { handle, peer, data } => match self.by_handle(handle) {
                Some(ext) => ext.on_segment(peer, &data),
                None => debug!(handle = handle.0, %peer, "segment for unknown handle"),
            },
            TransportEvent::UnreliablePacket { peer, data } => {
                for ext in &mut self.extensions {
                    ext.on_unreliable_packet(peer, &data);
                }
            }
            TransportEvent::ConnectionStatus { peer, status } => {
                if status.is_online() {
                    if self.online.insert(peer) {
                        info!(%peer, ?status, "peer online");
                        self.negotiate_connection(transport, peer);
                    }
                } else if self.online.remove(&peer) {
                    info!(%peer, "peer offline");
                } else {
                    warn!(%peer, "offline notice for peer never seen online");
                }
            }
        }
    }

    fn by_handle(&mut self, handle: ExtensionHandle) -> Option<&mut Box<dyn Extension>> {
        self.extensions
            .iter_mut()
            .find(|e| e.handle() == Some(handle))
    }
}
