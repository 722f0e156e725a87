//! Announce gossip: periodically tell each compatible peer which torrents we own, stalest first.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::directory::Directory;
use crate::negotiation::Negotiator;
use crate::protocol::{AnnouncePackage, ExtensionId};
use crate::registry::Extension;
use crate::torrent::{PeerId, Torrent};
use crate::transport::{ExtensionHandle, PacketBatch, Transport, TransportError};

/// Age given to a torrent the peer has never been told about, so it outranks everything else.
pub const NEW_TORRENT_AGE: Duration = Duration::from_secs(1_000_000);

/// Per-peer announce schedule.
#[derive(Debug, Default)]
pub struct AnnounceTimer {
    elapsed: Duration,
    /// Time since each torrent was last announced to this peer.
    ages: Vec<(Duration, Torrent)>,
}

impl AnnounceTimer {
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn age_of(&self, torrent: &Torrent) -> Option<Duration> {
        self.ages
            .iter()
            .find(|(_, t)| t == torrent)
            .map(|(age, _)| *age)
    }

    pub fn tracked(&self) -> usize {
        self.ages.len()
    }

    /// One announce cycle: age everything by `interval`, start tracking newly owned torrents,
    /// then pick the stalest (at most the package cap) and reset their ages.
    fn next_package(&mut self, owned: &[Torrent], interval: Duration) -> Option<AnnouncePackage> {
        for (age, _) in &mut self.ages {
            *age += interval;
        }
        for torrent in owned {
            if !self.ages.iter().any(|(_, t)| t == torrent) {
                self.ages.push((NEW_TORRENT_AGE, *torrent));
            }
        }
        if owned.is_empty() {
            return None;
        }

        // Stable: ties keep insertion order.
        self.ages.sort_by(|a, b| b.0.cmp(&a.0));

        let n = self.ages.len().min(AnnouncePackage::MAX_INFO_HASHES);
        let mut info_hashes = Vec::with_capacity(n);
        for (age, torrent) in &mut self.ages[..n] {
            trace!(%torrent, age_secs = age.as_secs_f32(), "selected for announce");
            info_hashes.push(*torrent.info_hash());
            *age = Duration::ZERO;
        }
        Some(AnnouncePackage::new(info_hashes))
    }
}

pub struct AnnounceGossip {
    negotiator: Negotiator,
    directory: Arc<Directory>,
    interval: Duration,
    timers: BTreeMap<PeerId, AnnounceTimer>,
}

impl AnnounceGossip {
    pub fn new(directory: Arc<Directory>, interval: Duration) -> Self {
        Self {
            negotiator: Negotiator::new(ExtensionId::announce()),
            directory,
            interval,
            timers: BTreeMap::new(),
        }
    }

    pub fn negotiator(&self) -> &Negotiator {
        &self.negotiator
    }

    pub fn timer(&self, peer: PeerId) -> Option<&AnnounceTimer> {
        self.timers.get(&peer)
    }

    /// Encode and send one package to `peer` as a single-segment reliable message.
    pub fn announce_send(
        &self,
        transport: &mut dyn Transport,
        peer: PeerId,
        package: &AnnouncePackage,
    ) -> Result<(), AnnounceSendError> {
        let handle = self.negotiator.handle().ok_or(AnnounceSendError::NotRegistered)?;
        let bytes = package.encode()?;
        let mut batch = PacketBatch::new(peer);
        batch.append_segment(handle, bytes);
        transport.send(batch)?;
        Ok(())
    }

    fn receive(&mut self, peer: PeerId, data: &[u8]) {
        if !self.negotiator.is_compatible(peer) {
            debug!(%peer, "announce from peer without negotiated support, ignored");
            return;
        }
        let package = match AnnouncePackage::decode(data) {
            Ok(p) => p,
            Err(e) => {
                warn!(%peer, len = data.len(), error = %e, "dropping malformed announce");
                return;
            }
        };
        for info_hash in package.info_hashes {
            let torrent = Torrent::new(info_hash);
            debug!(%peer, %torrent, "got announce");
            self.directory.mark_interested(torrent, peer);
        }
    }
}

impl Extension for AnnounceGossip {
    fn name(&self) -> &'static str {
        "announce"
    }

    fn handle(&self) -> Option<ExtensionHandle> {
        self.negotiator.handle()
    }

    fn register(&mut self, transport: &mut dyn Transport) -> Result<(), TransportError> {
        self.negotiator.register(transport).map(|_| ())
    }

    fn deregister(&mut self, transport: &mut dyn Transport) {
        self.negotiator.deregister(transport);
    }

    fn negotiate_connection(&mut self, transport: &mut dyn Transport, peer: PeerId) {
        self.negotiator.negotiate(transport, peer);
    }

    fn on_negotiation_result(&mut self, peer: PeerId, compatible: bool) {
        self.negotiator.on_result(peer, compatible);
    }

    fn on_segment(&mut self, peer: PeerId, data: &[u8]) {
        self.receive(peer, data);
    }

    fn tick(&mut self, transport: &mut dyn Transport, delta: Duration) {
        for peer in self.negotiator.compatible_peers() {
            if !transport.connection_status(peer).is_online() {
                continue;
            }
            let timer = self.timers.entry(peer).or_default();
            timer.elapsed += delta;
            if timer.elapsed < self.interval {
                continue;
            }
            timer.elapsed = Duration::ZERO;

            let owned = self.directory.self_owned();
            let Some(package) = timer.next_package(&owned, self.interval) else {
                trace!(%peer, "nothing to announce");
                continue;
            };
            if let Err(e) = self.announce_send(transport, peer, &package) {
                warn!(%peer, error = %e, "failed to announce");
            }
        }
    }
}

/// Error sending an announce package.
#[derive(Debug, thiserror::Error)]
pub enum AnnounceSendError {
    #[error("announce extension not registered")]
    NotRegistered,
    #[error("encode error: {0}")]
    Encode(#[from] crate::protocol::PackageEncodeError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
