//! Shared torrent directory: torrent interest and tunnel ports, read by the tracker responder.
//!
//! The lock is held only for the duration of one map operation. Callers get owned snapshots back,
//! never references into the locked maps.

use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;

use crate::torrent::{PeerId, Torrent};

/// Interest metadata for one torrent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Owned by the local client (announced to us by the tracker responder).
    pub is_self: bool,
    /// Peers that gossiped this torrent to us.
    pub interested_peers: BTreeSet<PeerId>,
}

#[derive(Default)]
struct Inner {
    torrents: HashMap<Torrent, DirectoryEntry>,
    peer_ports: HashMap<PeerId, u16>,
}

/// Torrent and peer-port registry. Entries are never removed; growth is bounded by what peers send.
#[derive(Default)]
pub struct Directory {
    inner: Mutex<Inner>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the torrent if missing. Returns true if it was new.
    pub fn upsert(&self, torrent: Torrent) -> bool {
        let mut inner = self.inner.lock();
        let mut inserted = false;
        inner.torrents.entry(torrent).or_insert_with(|| {
            inserted = true;
            DirectoryEntry::default()
        });
        inserted
    }

    /// Mark a torrent as locally owned, creating it if needed.
    pub fn add_self(&self, torrent: Torrent) {
        self.inner.lock().torrents.entry(torrent).or_default().is_self = true;
    }

    /// Tracker-responder path: a local client announced this torrent. Only a first sighting marks
    /// it self-owned; an entry created by gossip keeps its flag. Returns true if it was new.
    pub fn announce_local(&self, torrent: Torrent) -> bool {
        let mut inner = self.inner.lock();
        if inner.torrents.contains_key(&torrent) {
            return false;
        }
        inner.torrents.insert(
            torrent,
            DirectoryEntry {
                is_self: true,
                interested_peers: BTreeSet::new(),
            },
        );
        true
    }

    /// Upsert the torrent and record `peer` as interested. Set semantics: repeats are no-ops.
    pub fn mark_interested(&self, torrent: Torrent, peer: PeerId) {
        self.inner
            .lock()
            .torrents
            .entry(torrent)
            .or_default()
            .interested_peers
            .insert(peer);
    }

    pub fn entry(&self, torrent: &Torrent) -> Option<DirectoryEntry> {
        self.inner.lock().torrents.get(torrent).cloned()
    }

    /// Locally owned torrents, in ascending order.
    pub fn self_owned(&self) -> Vec<Torrent> {
        let mut out: Vec<Torrent> = self
            .inner
            .lock()
            .torrents
            .iter()
            .filter(|(_, e)| e.is_self)
            .map(|(t, _)| *t)
            .collect();
        out.sort();
        out
    }

    /// Snapshot of every torrent and its entry, in ascending torrent order.
    pub fn torrents(&self) -> Vec<(Torrent, DirectoryEntry)> {
        let mut out: Vec<(Torrent, DirectoryEntry)> = self
            .inner
            .lock()
            .torrents
            .iter()
            .map(|(t, e)| (*t, e.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn len(&self) -> usize {
        self.inner.lock().torrents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().torrents.is_empty()
    }

    /// Publish the local tunnel port for a peer.
    pub fn set_peer_port(&self, peer: PeerId, port: u16) {
        self.inner.lock().peer_ports.insert(peer, port);
    }

    pub fn remove_peer_port(&self, peer: PeerId) -> Option<u16> {
        self.inner.lock().peer_ports.remove(&peer)
    }

    pub fn peer_port(&self, peer: PeerId) -> Option<u16> {
        self.inner.lock().peer_ports.get(&peer).copied()
    }

    pub fn peer_ports(&self) -> HashMap<PeerId, u16> {
        self.inner.lock().peer_ports.clone()
    }

    /// Interested peers of `torrent` that currently have a tunnel, with their local ports.
    /// This is what the tracker responder hands to the local client as its peer list.
    pub fn tunnel_endpoints(&self, torrent: &Torrent) -> Vec<(PeerId, u16)> {
        let inner = self.inner.lock();
        let Some(entry) = inner.torrents.get(torrent) else {
            return vec![];
        };
        entry
            .interested_peers
            .iter()
            .filter_map(|p| inner.peer_ports.get(p).map(|port| (*p, *port)))
            .collect()
    }

    /// Plain-text listing, one `v1:<hex>;` line per torrent.
    pub fn listing(&self) -> String {
        let mut out = String::from("currently indexed:\n");
        for (torrent, _) in self.torrents() {
            out.push_str("  - ");
            out.push_str(&torrent.to_string());
            out.push('\n');
        }
        out
    }
}
