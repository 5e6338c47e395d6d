use crate::{RegistryError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sharenet_types::{derive_peer_id, Peer, PeerRegistration};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Known peers keyed by directory-assigned identifier.
///
/// Peers are never removed; stale peers are only marked offline.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<String, Peer>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a peer, returning the stored record.
    pub fn register(&self, registration: PeerRegistration) -> Peer {
        self.register_at(registration, Utc::now())
    }

    pub fn register_at(&self, registration: PeerRegistration, now: DateTime<Utc>) -> Peer {
        let id = derive_peer_id(&registration.address, registration.port, now);
        let peer = Peer::from_registration(id.clone(), registration, now);

        self.peers.write().insert(id, peer.clone());
        info!("Peer registered: {} ({})", peer.id, peer.endpoint());
        peer
    }

    /// Refresh a peer's last-seen time and mark it online.
    pub fn heartbeat(&self, peer_id: &str) -> Result<Peer> {
        self.heartbeat_at(peer_id, Utc::now())
    }

    pub fn heartbeat_at(&self, peer_id: &str, now: DateTime<Utc>) -> Result<Peer> {
        let mut peers = self.peers.write();
        match peers.get_mut(peer_id) {
            Some(peer) => {
                peer.last_seen = now;
                peer.is_online = true;
                debug!("Heartbeat from peer {}", peer_id);
                Ok(peer.clone())
            }
            None => Err(RegistryError::PeerNotFound(peer_id.to_string())),
        }
    }

    pub fn get(&self, peer_id: &str) -> Option<Peer> {
        self.peers.read().get(peer_id).cloned()
    }

    /// Snapshot of every known peer.
    pub fn list_all(&self) -> Vec<Peer> {
        self.peers.read().values().cloned().collect()
    }

    /// Record how many files a peer currently advertises.
    pub fn set_shared_files(&self, peer_id: &str, count: usize) -> Result<()> {
        let mut peers = self.peers.write();
        let peer = peers
            .get_mut(peer_id)
            .ok_or_else(|| RegistryError::PeerNotFound(peer_id.to_string()))?;
        peer.shared_files = count;
        Ok(())
    }

    /// Mark peers offline whose last heartbeat is older than `threshold`.
    ///
    /// Returns the identifiers that flipped from online to offline.
    pub fn sweep_liveness(&self, threshold: Duration) -> Vec<String> {
        self.sweep_liveness_at(Utc::now(), threshold)
    }

    pub fn sweep_liveness_at(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<String> {
        let Some(cutoff) = chrono::Duration::from_std(threshold)
            .ok()
            .and_then(|threshold| now.checked_sub_signed(threshold))
        else {
            return Vec::new();
        };

        let mut demoted = Vec::new();
        let mut peers = self.peers.write();
        for (id, peer) in peers.iter_mut() {
            if peer.last_seen < cutoff {
                if peer.is_online {
                    warn!("Peer {} marked offline", id);
                    demoted.push(id.clone());
                }
                peer.is_online = false;
            }
        }
        demoted
    }

    /// `(total, online)` peer counts.
    pub fn counts(&self) -> (usize, usize) {
        let peers = self.peers.read();
        let online = peers.values().filter(|peer| peer.is_online).count();
        (peers.len(), online)
    }
}
