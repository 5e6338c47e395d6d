use parking_lot::RwLock;
use sharenet_notify::NotificationHub;
use sharenet_registry::{collect_stats, FileRegistry, PeerRegistry, RegistryError, SearchRequest};
use sharenet_types::{Event, EventKind, FileRecord, FileRegistration, NetworkStats, Peer, PeerRegistration};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Directory state: both registries, the observer hub and the latest stats.
///
/// Every component carries its own lock. Operations that touch more than one
/// component do so one lock at a time, so a registration and its broadcast
/// are not atomic with respect to concurrent readers.
pub struct DirectoryService {
    peers: PeerRegistry,
    files: FileRegistry,
    hub: Arc<NotificationHub>,
    stats: RwLock<NetworkStats>,
    search_limit: usize,
    started_at: Instant,
}

impl DirectoryService {
    pub fn new(
        peers: PeerRegistry,
        files: FileRegistry,
        hub: Arc<NotificationHub>,
        search_limit: usize,
    ) -> Self {
        let stats = collect_stats(&peers, &files);
        Self {
            peers,
            files,
            hub,
            stats: RwLock::new(stats),
            search_limit,
            started_at: Instant::now(),
        }
    }

    pub fn register_peer(&self, registration: PeerRegistration) -> Peer {
        let peer = self.peers.register(registration);
        self.hub.broadcast(EventKind::PeerRegistered, &peer);
        self.refresh_stats();
        peer
    }

    pub fn heartbeat(&self, peer_id: &str) -> Result<Peer, RegistryError> {
        self.peers.heartbeat(peer_id)
    }

    /// Insert or merge a file record and keep the owner's advertised count in step.
    pub fn register_file(&self, registration: FileRegistration) -> FileRecord {
        let record = self.files.register(registration);

        let owned = self.files.count_by_owner(&record.owner);
        if let Err(err) = self.peers.set_shared_files(&record.owner, owned) {
            debug!("File {} owner not registered: {}", record.id, err);
        }

        self.hub.broadcast(EventKind::FileRegistered, &record);
        self.refresh_stats();
        record
    }

    pub fn search(&self, request: &SearchRequest) -> Vec<FileRecord> {
        self.files.query(request)
    }

    pub fn list_peers(&self) -> Vec<Peer> {
        self.peers.list_all()
    }

    pub fn list_files(&self) -> Vec<FileRecord> {
        self.files.list_all()
    }

    pub fn record_download(&self, file_id: &str) -> Result<FileRecord, RegistryError> {
        self.files.record_download(file_id)
    }

    /// Recompute the stats snapshot from both registries and store it.
    pub fn refresh_stats(&self) -> NetworkStats {
        let stats = collect_stats(&self.peers, &self.files);
        *self.stats.write() = stats.clone();
        stats
    }

    /// Demote stale peers, then refresh stats. Returns the demoted ids.
    pub fn sweep_liveness(&self, threshold: Duration) -> Vec<String> {
        let demoted = self.peers.sweep_liveness(threshold);
        if !demoted.is_empty() {
            info!("Liveness sweep marked {} peer(s) offline", demoted.len());
        }
        self.refresh_stats();
        demoted
    }

    /// Refresh stats and push them to every observer.
    pub fn publish_stats(&self) -> NetworkStats {
        let stats = self.refresh_stats();
        let delivery = self.hub.broadcast(EventKind::StatsUpdate, &stats);
        debug!(
            "stats_update delivered to {} observer(s), {} evicted",
            delivery.delivered, delivery.evicted
        );
        stats
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats.read().clone()
    }

    /// `stats_update` envelope for a newly connected observer.
    pub fn stats_event(&self) -> Option<Event> {
        match Event::new(EventKind::StatsUpdate, &self.stats()) {
            Ok(event) => Some(event),
            Err(err) => {
                warn!("Failed to build stats snapshot event: {}", err);
                None
            }
        }
    }

    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    pub fn search_limit(&self) -> usize {
        self.search_limit
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
