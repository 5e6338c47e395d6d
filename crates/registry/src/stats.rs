use crate::{FileRegistry, PeerRegistry};
use chrono::Utc;
use sharenet_types::NetworkStats;

/// Build a fresh statistics snapshot from both registries.
///
/// Reads one registry at a time; the snapshot is not atomic across them.
pub fn collect_stats(peers: &PeerRegistry, files: &FileRegistry) -> NetworkStats {
    let (total_peers, online_peers) = peers.counts();
    let (total_files, total_downloads) = files.totals();
    NetworkStats::compute(
        total_peers,
        online_peers,
        total_files,
        total_downloads,
        Utc::now(),
    )
}
