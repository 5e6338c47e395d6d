use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate view of the directory, rebuilt wholesale on every refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub total_peers: usize,
    pub online_peers: usize,
    pub total_files: usize,
    pub total_downloads: u64,
    /// `online_peers / total_peers`, or 0 with no peers.
    pub network_health: f64,
    pub last_updated: DateTime<Utc>,
}

impl NetworkStats {
    pub fn compute(
        total_peers: usize,
        online_peers: usize,
        total_files: usize,
        total_downloads: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let network_health = if total_peers == 0 {
            0.0
        } else {
            online_peers as f64 / total_peers as f64
        };

        Self {
            total_peers,
            online_peers,
            total_files,
            total_downloads,
            network_health,
            last_updated: now,
        }
    }
}

impl Default for NetworkStats {
    fn default() -> Self {
        Self::compute(0, 0, 0, 0, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_is_zero_without_peers() {
        assert_eq!(NetworkStats::compute(0, 0, 5, 2, Utc::now()).network_health, 0.0);
    }

    #[test]
    fn health_is_online_ratio() {
        let stats = NetworkStats::compute(4, 3, 0, 0, Utc::now());
        assert!((stats.network_health - 0.75).abs() < f64::EPSILON);
    }
}
