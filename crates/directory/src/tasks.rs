//! Periodic background loops. Each runs as its own task and touches the
//! service only through its locked components.

use crate::config::DirectoryConfig;
use crate::service::DirectoryService;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Mark peers offline when they have not heartbeated within `threshold`.
pub fn spawn_liveness_sweep(
    service: Arc<DirectoryService>,
    every: Duration,
    threshold: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let demoted = service.sweep_liveness(threshold);
            debug!("Liveness sweep complete, {} demoted", demoted.len());
        }
    })
}

/// Recompute statistics and push a `stats_update` to observers.
pub fn spawn_stats_tick(service: Arc<DirectoryService>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            service.publish_stats();
        }
    })
}

pub fn spawn_all(service: Arc<DirectoryService>, config: &DirectoryConfig) -> Vec<JoinHandle<()>> {
    info!(
        "Starting liveness sweep every {:?} (threshold {:?}) and stats tick every {:?}",
        config.sweep_interval(),
        config.offline_threshold(),
        config.stats_interval()
    );
    vec![
        spawn_liveness_sweep(
            service.clone(),
            config.sweep_interval(),
            config.offline_threshold(),
        ),
        spawn_stats_tick(service, config.stats_interval()),
    ]
}
