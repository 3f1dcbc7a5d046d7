//! Heartbeat reaper: periodically evicts workers that stopped beating.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use baton_rollout::Controller;

pub async fn run(
    controller: Arc<Controller>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(?period, "heartbeat reaper started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let evicted = controller.reap_silent(Instant::now()).await;
                if !evicted.is_empty() {
                    info!(count = evicted.len(), workers = ?evicted, "evicted silent workers");
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    debug!("heartbeat reaper stopped");
}
