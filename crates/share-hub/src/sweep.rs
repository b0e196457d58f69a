use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::hub::Hub;

/// Periodically evict connections that stopped heartbeating.
///
/// Runs until the returned handle is aborted or the runtime shuts down.
pub fn spawn_liveness_sweep(hub: Arc<Hub>) -> JoinHandle<()> {
    let period = hub.settings().liveness.sweep_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let evicted = hub.sweep_stale();
            if !evicted.is_empty() {
                tracing::info!(count = evicted.len(), "Liveness sweep evicted connections");
            }
        }
    })
}
