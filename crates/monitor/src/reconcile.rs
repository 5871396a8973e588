//! Registry reconciliation task

use crate::manager::CameraManager;
use crate::pipeline::PipelineEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Spawn the task that periodically removes inactive cameras and handles
/// pipeline events. Exits when `shutdown` flips to true or its sender drops.
pub fn spawn_reconciler(
    manager: Arc<CameraManager>,
    mut events: mpsc::Receiver<PipelineEvent>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;
        info!(interval_secs = interval.as_secs_f64(), "Reconciler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = manager.cleanup_inactive().await;
                    debug!(removed, running = manager.count(), "Reconcile pass complete");
                }
                event = events.recv(), if events_open => match event {
                    Some(event) => manager.handle_event(event).await,
                    None => events_open = false,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Reconciler stopped");
    })
}
