use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::audit::orchestrator::OrchestrationError;
use crate::audit::PageFilter;
use crate::state::SharedState;

/// Spawn the periodic batch audit task. Exits once shutdown begins.
pub fn spawn_scheduler(state: SharedState, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!("Scheduler started, auditing every {:?}", every);
        let mut shutdown_rx = state.shutdown_rx();
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match state
                .orchestrator
                .run_batch_until(PageFilter::default(), state.shutdown_rx())
                .await
            {
                Ok(result) => info!(
                    "Scheduled batch finished: {}/{} succeeded, {} failed{}",
                    result.succeeded,
                    result.attempted,
                    result.failed,
                    if result.cancelled { " (cancelled)" } else { "" }
                ),
                Err(OrchestrationError::NoMatchingPages) => {
                    info!("Scheduled batch skipped: no enabled pages");
                }
                Err(e) => error!("Scheduled batch failed: {}", e),
            }
        }

        info!("Scheduler stopped");
    })
}
