use crate::application::scheduler::CaptureScheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Spawns the periodic deposit capture loop.
///
/// Runs never overlap within one process; a run that outlasts the period
/// delays the next tick instead of queueing a burst.
pub fn start_capture_job(scheduler: Arc<CaptureScheduler>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(period_secs = period.as_secs(), "capture job started");

        loop {
            ticker.tick().await;
            match scheduler.run().await {
                Ok(report) if report.failed > 0 => {
                    tracing::warn!(failed = report.failed, errors = ?report.errors, "capture run had failures");
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Failed to run deposit capture: {}", e),
            }
        }
    })
}
