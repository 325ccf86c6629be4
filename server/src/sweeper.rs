//! Scheduled cleanup of checkout sessions whose expiry webhook never came

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::payment::PaymentService;

/// Every five minutes, on the minute
pub const SWEEP_SCHEDULE: &str = "0 */5 * * * *";

/// Run one sweep, logging the result
pub async fn sweep_once(payment_service: &PaymentService) {
    match payment_service.expire_stale_sessions().await {
        Ok(0) => tracing::debug!("no stale checkout sessions"),
        Ok(count) => tracing::info!(count, "expired stale checkout sessions"),
        Err(e) => tracing::error!(error = %e, "checkout session sweep failed"),
    }
}

/// Start the sweep on its own scheduler. The returned scheduler must be
/// kept alive for the job to keep running.
pub async fn start(payment_service: Arc<PaymentService>) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    let job = Job::new_async(SWEEP_SCHEDULE, move |_id, _scheduler| {
        let payment_service = payment_service.clone();
        Box::pin(async move {
            sweep_once(&payment_service).await;
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    tracing::info!(schedule = SWEEP_SCHEDULE, "checkout session sweeper started");
    Ok(scheduler)
}
