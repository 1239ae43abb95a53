//! Background job scheduling

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::services::MetadataService;

/// Initialize and start the background job scheduler
pub async fn start_scheduler(metadata: Arc<MetadataService>) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    // Provider cache eviction - run daily at 3 AM
    let cache_job = Job::new_async("0 0 3 * * *", move |_uuid, _l| {
        let metadata = metadata.clone();
        Box::pin(async move {
            info!("Running provider cache eviction");
            match metadata.evict_expired_cache().await {
                Ok(evicted) => info!(evicted, "Provider cache eviction finished"),
                Err(e) => tracing::error!("Provider cache eviction error: {}", e),
            }
        })
    })?;
    scheduler.add(cache_job).await?;

    scheduler.start().await?;

    info!("Job scheduler started");
    Ok(scheduler)
}
