use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::Instrument;

use super::registry::JobRegistry;
use super::traits::QueueProvider;

/// Job processor that polls a [`QueueProvider`] and dispatches to handlers registered in
/// a [`JobRegistry`].
///
/// The worker marks each entry completed, failed or expired. A failed entry stays failed;
/// retrying is left to persistent drivers.
///
/// ```ignore
/// let registry = JobRegistry::new().register::<QueuedMailableJob<Welcome>>();
///
/// Worker::new(queues.get("default").unwrap(), registry, manager)
///     .concurrency(8)
///     .poll_interval(Duration::from_millis(500))
///     .start();
/// ```
pub struct Worker<S: Send + Sync + 'static> {
    queue: Arc<dyn QueueProvider>,
    registry: Arc<JobRegistry<S>>,
    ctx: Arc<S>,
    concurrency: usize,
    poll_interval: Duration,
    worker_id: String,
}

impl<S: Send + Sync + 'static> Worker<S> {
    pub fn new(
        queue: Arc<dyn QueueProvider>,
        registry: JobRegistry<S>,
        ctx: impl Into<Arc<S>>,
    ) -> Self {
        Self {
            queue,
            registry: Arc::new(registry),
            ctx: ctx.into(),
            concurrency: 4,
            poll_interval: Duration::from_secs(1),
            worker_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Maximum number of jobs processed in parallel (default: 4).
    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// How often to poll when idle (default: 1s). Backs off slightly during
    /// idle streaks.
    pub fn poll_interval(mut self, d: Duration) -> Self {
        self.poll_interval = d;
        self
    }

    /// Start the worker loop on a background task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let Self {
            queue,
            registry,
            ctx,
            concurrency,
            poll_interval,
            worker_id,
        } = self;

        tracing::info!(%worker_id, concurrency, "worker running");

        tokio::spawn(async move {
            let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency));
            let mut idle_streak: u32 = 0;

            loop {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };

                let mut entry = match queue.claim_next(&worker_id).await {
                    Ok(Some(e)) => e,
                    Ok(None) => {
                        drop(permit);
                        idle_streak = idle_streak.saturating_add(1);
                        let backoff = poll_interval
                            .mul_f64((1.5_f64).min(1.0 + idle_streak as f64 * 0.1));
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    Err(e) => {
                        drop(permit);
                        tracing::error!(error = %e, "failed to poll queue");
                        tokio::time::sleep(poll_interval).await;
                        continue;
                    }
                };

                idle_streak = 0;

                let job_id = entry.id;
                let job_type = entry.job_type.clone();

                if entry.is_expired(OffsetDateTime::now_utc()) {
                    tracing::info!(%job_id, %job_type, "job expired, skipping");
                    entry.expire();
                    if let Err(e) = queue.update(&entry).await {
                        tracing::error!(%job_id, error = %e, "failed to record job expiry");
                    }
                    drop(permit);
                    continue;
                }

                let queue = queue.clone();
                let registry = registry.clone();
                let ctx = ctx.clone();

                tokio::spawn(async move {
                    let _permit = permit;

                    let span = tracing::info_span!("job", %job_id, %job_type);
                    match registry.perform(&entry, ctx).instrument(span).await {
                        Ok(result) => {
                            tracing::info!(%job_id, %job_type, "job completed");
                            entry.complete(result);
                        }
                        Err(e) => {
                            let error_msg = e.to_string();
                            tracing::error!(
                                %job_id, %job_type,
                                attempts = entry.attempts,
                                %error_msg,
                                "job failed"
                            );
                            entry.fail(error_msg);
                        }
                    }
                    if let Err(e) = queue.update(&entry).await {
                        tracing::error!(%job_id, error = %e, "failed to record job outcome");
                    }
                });
            }
        })
    }
}
