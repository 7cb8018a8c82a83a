use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use super::entry::{JobEntry, JobOpts};
use super::JobError;

/// A serializable job with typed execution logic.
///
/// The job's fields become the serialized payload, and `perform` runs on a worker.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct PruneBounces { older_than_days: u32 }
///
/// #[async_trait]
/// impl Job for PruneBounces {
///     const JOB_TYPE: &'static str = "prune_bounces";
///     type Context = AppState;
///
///     async fn perform(self, ctx: &AppState) -> JobResult {
///         ctx.bounces.prune(self.older_than_days).await?;
///         Ok(None)
///     }
/// }
/// ```
#[async_trait]
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique identifier for this job type (e.g. `"prune_bounces"`).
    const JOB_TYPE: &'static str;

    /// Application state provided at execution time.
    type Context: Send + Sync + 'static;

    /// Default options for this job type. Override to customise.
    fn default_opts() -> JobOpts {
        JobOpts::default()
    }

    /// Execute the job. Return `Ok(Some(value))` to store a result for
    /// observability, or `Ok(None)` when there is nothing to record.
    async fn perform(self, ctx: &Self::Context) -> JobResult;
}

/// Convenience alias for the return type of [`Job::perform`].
pub type JobResult = Result<Option<serde_json::Value>, Box<dyn std::error::Error + Send + Sync>>;

/// Backend-agnostic queue storage.
///
/// Queue channels hold providers as `Arc<dyn QueueProvider>`, so one application can mix
/// drivers. The [`Worker`](super::Worker) handles state transitions and calls `update`
/// with the modified entry.
#[async_trait]
pub trait QueueProvider: Send + Sync + 'static {
    /// Insert a new job entry into the queue.
    async fn insert(&self, entry: &JobEntry) -> Result<(), JobError>;

    /// Atomically claim the next eligible job (status=pending, run_at <= now).
    ///
    /// The implementation must:
    /// - Select a pending job with `run_at <= now`
    /// - Set `status` to `Running`, `locked_at` to now, `locked_by` to the
    ///   worker id, and increment `attempts`
    /// - Return `None` when no eligible jobs exist
    async fn claim_next(&self, worker_id: &str) -> Result<Option<JobEntry>, JobError>;

    /// Persist an updated job entry by id.
    async fn update(&self, entry: &JobEntry) -> Result<(), JobError>;
}
