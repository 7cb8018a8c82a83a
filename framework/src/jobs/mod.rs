//! Queue plumbing for deferred work.
//!
//! # Architecture
//!
//! - [`Job`]: serializable job trait combining data (payload) with behaviour (`perform`).
//! - [`JobEntry`]: the serialized representation of a queued job.
//! - [`QueueProvider`]: backend-agnostic storage trait. Implement for Postgres, Redis, etc.
//! - [`MemoryQueue`]: in-memory provider for development and testing.
//! - [`QueueManager`]: named queue channels; the first one is the default.
//! - [`JobRegistry`]: maps job type strings to deserialization + execution logic.
//! - [`Worker`]: polls a `QueueProvider` and dispatches jobs through the registry.
//!
//! # Quick Start
//!
//! ```ignore
//! let queue = MemoryQueue::new();
//! let queues = QueueManager::new().channel("mail", Arc::new(queue.clone()));
//!
//! // Enqueue
//! Mailable::new(Welcome::default()).to("jane@example.com").queue(&queues, None).await?;
//!
//! // Process
//! let registry = JobRegistry::new().register::<QueuedMailableJob<Welcome>>();
//! Worker::new(Arc::new(queue), registry, manager).start();
//! ```

mod entry;
mod memory;
mod queues;
mod registry;
mod traits;
mod worker;

pub use entry::{JobEntry, JobOpts, JobStatus};
pub use memory::MemoryQueue;
pub use queues::{QueueChannelConfig, QueueManager};
pub use registry::JobRegistry;
pub use traits::{Job, JobResult, QueueProvider};
pub use worker::Worker;

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("queue [{0}] is not configured")]
    UnknownQueue(String),
    #[error("no queue is configured")]
    NoQueues,
    #[error("no handler registered for job type [{0}]")]
    UnknownJobType(String),
    #[error("unsupported queue driver [{0}]")]
    UnsupportedDriver(String),
}

/// Serialize a [`Job`] into a [`JobEntry`] using its default options.
pub fn into_entry<J: Job>(job: &J) -> Result<JobEntry, JobError> {
    into_entry_with(job, J::default_opts())
}

/// Serialize a [`Job`] into a [`JobEntry`] with explicit options.
pub fn into_entry_with<J: Job>(job: &J, opts: JobOpts) -> Result<JobEntry, JobError> {
    Ok(JobEntry::new(J::JOB_TYPE, serde_json::to_value(job)?, &opts))
}

/// Convenience: serialize a job and insert it into the queue in one call.
pub async fn enqueue<J: Job>(
    queue: &(impl QueueProvider + ?Sized),
    job: J,
) -> Result<Uuid, JobError> {
    enqueue_with(queue, job, J::default_opts()).await
}

/// Convenience: serialize a job with options and insert it into the queue.
pub async fn enqueue_with<J: Job>(
    queue: &(impl QueueProvider + ?Sized),
    job: J,
    opts: JobOpts,
) -> Result<Uuid, JobError> {
    let entry = into_entry_with(&job, opts)?;
    let id = entry.id;
    queue.insert(&entry).await?;
    Ok(id)
}
