use async_trait::async_trait;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::entry::{JobEntry, JobStatus};
use super::traits::QueueProvider;
use super::JobError;

/// In-memory [`QueueProvider`] for development and testing.
///
/// Clones share the same entries. Nothing survives a restart.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    entries: Arc<Mutex<Vec<JobEntry>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every entry, in insertion order.
    pub async fn entries(&self) -> Vec<JobEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl QueueProvider for MemoryQueue {
    async fn insert(&self, entry: &JobEntry) -> Result<(), JobError> {
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<JobEntry>, JobError> {
        let mut entries = self.entries.lock().await;
        let now = OffsetDateTime::now_utc();

        let Some(entry) = entries
            .iter_mut()
            .find(|e| e.status == JobStatus::Pending && e.run_at <= now)
        else {
            return Ok(None);
        };

        entry.status = JobStatus::Running;
        entry.locked_at = Some(now);
        entry.locked_by = Some(worker_id.to_string());
        entry.attempts += 1;
        Ok(Some(entry.clone()))
    }

    async fn update(&self, entry: &JobEntry) -> Result<(), JobError> {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.iter_mut().find(|e| e.id == entry.id) {
            *existing = entry.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobOpts;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn delayed_entries_are_not_claimed_early() {
        let queue = MemoryQueue::new();
        let opts = JobOpts::default().delayed(Some(Duration::from_secs(60)));
        queue.insert(&JobEntry::new("mail", json!({}), &opts)).await.unwrap();

        assert!(queue.claim_next("w1").await.unwrap().is_none());
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn claim_locks_the_entry() {
        let queue = MemoryQueue::new();
        queue
            .insert(&JobEntry::new("mail", json!({}), &JobOpts::default()))
            .await
            .unwrap();

        let claimed = queue.claim_next("w1").await.unwrap().unwrap();

        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.locked_by.as_deref(), Some("w1"));
        assert_eq!(claimed.attempts, 1);
        assert!(queue.claim_next("w2").await.unwrap().is_none());
    }
}
