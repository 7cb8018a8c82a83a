mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};

use common::{manager_with, single, tera, Recorder, Welcome};
use mailwright::jobs::{
    enqueue, into_entry, Job, JobEntry, JobError, JobOpts, JobRegistry, JobResult, JobStatus,
    MemoryQueue, QueueChannelConfig, QueueManager, QueueProvider, Worker,
};
use mailwright::mail::{MailManager, MailServices, Mailable, QueuedMailableJob};

#[derive(Default)]
struct Counter {
    runs: AtomicUsize,
}

#[derive(Serialize, Deserialize)]
struct Tally {
    by: usize,
    fail: bool,
}

#[async_trait]
impl Job for Tally {
    const JOB_TYPE: &'static str = "tests::tally";
    type Context = Counter;

    async fn perform(self, ctx: &Counter) -> JobResult {
        if self.fail {
            return Err("tally refused".into());
        }
        let total = ctx.runs.fetch_add(self.by, Ordering::SeqCst) + self.by;
        Ok(Some(serde_json::json!({ "total": total })))
    }
}

async fn wait_for<F>(queue: &MemoryQueue, done: F) -> Vec<JobEntry>
where
    F: Fn(&[JobEntry]) -> bool,
{
    for _ in 0..200 {
        let entries = queue.entries().await;
        if done(&entries) {
            return entries;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue did not settle");
}

#[test]
fn into_entry_serializes_the_job() {
    let entry = into_entry(&Tally { by: 2, fail: false }).unwrap();

    assert_eq!(entry.job_type, "tests::tally");
    assert_eq!(entry.payload["by"], 2);
    assert_eq!(entry.status, JobStatus::Pending);
    assert_eq!(entry.max_attempts, 3);
}

#[tokio::test]
async fn registry_rejects_unknown_job_types() {
    let registry = JobRegistry::<Counter>::new().register::<Tally>();
    let entry = JobEntry::new("tests::unknown", serde_json::json!({}), &Default::default());

    assert!(registry.contains("tests::tally"));
    let err = registry.perform(&entry, Arc::new(Counter::default())).await.unwrap_err();
    assert!(err.to_string().contains("tests::unknown"));
}

#[tokio::test]
async fn worker_completes_and_fails_jobs() {
    let queue = Arc::new(MemoryQueue::new());
    enqueue(queue.as_ref(), Tally { by: 3, fail: false }).await.unwrap();
    enqueue(queue.as_ref(), Tally { by: 1, fail: true }).await.unwrap();

    let counter = Arc::new(Counter::default());
    let handle = Worker::new(queue.clone(), JobRegistry::new().register::<Tally>(), counter.clone())
        .concurrency(2)
        .poll_interval(Duration::from_millis(5))
        .start();

    let entries = wait_for(&queue, |entries| {
        entries
            .iter()
            .all(|e| matches!(e.status, JobStatus::Completed | JobStatus::Failed))
    })
    .await;
    handle.abort();

    assert_eq!(entries[0].status, JobStatus::Completed);
    assert_eq!(entries[0].result, Some(serde_json::json!({ "total": 3 })));
    assert_eq!(entries[1].status, JobStatus::Failed);
    assert_eq!(entries[1].last_error.as_deref(), Some("tally refused"));
    assert_eq!(counter.runs.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn worker_expires_stale_jobs_without_running_them() {
    let queue = Arc::new(MemoryQueue::new());
    let opts = JobOpts {
        expires_in: Some(Duration::from_millis(1)),
        ..JobOpts::default()
    };
    let payload = serde_json::json!({ "by": 5, "fail": false });
    queue.insert(&JobEntry::new(Tally::JOB_TYPE, payload, &opts)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let counter = Arc::new(Counter::default());
    let handle = Worker::new(queue.clone(), JobRegistry::new().register::<Tally>(), counter.clone())
        .poll_interval(Duration::from_millis(5))
        .start();

    let entries = wait_for(&queue, |entries| entries[0].status == JobStatus::Expired).await;
    handle.abort();

    assert_eq!(entries[0].result, None);
    assert_eq!(counter.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn worker_delivers_queued_mailables() {
    let recorder = Recorder::ok("memory");
    let queue = Arc::new(MemoryQueue::new());
    let queues = QueueManager::new().channel("mail", queue.clone());
    let services = MailServices::new(tera()).with_queues(queues);
    let manager = Arc::new(manager_with(single(&recorder), services, &[recorder.clone()]));

    Mailable::new(Welcome { name: "Jane".into() })
        .to("jane@example.com")
        .queue(&manager.services().queues, None)
        .await
        .unwrap();

    let registry = JobRegistry::<MailManager>::new().register::<QueuedMailableJob<Welcome>>();
    let handle = Worker::new(queue.clone(), registry, manager.clone())
        .poll_interval(Duration::from_millis(5))
        .start();

    let entries = wait_for(&queue, |entries| {
        !matches!(entries[0].status, JobStatus::Pending | JobStatus::Running)
    })
    .await;
    handle.abort();

    assert_eq!(entries[0].status, JobStatus::Completed);
    assert_eq!(recorder.calls(), 1);
    assert_eq!(recorder.last().subject(), Some("Welcome, Jane"));
}

#[tokio::test]
async fn unknown_queue_is_reported() {
    let queues = QueueManager::new().channel("mail", Arc::new(MemoryQueue::new()));

    let err = queues
        .push(Some("reports"), &Tally { by: 1, fail: false }, None)
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::UnknownQueue(ref name) if name == "reports"));
    assert_eq!(queues.names().collect::<Vec<_>>(), vec!["mail"]);
    assert!(queues.get("mail").is_some());
}

#[tokio::test]
async fn provider_trait_objects_accept_entries() {
    let queue: Arc<dyn QueueProvider> = Arc::new(MemoryQueue::new());

    enqueue(queue.as_ref(), Tally { by: 1, fail: false }).await.unwrap();

    let claimed = queue.claim_next("w1").await.unwrap().unwrap();
    assert_eq!(claimed.status, JobStatus::Running);
    assert_eq!(claimed.locked_by.as_deref(), Some("w1"));
}

#[tokio::test]
async fn queue_channels_build_from_config() {
    let slow: QueueChannelConfig =
        serde_json::from_value(serde_json::json!({ "name": "slow", "max_attempts": 5 })).unwrap();
    let queues = QueueManager::from_config(&[QueueChannelConfig::memory("default"), slow]).unwrap();

    assert_eq!(queues.names().collect::<Vec<_>>(), vec!["default", "slow"]);
    assert_eq!(queues.default_name(), Some("default"));

    queues.push(Some("slow"), &Tally { by: 1, fail: false }, None).await.unwrap();
    let claimed = queues.get("slow").unwrap().claim_next("w1").await.unwrap().unwrap();
    assert_eq!(claimed.job_type, Tally::JOB_TYPE);
    assert_eq!(claimed.max_attempts, 5);
    assert!(queues.get("default").unwrap().claim_next("w1").await.unwrap().is_none());
}

#[test]
fn unknown_queue_driver_is_rejected() {
    let redis: QueueChannelConfig =
        serde_json::from_value(serde_json::json!({ "name": "jobs", "driver": "redis" })).unwrap();

    let configs = [QueueChannelConfig::memory("default"), redis];
    let Err(err) = QueueManager::from_config(&configs) else {
        panic!("redis driver was accepted");
    };

    assert!(matches!(err, JobError::UnsupportedDriver(ref driver) if driver == "redis"));
}
