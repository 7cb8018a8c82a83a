use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Status of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Expired,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Options a queue channel applies to the jobs pushed onto it.
#[derive(Debug, Clone)]
pub struct JobOpts {
    /// Attempts a persistent driver may make, including the first.
    pub max_attempts: i32,
    /// If set, the job is skipped when dequeued after this duration from creation.
    pub expires_in: Option<Duration>,
    /// Delay before the job becomes eligible for processing.
    pub delay: Option<Duration>,
}

impl Default for JobOpts {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            expires_in: None,
            delay: None,
        }
    }
}

impl JobOpts {
    pub fn delayed(mut self, delay: Option<Duration>) -> Self {
        self.delay = delay;
        self
    }
}

/// Serialized representation of a queued job, as stored by a queue driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEntry {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_at: OffsetDateTime,
    pub expires_at: Option<OffsetDateTime>,
    pub locked_at: Option<OffsetDateTime>,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

impl JobEntry {
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value, opts: &JobOpts) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: opts.max_attempts,
            run_at: opts.delay.map(|d| now + d).unwrap_or(now),
            expires_at: opts.expires_in.map(|d| now + d),
            locked_at: None,
            locked_by: None,
            last_error: None,
            result: None,
            created_at: now,
            completed_at: None,
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }

    pub(crate) fn complete(&mut self, result: Option<serde_json::Value>) {
        self.status = JobStatus::Completed;
        self.result = result;
        self.completed_at = Some(OffsetDateTime::now_utc());
    }

    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.last_error = Some(error.into());
        self.locked_at = None;
        self.locked_by = None;
        self.completed_at = Some(OffsetDateTime::now_utc());
    }

    pub(crate) fn expire(&mut self) {
        self.status = JobStatus::Expired;
        self.completed_at = Some(OffsetDateTime::now_utc());
    }
}
