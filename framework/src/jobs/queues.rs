use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entry::{JobEntry, JobOpts};
use super::memory::MemoryQueue;
use super::traits::{Job, QueueProvider};
use super::JobError;

/// One named queue channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueChannelConfig {
    pub name: String,
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    /// Seconds after which an unprocessed job is dropped.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

fn default_driver() -> String {
    "memory".to_string()
}

fn default_max_attempts() -> i32 {
    3
}

impl QueueChannelConfig {
    pub fn memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: default_driver(),
            max_attempts: default_max_attempts(),
            expires_in: None,
        }
    }

    fn opts(&self) -> JobOpts {
        JobOpts {
            max_attempts: self.max_attempts,
            expires_in: self.expires_in.map(Duration::from_secs),
            delay: None,
        }
    }
}

struct Channel {
    name: String,
    provider: Arc<dyn QueueProvider>,
    opts: JobOpts,
}

/// Named queue channels. The first channel is the default one.
#[derive(Default)]
pub struct QueueManager {
    channels: Vec<Channel>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel with default options. Re-adding a name replaces its provider.
    pub fn channel(self, name: impl Into<String>, provider: Arc<dyn QueueProvider>) -> Self {
        self.channel_with(name, provider, JobOpts::default())
    }

    pub fn channel_with(
        mut self,
        name: impl Into<String>,
        provider: Arc<dyn QueueProvider>,
        opts: JobOpts,
    ) -> Self {
        let name = name.into();
        let channel = Channel {
            name: name.clone(),
            provider,
            opts,
        };
        match self.channels.iter_mut().find(|c| c.name == name) {
            Some(existing) => *existing = channel,
            None => self.channels.push(channel),
        }
        self
    }

    /// Build channels from config. Only the `memory` driver is built in; register other
    /// drivers with [`channel_with`](Self::channel_with).
    pub fn from_config(configs: &[QueueChannelConfig]) -> Result<Self, JobError> {
        configs.iter().try_fold(Self::new(), |manager, config| {
            let provider: Arc<dyn QueueProvider> = match config.driver.as_str() {
                "memory" => Arc::new(MemoryQueue::new()),
                other => return Err(JobError::UnsupportedDriver(other.to_string())),
            };
            Ok(manager.channel_with(config.name.clone(), provider, config.opts()))
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn QueueProvider>> {
        self.find(name).map(|c| c.provider.clone())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.channels.first().map(|c| c.name.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.name.as_str())
    }

    /// Serialize `job` onto the named channel, or the default one. With a delay the job
    /// only becomes eligible once the delay has passed.
    pub async fn push<J: Job>(
        &self,
        queue: Option<&str>,
        job: &J,
        delay: Option<Duration>,
    ) -> Result<Uuid, JobError> {
        let channel = match queue {
            Some(name) => self
                .find(name)
                .ok_or_else(|| JobError::UnknownQueue(name.to_string()))?,
            None => self.channels.first().ok_or(JobError::NoQueues)?,
        };

        let opts = channel.opts.clone().delayed(delay);
        let entry = JobEntry::new(J::JOB_TYPE, serde_json::to_value(job)?, &opts);
        let id = entry.id;
        channel.provider.insert(&entry).await?;

        tracing::debug!(
            queue = %channel.name,
            job_id = %id,
            job_type = J::JOB_TYPE,
            ?delay,
            "job pushed"
        );
        Ok(id)
    }

    fn find(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }
}
