//! Queued delivery of mailables.

use std::marker::PhantomData;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::mailable::{MailDefinition, Mailable};
use super::manager::MailManager;
use crate::jobs::{Job, JobResult};

/// Application state that can hand out the mail manager.
///
/// Implement this on your app state to run [`QueuedMailableJob`]s against it:
///
/// ```ignore
/// pub struct AppState {
///     pub mail: MailManager,
///     // ...
/// }
///
/// impl HasMailManager for AppState {
///     fn mail_manager(&self) -> &MailManager {
///         &self.mail
///     }
/// }
/// ```
pub trait HasMailManager: Send + Sync + 'static {
    fn mail_manager(&self) -> &MailManager;
}

impl HasMailManager for MailManager {
    fn mail_manager(&self) -> &MailManager {
        self
    }
}

/// A mailable waiting on a queue.
///
/// Nothing is rendered when the job is pushed. The worker hydrates, renders and sends the
/// mailable from scratch, through the mailer it names or the manager's default.
///
/// Register one job type per mail definition:
///
/// ```ignore
/// let registry = JobRegistry::<MailManager>::new()
///     .register::<QueuedMailableJob<OrderShipped>>()
///     .register::<QueuedMailableJob<Welcome>>();
/// ```
#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "M: MailDefinition", deserialize = "M: MailDefinition"))]
pub struct QueuedMailableJob<M, S = MailManager> {
    mailable: Mailable<M>,
    #[serde(skip)]
    _marker: PhantomData<S>,
}

impl<M: MailDefinition, S> QueuedMailableJob<M, S> {
    pub fn new(mailable: Mailable<M>) -> Self {
        Self {
            mailable,
            _marker: PhantomData,
        }
    }

    pub fn mailable(&self) -> &Mailable<M> {
        &self.mailable
    }
}

#[async_trait]
impl<M: MailDefinition, S: HasMailManager> Job for QueuedMailableJob<M, S> {
    const JOB_TYPE: &'static str = M::NAME;
    type Context = S;

    async fn perform(self, ctx: &Self::Context) -> JobResult {
        let sent = self.mailable.send(ctx.mail_manager()).await?;

        Ok(Some(match sent {
            Some(sent) => json!({ "message_id": sent.message_id() }),
            None => json!({ "sent": false }),
        }))
    }
}
