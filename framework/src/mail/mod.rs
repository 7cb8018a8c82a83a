//! Mailables, mailers and the delivery pipeline.
//!
//! A [`Mailable`] describes one email: who it goes to, which views render its body,
//! what is attached. A [`Mailer`] turns it into a transport [`Message`] and hands it to a
//! [`Transport`]. The [`MailManager`] resolves named mailers from [`MailConfig`] and caches
//! them.
//!
//! # Quick Start
//!
//! ```ignore
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Welcome { name: String }
//!
//! impl MailDefinition for Welcome {
//!     const NAME: &'static str = "app::welcome";
//!
//!     fn envelope(&self) -> Option<Envelope> {
//!         Some(Envelope::new().subject(format!("Welcome, {}", self.name)))
//!     }
//!
//!     fn content(&self) -> Option<Content> {
//!         Some(Content::new().view("emails/welcome.html").text("emails/welcome.txt"))
//!     }
//! }
//!
//! let config = MailConfig::from_env_with_prefix("MAIL")?;
//! let manager = MailManager::new(config, MailServices::new(TeraRenderer::new("templates/**/*")?));
//!
//! // Send now
//! manager.to("jane@example.com").send(&Mailable::new(Welcome { name: "Jane".into() })).await?;
//!
//! // Or hand it to a worker
//! Mailable::new(Welcome { name: "Jane".into() })
//!     .to("jane@example.com")
//!     .queue(&manager.services().queues, None)
//!     .await?;
//! ```
//!
//! # Configuration
//!
//! | Key | Description |
//! |-----|-------------|
//! | `default` | Name of the default mailer |
//! | `mailers.<name>.transport` | `failover`, `roundrobin`, `array`, `log` or a driver registered with [`MailManager::extend`] |
//! | `mailers.<name>.dsn` | `smtp://`, `smtps://`, `sendmail://`, `array://` or `log://` connection string |
//! | `mailers.<name>.mailers` | Members of a failover / round-robin mailer |
//! | `from`, `reply_to`, `to`, `return_path` | Global `{ address, name }` overrides |
//! | `logger` | `{ enabled, name, group }`: log every send of DSN-built transports |

mod address;
mod attachment;
pub mod config;
mod events;
mod job;
pub mod locale;
mod mailable;
mod mailables;
mod mailer;
mod manager;
mod message;
mod pending;
mod render;
mod sent;
mod storage;
pub mod transport;

pub use address::{Address, HasMailAddress, IntoAddresses, RecipientList};
pub use attachment::{AttachOptions, Attachment, DataProducer, Payload, Resolved, Source};
pub use config::{GlobalAddress, LoggerConfig, MailConfig, MailerConfig};
pub use events::{Events, MailListener, MessageSending, MessageSent};
pub use job::{HasMailManager, QueuedMailableJob};
pub use mailable::{AttachmentEntry, MailDefinition, MailState, Mailable};
pub use mailables::{Content, Envelope, Headers, MetadataValue};
pub use mailer::{Body, BuildMessage, Mailer, RenderedMail, View};
pub use manager::{MailManager, MailServices, TransportFactory};
pub use message::{Message, MessageAttachment, MessageCallback};
pub use pending::{PendingMail, Target};
pub use render::{TeraRenderer, ViewData, ViewRenderer};
pub use sent::{SentMessage, TransportReceipt};
pub use storage::{Filesystems, LocalDisk, MemoryDisk, Storage};
pub use transport::{DeliveryEnvelope, Transport};

use thiserror::Error;

use crate::jobs::JobError;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mailer [{0}] is not defined")]
    MailerNotDefined(String),

    #[error("unsupported mail transport [{0}]")]
    UnsupportedTransport(String),

    #[error("mailer has neither a transport nor a dsn configured")]
    MissingDsn,

    #[error("invalid dsn: {0}")]
    InvalidDsn(String),

    #[error("disk [{0}] is not configured")]
    DiskNotConfigured(String),

    #[error("no queue is configured")]
    QueueNotConfigured,

    #[error("attachment requires a filename")]
    MissingFilename,

    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    #[error("invalid mail content: {0}")]
    InvalidContent(String),

    #[error("mailable cannot be queued: {0}")]
    NotQueueable(String),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("failed to render view [{view}]: {reason}")]
    Render { view: String, reason: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("transport [{transport}] failed: {reason}")]
    Transport {
        transport: String,
        reason: String,
        code: Option<u16>,
    },

    #[error("queue error: {0}")]
    Queue(#[from] JobError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MailError {
    /// True for errors caused by mail configuration rather than by a particular message.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MailerNotDefined(_)
                | Self::UnsupportedTransport(_)
                | Self::MissingDsn
                | Self::InvalidDsn(_)
                | Self::DiskNotConfigured(_)
                | Self::QueueNotConfigured
        )
    }

    pub(crate) fn transport(transport: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::Transport {
            transport: transport.to_string(),
            reason: reason.into(),
            code: None,
        }
    }
}
