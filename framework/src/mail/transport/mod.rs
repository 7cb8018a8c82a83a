//! Transports deliver built messages.
//!
//! Every transport implements [`Transport`]. Simple transports are created from a DSN
//! with [`from_dsn`]; [`FailoverTransport`] and [`RoundRobinTransport`] spread sends over
//! several members.

mod array;
mod failover;
mod log;
mod smtp;

pub use array::ArrayTransport;
pub use failover::{FailoverTransport, RoundRobinTransport, DEFAULT_RETRY_AFTER};
pub use log::{LogTransport, LoggingTransport};
pub use smtp::{SendmailTransport, SmtpTransport};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use super::address::{Address, RecipientList};
use super::message::Message;
use super::sent::TransportReceipt;
use super::MailError;

/// Delivers messages. `Display` names the transport in logs and receipts.
///
/// Resolved transports are shared by every send of a mailer and may be called
/// concurrently.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Display {
    async fn send(
        &self,
        message: &Message,
        envelope: &DeliveryEnvelope,
    ) -> Result<TransportReceipt, MailError>;
}

/// SMTP-level sender and recipients of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEnvelope {
    sender: Address,
    recipients: Vec<Address>,
}

impl DeliveryEnvelope {
    pub fn new(sender: Address, recipients: Vec<Address>) -> Result<Self, MailError> {
        if recipients.is_empty() {
            return Err(MailError::Build("message has no recipients".into()));
        }
        Ok(Self { sender, recipients })
    }

    /// Sender is the return path, else the from address. Recipients are to, cc and bcc.
    pub fn from_message(message: &Message) -> Result<Self, MailError> {
        let sender = message
            .return_path()
            .or(message.from())
            .cloned()
            .ok_or_else(|| MailError::Build("message has no sender".into()))?;

        let mut recipients = RecipientList::new();
        recipients.extend(message.to());
        recipients.extend(message.cc());
        recipients.extend(message.bcc());

        Self::new(sender, recipients.as_slice().to_vec())
    }

    pub fn sender(&self) -> &Address {
        &self.sender
    }

    pub fn recipients(&self) -> &[Address] {
        &self.recipients
    }
}

/// Build a transport from a connection string.
///
/// Supported schemes are `smtp`, `smtps`, `sendmail`, `array` and `log`.
pub fn from_dsn(dsn: &str) -> Result<Arc<dyn Transport>, MailError> {
    let url = Url::parse(dsn).map_err(|e| MailError::InvalidDsn(format!("{dsn}: {e}")))?;

    match url.scheme() {
        "smtp" | "smtps" => Ok(Arc::new(SmtpTransport::from_url(&url)?)),
        "sendmail" => Ok(Arc::new(SendmailTransport::from_url(&url))),
        "array" => Ok(Arc::new(ArrayTransport::new())),
        "log" => Ok(Arc::new(LogTransport::default())),
        other => Err(MailError::UnsupportedTransport(other.to_string())),
    }
}
