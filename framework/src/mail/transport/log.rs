use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info};

use super::{DeliveryEnvelope, Transport};
use crate::mail::config::LoggerConfig;
use crate::mail::message::Message;
use crate::mail::sent::TransportReceipt;
use crate::mail::MailError;

/// Writes messages to the log instead of delivering them.
#[derive(Debug, Clone)]
pub struct LogTransport {
    channel: String,
    group: String,
}

impl LogTransport {
    pub fn new(channel: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            group: group.into(),
        }
    }

    /// Read `name` and `group` from a mailer's options.
    pub fn from_options(options: &HashMap<String, Value>) -> Self {
        let option = |key: &str, default: &str| {
            options
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };
        Self::new(option("name", "mail.local"), option("group", "default"))
    }
}

impl Default for LogTransport {
    fn default() -> Self {
        Self::new("mail.local", "default")
    }
}

impl fmt::Display for LogTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("log")
    }
}

#[async_trait]
impl Transport for LogTransport {
    async fn send(
        &self,
        message: &Message,
        envelope: &DeliveryEnvelope,
    ) -> Result<TransportReceipt, MailError> {
        let receipt = TransportReceipt::new(message, envelope, self);
        let recipients: Vec<String> =
            envelope.recipients().iter().map(ToString::to_string).collect();

        debug!(
            channel = %self.channel,
            group = %self.group,
            message_id = %receipt.message_id(),
            sender = %envelope.sender(),
            recipients = ?recipients,
            subject = message.subject().unwrap_or_default(),
            headers = ?message.headers(),
            html = message.html().unwrap_or_default(),
            text = message.text().unwrap_or_default(),
            attachments = message.attachments().len(),
            "mail message"
        );

        Ok(receipt)
    }
}

/// Logs the outcome of every send of the wrapped transport.
pub struct LoggingTransport {
    inner: Arc<dyn Transport>,
    name: String,
    group: String,
}

impl LoggingTransport {
    pub fn new(inner: Arc<dyn Transport>, logger: &LoggerConfig) -> Self {
        Self {
            inner,
            name: logger.name.clone(),
            group: logger.group.clone(),
        }
    }
}

impl fmt::Display for LoggingTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

#[async_trait]
impl Transport for LoggingTransport {
    async fn send(
        &self,
        message: &Message,
        envelope: &DeliveryEnvelope,
    ) -> Result<TransportReceipt, MailError> {
        debug!(
            logger = %self.name,
            group = %self.group,
            transport = %self.inner,
            recipients = envelope.recipients().len(),
            "sending message"
        );

        match self.inner.send(message, envelope).await {
            Ok(receipt) => {
                info!(
                    logger = %self.name,
                    group = %self.group,
                    transport = %self.inner,
                    message_id = %receipt.message_id(),
                    "message sent"
                );
                Ok(receipt)
            }
            Err(e) => {
                error!(
                    logger = %self.name,
                    group = %self.group,
                    transport = %self.inner,
                    error = %e,
                    "message failed"
                );
                Err(e)
            }
        }
    }
}
