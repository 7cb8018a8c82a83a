//! Delivery receipts.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::Message;
use super::transport::DeliveryEnvelope;

/// What a transport reports after accepting a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportReceipt {
    message_id: String,
    original: Message,
    envelope: DeliveryEnvelope,
    transport: String,
    #[serde(default)]
    debug: String,
}

impl TransportReceipt {
    /// The message id is taken from the message's `Message-ID` header, or generated from
    /// the sender's domain.
    pub fn new(message: &Message, envelope: &DeliveryEnvelope, transport: impl Display) -> Self {
        let message_id = message
            .header("Message-ID")
            .map(|id| id.trim_start_matches('<').trim_end_matches('>').to_string())
            .unwrap_or_else(|| generate_id(envelope));

        Self {
            message_id,
            original: message.clone(),
            envelope: envelope.clone(),
            transport: transport.to_string(),
            debug: String::new(),
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = id.into();
        self
    }

    pub fn with_debug(mut self, debug: impl Into<String>) -> Self {
        self.debug = debug.into();
        self
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn original(&self) -> &Message {
        &self.original
    }

    pub fn envelope(&self) -> &DeliveryEnvelope {
        &self.envelope
    }

    pub fn transport(&self) -> &str {
        &self.transport
    }

    pub fn debug(&self) -> &str {
        &self.debug
    }
}

fn generate_id(envelope: &DeliveryEnvelope) -> String {
    let domain = envelope
        .sender()
        .email()
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty())
        .unwrap_or("localhost");
    format!("{}@{domain}", Uuid::new_v4().simple())
}

/// A message the transport accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SentMessage(TransportReceipt);

impl SentMessage {
    pub fn new(receipt: TransportReceipt) -> Self {
        Self(receipt)
    }

    pub fn message_id(&self) -> &str {
        self.0.message_id()
    }

    pub fn original_message(&self) -> &Message {
        self.0.original()
    }

    pub fn envelope(&self) -> &DeliveryEnvelope {
        self.0.envelope()
    }

    /// Name of the transport that delivered the message.
    pub fn transport(&self) -> &str {
        self.0.transport()
    }

    pub fn debug(&self) -> &str {
        self.0.debug()
    }

    pub fn receipt(&self) -> &TransportReceipt {
        &self.0
    }

    pub fn into_receipt(self) -> TransportReceipt {
        self.0
    }
}
