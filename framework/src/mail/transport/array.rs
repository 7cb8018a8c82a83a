use std::fmt;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{DeliveryEnvelope, Transport};
use crate::mail::message::Message;
use crate::mail::sent::TransportReceipt;
use crate::mail::MailError;

/// Keeps every message in memory instead of delivering it.
#[derive(Default)]
pub struct ArrayTransport {
    messages: Mutex<Vec<TransportReceipt>>,
}

impl ArrayTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<TransportReceipt> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every stored message.
    pub fn flush(&self) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl fmt::Display for ArrayTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("array")
    }
}

#[async_trait]
impl Transport for ArrayTransport {
    async fn send(
        &self,
        message: &Message,
        envelope: &DeliveryEnvelope,
    ) -> Result<TransportReceipt, MailError> {
        let receipt = TransportReceipt::new(message, envelope, self);
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(receipt.clone());
        Ok(receipt)
    }
}
