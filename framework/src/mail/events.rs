//! Pre- and post-send hooks.

use std::sync::Arc;

use async_trait::async_trait;

use super::message::Message;
use super::render::ViewData;
use super::sent::SentMessage;

/// Fired before a message reaches the transport.
pub struct MessageSending<'a> {
    pub message: &'a Message,
    pub data: &'a ViewData,
}

/// Fired after the transport accepted a message.
pub struct MessageSent<'a> {
    pub sent: &'a SentMessage,
    pub data: &'a ViewData,
}

#[async_trait]
pub trait MailListener: Send + Sync {
    /// Return `false` to stop the message from being sent.
    async fn sending(&self, _event: &MessageSending<'_>) -> bool {
        true
    }

    async fn sent(&self, _event: &MessageSent<'_>) {}
}

/// Ordered set of mail listeners.
#[derive(Clone, Default)]
pub struct Events {
    listeners: Vec<Arc<dyn MailListener>>,
}

impl Events {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen(mut self, listener: impl MailListener + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// False as soon as one listener vetoes; later listeners are not consulted.
    pub async fn dispatch_sending(&self, event: &MessageSending<'_>) -> bool {
        for listener in &self.listeners {
            if !listener.sending(event).await {
                return false;
            }
        }
        true
    }

    pub async fn dispatch_sent(&self, event: &MessageSent<'_>) {
        for listener in &self.listeners {
            listener.sent(event).await;
        }
    }
}
