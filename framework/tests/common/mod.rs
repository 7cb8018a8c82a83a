#![allow(dead_code)]

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use mailwright::mail::transport::{DeliveryEnvelope, Transport};
use mailwright::mail::{
    Content, Envelope, MailConfig, MailDefinition, MailError, MailListener, MailManager,
    MailServices, MailerConfig, Message, MessageSending, TeraRenderer, TransportReceipt, ViewData,
    ViewRenderer,
};

pub const TEMPLATES: &[(&str, &str)] = &[
    ("welcome.html", "<p>Hello {{ name }} ({{ locale }})</p>"),
    ("welcome.txt", "Hello {{ name }}"),
    ("order.md", "<h1>Order {{ order_id }}</h1><p>Shipped by {{ carrier }}</p>"),
    ("photo.html", r#"<img src="cid:logo.png"><img src="cid:missing.png">"#),
    ("broken.html", "{{ not_defined }}"),
];

pub fn tera() -> TeraRenderer {
    TeraRenderer::from_templates(TEMPLATES.iter().copied()).unwrap()
}

/// Counts every render before delegating to Tera.
pub struct CountingRenderer {
    inner: TeraRenderer,
    pub calls: Arc<AtomicUsize>,
}

impl CountingRenderer {
    pub fn new() -> Self {
        Self {
            inner: tera(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl ViewRenderer for CountingRenderer {
    fn render(&self, view: &str, data: &ViewData) -> Result<String, MailError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.render(view, data)
    }
}

/// Records the messages it is asked to send, or fails every send.
pub struct Recorder {
    name: String,
    fail: bool,
    calls: AtomicUsize,
    messages: Mutex<Vec<Message>>,
}

impl Recorder {
    pub fn ok(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail: false,
            calls: AtomicUsize::new(0),
            messages: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail: true,
            calls: AtomicUsize::new(0),
            messages: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn last(&self) -> Message {
        self.messages().pop().expect("no message recorded")
    }
}

impl fmt::Display for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[async_trait]
impl Transport for Recorder {
    async fn send(
        &self,
        message: &Message,
        envelope: &DeliveryEnvelope,
    ) -> Result<TransportReceipt, MailError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MailError::Transport {
                transport: self.name.clone(),
                reason: "connection refused".into(),
                code: Some(421),
            });
        }
        self.messages.lock().unwrap().push(message.clone());
        Ok(TransportReceipt::new(message, envelope, self))
    }
}

/// Vetoes every message.
pub struct Veto;

#[async_trait]
impl MailListener for Veto {
    async fn sending(&self, _event: &MessageSending<'_>) -> bool {
        false
    }
}

/// A manager whose default mailer `main` sends through `recorder`.
pub fn manager_with(
    config: MailConfig,
    services: MailServices,
    recorders: &[Arc<Recorder>],
) -> MailManager {
    let manager = MailManager::new(config, services);
    for recorder in recorders {
        let recorder = recorder.clone();
        manager.extend(recorder.to_string(), move |_| Ok(recorder.clone() as Arc<dyn Transport>));
    }
    manager
}

pub fn single(recorder: &Arc<Recorder>) -> MailConfig {
    MailConfig::new("main")
        .with_from("shop@example.com", Some("Shop"))
        .with_mailer("main", MailerConfig::transport(recorder.to_string()))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Welcome {
    pub name: String,
}

impl MailDefinition for Welcome {
    const NAME: &'static str = "tests::welcome";

    fn envelope(&self) -> Option<Envelope> {
        Some(Envelope::new().subject(format!("Welcome, {}", self.name)))
    }

    fn content(&self) -> Option<Content> {
        Some(Content::new().view("welcome.html").text("welcome.txt"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderShipped {
    pub order_id: u32,
}

impl MailDefinition for OrderShipped {
    const NAME: &'static str = "tests::order_shipped";

    fn envelope(&self) -> Option<Envelope> {
        Some(Envelope::new().tag("orders").metadata("order_id", i64::from(self.order_id)))
    }

    fn content(&self) -> Option<Content> {
        Some(Content::new().markdown("order.md").with("carrier", "UPS"))
    }
}
