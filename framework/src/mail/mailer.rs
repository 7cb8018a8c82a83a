//! The mailer: renders views, builds the transport message and sends it.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::{Captures, Regex};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::address::{Address, IntoAddresses};
use super::events::{MessageSending, MessageSent};
use super::mailable::{MailDefinition, Mailable};
use super::manager::MailServices;
use super::message::Message;
use super::pending::{PendingMail, Target};
use super::render::ViewData;
use super::sent::SentMessage;
use super::transport::{DeliveryEnvelope, Transport};
use super::MailError;

static CID_IMAGE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?is)<img[^>]*?src\s*=\s*["']cid:([^"']+)["'][^>]*>"#).ok());

static TAG: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").ok());

/// One body of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// A view rendered with the message data.
    Template(String),
    /// A markdown view. As the HTML body it renders as is; as the text body its output is
    /// stripped of tags.
    Markdown(String),
    /// Already rendered content.
    Rendered(String),
}

/// What a message's bodies are made of.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct View {
    pub html: Option<Body>,
    pub text: Option<Body>,
    /// Raw plain text, used as is.
    pub raw: Option<String>,
}

impl View {
    pub fn template(view: impl Into<String>) -> Self {
        Self {
            html: Some(Body::Template(view.into())),
            ..Self::default()
        }
    }

    pub fn html(html: impl Into<String>) -> Self {
        Self {
            html: Some(Body::Rendered(html.into())),
            ..Self::default()
        }
    }

    pub fn text(view: impl Into<String>) -> Self {
        Self {
            text: Some(Body::Template(view.into())),
            ..Self::default()
        }
    }

    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            raw: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_text(mut self, view: impl Into<String>) -> Self {
        self.text = Some(Body::Template(view.into()));
        self
    }
}

/// Both rendered bodies of a message, for inspecting what would be sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedMail {
    pub html: Option<String>,
    pub text: Option<String>,
}

impl RenderedMail {
    pub fn see_in_html(&self, needle: &str) -> bool {
        self.html.as_deref().is_some_and(|html| html.contains(needle))
    }

    pub fn see_in_text(&self, needle: &str) -> bool {
        self.text.as_deref().is_some_and(|text| text.contains(needle))
    }

    /// True when every needle appears in the HTML body, each after the previous one.
    pub fn see_in_order_in_html(&self, needles: &[&str]) -> bool {
        self.html.as_deref().is_some_and(|html| appear_in_order(html, needles))
    }

    pub fn see_in_order_in_text(&self, needles: &[&str]) -> bool {
        self.text.as_deref().is_some_and(|text| appear_in_order(text, needles))
    }
}

fn appear_in_order(haystack: &str, needles: &[&str]) -> bool {
    let mut rest = haystack;
    for needle in needles {
        match rest.find(needle) {
            Some(at) => rest = &rest[at + needle.len()..],
            None => return false,
        }
    }
    true
}

/// Populates a message before its content is added.
#[async_trait]
pub trait BuildMessage: Send + Sync {
    async fn build(&self, message: &mut Message) -> Result<(), MailError>;
}

#[async_trait]
impl<F> BuildMessage for F
where
    F: Fn(&mut Message) + Send + Sync,
{
    async fn build(&self, message: &mut Message) -> Result<(), MailError> {
        self(message);
        Ok(())
    }
}

/// A named mailer bound to one transport.
pub struct Mailer {
    name: String,
    transport: Arc<dyn Transport>,
    services: MailServices,
    from: Option<Address>,
    reply_to: Option<Address>,
    return_path: Option<Address>,
    to: Option<Address>,
    queue: Option<String>,
}

impl Mailer {
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        services: MailServices,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            services,
            from: None,
            reply_to: None,
            return_path: None,
            to: None,
            queue: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn services(&self) -> &MailServices {
        &self.services
    }

    /// Sender of every message, unless the message sets its own.
    pub fn always_from(&mut self, address: Address) {
        self.from = Some(address);
    }

    pub fn always_reply_to(&mut self, address: Address) {
        self.reply_to = Some(address);
    }

    pub fn always_return_path(&mut self, address: Address) {
        self.return_path = Some(address);
    }

    /// Deliver every message to `address` only, dropping its to, cc and bcc recipients.
    pub fn always_to(&mut self, address: Address) {
        self.to = Some(address);
    }

    /// Queue used by [`later`](Self::later) when none is given.
    pub fn set_queue(&mut self, queue: impl Into<String>) {
        self.queue = Some(queue.into());
    }

    pub fn to(&self, users: impl IntoAddresses) -> PendingMail<'_> {
        PendingMail::new(Target::Mailer(self)).to(users)
    }

    pub fn cc(&self, users: impl IntoAddresses) -> PendingMail<'_> {
        PendingMail::new(Target::Mailer(self)).cc(users)
    }

    pub fn bcc(&self, users: impl IntoAddresses) -> PendingMail<'_> {
        PendingMail::new(Target::Mailer(self)).bcc(users)
    }

    pub fn locale(&self, locale: impl Into<String>) -> PendingMail<'_> {
        PendingMail::new(Target::Mailer(self)).locale(locale)
    }

    /// Send a message with an already rendered HTML body.
    pub async fn html(
        &self,
        html: impl Into<String>,
        build: impl BuildMessage,
    ) -> Result<Option<SentMessage>, MailError> {
        self.send(&View::html(html), ViewData::new(), &build).await
    }

    /// Send a message with a raw plain text body.
    pub async fn raw(
        &self,
        text: impl Into<String>,
        build: impl BuildMessage,
    ) -> Result<Option<SentMessage>, MailError> {
        self.send(&View::raw(text), ViewData::new(), &build).await
    }

    /// Send a message whose only body is the plain text `view`.
    pub async fn plain(
        &self,
        view: impl Into<String>,
        data: ViewData,
        build: impl BuildMessage,
    ) -> Result<Option<SentMessage>, MailError> {
        self.send(&View::text(view), data, &build).await
    }

    pub async fn send_mailable<M: MailDefinition>(
        &self,
        mailable: &Mailable<M>,
    ) -> Result<Option<SentMessage>, MailError> {
        mailable.deliver(self).await
    }

    /// Render the HTML body of `view` (or its text body when there is no HTML one).
    ///
    /// `cid:` images that match an attachment of the message `build` produces are inlined
    /// as data URIs; unmatched references are left alone.
    pub async fn render(
        &self,
        view: &View,
        mut data: ViewData,
        build: &dyn BuildMessage,
    ) -> Result<String, MailError> {
        let rendered = self.render_bodies(view, data, build).await?;
        Ok(rendered.html.or(rendered.text).unwrap_or_default())
    }

    /// Render both bodies of `view` without sending. The HTML body gets the same `cid:`
    /// inlining as [`render`](Self::render); raw text stands in for a missing text view.
    pub async fn render_bodies(
        &self,
        view: &View,
        mut data: ViewData,
        build: &dyn BuildMessage,
    ) -> Result<RenderedMail, MailError> {
        let mut message = self.create_message();
        build.build(&mut message).await?;
        data.insert("message".into(), message.summary());

        let html = match &view.html {
            Some(html) => Some(inline_embedded_images(
                &self.render_body(html, &data, false)?,
                &message,
            )),
            None => None,
        };
        let text = match &view.text {
            Some(text) => Some(self.render_body(text, &data, true)?),
            None => view.raw.clone(),
        };

        Ok(RenderedMail { html, text })
    }

    /// Render `view` and send the message.
    ///
    /// Returns `Ok(None)` when a listener vetoed the send; the transport is not called.
    pub async fn send(
        &self,
        view: &View,
        mut data: ViewData,
        build: &dyn BuildMessage,
    ) -> Result<Option<SentMessage>, MailError> {
        data.insert("mailer".into(), Value::String(self.name.clone()));

        let mut message = self.create_message();
        build.build(&mut message).await?;
        data.insert("message".into(), message.summary());

        self.add_content(&mut message, view, &data)?;

        if let Some(to) = &self.to {
            message.clear_to().clear_cc().clear_bcc().add_to(to.clone());
        }

        if !self.should_send(&message, &data).await {
            info!(mailer = %self.name, "message vetoed by listener");
            return Ok(None);
        }

        let envelope = DeliveryEnvelope::from_message(&message)?;
        debug!(
            mailer = %self.name,
            transport = %self.transport,
            recipients = envelope.recipients().len(),
            "sending message"
        );

        let receipt = self.transport.send(&message, &envelope).await.map_err(|e| {
            warn!(mailer = %self.name, transport = %self.transport, error = %e, "transport failed");
            e
        })?;
        let sent = SentMessage::new(receipt);

        if let Some(events) = &self.services.events {
            events
                .dispatch_sent(&MessageSent {
                    sent: &sent,
                    data: &data,
                })
                .await;
        }

        info!(mailer = %self.name, message_id = %sent.message_id(), "message sent");
        Ok(Some(sent))
    }

    /// Push `mailable` onto a queue, to be sent through this mailer.
    pub async fn queue<M: MailDefinition>(
        &self,
        mailable: &Mailable<M>,
        queue: Option<&str>,
    ) -> Result<Uuid, MailError> {
        mailable
            .clone()
            .mailer(self.name.clone())
            .queue(&self.services.queues, queue)
            .await
    }

    pub async fn on_queue<M: MailDefinition>(
        &self,
        queue: &str,
        mailable: &Mailable<M>,
    ) -> Result<Uuid, MailError> {
        self.queue(mailable, Some(queue)).await
    }

    /// Push `mailable` onto a queue, to be sent once `delay` has passed. Without an explicit
    /// queue the mailer's own queue is used.
    pub async fn later<M: MailDefinition>(
        &self,
        delay: Duration,
        mailable: &Mailable<M>,
        queue: Option<&str>,
    ) -> Result<Uuid, MailError> {
        mailable
            .clone()
            .mailer(self.name.clone())
            .later(&self.services.queues, delay, queue.or(self.queue.as_deref()))
            .await
    }

    pub async fn later_on<M: MailDefinition>(
        &self,
        queue: &str,
        delay: Duration,
        mailable: &Mailable<M>,
    ) -> Result<Uuid, MailError> {
        self.later(delay, mailable, Some(queue)).await
    }

    pub(crate) fn create_message(&self) -> Message {
        let mut message = Message::new();
        if let Some(from) = &self.from {
            message.set_from(from.clone());
        }
        if let Some(reply_to) = &self.reply_to {
            message.add_reply_to(reply_to.clone());
        }
        if let Some(return_path) = &self.return_path {
            message.set_return_path(return_path.clone());
        }
        message
    }

    fn add_content(
        &self,
        message: &mut Message,
        view: &View,
        data: &ViewData,
    ) -> Result<(), MailError> {
        if let Some(html) = &view.html {
            message.set_html(non_empty(self.render_body(html, data, false)?));
        }
        if let Some(text) = &view.text {
            message.set_text(non_empty(self.render_body(text, data, true)?));
        }
        if let Some(raw) = &view.raw {
            message.set_text(raw.clone());
        }
        Ok(())
    }

    fn render_body(&self, body: &Body, data: &ViewData, plain: bool) -> Result<String, MailError> {
        match body {
            Body::Rendered(content) => Ok(content.clone()),
            Body::Template(view) => self.services.renderer.render(view, data),
            Body::Markdown(view) => {
                let rendered = self.services.renderer.render(view, data)?;
                Ok(if plain { strip_tags(&rendered) } else { rendered })
            }
        }
    }

    async fn should_send(&self, message: &Message, data: &ViewData) -> bool {
        match &self.services.events {
            Some(events) => events.dispatch_sending(&MessageSending { message, data }).await,
            None => true,
        }
    }
}

fn non_empty(rendered: String) -> String {
    if rendered.is_empty() {
        " ".to_string()
    } else {
        rendered
    }
}

fn strip_tags(html: &str) -> String {
    match TAG.as_ref() {
        Some(tag) => tag.replace_all(html, "").trim().to_string(),
        None => html.trim().to_string(),
    }
}

fn inline_embedded_images(html: &str, message: &Message) -> String {
    let Some(cid_image) = CID_IMAGE.as_ref() else {
        return html.to_string();
    };
    cid_image
        .replace_all(html, |caps: &Captures<'_>| {
            let tag = &caps[0];
            let cid = &caps[1];
            match message.attachments().iter().find(|a| a.filename == cid) {
                Some(attachment) => tag.replace(
                    &format!("cid:{cid}"),
                    &format!(
                        "data:{};base64,{}",
                        attachment.content_type,
                        STANDARD.encode(&attachment.body)
                    ),
                ),
                None => tag.to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cid_images_become_data_uris() {
        let mut message = Message::new();
        message.embed_data(b"png".to_vec(), "logo.png", "image/png");

        let html = r#"<p><img alt="logo" src="cid:logo.png"> <img src="cid:missing.png"></p>"#;
        let inlined = inline_embedded_images(html, &message);

        assert_eq!(
            inlined,
            r#"<p><img alt="logo" src="data:image/png;base64,cG5n"> <img src="cid:missing.png"></p>"#
        );
    }

    #[test]
    fn needles_are_found_in_order() {
        let rendered = RenderedMail {
            html: Some("<h1>Order 7</h1><p>Shipped</p>".into()),
            text: None,
        };

        assert!(rendered.see_in_html("Order 7"));
        assert!(rendered.see_in_order_in_html(&["Order", "Shipped"]));
        assert!(!rendered.see_in_order_in_html(&["Shipped", "Order"]));
        assert!(!rendered.see_in_text("Order"));
        assert!(!rendered.see_in_order_in_text(&[]));
    }

    #[test]
    fn markdown_text_is_stripped() {
        assert_eq!(strip_tags("<h1>Hi</h1>\n<p>there</p>\n"), "Hi\nthere");
    }
}
