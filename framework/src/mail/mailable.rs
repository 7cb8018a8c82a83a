//! Mailables: reusable descriptions of one email.
//!
//! A mail type implements [`MailDefinition`]; wrapping it in [`Mailable`] adds the fluent
//! state (recipients, views, attachments, ...) and the send/queue/render operations.
//! Every send, render or queue call hydrates a clone, so one mailable can be sent any
//! number of times.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::address::{IntoAddresses, RecipientList};
use super::attachment::{AttachOptions, Attachment};
use super::job::QueuedMailableJob;
use super::locale;
use super::mailables::{Content, Envelope, Headers, MetadataValue};
use super::mailer::{Body, BuildMessage, Mailer, RenderedMail, View};
use super::manager::MailManager;
use super::message::{Message, MessageCallback};
use super::render::ViewData;
use super::sent::SentMessage;
use super::storage::Filesystems;
use super::MailError;
use crate::jobs::QueueManager;

/// A kind of email.
///
/// The definition's own fields are its data: they are serialized when the mailable is
/// queued and, through [`view_data`](Self::view_data), visible to its templates by name.
/// Every other hook is optional.
pub trait MailDefinition: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Job type used when a mailable of this kind is queued. Must be unique.
    const NAME: &'static str;

    fn envelope(&self) -> Option<Envelope> {
        None
    }

    fn content(&self) -> Option<Content> {
        None
    }

    fn headers(&self) -> Option<Headers> {
        None
    }

    fn attachments(&self) -> Vec<Attachment> {
        Vec::new()
    }

    /// Data exposed to templates. Defaults to the definition's serialized fields.
    fn view_data(&self) -> ViewData {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => ViewData::new(),
        }
    }

    /// Queue to push onto when none is given explicitly.
    fn queue(&self) -> Option<String> {
        None
    }

    /// Subject used when neither the mailable nor its envelope sets one.
    fn default_subject(&self) -> String {
        title_case(short_type_name(std::any::type_name::<Self>()))
    }
}

/// A mailable with no definition of its own; everything is set fluently.
impl MailDefinition for () {
    const NAME: &'static str = "mailable";

    fn view_data(&self) -> ViewData {
        ViewData::new()
    }

    fn default_subject(&self) -> String {
        "Mailable".to_string()
    }
}

/// An attachment with the options it was attached with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentEntry {
    pub attachment: Attachment,
    #[serde(default)]
    pub options: AttachOptions,
}

/// The imperative state of a mailable.
///
/// Message callbacks are not serialized, so a mailable carrying any cannot be queued.
/// Callbacks that must survive queuing belong in the definition's [`Envelope::using`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MailState {
    pub locale: String,
    pub from: RecipientList,
    pub to: RecipientList,
    pub cc: RecipientList,
    pub bcc: RecipientList,
    pub reply_to: RecipientList,
    pub subject: Option<String>,
    pub priority: Option<u8>,
    pub markdown: Option<String>,
    pub view: Option<String>,
    pub text_view: Option<String>,
    pub html: Option<String>,
    pub view_data: ViewData,
    pub attachments: Vec<AttachmentEntry>,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, MetadataValue>,
    pub mailer: Option<String>,
    pub queue: Option<String>,
    #[serde(skip)]
    pub callbacks: Vec<MessageCallback>,
}

impl MailState {
    pub fn new() -> Self {
        Self {
            locale: locale::fallback(),
            ..Self::default()
        }
    }

    fn push_attachment(&mut self, attachment: Attachment, options: AttachOptions) {
        let duplicate = self
            .attachments
            .iter()
            .any(|entry| entry.attachment.same_as(&entry.options, &attachment, &options));
        if !duplicate {
            self.attachments.push(AttachmentEntry { attachment, options });
        }
    }

    fn push_tag(&mut self, tag: String) {
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    fn apply_envelope(&mut self, envelope: Envelope) {
        if let Some(from) = envelope.from {
            self.from.extend(from);
        }
        self.to.extend(envelope.to);
        self.cc.extend(envelope.cc);
        self.bcc.extend(envelope.bcc);
        self.reply_to.extend(envelope.reply_to);
        if let Some(subject) = envelope.subject {
            self.subject = Some(subject);
        }
        for tag in envelope.tags {
            self.push_tag(tag);
        }
        self.metadata.extend(envelope.metadata);
        self.callbacks.extend(envelope.using);
    }

    fn apply_content(&mut self, content: Content) -> Result<(), MailError> {
        content.validate()?;
        if let Some(view) = content.view.or(content.html) {
            self.view = Some(view);
        }
        if let Some(text) = content.text {
            self.text_view = Some(text);
        }
        if let Some(markdown) = content.markdown {
            self.markdown = Some(markdown);
        }
        if let Some(html) = content.html_string {
            self.html = Some(html);
        }
        self.view_data.extend(content.with);
        Ok(())
    }
}

type ViewDataCallback = Arc<dyn Fn(&MailState) -> ViewData + Send + Sync>;

static VIEW_DATA_CALLBACK: RwLock<Option<ViewDataCallback>> = RwLock::new(None);

/// One email: a [`MailDefinition`] plus fluent state.
#[derive(Clone, Serialize, Deserialize)]
pub struct Mailable<M> {
    state: MailState,
    definition: M,
}

impl<M: MailDefinition + Default> Default for Mailable<M> {
    fn default() -> Self {
        Self::new(M::default())
    }
}

impl<M: MailDefinition> fmt::Debug for Mailable<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailable")
            .field("definition", &M::NAME)
            .field("state", &self.state)
            .finish()
    }
}

impl Mailable<()> {
    /// Register data every mailable's templates receive, computed from its state.
    pub fn build_view_data_using(
        callback: impl Fn(&MailState) -> ViewData + Send + Sync + 'static,
    ) {
        *VIEW_DATA_CALLBACK
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    pub fn reset_view_data_callback() {
        *VIEW_DATA_CALLBACK
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl<M: MailDefinition> Mailable<M> {
    pub fn new(definition: M) -> Self {
        Self {
            state: MailState::new(),
            definition,
        }
    }

    pub fn definition(&self) -> &M {
        &self.definition
    }

    pub fn state(&self) -> &MailState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut MailState {
        &mut self.state
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.state.locale = locale.into();
        self
    }

    /// Message priority, 1 (highest) to 5 (lowest).
    pub fn priority(mut self, level: u8) -> Self {
        self.state.priority = Some(level);
        self
    }

    pub fn from(mut self, address: impl IntoAddresses) -> Self {
        self.state.from.extend(address);
        self
    }

    pub fn to(mut self, address: impl IntoAddresses) -> Self {
        self.state.to.extend(address);
        self
    }

    pub fn cc(mut self, address: impl IntoAddresses) -> Self {
        self.state.cc.extend(address);
        self
    }

    pub fn bcc(mut self, address: impl IntoAddresses) -> Self {
        self.state.bcc.extend(address);
        self
    }

    pub fn reply_to(mut self, address: impl IntoAddresses) -> Self {
        self.state.reply_to.extend(address);
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.state.subject = Some(subject.into());
        self
    }

    /// HTML view, with data merged into the view data.
    pub fn view(mut self, view: impl Into<String>, data: impl Into<Option<ViewData>>) -> Self {
        self.state.view = Some(view.into());
        self.merge_data(data);
        self
    }

    /// Plain text view.
    pub fn text(mut self, view: impl Into<String>, data: impl Into<Option<ViewData>>) -> Self {
        self.state.text_view = Some(view.into());
        self.merge_data(data);
        self
    }

    /// Markdown view; renders both the HTML and the text body.
    pub fn markdown(mut self, view: impl Into<String>, data: impl Into<Option<ViewData>>) -> Self {
        self.state.markdown = Some(view.into());
        self.merge_data(data);
        self
    }

    /// Already rendered HTML body.
    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.state.html = Some(html.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.state.view_data.insert(key.into(), value.into());
        self
    }

    pub fn with_data(mut self, data: ViewData) -> Self {
        self.state.view_data.extend(data);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.state.push_tag(tag.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.state.metadata.insert(key.into(), value.into());
        self
    }

    /// Name of the mailer to send through; the manager's default otherwise.
    pub fn mailer(mut self, mailer: impl Into<String>) -> Self {
        self.state.mailer = Some(mailer.into());
        self
    }

    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.state.queue = Some(queue.into());
        self
    }

    /// Customize the built message. Runs after recipients, subject, tags and metadata are
    /// set, before attachments are added.
    pub fn with_message(mut self, callback: impl Fn(&mut Message) + Send + Sync + 'static) -> Self {
        self.state.callbacks.push(MessageCallback::new(callback));
        self
    }

    pub fn attach(self, attachment: Attachment) -> Self {
        self.attach_with(attachment, AttachOptions::default())
    }

    pub fn attach_with(mut self, attachment: Attachment, options: AttachOptions) -> Self {
        self.state.push_attachment(attachment, options);
        self
    }

    pub fn attach_many(self, attachments: impl IntoIterator<Item = Attachment>) -> Self {
        attachments
            .into_iter()
            .fold(self, |mailable, attachment| mailable.attach(attachment))
    }

    pub fn attach_path(self, path: impl Into<PathBuf>, options: AttachOptions) -> Self {
        self.attach_with(Attachment::from_path(path), options)
    }

    pub fn attach_data(
        self,
        data: impl Into<Vec<u8>>,
        name: impl Into<String>,
        options: AttachOptions,
    ) -> Self {
        self.attach_with(Attachment::from_bytes(data).with_name(name), options)
    }

    pub fn attach_from_storage(
        self,
        path: impl Into<String>,
        name: Option<&str>,
        options: AttachOptions,
    ) -> Self {
        let attachment = Attachment::from_storage(path);
        self.attach_with(with_optional_name(attachment, name), options)
    }

    pub fn attach_from_storage_disk(
        self,
        disk: impl Into<String>,
        path: impl Into<String>,
        name: Option<&str>,
        options: AttachOptions,
    ) -> Self {
        let attachment = Attachment::from_storage_disk(disk, path);
        self.attach_with(with_optional_name(attachment, name), options)
    }

    /// Send through the manager's mailer named by [`mailer`](Self::mailer), or its default.
    pub async fn send(&self, manager: &MailManager) -> Result<Option<SentMessage>, MailError> {
        let mailer = manager.mailer(self.state.mailer.as_deref())?;
        self.deliver(&mailer).await
    }

    /// Hydrate, render and send through `mailer`, in this mailable's locale.
    pub async fn deliver(&self, mailer: &Mailer) -> Result<Option<SentMessage>, MailError> {
        locale::scope(Some(self.state.locale.clone()), async {
            let hydrated = self.hydrate()?;
            let composer = MessageComposer {
                state: &hydrated.state,
                subject: hydrated.subject_line(),
                storage: &mailer.services().storage,
            };
            mailer
                .send(&hydrated.build_view(), hydrated.build_view_data(), &composer)
                .await
        })
        .await
    }

    /// Render the HTML body (the text body when there is no HTML one) without sending.
    pub async fn render(&self, mailer: &Mailer) -> Result<String, MailError> {
        let rendered = self.render_bodies(mailer).await?;
        Ok(rendered.html.or(rendered.text).unwrap_or_default())
    }

    /// Render the HTML and text bodies without sending.
    pub async fn render_bodies(&self, mailer: &Mailer) -> Result<RenderedMail, MailError> {
        locale::scope(Some(self.state.locale.clone()), async {
            let hydrated = self.hydrate()?;
            let composer = MessageComposer {
                state: &hydrated.state,
                subject: hydrated.subject_line(),
                storage: &mailer.services().storage,
            };
            mailer
                .render_bodies(&hydrated.build_view(), hydrated.build_view_data(), &composer)
                .await
        })
        .await
    }

    /// Push onto a queue. The queue is `queue`, else [`on_queue`](Self::on_queue), else the
    /// definition's [`queue`](MailDefinition::queue), else the first configured queue.
    /// Nothing is rendered or sent until a worker runs the job.
    ///
    /// Fails with [`MailError::NotQueueable`] when [`with_message`](Self::with_message)
    /// callbacks are set, since they cannot be serialized.
    pub async fn queue(
        &self,
        queues: &QueueManager,
        queue: Option<&str>,
    ) -> Result<Uuid, MailError> {
        self.push(queues, queue, None).await
    }

    /// Like [`queue`](Self::queue), but the job only becomes eligible after `delay`.
    pub async fn later(
        &self,
        queues: &QueueManager,
        delay: Duration,
        queue: Option<&str>,
    ) -> Result<Uuid, MailError> {
        self.push(queues, queue, Some(delay)).await
    }

    async fn push(
        &self,
        queues: &QueueManager,
        queue: Option<&str>,
        delay: Option<Duration>,
    ) -> Result<Uuid, MailError> {
        if !self.state.callbacks.is_empty() {
            return Err(MailError::NotQueueable(format!(
                "{} has {} message callback(s)",
                M::NAME,
                self.state.callbacks.len()
            )));
        }
        let queue = self.queue_name(queues, queue)?;
        let job = QueuedMailableJob::<M, MailManager>::new(self.clone());
        Ok(queues.push(Some(&queue), &job, delay).await?)
    }

    fn queue_name(
        &self,
        queues: &QueueManager,
        explicit: Option<&str>,
    ) -> Result<String, MailError> {
        explicit
            .map(str::to_string)
            .or_else(|| self.state.queue.clone())
            .or_else(|| self.definition.queue())
            .or_else(|| queues.default_name().map(str::to_string))
            .ok_or(MailError::QueueNotConfigured)
    }

    /// A clone with the definition's headers, envelope, content and attachments merged in,
    /// in that order.
    fn hydrate(&self) -> Result<Self, MailError> {
        let mut hydrated = self.clone();

        if let Some(headers) = self.definition.headers() {
            hydrated
                .state
                .callbacks
                .push(MessageCallback::new(move |message| headers.apply(message)));
        }
        if let Some(envelope) = self.definition.envelope() {
            hydrated.state.apply_envelope(envelope);
        }
        if let Some(content) = self.definition.content() {
            hydrated.state.apply_content(content)?;
        }
        for attachment in self.definition.attachments() {
            hydrated.state.push_attachment(attachment, AttachOptions::default());
        }

        Ok(hydrated)
    }

    /// Body selection: rendered HTML, then markdown, then view with text view, then text
    /// view alone, then view alone. A markdown body's text part is the text view when one
    /// is set, else the markdown output stripped of tags.
    pub fn build_view(&self) -> View {
        let state = &self.state;
        if let Some(html) = &state.html {
            return View {
                html: Some(Body::Rendered(html.clone())),
                text: state.text_view.clone().map(Body::Template),
                raw: None,
            };
        }
        if let Some(markdown) = &state.markdown {
            return View {
                html: Some(Body::Markdown(markdown.clone())),
                text: Some(match &state.text_view {
                    Some(text) => Body::Template(text.clone()),
                    None => Body::Markdown(markdown.clone()),
                }),
                raw: None,
            };
        }
        View {
            html: state.view.clone().map(Body::Template),
            text: state.text_view.clone().map(Body::Template),
            raw: None,
        }
    }

    /// Explicit view data, then the registered view-data callback, then the definition's
    /// own data. Later sources win on key clashes.
    pub fn build_view_data(&self) -> ViewData {
        let mut data = self.state.view_data.clone();

        let callback = VIEW_DATA_CALLBACK
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            data.extend(callback(&self.state));
        }

        data.extend(self.definition.view_data());
        data
    }

    fn subject_line(&self) -> String {
        self.state
            .subject
            .clone()
            .unwrap_or_else(|| self.definition.default_subject())
    }

    pub fn has_from(&self, email: &str, name: Option<&str>) -> bool {
        self.state.from.contains(email, name)
            || self.envelope_matches(|envelope| envelope.is_from(email, name))
    }

    pub fn has_to(&self, email: &str, name: Option<&str>) -> bool {
        self.state.to.contains(email, name)
            || self.envelope_matches(|envelope| envelope.has_to(email, name))
    }

    pub fn has_cc(&self, email: &str, name: Option<&str>) -> bool {
        self.state.cc.contains(email, name)
            || self.envelope_matches(|envelope| envelope.has_cc(email, name))
    }

    pub fn has_bcc(&self, email: &str, name: Option<&str>) -> bool {
        self.state.bcc.contains(email, name)
            || self.envelope_matches(|envelope| envelope.has_bcc(email, name))
    }

    pub fn has_reply_to(&self, email: &str, name: Option<&str>) -> bool {
        self.state.reply_to.contains(email, name)
            || self.envelope_matches(|envelope| envelope.has_reply_to(email, name))
    }

    pub fn has_subject(&self, subject: &str) -> bool {
        self.state.subject.as_deref() == Some(subject)
            || self.envelope_matches(|envelope| envelope.has_subject(subject))
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.state.tags.iter().any(|t| t == tag)
            || self.envelope_matches(|envelope| envelope.has_tag(tag))
    }

    pub fn has_metadata(&self, key: &str, value: impl Into<MetadataValue>) -> bool {
        let value = value.into();
        self.state.metadata.get(key) == Some(&value)
            || self.envelope_matches(|envelope| envelope.has_metadata(key, value.clone()))
    }

    /// True when an attached file, or one the definition attaches, is equivalent to
    /// `attachment` with `options` applied.
    pub async fn has_attachment(
        &self,
        attachment: &Attachment,
        options: &AttachOptions,
        storage: &Filesystems,
    ) -> Result<bool, MailError> {
        let wanted = attachment.clone();
        for entry in &self.state.attachments {
            let attached = entry.attachment.clone();
            let attached = match &entry.options.name {
                Some(name) => attached.with_name(name.clone()),
                None => attached,
            };
            let attached = match &entry.options.mime {
                Some(mime) => attached.with_mime(mime.clone()),
                None => attached,
            };
            if wanted.is_equivalent(&attached, options, storage).await? {
                return Ok(true);
            }
        }
        for attached in self.definition.attachments() {
            if wanted.is_equivalent(&attached, options, storage).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn envelope_matches(&self, check: impl FnOnce(&Envelope) -> bool) -> bool {
        self.definition.envelope().as_ref().is_some_and(check)
    }

    fn merge_data(&mut self, data: impl Into<Option<ViewData>>) {
        if let Some(data) = data.into() {
            self.state.view_data.extend(data);
        }
    }
}

fn with_optional_name(attachment: Attachment, name: Option<&str>) -> Attachment {
    match name {
        Some(name) => attachment.with_name(name),
        None => attachment,
    }
}

/// Writes a hydrated mailable onto a message: the first from address, recipients,
/// subject, priority, tags, metadata, callbacks, then attachments.
struct MessageComposer<'a> {
    state: &'a MailState,
    subject: String,
    storage: &'a Filesystems,
}

#[async_trait]
impl BuildMessage for MessageComposer<'_> {
    async fn build(&self, message: &mut Message) -> Result<(), MailError> {
        let state = self.state;

        if let Some(address) = state.from.first() {
            message.set_from(address.clone());
        }
        for address in &state.to {
            message.add_to(address.clone());
        }
        for address in &state.cc {
            message.add_cc(address.clone());
        }
        for address in &state.bcc {
            message.add_bcc(address.clone());
        }
        for address in &state.reply_to {
            message.add_reply_to(address.clone());
        }

        message.set_subject(self.subject.clone());
        if let Some(level) = state.priority {
            message.set_priority(level);
        }

        for tag in &state.tags {
            message.add_tag(tag.clone());
        }
        for (key, value) in &state.metadata {
            message.add_metadata(key.clone(), value.to_string());
        }

        for callback in &state.callbacks {
            callback.apply(message);
        }

        for entry in &state.attachments {
            entry
                .attachment
                .attach_to(message, &entry.options, self.storage)
                .await?;
        }
        Ok(())
    }
}

fn short_type_name(full: &str) -> &str {
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics.rsplit("::").next().unwrap_or(without_generics)
}

/// `OrderShipped` becomes `Order Shipped`.
fn title_case(name: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut previous: Option<char> = None;
    for c in name.chars() {
        if c == '_' {
            previous = None;
            continue;
        }
        let starts_word = match previous {
            None => true,
            Some(p) => c.is_uppercase() && !p.is_uppercase(),
        };
        match words.last_mut() {
            Some(word) if !starts_word => word.push(c),
            _ => words.push(c.to_uppercase().collect()),
        }
        previous = Some(c);
    }
    words.join(" ")
}
