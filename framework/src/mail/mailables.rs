//! Declarative pieces of a mail definition: [`Envelope`], [`Content`] and [`Headers`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::address::{Address, IntoAddresses, RecipientList};
use super::message::{bracket_id, Message, MessageCallback};
use super::render::ViewData;
use super::MailError;

/// Metadata values are strings or integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Int(i64),
    Str(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Str(value) => f.write_str(value),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for MetadataValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<u32> for MetadataValue {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

/// Sender, recipients, subject, tags and metadata of a mail definition.
///
/// Recipients are added to the mailable's own; the subject replaces it.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub from: Option<Address>,
    pub to: RecipientList,
    pub cc: RecipientList,
    pub bcc: RecipientList,
    pub reply_to: RecipientList,
    pub subject: Option<String>,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, MetadataValue>,
    pub using: Vec<MessageCallback>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from(mut self, address: impl IntoAddresses) -> Self {
        if let Some(address) = RecipientList::from_addresses(address).first() {
            self.from = Some(address.clone());
        }
        self
    }

    pub fn to(mut self, addresses: impl IntoAddresses) -> Self {
        self.to.extend(addresses);
        self
    }

    pub fn cc(mut self, addresses: impl IntoAddresses) -> Self {
        self.cc.extend(addresses);
        self
    }

    pub fn bcc(mut self, addresses: impl IntoAddresses) -> Self {
        self.bcc.extend(addresses);
        self
    }

    pub fn reply_to(mut self, addresses: impl IntoAddresses) -> Self {
        self.reply_to.extend(addresses);
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Customize the built message.
    pub fn using(mut self, callback: impl Fn(&mut Message) + Send + Sync + 'static) -> Self {
        self.using.push(MessageCallback::new(callback));
        self
    }

    pub fn is_from(&self, email: &str, name: Option<&str>) -> bool {
        self.from
            .as_ref()
            .is_some_and(|from| from.matches(email, name))
    }

    pub fn has_to(&self, email: &str, name: Option<&str>) -> bool {
        self.to.contains(email, name)
    }

    pub fn has_cc(&self, email: &str, name: Option<&str>) -> bool {
        self.cc.contains(email, name)
    }

    pub fn has_bcc(&self, email: &str, name: Option<&str>) -> bool {
        self.bcc.contains(email, name)
    }

    pub fn has_reply_to(&self, email: &str, name: Option<&str>) -> bool {
        self.reply_to.contains(email, name)
    }

    pub fn has_subject(&self, subject: &str) -> bool {
        self.subject.as_deref() == Some(subject)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn has_metadata(&self, key: &str, value: impl Into<MetadataValue>) -> bool {
        self.metadata.get(key) == Some(&value.into())
    }
}

/// Which views render the body, and extra data for them.
///
/// `view` and `html` name the same HTML template. A markdown template renders both the
/// HTML and the plain text body, so it cannot be combined with `view`/`html`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    pub view: Option<String>,
    pub html: Option<String>,
    pub text: Option<String>,
    pub markdown: Option<String>,
    pub html_string: Option<String>,
    #[serde(default)]
    pub with: ViewData,
}

impl Content {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(mut self, view: impl Into<String>) -> Self {
        self.view = Some(view.into());
        self
    }

    pub fn html(mut self, view: impl Into<String>) -> Self {
        self.html = Some(view.into());
        self
    }

    pub fn text(mut self, view: impl Into<String>) -> Self {
        self.text = Some(view.into());
        self
    }

    pub fn markdown(mut self, view: impl Into<String>) -> Self {
        self.markdown = Some(view.into());
        self
    }

    /// Use an already rendered HTML body.
    pub fn html_string(mut self, html: impl Into<String>) -> Self {
        self.html_string = Some(html.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with.insert(key.into(), value.into());
        self
    }

    /// The HTML template, whichever of `view`/`html` names it.
    pub fn template(&self) -> Option<&str> {
        self.view.as_deref().or(self.html.as_deref())
    }

    pub fn validate(&self) -> Result<(), MailError> {
        if let (Some(view), Some(html)) = (&self.view, &self.html) {
            if view != html {
                return Err(MailError::InvalidContent(format!(
                    "view [{view}] and html [{html}] name different templates"
                )));
            }
        }
        if let (Some(markdown), Some(view)) = (&self.markdown, self.template()) {
            return Err(MailError::InvalidContent(format!(
                "markdown [{markdown}] cannot be combined with view [{view}]"
            )));
        }
        Ok(())
    }
}

/// Message id, references and custom text headers of a mail definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Headers {
    pub message_id: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub text: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn reference(mut self, id: impl Into<String>) -> Self {
        self.references.push(id.into());
        self
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.text.push((name.into(), value.into()));
        self
    }

    /// `References` header value: every id in angle brackets, concatenated.
    pub fn references_string(&self) -> String {
        self.references.iter().map(|id| bracket_id(id)).collect()
    }

    pub(crate) fn apply(&self, message: &mut Message) {
        if let Some(id) = &self.message_id {
            message.add_id_header("Message-ID", id);
        }
        if !self.references.is_empty() {
            message.add_text_header("References", self.references_string());
        }
        for (name, value) in &self.text {
            message.add_text_header(name.clone(), value.clone());
        }
    }
}
