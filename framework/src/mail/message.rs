//! The transport-level message a mailable is built into.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::Address;

/// A message ready to be handed to a transport.
///
/// Mailers and mailables populate it through the `set_*`/`add_*` mutators; transports only
/// read it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    from: Option<Address>,
    #[serde(default)]
    reply_to: Vec<Address>,
    return_path: Option<Address>,
    #[serde(default)]
    to: Vec<Address>,
    #[serde(default)]
    cc: Vec<Address>,
    #[serde(default)]
    bcc: Vec<Address>,
    subject: Option<String>,
    html: Option<String>,
    text: Option<String>,
    priority: Option<u8>,
    #[serde(default)]
    headers: Vec<(String, String)>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    attachments: Vec<MessageAttachment>,
}

/// A fully resolved attachment carried by a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttachment {
    pub filename: String,
    pub content_type: String,
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
    /// Inline parts are referenced from the HTML body as `cid:<filename>`.
    #[serde(default)]
    pub inline: bool,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_from(&mut self, address: Address) -> &mut Self {
        self.from = Some(address);
        self
    }

    pub fn set_return_path(&mut self, address: Address) -> &mut Self {
        self.return_path = Some(address);
        self
    }

    pub fn add_reply_to(&mut self, address: Address) -> &mut Self {
        self.reply_to.push(address);
        self
    }

    pub fn add_to(&mut self, address: Address) -> &mut Self {
        self.to.push(address);
        self
    }

    pub fn add_cc(&mut self, address: Address) -> &mut Self {
        self.cc.push(address);
        self
    }

    pub fn add_bcc(&mut self, address: Address) -> &mut Self {
        self.bcc.push(address);
        self
    }

    pub fn clear_to(&mut self) -> &mut Self {
        self.to.clear();
        self
    }

    pub fn clear_cc(&mut self) -> &mut Self {
        self.cc.clear();
        self
    }

    pub fn clear_bcc(&mut self) -> &mut Self {
        self.bcc.clear();
        self
    }

    pub fn set_subject(&mut self, subject: impl Into<String>) -> &mut Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn set_html(&mut self, html: impl Into<String>) -> &mut Self {
        self.html = Some(html.into());
        self
    }

    pub fn set_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(text.into());
        self
    }

    /// Priority from 1 (highest) to 5 (lowest); out of range values are clamped.
    pub fn set_priority(&mut self, priority: u8) -> &mut Self {
        self.priority = Some(priority.clamp(1, 5));
        self
    }

    pub fn add_text_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add a header whose value is a message id, wrapping it in angle brackets.
    pub fn add_id_header(&mut self, name: impl Into<String>, id: &str) -> &mut Self {
        self.add_text_header(name, bracket_id(id))
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) -> &mut Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn attach(&mut self, attachment: MessageAttachment) -> &mut Self {
        self.attachments.push(attachment);
        self
    }

    /// Attach `data` inline and return the `cid:` reference to use in the HTML body.
    pub fn embed_data(
        &mut self,
        data: impl Into<Vec<u8>>,
        name: impl Into<String>,
        content_type: impl Into<String>,
    ) -> String {
        let filename = name.into();
        let cid = format!("cid:{filename}");
        self.attach(MessageAttachment {
            filename,
            content_type: content_type.into(),
            body: data.into(),
            inline: true,
        });
        cid
    }

    pub fn from(&self) -> Option<&Address> {
        self.from.as_ref()
    }

    pub fn return_path(&self) -> Option<&Address> {
        self.return_path.as_ref()
    }

    pub fn reply_to(&self) -> &[Address] {
        &self.reply_to
    }

    pub fn to(&self) -> &[Address] {
        &self.to
    }

    pub fn cc(&self) -> &[Address] {
        &self.cc
    }

    pub fn bcc(&self) -> &[Address] {
        &self.bcc
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn html(&self) -> Option<&str> {
        self.html.as_deref()
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn priority(&self) -> Option<u8> {
        self.priority
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First value of the header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn attachments(&self) -> &[MessageAttachment] {
        &self.attachments
    }

    /// What templates see as `message`.
    pub(crate) fn summary(&self) -> serde_json::Value {
        let emails = |list: &[Address]| list.iter().map(Address::to_string).collect::<Vec<_>>();
        json!({
            "from": self.from.as_ref().map(Address::to_string),
            "to": emails(&self.to),
            "cc": emails(&self.cc),
            "subject": self.subject,
        })
    }
}

pub(crate) fn bracket_id(id: &str) -> String {
    format!("<{}>", id.trim().trim_start_matches('<').trim_end_matches('>'))
}

/// A customization applied to the built [`Message`] before it is sent.
#[derive(Clone)]
pub struct MessageCallback(Arc<dyn Fn(&mut Message) + Send + Sync>);

impl MessageCallback {
    pub fn new(callback: impl Fn(&mut Message) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    pub fn apply(&self, message: &mut Message) {
        (self.0)(message)
    }
}

impl fmt::Debug for MessageCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MessageCallback(..)")
    }
}

pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
