//! Lazily resolved attachments.
//!
//! An [`Attachment`] records *how* to obtain its bytes, never the bytes themselves (except
//! for [`Attachment::from_bytes`]). Resolution happens when the mailable is built, which is
//! what makes a mailable with file or disk attachments safe to serialize onto a queue.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::message::{Message, MessageAttachment};
use super::storage::Filesystems;
use super::MailError;

type Producer = dyn Fn() -> Result<Vec<u8>, MailError> + Send + Sync;

/// Produces the bytes of an in-memory attachment.
#[derive(Clone)]
pub enum DataProducer {
    /// Bytes known up front. Serialized as base64.
    Bytes(Arc<Vec<u8>>),
    /// Bytes computed on resolution. Cannot be serialized.
    Lazy(Arc<Producer>),
}

impl DataProducer {
    fn produce(&self) -> Result<Vec<u8>, MailError> {
        match self {
            Self::Bytes(bytes) => Ok(bytes.as_ref().clone()),
            Self::Lazy(producer) => producer(),
        }
    }

    fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Lazy(a), Self::Lazy(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for DataProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

impl Serialize for DataProducer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Bytes(bytes) => serializer.serialize_str(&STANDARD.encode(bytes.as_slice())),
            Self::Lazy(_) => Err(serde::ser::Error::custom(
                "attachment data produced by a closure cannot be serialized",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for DataProducer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(encoded).map_err(serde::de::Error::custom)?;
        Ok(Self::Bytes(Arc::new(bytes)))
    }
}

/// Where an attachment's bytes come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Source {
    Path { path: PathBuf },
    Data { data: DataProducer },
    Storage { disk: Option<String>, path: String },
}

impl Source {
    fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Path { path: a }, Self::Path { path: b }) => a == b,
            (Self::Data { data: a }, Self::Data { data: b }) => a.same(b),
            (
                Self::Storage { disk: da, path: pa },
                Self::Storage { disk: db, path: pb },
            ) => da == db && pa == pb,
            _ => false,
        }
    }
}

/// Per-attach overrides of an attachment's filename and mime type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachOptions {
    #[serde(default, rename = "as", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
}

impl AttachOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

/// Resolved payload of an attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Path(PathBuf),
    Data(Vec<u8>),
}

/// The `(payload, filename, mime)` triple an attachment resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub payload: Payload,
    pub name: Option<String>,
    pub mime: Option<String>,
}

impl Resolved {
    fn with_options(mut self, options: &AttachOptions) -> Self {
        if let Some(name) = &options.name {
            self.name = Some(name.clone());
        }
        if let Some(mime) = &options.mime {
            self.mime = Some(mime.clone());
        }
        self
    }
}

/// An attachment description, resolved at build time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    source: Source,
    #[serde(default, rename = "as", skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mime: Option<String>,
}

impl Attachment {
    fn with_source(source: Source) -> Self {
        Self {
            source,
            name: None,
            mime: None,
        }
    }

    /// Attach a file from the local filesystem.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::with_source(Source::Path { path: path.into() })
    }

    /// Attach bytes produced by `producer` when the message is built. Give it a filename
    /// with [`with_name`](Self::with_name), or attaching fails.
    pub fn from_data<F>(producer: F) -> Self
    where
        F: Fn() -> Result<Vec<u8>, MailError> + Send + Sync + 'static,
    {
        Self::with_source(Source::Data {
            data: DataProducer::Lazy(Arc::new(producer)),
        })
    }

    /// Attach bytes already in memory.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::with_source(Source::Data {
            data: DataProducer::Bytes(Arc::new(bytes.into())),
        })
    }

    /// Attach a file from the default storage disk.
    pub fn from_storage(path: impl Into<String>) -> Self {
        Self::with_source(Source::Storage {
            disk: None,
            path: path.into(),
        })
    }

    /// Attach a file from a named storage disk.
    pub fn from_storage_disk(disk: impl Into<String>, path: impl Into<String>) -> Self {
        Self::with_source(Source::Storage {
            disk: Some(disk.into()),
            path: path.into(),
        })
    }

    /// Set the filename the recipient sees.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    /// Resolve the attachment to its `(payload, filename, mime)` triple.
    ///
    /// Storage attachments look their disk up here, so a missing disk surfaces when the
    /// message is built. Their filename defaults to the basename of the path and their mime
    /// type to what the disk reports. Data producers run exactly once per call.
    pub async fn resolve(&self, storage: &Filesystems) -> Result<Resolved, MailError> {
        match &self.source {
            Source::Path { path } => Ok(Resolved {
                payload: Payload::Path(path.clone()),
                name: self.name.clone(),
                mime: self.mime.clone(),
            }),
            Source::Data { data } => Ok(Resolved {
                payload: Payload::Data(data.produce()?),
                name: self.name.clone(),
                mime: self.mime.clone(),
            }),
            Source::Storage { disk, path } => {
                let disk = storage.disk(disk.as_deref())?;
                let name = match &self.name {
                    Some(name) => name.clone(),
                    None => basename(Path::new(path)),
                };
                let mime = match &self.mime {
                    Some(mime) => mime.clone(),
                    None => disk.mime_type(path).await?,
                };
                Ok(Resolved {
                    payload: Payload::Data(disk.read(path).await?),
                    name: Some(name),
                    mime: Some(mime),
                })
            }
        }
    }

    /// True when `self`, with `options` applied, resolves to the same triple as `other`.
    /// Each side is resolved once.
    pub async fn is_equivalent(
        &self,
        other: &Attachment,
        options: &AttachOptions,
        storage: &Filesystems,
    ) -> Result<bool, MailError> {
        let ours = self.resolve(storage).await?.with_options(options);
        let theirs = other.resolve(storage).await?;
        Ok(ours == theirs)
    }

    /// Same source, and the same effective filename and mime once `options` are applied.
    pub(crate) fn same_as(
        &self,
        options: &AttachOptions,
        other: &Attachment,
        other_options: &AttachOptions,
    ) -> bool {
        let effective = |attachment: &Attachment, options: &AttachOptions| {
            (
                options.name.clone().or_else(|| attachment.name.clone()),
                options.mime.clone().or_else(|| attachment.mime.clone()),
            )
        };
        self.source.same(&other.source)
            && effective(self, options) == effective(other, other_options)
    }

    /// Resolve and add to `message`.
    pub async fn attach_to(
        &self,
        message: &mut Message,
        options: &AttachOptions,
        storage: &Filesystems,
    ) -> Result<(), MailError> {
        let resolved = self.resolve(storage).await?.with_options(options);

        let (body, filename) = match resolved.payload {
            Payload::Path(path) => {
                let filename = resolved.name.unwrap_or_else(|| basename(&path));
                (tokio::fs::read(&path).await?, filename)
            }
            Payload::Data(data) => (data, resolved.name.ok_or(MailError::MissingFilename)?),
        };

        let content_type = resolved.mime.unwrap_or_else(|| {
            mime_guess::from_path(&filename)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });

        message.attach(MessageAttachment {
            filename,
            content_type,
            body,
            inline: false,
        });
        Ok(())
    }
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
