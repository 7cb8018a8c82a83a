//! Disk access for storage-backed attachments.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use super::MailError;

/// A named disk that attachments can be read from.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>, MailError>;

    async fn mime_type(&self, path: &str) -> Result<String, MailError>;
}

/// Registry of disks keyed by name.
#[derive(Clone)]
pub struct Filesystems {
    default: String,
    disks: HashMap<String, Arc<dyn Storage>>,
}

impl Filesystems {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            disks: HashMap::new(),
        }
    }

    /// Register a disk under `name`.
    pub fn disk_named(mut self, name: impl Into<String>, disk: impl Storage + 'static) -> Self {
        self.disks.insert(name.into(), Arc::new(disk));
        self
    }

    pub fn default_disk(&self) -> &str {
        &self.default
    }

    /// Look up a disk, falling back to the default disk when `name` is `None`.
    pub fn disk(&self, name: Option<&str>) -> Result<Arc<dyn Storage>, MailError> {
        let name = name.unwrap_or(&self.default);
        self.disks
            .get(name)
            .cloned()
            .ok_or_else(|| MailError::DiskNotConfigured(name.to_string()))
    }
}

impl Default for Filesystems {
    fn default() -> Self {
        Self::new("local")
    }
}

/// Disk rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalDisk {
    root: PathBuf,
}

impl LocalDisk {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Storage for LocalDisk {
    async fn read(&self, path: &str) -> Result<Vec<u8>, MailError> {
        tokio::fs::read(self.root.join(path))
            .await
            .map_err(|e| MailError::Storage(format!("{path}: {e}")))
    }

    async fn mime_type(&self, path: &str) -> Result<String, MailError> {
        Ok(mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string())
    }
}

/// In-memory disk for tests. Counts reads so callers can assert laziness.
#[derive(Default)]
pub struct MemoryDisk {
    files: RwLock<HashMap<String, (Vec<u8>, Option<String>)>>,
    reads: Arc<AtomicUsize>,
}

impl MemoryDisk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path.into(), contents.into(), None);
        self
    }

    pub fn put_with_mime(
        self,
        path: impl Into<String>,
        contents: impl Into<Vec<u8>>,
        mime: impl Into<String>,
    ) -> Self {
        self.insert(path.into(), contents.into(), Some(mime.into()));
        self
    }

    /// Shared counter of `read` calls.
    pub fn reads(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }

    fn insert(&self, path: String, contents: Vec<u8>, mime: Option<String>) {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path, (contents, mime));
    }

    fn missing(path: &str) -> MailError {
        MailError::Storage(format!("{path}: file not found"))
    }
}

#[async_trait]
impl Storage for MemoryDisk {
    async fn read(&self, path: &str) -> Result<Vec<u8>, MailError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        files
            .get(path)
            .map(|(contents, _)| contents.clone())
            .ok_or_else(|| Self::missing(path))
    }

    async fn mime_type(&self, path: &str) -> Result<String, MailError> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        let (_, mime) = files.get(path).ok_or_else(|| Self::missing(path))?;
        Ok(mime.clone().unwrap_or_else(|| {
            mime_guess::from_path(path)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        }))
    }
}
