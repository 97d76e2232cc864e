use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::warn;

use super::period::BillingPeriod;

/// key: billing-documents -> opaque storage for uploaded invoice files
#[async_trait]
pub trait DocumentStorage: Send + Sync {
    /// Stores `bytes` and returns a reference that can later be passed to `remove`.
    async fn put(&self, period: BillingPeriod, filename: &str, bytes: &[u8]) -> io::Result<String>;
    async fn remove(&self, document_ref: &str) -> io::Result<()>;
}

/// Default filename for an invoice document when the caller supplies none.
pub fn default_filename(period: BillingPeriod) -> String {
    format!("invoice-{period}.pdf")
}

/// Reduces a caller-supplied name to its final path component.
pub fn sanitize_filename(raw: Option<&str>, period: BillingPeriod) -> String {
    raw.map(str::trim)
        .and_then(|name| Path::new(name).file_name())
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_string)
        .unwrap_or_else(|| default_filename(period))
}

/// Writes documents below `root/<period>/`.
#[derive(Debug, Clone)]
pub struct FsDocumentStorage {
    root: PathBuf,
}

impl FsDocumentStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DocumentStorage for FsDocumentStorage {
    async fn put(&self, period: BillingPeriod, filename: &str, bytes: &[u8]) -> io::Result<String> {
        let dir = self.root.join(period.to_string());
        fs::create_dir_all(&dir).await?;
        let path = dir.join(filename);
        let mut file = fs::File::create(&path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn remove(&self, document_ref: &str) -> io::Result<()> {
        match fs::remove_file(document_ref).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(document = %document_ref, "invoice document already absent");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Keeps documents in memory; used by tests.
#[derive(Debug, Default)]
pub struct MemoryDocumentStorage {
    documents: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryDocumentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, document_ref: &str) -> Option<Vec<u8>> {
        self.documents.lock().await.get(document_ref).cloned()
    }

    pub async fn len(&self) -> usize {
        self.documents.lock().await.len()
    }
}

#[async_trait]
impl DocumentStorage for MemoryDocumentStorage {
    async fn put(&self, period: BillingPeriod, filename: &str, bytes: &[u8]) -> io::Result<String> {
        let document_ref = format!("memory://{period}/{filename}");
        self.documents
            .lock()
            .await
            .insert(document_ref.clone(), bytes.to_vec());
        Ok(document_ref)
    }

    async fn remove(&self, document_ref: &str) -> io::Result<()> {
        self.documents.lock().await.remove(document_ref);
        Ok(())
    }
}
