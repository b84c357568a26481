//! Keyed storage backends for the pending transfer store

use crate::error::{ClientError, ClientResult};

use async_trait::async_trait;
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

/// String values stored under string keys
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    async fn read(&self, key: &str) -> ClientResult<Option<String>>;

    /// Replace the whole value stored under `key`
    async fn write(&self, key: &str, value: &str) -> ClientResult<()>;
}

/// One JSON file per key inside a directory.
///
/// Writes go to a temporary file that is renamed over the target, so a
/// reader sees either the old or the new value.
pub struct FileBackend {
    directory: PathBuf,
}

impl FileBackend {
    pub async fn new(directory: impl Into<PathBuf>) -> ClientResult<Self> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|e| ClientError::Store(format!("create {:?}: {}", directory, e)))?;
        Ok(Self { directory })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.directory.join(format!("{}.json", file))
    }
}

#[async_trait]
impl KeyValueBackend for FileBackend {
    async fn read(&self, key: &str) -> ClientResult<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ClientError::Store(format!("read {}: {}", key, e))),
        }
    }

    async fn write(&self, key: &str, value: &str) -> ClientResult<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");

        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| ClientError::Store(format!("write {}: {}", key, e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| ClientError::Store(format!("rename {}: {}", key, e)))?;

        debug!("Persisted {} ({} bytes)", key, value.len());
        Ok(())
    }
}

/// Process-local backend
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<String, String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn read(&self, key: &str) -> ClientResult<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    async fn write(&self, key: &str, value: &str) -> ClientResult<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Memory backend whose writes can be switched to fail
#[cfg(test)]
#[derive(Default)]
pub(crate) struct FlakyBackend {
    inner: MemoryBackend,
    failing: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl FlakyBackend {
    pub(crate) fn failing() -> Self {
        let backend = Self::default();
        backend.set_failing(true);
        backend
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
#[async_trait]
impl KeyValueBackend for FlakyBackend {
    async fn read(&self, key: &str) -> ClientResult<Option<String>> {
        self.inner.read(key).await
    }

    async fn write(&self, key: &str, value: &str) -> ClientResult<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ClientError::Store(format!("write {}: disk full", key)));
        }
        self.inner.write(key, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("store")).await.unwrap();

        assert_eq!(backend.read("bridge_transactions_EQ:a/b").await.unwrap(), None);
        backend.write("bridge_transactions_EQ:a/b", "[]").await.unwrap();
        backend.write("bridge_transactions_EQ:a/b", "[1]").await.unwrap();
        assert_eq!(
            backend.read("bridge_transactions_EQ:a/b").await.unwrap().as_deref(),
            Some("[1]")
        );
        // Key characters outside the file-safe set stay inside the directory
        assert!(dir.path().join("store/bridge_transactions_EQ_a_b.json").exists());
    }

    #[tokio::test]
    async fn test_memory_backend() {
        let backend = MemoryBackend::new();
        backend.write("k", "v").await.unwrap();
        assert_eq!(backend.read("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(backend.read("missing").await.unwrap(), None);
    }
}
