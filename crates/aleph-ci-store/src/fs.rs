//! Filesystem artifact store.
//!
//! Writes, reads and pruning of one name are serialised through a per-name
//! lock, so a read always pairs a payload with the metadata written for it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::StorageError;
use crate::locks::KeyedLocks;
use crate::storage_traits::{
    require_file, validate_name, ArtifactStore, ContentDigest, PublishedRef, StorageResult,
    StoredArtifact,
};

const PAYLOAD_FILE: &str = "payload";
const META_FILE: &str = "meta.json";
pub(crate) const PARTIAL_PREFIX: &str = ".partial-";

/// Filesystem-backed artifact store.
///
/// Layout: `<root>/artifacts/<name>/{payload,meta.json}`
///
/// Both files are written to a temp file in the entry directory and renamed
/// into place, so a reader never observes a half-copied payload.
pub struct FsArtifactStore {
    artifacts_dir: PathBuf,
    locks: KeyedLocks,
}

impl FsArtifactStore {
    /// Create a new `FsArtifactStore` rooted at `root`. Creates `root/artifacts/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let artifacts_dir = root.as_ref().join("artifacts");
        fs::create_dir_all(&artifacts_dir)?;
        Ok(Self {
            artifacts_dir,
            locks: KeyedLocks::new(),
        })
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    fn entry_dir(&self, name: &str) -> PathBuf {
        self.artifacts_dir.join(name)
    }
}

fn write_entry(
    entry_dir: &Path,
    name: &str,
    source: &Path,
    retention_days: u32,
    now: DateTime<Utc>,
) -> StorageResult<PublishedRef> {
    require_file(source)?;
    fs::create_dir_all(entry_dir)?;

    let mut payload = tempfile::Builder::new()
        .prefix(PARTIAL_PREFIX)
        .tempfile_in(entry_dir)?;
    let mut src = fs::File::open(source)?;
    io::copy(&mut src, payload.as_file_mut())?;
    payload.as_file().sync_all()?;
    let (digest, size_bytes) = ContentDigest::from_file(payload.path())?;
    payload.persist(entry_dir.join(PAYLOAD_FILE))?;

    let reference = PublishedRef::new(name, digest, size_bytes, retention_days, now);
    let mut meta = tempfile::Builder::new()
        .prefix(PARTIAL_PREFIX)
        .tempfile_in(entry_dir)?;
    serde_json::to_writer_pretty(meta.as_file_mut(), &reference)?;
    meta.persist(entry_dir.join(META_FILE))?;

    Ok(reference)
}

async fn read_meta(entry_dir: &Path) -> StorageResult<Option<PublishedRef>> {
    match tokio::fs::read(entry_dir.join(META_FILE)).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::Io(e)),
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn write(
        &self,
        name: &str,
        source: &Path,
        retention_days: u32,
    ) -> StorageResult<PublishedRef> {
        validate_name(name)?;
        require_file(source)?;
        let _guard = self.locks.lock(name).await;

        let entry_dir = self.entry_dir(name);
        let owned_name = name.to_string();
        let source = source.to_path_buf();
        let now = Utc::now();
        let reference = tokio::task::spawn_blocking(move || {
            write_entry(&entry_dir, &owned_name, &source, retention_days, now)
        })
        .await
        .map_err(|e| StorageError::Io(io::Error::other(e)))??;

        debug!(name = %name, digest = %reference.digest.short(), "artifact written");
        Ok(reference)
    }

    async fn read(&self, name: &str) -> StorageResult<StoredArtifact> {
        validate_name(name)?;
        let _guard = self.locks.lock(name).await;
        let entry_dir = self.entry_dir(name);
        let reference = read_meta(&entry_dir)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                name: name.to_string(),
            })?;
        let data = tokio::fs::read(entry_dir.join(PAYLOAD_FILE)).await?;
        Ok(StoredArtifact { reference, data })
    }

    async fn list(&self) -> StorageResult<Vec<PublishedRef>> {
        let mut refs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.artifacts_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            // First publication still in flight: no metadata yet.
            if let Some(reference) = read_meta(&entry.path()).await? {
                refs.push(reference);
            }
        }
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(refs)
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> StorageResult<Vec<String>> {
        let mut pruned = Vec::new();
        for reference in self.list().await? {
            if !reference.is_expired(now) {
                continue;
            }
            let _guard = self.locks.lock(&reference.name).await;
            // Re-check under the lock; a concurrent publish may have renewed it.
            match read_meta(&self.entry_dir(&reference.name)).await? {
                Some(current) if current.is_expired(now) => {
                    tokio::fs::remove_dir_all(self.entry_dir(&reference.name)).await?;
                    pruned.push(reference.name);
                }
                _ => {}
            }
        }
        if !pruned.is_empty() {
            info!(count = pruned.len(), "Pruned expired artifacts");
        }
        Ok(pruned)
    }
}
