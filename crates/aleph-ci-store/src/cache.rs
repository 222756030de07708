//! Shared compilation cache.
//!
//! Entries are whole build outputs addressed by a [`CacheKey`]. Several runs
//! may share one cache: readers never lock, writers lock only the key they
//! write. An entry becomes visible through a single rename, so a write that is
//! cancelled or fails half way leaves nothing a reader could pick up.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::fs::PARTIAL_PREFIX;
use crate::locks::KeyedLocks;
use crate::storage_traits::{require_file, StorageResult};

/// Cache key: SHA-256 over an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update(b"\0");
        }
        CacheKey(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Filesystem compilation cache with git-style 2-char sharding.
///
/// Layout: `<root>/entries/<first 2 hex chars>/<remaining hex chars>`
pub struct CompilationCache {
    entries_dir: PathBuf,
    locks: KeyedLocks,
}

impl CompilationCache {
    /// Open (or create) a cache rooted at `root`, sweeping partial entries
    /// left behind by interrupted writers.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let entries_dir = root.as_ref().join("entries");
        fs::create_dir_all(&entries_dir)?;
        let swept = sweep_partials(&entries_dir)?;
        if swept > 0 {
            warn!(count = swept, "Removed partial cache entries");
        }
        Ok(Self {
            entries_dir,
            locks: KeyedLocks::new(),
        })
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        let hex = key.as_str();
        self.entries_dir.join(&hex[..2]).join(&hex[2..])
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entry_path(key).is_file()
    }

    /// Copy the entry for `key` to `dest`. Returns `false` on a miss.
    pub async fn restore(&self, key: &CacheKey, dest: &Path) -> StorageResult<bool> {
        let entry = self.entry_path(key);
        let dest = dest.to_path_buf();
        let hit = tokio::task::spawn_blocking(move || -> StorageResult<bool> {
            if !entry.is_file() {
                return Ok(false);
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            // Copy under a temp name first so `dest` is never half written.
            let parent = dest.parent().unwrap_or_else(|| Path::new("."));
            let tmp = tempfile::Builder::new()
                .prefix(PARTIAL_PREFIX)
                .tempfile_in(parent)?;
            fs::copy(&entry, tmp.path())?;
            tmp.persist(&dest)?;
            Ok(true)
        })
        .await
        .map_err(|e| StorageError::Io(io::Error::other(e)))??;
        debug!(key = %key.short(), hit, "cache lookup");
        Ok(hit)
    }

    /// Store `source` as the entry for `key`, replacing any previous one.
    pub async fn store(&self, key: &CacheKey, source: &Path) -> StorageResult<()> {
        require_file(source)?;
        let _guard = self.locks.lock(key.as_str()).await;

        let entry = self.entry_path(key);
        let source = source.to_path_buf();
        tokio::task::spawn_blocking(move || -> StorageResult<()> {
            let shard_dir = entry.parent().unwrap_or_else(|| Path::new("."));
            fs::create_dir_all(shard_dir)?;
            let tmp = tempfile::Builder::new()
                .prefix(PARTIAL_PREFIX)
                .tempfile_in(shard_dir)?;
            // fs::copy carries the permission bits, so executables stay executable.
            fs::copy(&source, tmp.path())?;
            tmp.persist(&entry)?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Io(io::Error::other(e)))??;
        debug!(key = %key.short(), "cache entry stored");
        Ok(())
    }
}

fn sweep_partials(entries_dir: &Path) -> io::Result<usize> {
    let mut swept = 0;
    for shard in fs::read_dir(entries_dir)? {
        let shard = shard?;
        if !shard.file_type()?.is_dir() {
            continue;
        }
        for entry in fs::read_dir(shard.path())? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(PARTIAL_PREFIX) {
                fs::remove_file(entry.path())?;
                swept += 1;
            }
        }
    }
    Ok(swept)
}
