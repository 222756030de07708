//! Storage trait definitions for the release pipeline
//!
//! `ArtifactStore` is the contract between the publisher and whatever backend
//! keeps published artifacts:
//! - `write(name, path, retention_days)` copies a file in under `name`
//! - `read(name)` is the only supported lookup
//! - a `write` whose source path matches no file is always an error
//!
//! In-memory fakes are provided for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::path::Path;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// Only constructed by hashing, so the inner string is always lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Stream a file through SHA-256. Returns the digest and the byte count.
    pub fn from_file(path: &Path) -> StorageResult<(Self, u64)> {
        use sha2::Digest;
        let mut file = std::fs::File::open(path)?;
        let mut hasher = Sha256::new();
        let size = std::io::copy(&mut file, &mut hasher)?;
        Ok((ContentDigest(hex::encode(hasher.finalize())), size))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ArtifactStore
// ---------------------------------------------------------------------------

/// Reference returned by a successful publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedRef {
    /// Name the artifact is addressable by
    pub name: String,
    /// Digest of the stored payload
    pub digest: ContentDigest,
    /// Payload size in bytes
    pub size_bytes: u64,
    /// Days the store keeps the artifact
    pub retention_days: u32,
    pub published_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PublishedRef {
    pub fn new(
        name: &str,
        digest: ContentDigest,
        size_bytes: u64,
        retention_days: u32,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.to_string(),
            digest,
            size_bytes,
            retention_days,
            published_at,
            expires_at: published_at + Duration::days(i64::from(retention_days)),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A published artifact as returned by `read`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub reference: PublishedRef,
    pub data: Vec<u8>,
}

/// Retention-governed artifact store.
///
/// Guarantees:
/// - `write` fails with `StorageError::NoFilesFound` when `source` is not a file.
/// - Re-writing an existing name overwrites it; names never duplicate.
/// - `read` returns the exact bytes of the latest write for `name`.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Copy `source` into the store under `name`, kept for `retention_days`.
    async fn write(
        &self,
        name: &str,
        source: &Path,
        retention_days: u32,
    ) -> StorageResult<PublishedRef>;

    /// Read an artifact by name. Returns `StorageError::NotFound` if absent.
    async fn read(&self, name: &str) -> StorageResult<StoredArtifact>;

    /// List every artifact currently held, sorted by name.
    async fn list(&self) -> StorageResult<Vec<PublishedRef>>;

    /// Drop artifacts whose retention ended at or before `now`.
    /// Returns the names removed.
    async fn prune_expired(&self, now: DateTime<Utc>) -> StorageResult<Vec<String>>;
}

/// Reject names that would escape or nest inside the store root.
pub fn validate_name(name: &str) -> StorageResult<()> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if plain {
        Ok(())
    } else {
        Err(StorageError::InvalidName {
            name: name.to_string(),
        })
    }
}

/// Ensure `source` is an existing regular file.
pub fn require_file(source: &Path) -> StorageResult<()> {
    match std::fs::metadata(source) {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(StorageError::NoFilesFound {
            path: source.display().to_string(),
        }),
    }
}
