//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryArtifactStore`, which satisfies the `ArtifactStore`
//! contract without touching anything but the source file it is asked to copy.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryArtifactStore
// ---------------------------------------------------------------------------

/// In-memory artifact store backed by a `BTreeMap<name, artifact>`.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: Mutex<BTreeMap<String, StoredArtifact>>,
    writes: Mutex<Vec<String>>,
    fail_writes: Option<String>,
    write_delay: Option<Duration>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every write fails with an I/O error carrying `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            fail_writes: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// A store whose writes take `delay` before they land.
    pub fn with_write_delay(delay: Duration) -> Self {
        Self {
            write_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Names passed to successful `write` calls, in call order.
    pub fn write_log(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    /// Names currently held.
    pub fn names(&self) -> Vec<String> {
        self.artifacts.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn write(
        &self,
        name: &str,
        source: &Path,
        retention_days: u32,
    ) -> StorageResult<PublishedRef> {
        validate_name(name)?;
        require_file(source)?;
        if let Some(message) = &self.fail_writes {
            return Err(StorageError::Io(std::io::Error::other(message.clone())));
        }
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        let data = tokio::fs::read(source).await?;
        let reference = PublishedRef::new(
            name,
            ContentDigest::from_bytes(&data),
            data.len() as u64,
            retention_days,
            Utc::now(),
        );
        self.artifacts.lock().unwrap().insert(
            name.to_string(),
            StoredArtifact {
                reference: reference.clone(),
                data,
            },
        );
        self.writes.lock().unwrap().push(name.to_string());
        Ok(reference)
    }

    async fn read(&self, name: &str) -> StorageResult<StoredArtifact> {
        let artifacts = self.artifacts.lock().unwrap();
        artifacts
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                name: name.to_string(),
            })
    }

    async fn list(&self) -> StorageResult<Vec<PublishedRef>> {
        let artifacts = self.artifacts.lock().unwrap();
        Ok(artifacts.values().map(|a| a.reference.clone()).collect())
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> StorageResult<Vec<String>> {
        let mut artifacts = self.artifacts.lock().unwrap();
        let expired: Vec<String> = artifacts
            .values()
            .filter(|a| a.reference.is_expired(now))
            .map(|a| a.reference.name.clone())
            .collect();
        for name in &expired {
            artifacts.remove(name);
        }
        Ok(expired)
    }
}
