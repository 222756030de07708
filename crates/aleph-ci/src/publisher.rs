//! Artifact publication.

use std::sync::Arc;

use aleph_ci_domain::{ArtifactDescriptor, PipelineError};
use aleph_ci_store::{require_file, ArtifactStore, PublishedRef, StorageError};

/// Copies produced artifacts into the retention-governed store.
#[derive(Clone)]
pub struct ArtifactPublisher {
    store: Arc<dyn ArtifactStore>,
}

impl ArtifactPublisher {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Publish `descriptor` under its name.
    ///
    /// A missing file at `descriptor.path` is always a failure. Publishing the
    /// same name again overwrites the previous artifact.
    pub async fn publish(
        &self,
        descriptor: &ArtifactDescriptor,
    ) -> Result<PublishedRef, PipelineError> {
        let publish_err = |e: StorageError| PipelineError::Publish {
            kind: descriptor.kind,
            name: descriptor.name.clone(),
            message: e.to_string(),
        };

        require_file(&descriptor.path).map_err(publish_err)?;
        self.store
            .write(&descriptor.name, &descriptor.path, descriptor.retention_days)
            .await
            .map_err(publish_err)
    }
}
