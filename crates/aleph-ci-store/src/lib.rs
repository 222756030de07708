//! Aleph-CI-Store: artifact storage for the release pipeline
//!
//! This crate owns everything the pipeline persists outside a run:
//!
//! - `ArtifactStore`: retention-governed, read-by-name artifact storage
//! - `FsArtifactStore`: filesystem backend with atomic overwrite
//! - `CompilationCache`: build outputs shared across runs, keyed-entry locking
//! - `fakes::MemoryArtifactStore`: in-memory store for tests

pub mod cache;
mod error;
pub mod fakes;
pub mod fs;
mod locks;
pub mod storage_traits;

pub use cache::{CacheKey, CompilationCache};
pub use error::StorageError;
pub use fs::FsArtifactStore;
pub use locks::KeyedLocks;
pub use storage_traits::{
    require_file, validate_name, ArtifactStore, ContentDigest, PublishedRef, StorageResult,
    StoredArtifact,
};
