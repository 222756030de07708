//! Integration tests for the release pipeline with in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use aleph_ci::fakes::{FakeBuildExecutor, FakePackager, FakeToolchain};
use aleph_ci::{cancel_pair, CancelSignal, PipelineConfig, ReleasePipeline};
use aleph_ci_domain::{ArtifactKind, BuildMode, BuildRequest, PipelineError, RunState};
use aleph_ci_store::fakes::MemoryArtifactStore;
use aleph_ci_store::{ArtifactStore, FsArtifactStore};
use tempfile::TempDir;

struct Harness {
    checkout: TempDir,
    toolchain: Arc<FakeToolchain>,
    executor: Arc<FakeBuildExecutor>,
    packager: Arc<FakePackager>,
    store: Arc<MemoryArtifactStore>,
}

impl Harness {
    fn new() -> Self {
        Self::with(FakeToolchain::new(), FakeBuildExecutor::new(), FakePackager::new())
    }

    fn with(toolchain: FakeToolchain, executor: FakeBuildExecutor, packager: FakePackager) -> Self {
        Self {
            checkout: tempfile::tempdir().unwrap(),
            toolchain: Arc::new(toolchain),
            executor: Arc::new(executor),
            packager: Arc::new(packager),
            store: Arc::new(MemoryArtifactStore::new()),
        }
    }

    fn pipeline(&self) -> ReleasePipeline {
        let config = PipelineConfig::new(self.checkout.path(), self.checkout.path().join("store"))
            .with_toolchain("nightly-2023-01-10");
        ReleasePipeline::new(
            config,
            self.toolchain.clone(),
            self.executor.clone(),
            self.packager.clone(),
            self.store.clone(),
        )
    }
}

fn request(mode: BuildMode) -> BuildRequest {
    BuildRequest::new("abc123", mode).unwrap()
}

fn states(transitions: &[aleph_ci::TransitionRecord]) -> Vec<RunState> {
    transitions.iter().map(|t| t.to).collect()
}

/// Test mode: binary only, packaging skipped, one output
#[tokio::test]
async fn test_mode_publishes_binary_only() {
    let harness = Harness::new();
    let report = harness
        .pipeline()
        .run(&request(BuildMode::Test), CancelSignal::never())
        .await
        .expect("run failed");

    assert_eq!(report.state, RunState::Done);
    assert_eq!(harness.executor.calls(), vec![ArtifactKind::Binary]);
    assert!(harness.packager.packaged().is_empty(), "packaging must be skipped");
    assert_eq!(
        states(&report.transitions),
        vec![
            RunState::ToolchainReady,
            RunState::Building,
            RunState::Publishing,
            RunState::Done
        ]
    );

    let outputs = report.outputs.to_output_map();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs["artifact-name-binary"], "aleph-node-test");
    assert_eq!(harness.store.names(), vec!["aleph-node-test"]);
    assert_eq!(report.published[0].retention_days, 7);
}

/// Production mode: binary + runtime, image packaged, three outputs
#[tokio::test]
async fn test_production_publishes_all_three() {
    let harness = Harness::new();
    let report = harness
        .pipeline()
        .run(&request(BuildMode::Production), CancelSignal::never())
        .await
        .expect("run failed");

    let mut built = harness.executor.calls();
    built.sort();
    assert_eq!(built, vec![ArtifactKind::Binary, ArtifactKind::RuntimeBlob]);
    assert_eq!(harness.packager.packaged().len(), 1);
    assert!(harness.packager.packaged()[0].ends_with("target/production/aleph-node"));
    assert!(states(&report.transitions).contains(&RunState::Packaging));

    let outputs = report.outputs.to_output_map();
    assert_eq!(outputs.len(), 3);
    assert_eq!(outputs["artifact-name-binary"], "aleph-node-production");
    assert_eq!(outputs["artifact-name-image"], "aleph-node-image-production");
    assert_eq!(outputs["aleph-runtime-artifact-name"], "aleph-production-runtime");

    let image = harness.store.read("aleph-node-image-production").await.unwrap();
    assert!(image.data.starts_with(b"image:"));
}

/// Toolchain failure: Init -> Failed, executor never invoked
#[tokio::test]
async fn test_toolchain_failure_skips_build() {
    let harness = Harness::with(
        FakeToolchain::unavailable("channel not found"),
        FakeBuildExecutor::new(),
        FakePackager::new(),
    );
    let failure = harness
        .pipeline()
        .run(&request(BuildMode::Production), CancelSignal::never())
        .await
        .unwrap_err();

    assert_eq!(failure.stage, RunState::Init);
    assert_eq!(states(&failure.transitions), vec![RunState::Failed]);
    assert!(matches!(failure.error, PipelineError::Toolchain { .. }));
    assert!(harness.executor.calls().is_empty());
    assert!(harness.store.write_log().is_empty());
    assert_eq!(harness.toolchain.requested()[0].channel, "nightly-2023-01-10");
}

/// One failing parallel build fails the run and publishes nothing
#[tokio::test]
async fn test_build_failure_is_all_or_nothing() {
    let harness = Harness::with(
        FakeToolchain::new(),
        FakeBuildExecutor::new().failing(ArtifactKind::RuntimeBlob),
        FakePackager::new(),
    );
    let failure = harness
        .pipeline()
        .run(&request(BuildMode::Production), CancelSignal::never())
        .await
        .unwrap_err();

    assert_eq!(failure.stage, RunState::Building);
    assert_eq!(failure.kind, Some(ArtifactKind::RuntimeBlob));
    assert!(harness.packager.packaged().is_empty());
    assert!(harness.store.write_log().is_empty());
    assert!(!states(&failure.transitions).contains(&RunState::Publishing));
}

/// Missing build output fails the build stage, naming the kind
#[tokio::test]
async fn test_missing_output_is_build_failure() {
    let harness = Harness::with(
        FakeToolchain::new(),
        FakeBuildExecutor::new().without_output(ArtifactKind::Binary),
        FakePackager::new(),
    );
    let failure = harness
        .pipeline()
        .run(&request(BuildMode::Test), CancelSignal::never())
        .await
        .unwrap_err();

    assert_eq!(failure.stage, RunState::Building);
    assert_eq!(failure.kind, Some(ArtifactKind::Binary));
    assert!(failure.error.to_string().contains("does not exist"));
}

/// Packaging failure: Packaging -> Failed, nothing published
#[tokio::test]
async fn test_packaging_failure() {
    let harness = Harness::with(
        FakeToolchain::new(),
        FakeBuildExecutor::new(),
        FakePackager::failing("engine not running"),
    );
    let failure = harness
        .pipeline()
        .run(&request(BuildMode::Production), CancelSignal::never())
        .await
        .unwrap_err();

    assert_eq!(failure.stage, RunState::Packaging);
    assert_eq!(failure.kind, Some(ArtifactKind::Image));
    assert_eq!(failure.category(), "packaging_failure");
    assert!(harness.store.write_log().is_empty());
}

/// Store rejecting writes fails the run in Publishing with no outputs
#[tokio::test]
async fn test_publish_failure() {
    let checkout = tempfile::tempdir().unwrap();
    let pipeline = ReleasePipeline::new(
        PipelineConfig::new(checkout.path(), checkout.path().join("store")),
        Arc::new(FakeToolchain::new()),
        Arc::new(FakeBuildExecutor::new()),
        Arc::new(FakePackager::new()),
        Arc::new(MemoryArtifactStore::failing("permission denied")),
    );
    let failure = pipeline
        .run(&request(BuildMode::Test), CancelSignal::never())
        .await
        .unwrap_err();

    assert_eq!(failure.stage, RunState::Publishing);
    assert_eq!(failure.kind, Some(ArtifactKind::Binary));
    assert!(failure.to_string().contains("permission denied"));
}

/// Cancellation aborts in-flight builds promptly
#[tokio::test]
async fn test_cancel_during_build() {
    let harness = Harness::with(
        FakeToolchain::new(),
        FakeBuildExecutor::new().with_delay(Duration::from_secs(30)),
        FakePackager::new(),
    );
    let pipeline = harness.pipeline();
    let (handle, signal) = cancel_pair();
    let req = request(BuildMode::Production);

    let run = pipeline.run(&req, signal);
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    };
    let (result, ()) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(run, cancel)
    })
    .await
    .expect("cancellation should be prompt");

    let failure = result.unwrap_err();
    assert_eq!(
        failure.error,
        PipelineError::Cancelled {
            stage: RunState::Building
        }
    );
    assert_eq!(failure.category(), "cancelled");
    assert!(harness.store.write_log().is_empty());
}

/// Cancellation during a slow store write ends the run in Publishing
#[tokio::test]
async fn test_cancel_during_publish() {
    let checkout = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryArtifactStore::with_write_delay(Duration::from_secs(30)));
    let pipeline = ReleasePipeline::new(
        PipelineConfig::new(checkout.path(), checkout.path().join("store")),
        Arc::new(FakeToolchain::new()),
        Arc::new(FakeBuildExecutor::new()),
        Arc::new(FakePackager::new()),
        store.clone(),
    );
    let (handle, signal) = cancel_pair();
    let req = request(BuildMode::Test);

    let run = pipeline.run(&req, signal);
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
    };
    let (result, ()) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(run, cancel)
    })
    .await
    .expect("cancellation should be prompt");

    let failure = result.unwrap_err();
    assert_eq!(
        failure.error,
        PipelineError::Cancelled {
            stage: RunState::Publishing
        }
    );
    assert_eq!(failure.stage, RunState::Publishing);
    assert!(store.write_log().is_empty());
}

/// Cancelling before start never touches the toolchain
#[tokio::test]
async fn test_cancel_before_start() {
    let harness = Harness::new();
    let (handle, signal) = cancel_pair();
    handle.cancel();

    let failure = harness
        .pipeline()
        .run(&request(BuildMode::Test), signal)
        .await
        .unwrap_err();
    assert_eq!(failure.stage, RunState::Init);
    assert!(harness.toolchain.requested().is_empty());
}

/// Same (ref, mode) yields the same names; re-publication overwrites
#[tokio::test]
async fn test_repeated_runs_are_deterministic() {
    let harness = Harness::new();
    let pipeline = harness.pipeline();
    let req = request(BuildMode::Production);

    let first = pipeline.run(&req, CancelSignal::never()).await.unwrap();
    let second = pipeline.run(&req, CancelSignal::never()).await.unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.request_digest, second.request_digest);
    assert_eq!(first.outputs, second.outputs);
    assert_eq!(harness.store.names().len(), 3);
    assert_eq!(harness.store.write_log().len(), 6);

    // Each run packages under its own image tag.
    let tags = harness.packager.tags();
    assert_eq!(
        tags,
        vec![
            format!("aleph-node:{}-{}", req.short_digest(), first.run_id),
            format!("aleph-node:{}-{}", req.short_digest(), second.run_id),
        ]
    );
}

/// Report round-trips through JSON with the expected shape
#[tokio::test]
async fn test_report_json() {
    let harness = Harness::new();
    let report = harness
        .pipeline()
        .run(&request(BuildMode::Test), CancelSignal::never())
        .await
        .unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["request"]["ref"], "abc123");
    assert_eq!(json["request"]["mode"], "test");
    assert_eq!(json["state"], "done");
    assert_eq!(json["outputs"]["binary"], "aleph-node-test");
}

/// End to end with the filesystem store
#[tokio::test]
async fn test_production_run_with_fs_store() {
    let checkout = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FsArtifactStore::new(store_dir.path()).unwrap());
    let pipeline = ReleasePipeline::new(
        PipelineConfig::new(checkout.path(), store_dir.path()),
        Arc::new(FakeToolchain::new()),
        Arc::new(FakeBuildExecutor::new()),
        Arc::new(FakePackager::new()),
        store.clone(),
    );

    pipeline
        .run(&request(BuildMode::Production), CancelSignal::never())
        .await
        .unwrap();

    let names: Vec<String> = store.list().await.unwrap().into_iter().map(|r| r.name).collect();
    assert_eq!(
        names,
        vec![
            "aleph-node-image-production",
            "aleph-node-production",
            "aleph-production-runtime"
        ]
    );
    let runtime = store.read("aleph-production-runtime").await.unwrap();
    assert_eq!(runtime.data, b"runtime:production:abc123");
}
