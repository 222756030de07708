//! Aleph CI - release pipeline CLI
//!
//! The `aleph-ci` command builds and publishes aleph-node artifacts.
//!
//! ## Commands
//!
//! - `run`: build, package and publish the artifacts of one `(ref, mode)`
//! - `names`: print the artifact names a mode publishes
//! - `fetch`: copy a published artifact out of the store
//! - `prune`: drop artifacts past their retention

mod output;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

use aleph_ci::{init_tracing, CancelSignal, PipelineConfig, ReleasePipeline, RunReport};
use aleph_ci_domain::{artifact_name, resolve, BuildMode, BuildRequest};
use aleph_ci_store::{ArtifactStore, FsArtifactStore};

#[derive(Parser)]
#[command(name = "aleph-ci")]
#[command(author = "Aleph Zero Foundation")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build-and-release pipeline for aleph-node", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Artifact store root (default: $ALEPH_CI_STORE or .aleph-ci/store)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and publish the artifacts of one source snapshot
    Run {
        /// Commit SHA, tag or branch to build
        #[arg(long = "ref", env = "ALEPH_CI_REF")]
        git_ref: String,

        /// `true` for a production build, `false` for a test build
        #[arg(long, env = "ALEPH_CI_PRODUCTION")]
        production: String,

        /// Source checkout (default: $ALEPH_CI_CHECKOUT or .)
        #[arg(long)]
        checkout: Option<PathBuf>,

        /// Shared compilation cache root (default: $ALEPH_CI_CACHE, none if unset)
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Toolchain channel (default: $ALEPH_CI_TOOLCHAIN or stable)
        #[arg(long)]
        toolchain: Option<String>,

        /// Container engine executable (default: $ALEPH_CI_CONTAINER_ENGINE or docker)
        #[arg(long)]
        engine: Option<String>,

        /// Image repository; each run tags `<repository>:<digest>-<run id>`
        /// (default: $ALEPH_CI_IMAGE_REPOSITORY or aleph-node)
        #[arg(long)]
        image_repository: Option<String>,

        /// Write the run report (or failure) as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Step-output file to append `key=value` outputs to
        #[arg(long, env = "GITHUB_OUTPUT")]
        github_output: Option<PathBuf>,
    },

    /// Print the artifact names a build mode publishes
    Names {
        /// `true` for production, `false` for test
        #[arg(long)]
        production: String,
    },

    /// Copy a published artifact out of the store
    Fetch {
        /// Published artifact name
        name: String,

        /// Destination file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Remove artifacts whose retention has ended
    Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let mut config = PipelineConfig::from_env();
    if let Some(store) = cli.store {
        config.store_root = store;
    }

    match cli.command {
        Commands::Run {
            git_ref,
            production,
            checkout,
            cache,
            toolchain,
            engine,
            image_repository,
            report,
            github_output,
        } => {
            let request = BuildRequest::from_inputs(&git_ref, &production)
                .context("Invalid pipeline inputs")?;
            if let Some(checkout) = checkout {
                config.checkout = checkout;
            }
            if let Some(cache) = cache {
                config = config.with_cache(cache);
            }
            if let Some(toolchain) = toolchain {
                config = config.with_toolchain(&toolchain);
            }
            if let Some(engine) = engine {
                config = config.with_container_engine(&engine);
            }
            if let Some(repository) = image_repository {
                config = config.with_image_repository(&repository);
            }

            let pipeline = ReleasePipeline::from_config(config)?;
            let cancel = cancel_on_ctrl_c();
            let report = cmd_run(
                &pipeline,
                &request,
                cancel,
                report.as_deref(),
                github_output.as_deref(),
            )
            .await?;
            print!("{}", output::format_outputs(&report.outputs.to_output_map()));
            Ok(())
        }
        Commands::Names { production } => {
            let mode = BuildMode::from_production_input(&production)?;
            print!("{}", output::format_outputs(&names_for(mode)));
            Ok(())
        }
        Commands::Fetch { name, output } => {
            let store = open_store(&config.store_root)?;
            let size = cmd_fetch(&store, &name, &output).await?;
            println!("{} ({} bytes) -> {}", name, size, output.display());
            Ok(())
        }
        Commands::Prune => {
            let store = open_store(&config.store_root)?;
            for name in cmd_prune(&store).await? {
                println!("pruned {name}");
            }
            Ok(())
        }
    }
}

/// Cancel the returned signal on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancelSignal {
    let (handle, signal) = aleph_ci::cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            handle.cancel();
        }
    });
    signal
}

fn open_store(root: &Path) -> Result<FsArtifactStore> {
    FsArtifactStore::new(root)
        .with_context(|| format!("Failed to open artifact store {}", root.display()))
}

/// Run the pipeline, then archive the outcome and emit outputs.
///
/// Outputs are only written when the run is `Done`.
async fn cmd_run(
    pipeline: &ReleasePipeline,
    request: &BuildRequest,
    cancel: CancelSignal,
    report_path: Option<&Path>,
    github_output: Option<&Path>,
) -> Result<RunReport> {
    info!(
        git_ref = %request.git_ref,
        mode = %request.mode,
        digest = %request.short_digest(),
        "Starting release run"
    );

    match pipeline.run(request, cancel).await {
        Ok(report) => {
            if let Some(path) = report_path {
                write_json(path, &serde_json::to_value(&report)?)?;
            }
            if let Some(path) = github_output {
                output::append_outputs(path, &report.outputs.to_output_map())?;
            }
            Ok(report)
        }
        Err(failure) => {
            if let Some(path) = report_path {
                write_json(path, &failure.to_json())?;
            }
            let kind = failure
                .kind
                .map(|k| format!(", artifact {k}"))
                .unwrap_or_default();
            let message = format!("Release run failed in stage {}{kind}", failure.stage);
            Err(anyhow::Error::new(failure).context(message))
        }
    }
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report {}", path.display()))
}

/// Names published by a run in `mode`, keyed by output name.
fn names_for(mode: BuildMode) -> BTreeMap<&'static str, String> {
    let profile = resolve(mode);
    mode.published_kinds()
        .into_iter()
        .map(|kind| (kind.output_key(), artifact_name(kind, &profile)))
        .collect()
}

async fn cmd_fetch(store: &dyn ArtifactStore, name: &str, output: &Path) -> Result<u64> {
    let artifact = store
        .read(name)
        .await
        .with_context(|| format!("Failed to read artifact '{name}'"))?;
    std::fs::write(output, &artifact.data)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    Ok(artifact.reference.size_bytes)
}

async fn cmd_prune(store: &dyn ArtifactStore) -> Result<Vec<String>> {
    let removed = store
        .prune_expired(chrono::Utc::now())
        .await
        .context("Failed to prune artifact store")?;
    info!(count = removed.len(), "Pruned expired artifacts");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aleph_ci::fakes::{FakeBuildExecutor, FakePackager, FakeToolchain};
    use aleph_ci_domain::ArtifactKind;
    use std::sync::Arc;

    fn pipeline(checkout: &Path, executor: FakeBuildExecutor) -> ReleasePipeline {
        let store = FsArtifactStore::new(checkout.join("store")).unwrap();
        ReleasePipeline::new(
            PipelineConfig::new(checkout, checkout.join("store")),
            Arc::new(FakeToolchain::new()),
            Arc::new(executor),
            Arc::new(FakePackager::new()),
            Arc::new(store),
        )
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "aleph-ci", "--json", "run", "--ref", "abc123", "--production", "true",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Run {
                git_ref, production, ..
            } => {
                assert_eq!(git_ref, "abc123");
                assert_eq!(production, "true");
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_requires_ref() {
        // Only fails when ALEPH_CI_REF is not set in the test environment.
        if std::env::var("ALEPH_CI_REF").is_err() {
            assert!(Cli::try_parse_from(["aleph-ci", "run", "--production", "false"]).is_err());
        }
    }

    #[test]
    fn test_names_for_modes() {
        let test = names_for(BuildMode::Test);
        assert_eq!(test.len(), 1);
        assert_eq!(test["artifact-name-binary"], "aleph-node-test");

        let prod = names_for(BuildMode::Production);
        assert_eq!(prod.len(), 3);
        assert_eq!(prod["artifact-name-image"], "aleph-node-image-production");
        assert_eq!(prod["aleph-runtime-artifact-name"], "aleph-production-runtime");
    }

    #[tokio::test]
    async fn test_cmd_run_writes_report_and_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let report_path = dir.path().join("report.json");
        let outputs_path = dir.path().join("github_output");
        let request = BuildRequest::from_inputs("abc123", "true").unwrap();

        let report = cmd_run(
            &pipeline(dir.path(), FakeBuildExecutor::new()),
            &request,
            CancelSignal::never(),
            Some(&report_path),
            Some(&outputs_path),
        )
        .await
        .unwrap();

        assert_eq!(report.outputs.len(), 3);
        let archived: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
        assert_eq!(archived["state"], "done");
        let outputs = std::fs::read_to_string(&outputs_path).unwrap();
        assert!(outputs.contains("artifact-name-image=aleph-node-image-production\n"));
    }

    #[tokio::test]
    async fn test_cmd_run_failure_writes_no_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let report_path = dir.path().join("report.json");
        let outputs_path = dir.path().join("github_output");
        let request = BuildRequest::from_inputs("abc123", "false").unwrap();

        let err = cmd_run(
            &pipeline(dir.path(), FakeBuildExecutor::new().failing(ArtifactKind::Binary)),
            &request,
            CancelSignal::never(),
            Some(&report_path),
            Some(&outputs_path),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("stage building, artifact binary"));
        assert!(!outputs_path.exists());
        let archived: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
        assert_eq!(archived["category"], "build_failure");
        assert_eq!(archived["kind"], "binary");
    }

    #[tokio::test]
    async fn test_fetch_and_prune() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("aleph-node");
        std::fs::write(&source, b"node").unwrap();
        let store = FsArtifactStore::new(dir.path().join("store")).unwrap();
        store.write("aleph-node-test", &source, 7).await.unwrap();

        let dest = dir.path().join("fetched");
        let size = cmd_fetch(&store, "aleph-node-test", &dest).await.unwrap();
        assert_eq!(size, 4);
        assert_eq!(std::fs::read(&dest).unwrap(), b"node");

        assert!(cmd_fetch(&store, "missing", &dest).await.is_err());
        assert!(cmd_prune(&store).await.unwrap().is_empty());
    }
}
