use anyhow::Context as _;
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use rollout_core::{
    DeltaReportEngine, FileEntry, FilesystemFeed, LogConfig, LogFormat, PackRequest,
    PackageArchive, PackageBuilder, PackageFeed, PackageManifest, PayloadFile, Release,
    ReleaseLedger, RestoreContext, RestoreMode, RestoreObserver, RestoreOrchestrator, RuntimeId,
    SemanticVersion, UpdateSource, init_logging, payload_from_dir, persist_package,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod config;
use config::Config;

#[cfg(test)]
mod cli_tests;

/// Filename the release ledger is published under in the feed
const LEDGER_FILENAME: &str = "rollout-ledger.bin";

#[derive(Parser)]
#[command(name = "rollout")]
#[command(about = "Package, delta-diff, and restore application releases")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Parser)]
enum Commands {
    /// Build and publish a release from a payload directory
    Pack {
        /// Application identifier
        #[arg(long)]
        app_id: String,

        /// Runtime identifier (e.g. linux-x64, win-x64, osx-arm64)
        #[arg(long)]
        rid: String,

        /// Semantic version of the release
        #[arg(long)]
        version: String,

        /// Directory containing the payload files
        #[arg(long)]
        payload_dir: PathBuf,

        /// Channel to publish to
        #[arg(long)]
        channel: Option<String>,

        /// Release notes
        #[arg(long)]
        notes: Option<String>,

        /// Output directory for packages and the ledger
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Verify, download, and reconstruct packages from the feed
    Restore {
        /// Application identifier
        #[arg(long)]
        app_id: String,

        /// Runtime identifier
        #[arg(long)]
        rid: String,

        /// Restore mode: install (reassemble full packages) or pack
        /// (raw files only)
        #[arg(long, default_value = "install")]
        mode: String,

        /// Restrict the restore to one channel
        #[arg(long)]
        channel: Option<String>,
    },

    /// List the releases recorded in the ledger
    Releases {
        /// Application identifier
        #[arg(long)]
        app_id: String,

        /// Runtime identifier
        #[arg(long)]
        rid: String,
    },

    /// Compute the delta report between two full packages
    Delta {
        /// Path to the previous full package
        previous: PathBuf,

        /// Path to the current full package
        current: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)?
    } else {
        Config::load()?
    };
    config.validate()?;

    let log_config = LogConfig {
        level: if cli.verbose { "debug" } else { "info" }.to_string(),
        format: LogFormat::Compact,
        ..Default::default()
    };
    if let Err(e) = init_logging(&log_config) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    match cli.command {
        Commands::Pack {
            app_id,
            rid,
            version,
            payload_dir,
            channel,
            notes,
            output_dir,
        } => {
            let rid: RuntimeId = rid.parse()?;
            let version = SemanticVersion::parse(&version)?;
            let channel = channel.unwrap_or_else(|| config.pack.channel.clone());
            let output_dir = output_dir.unwrap_or_else(|| PathBuf::from(&config.packages.dir));
            run_pack(app_id, rid, version, &payload_dir, channel, notes, &output_dir).await?;
        }
        Commands::Restore {
            app_id,
            rid,
            mode,
            channel,
        } => {
            let rid: RuntimeId = rid.parse()?;
            let mode = match mode.as_str() {
                "install" => RestoreMode::Install,
                "pack" => RestoreMode::Pack,
                other => anyhow::bail!("Unknown restore mode: {}", other),
            };
            let ok = run_restore(&config, app_id, rid, mode, channel).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Releases { app_id, rid } => {
            let rid: RuntimeId = rid.parse()?;
            run_releases(&config, &app_id, rid)?;
        }
        Commands::Delta { previous, current } => {
            run_delta(&previous, &current)?;
        }
    }

    Ok(())
}

async fn run_pack(
    app_id: String,
    rid: RuntimeId,
    version: SemanticVersion,
    payload_dir: &Path,
    channel: String,
    notes: Option<String>,
    output_dir: &Path,
) -> anyhow::Result<()> {
    let ledger_path = output_dir.join(LEDGER_FILENAME);
    let mut ledger = if ledger_path.exists() {
        ReleaseLedger::from_bytes(&std::fs::read(&ledger_path)?)?
    } else {
        ReleaseLedger::new()
    };

    let payload: Vec<PayloadFile> = payload_from_dir(payload_dir)
        .with_context(|| format!("reading payload from {}", payload_dir.display()))?;

    // A non-empty lineage needs the predecessor's full package on disk;
    // `rollout restore --mode pack` fetches it when missing.
    let previous_full = match ledger.most_recent_release(&app_id, rid) {
        None => None,
        Some(previous) => {
            let path = output_dir.join(previous.full_filename());
            Some(std::fs::read(&path).with_context(|| {
                format!("predecessor full package missing: {}", path.display())
            })?)
        }
    };

    let request = PackRequest {
        app_id,
        rid,
        version,
        channels: vec![channel],
        release_notes: notes,
        payload,
        full_root: false,
    };
    let outcome = PackageBuilder::new()
        .pack(request, &mut ledger, previous_full)
        .await?;

    persist_package(
        output_dir,
        &outcome.release.full_filename(),
        &outcome.full_package,
    )?;
    if let Some(delta) = &outcome.delta_package {
        persist_package(output_dir, &outcome.release.filename, delta)?;
    }
    persist_package(output_dir, LEDGER_FILENAME, &ledger.to_bytes()?)?;

    info!(
        filename = %outcome.release.filename,
        version = %outcome.release.version,
        "Published release"
    );
    println!("Published {}", outcome.release.filename);
    println!(
        "  {} new, {} modified, {} unmodified, {} deleted",
        outcome.release.new_files.len(),
        outcome.release.modified_files.len(),
        outcome.release.unmodified_files.len(),
        outcome.release.deleted_files.len()
    );
    Ok(())
}

async fn run_restore(
    config: &Config,
    app_id: String,
    rid: RuntimeId,
    mode: RestoreMode,
    channel: Option<String>,
) -> anyhow::Result<bool> {
    let packages_dir = PathBuf::from(&config.packages.dir);
    std::fs::create_dir_all(&packages_dir)?;

    let source = match &config.feed.token {
        Some(token) => UpdateSource::Authenticated {
            url: config.feed.url.clone(),
            token: token.clone(),
        },
        None => UpdateSource::Plain {
            url: config.feed.url.clone(),
        },
    };

    // The ledger is published like any other package; fetch the current
    // copy before planning the restore.
    let feed = Arc::new(FilesystemFeed::new());
    feed.download(
        LEDGER_FILENAME,
        &source,
        &packages_dir.join(LEDGER_FILENAME),
        &|_| {},
    )
    .await
    .context("downloading the release ledger")?;
    let ledger = ReleaseLedger::from_bytes(&std::fs::read(packages_dir.join(LEDGER_FILENAME))?)?;

    let ctx = RestoreContext {
        packages_dir,
        source,
        mode,
        channel,
        cancel: CancellationToken::new(),
    };
    let observer = CliObserver::new();
    let summary = RestoreOrchestrator::new(feed)
        .restore(&ledger, &app_id, rid, &ctx, &observer)
        .await?;
    observer.finish();

    for entry in &summary.checksum {
        if !entry.ok {
            println!("invalid    {}", entry.filename);
        }
    }
    for entry in &summary.download {
        let status = if entry.ok { "downloaded" } else { "failed" };
        println!("{:<10} {}", status, entry.filename);
    }
    for entry in &summary.reassemble {
        println!("rebuilt    {}", entry.filename);
    }
    println!(
        "Restore {}: {} verified, {} downloaded, {} reassembled",
        if summary.success { "ok" } else { "FAILED" },
        summary.checksum.iter().filter(|e| e.ok).count(),
        summary.download.iter().filter(|e| e.ok).count(),
        summary.reassemble.len()
    );
    Ok(summary.success)
}

fn run_releases(config: &Config, app_id: &str, rid: RuntimeId) -> anyhow::Result<()> {
    let ledger_path = PathBuf::from(&config.packages.dir).join(LEDGER_FILENAME);
    let ledger = ReleaseLedger::from_bytes(
        &std::fs::read(&ledger_path)
            .with_context(|| format!("no ledger at {}", ledger_path.display()))?,
    )?;

    let releases = ledger.releases_for(app_id, rid);
    if releases.is_empty() {
        println!("No releases for {} {}", app_id, rid);
        return Ok(());
    }
    for release in releases {
        println!(
            "{:<10} {:<8} {:>10}  {}  [{}]",
            release.version.to_string(),
            format!("{:?}", release.kind).to_lowercase(),
            release.full_size,
            release.filename,
            release.channels.join(", ")
        );
    }
    Ok(())
}

fn run_delta(previous: &Path, current: &Path) -> anyhow::Result<()> {
    let previous = PackageArchive::open(previous)?;
    let current = PackageArchive::open(current)?;

    let report = DeltaReportEngine::new().generate(
        &release_stub(previous.manifest()),
        &release_stub(current.manifest()),
    )?;

    println!("{}", report.summary());
    for entry in &report.new {
        println!("new        {}", entry.target_path);
    }
    for entry in &report.modified {
        println!("modified   {}", entry.target_path);
    }
    for entry in &report.deleted {
        println!("deleted    {}", entry.target_path);
    }
    Ok(())
}

/// Minimal release view over a package manifest, enough to drive the delta
/// report engine from the command line.
fn release_stub(manifest: &PackageManifest) -> Release {
    Release {
        app_id: manifest.app_id.clone(),
        rid: manifest.rid,
        version: manifest.version.clone(),
        channels: Vec::new(),
        kind: manifest.kind,
        filename: manifest.full_filename(),
        full_size: 0,
        full_checksum: String::new(),
        delta: None,
        new_files: Vec::new(),
        modified_files: Vec::new(),
        unmodified_files: Vec::new(),
        deleted_files: Vec::new(),
        files: manifest
            .entries
            .iter()
            .map(|e| FileEntry::new(e.target_path.clone(), e.size, e.hash.clone()))
            .collect(),
        created_at: chrono::Utc::now(),
        release_notes: None,
    }
}

/// Progress bars for the three restore phases
struct CliObserver {
    _multi: MultiProgress,
    checksum: ProgressBar,
    download: ProgressBar,
    reassemble: ProgressBar,
}

impl CliObserver {
    fn new() -> Self {
        let multi = MultiProgress::new();
        let style = ProgressStyle::default_bar();
        let bar = |msg: &'static str| {
            let bar = multi.add(ProgressBar::new(0).with_style(style.clone()));
            bar.set_message(msg);
            bar
        };
        Self {
            checksum: bar("verify"),
            download: bar("download"),
            reassemble: bar("reassemble"),
            _multi: multi,
        }
    }

    fn finish(&self) {
        self.checksum.finish_and_clear();
        self.download.finish_and_clear();
        self.reassemble.finish_and_clear();
    }
}

impl RestoreObserver for CliObserver {
    fn checksum_progress(&self, _percent: u8, verified: u64, total: u64) {
        self.checksum.set_length(total);
        self.checksum.set_position(verified);
    }

    fn download_progress(&self, _percent: u8, _completed: u64, _total: u64, bytes: u64, bytes_total: u64) {
        self.download.set_length(bytes_total);
        self.download.set_position(bytes);
    }

    fn reassemble_progress(&self, _percent: u8, steps_done: u64, steps_total: u64) {
        self.reassemble.set_length(steps_total);
        self.reassemble.set_position(steps_done);
    }
}
