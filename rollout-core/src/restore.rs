//! Restore orchestrator: turns a possibly-incomplete local package cache
//! plus a remote feed into a verified, installable package set.
//!
//! Three phases over one lineage's release chain:
//!
//! 1. Checksum: verify cached package files against the ledger's recorded
//!    size and strong checksum. Runs on every invocation, so it stays quiet.
//! 2. Download: fetch every file that failed phase 1 from the feed. A
//!    failed download fails the whole restore; re-invoking is safe because
//!    phase 1 re-detects whatever is still missing.
//! 3. Reassembly (install mode only): when the newest release is a delta
//!    and its full package is not already valid, rebuild it from the
//!    nearest valid full ancestor by applying the delta chain in version
//!    order. Intermediate full packages are never materialized.
//!
//! Download and patch failures are environmental and produce a summary with
//! `success == false`; corrupt patches and checksum mismatches inside
//! reassembly are structural and abort with an error.

use crate::checksum::{self, HashAlgorithm};
use crate::feed::{PackageFeed, UpdateSource};
use crate::ledger::ReleaseLedger;
use crate::package::{self, PackageArchive};
use crate::patch;
use crate::release::{Release, ReleaseKind, RuntimeId, SemanticVersion};
use crate::{IntegrityError, LineageError, Result, RolloutError};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

/// Restore mode. `Pack` is the publishing side: it only needs the raw
/// package files present and never reassembles. `Install` is the client
/// side: it always ends with a valid full package for the newest release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreMode {
    Pack,
    Install,
}

/// One per-release result within a phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseEntry {
    pub filename: String,
    pub version: SemanticVersion,
    pub ok: bool,
}

/// Result of one restore invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreSummary {
    pub mode: RestoreMode,
    pub checksum: Vec<PhaseEntry>,
    pub download: Vec<PhaseEntry>,
    pub reassemble: Vec<PhaseEntry>,
    pub success: bool,
}

impl RestoreSummary {
    fn new(mode: RestoreMode) -> Self {
        Self {
            mode,
            checksum: Vec::new(),
            download: Vec::new(),
            reassemble: Vec::new(),
            success: true,
        }
    }
}

/// Progress callbacks, invoked synchronously from the phase workers.
/// Implementations must be cheap and must not block.
pub trait RestoreObserver: Send + Sync {
    fn checksum_progress(&self, _percent: u8, _verified: u64, _total: u64) {}
    fn download_progress(
        &self,
        _percent: u8,
        _completed: u64,
        _total: u64,
        _bytes: u64,
        _bytes_total: u64,
    ) {
    }
    fn reassemble_progress(&self, _percent: u8, _steps_done: u64, _steps_total: u64) {}
}

/// Observer that ignores all progress
#[derive(Debug, Default)]
pub struct NoopObserver;

impl RestoreObserver for NoopObserver {}

/// Per-invocation restore parameters. Constructed explicitly and passed in,
/// never read from process-wide state.
#[derive(Debug, Clone)]
pub struct RestoreContext {
    /// Local package cache directory
    pub packages_dir: PathBuf,
    /// Feed the packages were published to
    pub source: UpdateSource,
    pub mode: RestoreMode,
    /// Restrict the chain to one channel; `None` takes the whole lineage
    pub channel: Option<String>,
    pub cancel: CancellationToken,
}

/// What one checksum-phase check verifies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArtifactRole {
    /// The file this release ships in the feed (full for roots, delta
    /// for delta releases). Downloadable in phase 2.
    Ship,
    /// The newest delta's reconstructable full package. Never downloaded;
    /// an invalid result schedules phase 3 instead.
    NewestFull,
}

#[derive(Debug, Clone)]
struct ArtifactCheck {
    index: usize,
    filename: String,
    version: SemanticVersion,
    size: u64,
    checksum: String,
    role: ArtifactRole,
}

/// Drives the three restore phases over one lineage
pub struct RestoreOrchestrator {
    feed: Arc<dyn PackageFeed>,
    concurrency: usize,
}

impl RestoreOrchestrator {
    pub fn new(feed: Arc<dyn PackageFeed>) -> Self {
        let concurrency = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self { feed, concurrency }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Restore one lineage. Returns a summary rather than failing on
    /// missing or undownloadable files; structural corruption errors out.
    pub async fn restore(
        &self,
        ledger: &ReleaseLedger,
        app_id: &str,
        rid: RuntimeId,
        ctx: &RestoreContext,
        observer: &dyn RestoreObserver,
    ) -> Result<RestoreSummary> {
        let chain: Vec<Release> = match &ctx.channel {
            Some(channel) => ledger.releases_in_channel(app_id, rid, channel),
            None => ledger.releases_for(app_id, rid),
        }
        .into_iter()
        .cloned()
        .collect();

        let mut summary = RestoreSummary::new(ctx.mode);
        if chain.is_empty() {
            tracing::warn!(app_id, rid = %rid, "Restore requested for empty lineage");
            return Ok(summary);
        }

        let span = tracing::info_span!(
            "restore",
            app_id,
            rid = %rid,
            mode = ?ctx.mode,
            releases = chain.len()
        );
        let _guard = span.enter();

        std::fs::create_dir_all(&ctx.packages_dir)?;

        let checks = artifact_checks(&chain, ctx.mode);
        let results = self.run_checksum_phase(&checks, ctx, observer).await?;

        let mut newest_full_valid = true;
        let mut to_download = Vec::new();
        for (check, ok) in &results {
            match check.role {
                ArtifactRole::Ship => {
                    summary.checksum.push(PhaseEntry {
                        filename: check.filename.clone(),
                        version: check.version.clone(),
                        ok: *ok,
                    });
                    if !*ok {
                        to_download.push(check.clone());
                    }
                }
                ArtifactRole::NewestFull => newest_full_valid = *ok,
            }
        }
        tracing::debug!(
            checked = summary.checksum.len(),
            invalid = to_download.len(),
            "Checksum phase complete"
        );

        self.run_download_phase(&to_download, ctx, observer, &mut summary)
            .await?;
        if !summary.success {
            tracing::warn!("Download phase failed, skipping reassembly");
            return Ok(summary);
        }

        let newest = &chain[chain.len() - 1];
        if ctx.mode == RestoreMode::Install && newest.is_delta() && !newest_full_valid {
            self.run_reassemble_phase(&chain, ctx, observer, &mut summary)
                .await?;
        }

        tracing::info!(
            success = summary.success,
            downloaded = summary.download.len(),
            reassembled = summary.reassemble.len(),
            "Restore complete"
        );
        Ok(summary)
    }

    async fn run_checksum_phase(
        &self,
        checks: &[ArtifactCheck],
        ctx: &RestoreContext,
        observer: &dyn RestoreObserver,
    ) -> Result<Vec<(ArtifactCheck, bool)>> {
        let total = checks.len() as u64;
        let mut stream = stream::iter(checks.iter().cloned().map(|check| {
            let path = ctx.packages_dir.join(&check.filename);
            async move {
                tokio::task::spawn_blocking(move || {
                    let ok = verify_file(&path, check.size, &check.checksum);
                    tracing::trace!(filename = %check.filename, ok, "Verified cached file");
                    (check, ok)
                })
                .await
                .map_err(|e| RolloutError::internal(format!("checksum task failed: {}", e)))
            }
        }))
        .buffer_unordered(self.concurrency);

        let mut results = Vec::with_capacity(checks.len());
        let mut verified = 0u64;
        while let Some(result) = stream.next().await {
            if ctx.cancel.is_cancelled() {
                return Err(RolloutError::Cancelled);
            }
            results.push(result?);
            verified += 1;
            observer.checksum_progress(percent(verified, total), verified, total);
        }
        // Concurrent completion order is arbitrary; reports are per-release.
        results.sort_by_key(|(check, _)| (check.index, check.role == ArtifactRole::NewestFull));
        Ok(results)
    }

    async fn run_download_phase(
        &self,
        to_download: &[ArtifactCheck],
        ctx: &RestoreContext,
        observer: &dyn RestoreObserver,
        summary: &mut RestoreSummary,
    ) -> Result<()> {
        let total = to_download.len() as u64;
        let bytes_total: u64 = to_download.iter().map(|c| c.size).sum();
        let bytes_done = AtomicU64::new(0);

        for (completed, check) in to_download.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                return Err(RolloutError::Cancelled);
            }

            let dest = ctx.packages_dir.join(&check.filename);
            let progress = |n: u64| {
                let so_far = bytes_done.fetch_add(n, Ordering::Relaxed) + n;
                observer.download_progress(
                    percent(so_far, bytes_total),
                    completed as u64,
                    total,
                    so_far,
                    bytes_total,
                );
            };

            let downloaded = self
                .feed
                .download(&check.filename, &ctx.source, &dest, &progress)
                .await;

            let ok = match downloaded {
                Ok(_) => {
                    let path = dest.clone();
                    let size = check.size;
                    let expected = check.checksum.clone();
                    tokio::task::spawn_blocking(move || verify_file(&path, size, &expected))
                        .await
                        .map_err(|e| {
                            RolloutError::internal(format!("verify task failed: {}", e))
                        })?
                }
                Err(e) => {
                    tracing::warn!(filename = %check.filename, error = %e, "Download failed");
                    false
                }
            };

            summary.download.push(PhaseEntry {
                filename: check.filename.clone(),
                version: check.version.clone(),
                ok,
            });
            if !ok {
                summary.success = false;
                return Ok(());
            }
            tracing::info!(filename = %check.filename, size = check.size, "Downloaded package");
        }
        Ok(())
    }

    async fn run_reassemble_phase(
        &self,
        chain: &[Release],
        ctx: &RestoreContext,
        observer: &dyn RestoreObserver,
        summary: &mut RestoreSummary,
    ) -> Result<()> {
        // Nearest ancestor whose full package is already valid on disk.
        // The lineage root always qualifies after a successful download
        // phase, so the walk cannot come up empty.
        let newest = &chain[chain.len() - 1];
        let base_index = (0..chain.len())
            .rev()
            .find(|&i| {
                let release = &chain[i];
                let path = ctx.packages_dir.join(release.full_filename());
                verify_file(&path, release.full_size, &release.full_checksum)
            })
            .ok_or_else(|| LineageError::MissingAncestor {
                app_id: newest.app_id.clone(),
                version: newest.version.to_string(),
            })?;

        let steps = chain[base_index..].to_vec();
        let steps_total = (steps.len() - 1) as u64;
        let dir = ctx.packages_dir.clone();
        let cancel = ctx.cancel.clone();

        let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel::<u64>();
        let task = tokio::task::spawn_blocking(move || {
            reassemble_chain(&steps, &dir, &cancel, &|done| {
                let _ = done_tx.send(done);
            })
        });
        while let Some(done) = done_rx.recv().await {
            observer.reassemble_progress(percent(done, steps_total), done, steps_total);
        }
        let full = task
            .await
            .map_err(|e| RolloutError::internal(format!("reassemble task failed: {}", e)))??;

        package::persist_package(&ctx.packages_dir, &newest.full_filename(), &full)?;
        tracing::info!(
            filename = %newest.full_filename(),
            size = full.len(),
            steps = steps_total,
            "Reassembled full package"
        );

        summary.reassemble.push(PhaseEntry {
            filename: newest.full_filename(),
            version: newest.version.clone(),
            ok: true,
        });
        Ok(())
    }
}

fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        100
    } else {
        ((done * 100) / total) as u8
    }
}

/// The files phase 1 must verify for one chain
fn artifact_checks(chain: &[Release], mode: RestoreMode) -> Vec<ArtifactCheck> {
    let mut checks = Vec::with_capacity(chain.len() + 1);
    for (index, release) in chain.iter().enumerate() {
        let (size, checksum) = match &release.delta {
            Some(delta) => (delta.size, delta.checksum.clone()),
            None => (release.full_size, release.full_checksum.clone()),
        };
        checks.push(ArtifactCheck {
            index,
            filename: release.filename.clone(),
            version: release.version.clone(),
            size,
            checksum,
            role: ArtifactRole::Ship,
        });
    }

    // Clients need the newest release installable, so its full package is
    // part of the contract; the publishing side only needs the raw files.
    if mode == RestoreMode::Install {
        if let Some(newest) = chain.last() {
            if newest.is_delta() {
                checks.push(ArtifactCheck {
                    index: chain.len() - 1,
                    filename: newest.full_filename(),
                    version: newest.version.clone(),
                    size: newest.full_size,
                    checksum: newest.full_checksum.clone(),
                    role: ArtifactRole::NewestFull,
                });
            }
        }
    }
    checks
}

fn verify_file(path: &Path, expected_size: u64, expected_checksum: &str) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() == expected_size => {}
        _ => return false,
    }
    match checksum::hash_file(path, HashAlgorithm::strong()) {
        Ok(actual) => actual.eq_ignore_ascii_case(expected_checksum),
        Err(_) => false,
    }
}

/// Apply `chain[1..]` in version order on top of `chain[0]`'s full package,
/// returning the newest release's full package bytes.
fn reassemble_chain(
    chain: &[Release],
    dir: &Path,
    cancel: &CancellationToken,
    progress: &dyn Fn(u64),
) -> Result<Vec<u8>> {
    let base = &chain[0];
    let mut full = std::fs::read(dir.join(base.full_filename()))?;

    for (step, release) in chain[1..].iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(RolloutError::Cancelled);
        }
        full = apply_delta(&full, release, &dir.join(&release.filename), cancel)?;
        progress((step + 1) as u64);
    }

    let newest = &chain[chain.len() - 1];
    let actual = checksum::hash_bytes(&full, HashAlgorithm::strong());
    if !actual.eq_ignore_ascii_case(&newest.full_checksum) {
        return Err(IntegrityError::checksum_mismatch(&newest.full_checksum, &actual).into());
    }
    Ok(full)
}

/// Rebuild one release's full package from its predecessor's full package
/// and its delta archive.
fn apply_delta(
    base_full: &[u8],
    release: &Release,
    delta_path: &Path,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let mut base = PackageArchive::from_bytes(base_full.to_vec())?;
    let mut delta = PackageArchive::open(delta_path)?;

    let manifest = delta.delta_manifest()?;
    if manifest.predecessor_filename != base.manifest().full_filename() {
        return Err(LineageError::MissingPredecessor {
            filename: manifest.predecessor_filename,
        }
        .into());
    }
    let report = manifest.report;

    let mut payload: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    for entry in &report.new {
        payload.insert(entry.target_path.clone(), delta.read_target(&entry.target_path)?);
    }
    for entry in &report.modified {
        let old = base.read_target(&entry.target_path)?;
        let patch_bytes = delta.read_patch(&entry.target_path)?;
        if let Some(expected) = &entry.patch_hash {
            let actual = checksum::hash_bytes(&patch_bytes, HashAlgorithm::fast());
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(IntegrityError::checksum_mismatch(expected, &actual).into());
            }
        }
        let rebuilt = patch::apply(&old, &patch_bytes, cancel)?;
        let actual = checksum::hash_bytes(&rebuilt, HashAlgorithm::fast());
        if !actual.eq_ignore_ascii_case(&entry.hash) {
            return Err(IntegrityError::checksum_mismatch(&entry.hash, &actual).into());
        }
        payload.insert(entry.target_path.clone(), rebuilt);
    }
    for entry in &report.unmodified {
        payload.insert(entry.target_path.clone(), base.read_target(&entry.target_path)?);
    }
    // Deleted files are simply not carried over.

    package::write_full_archive(
        &release.app_id,
        release.rid,
        &release.version,
        ReleaseKind::Full,
        &release.files,
        &payload,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FilesystemFeed;
    use crate::package::{PackOutcome, PackRequest, PackageBuilder, PayloadFile, persist_package};
    use tempfile::TempDir;

    fn rid() -> RuntimeId {
        "linux-x64".parse().unwrap()
    }

    fn request(version: &str, payload: Vec<(&str, Vec<u8>)>) -> PackRequest {
        PackRequest {
            app_id: "demo".to_string(),
            rid: rid(),
            version: SemanticVersion::parse(version).unwrap(),
            channels: vec!["stable".to_string()],
            release_notes: None,
            payload: payload
                .into_iter()
                .map(|(t, d)| PayloadFile::new(t, d))
                .collect(),
            full_root: false,
        }
    }

    /// Genesis plus two deltas, ship files published into `feed_dir`
    async fn publish_chain(feed_dir: &Path) -> (ReleaseLedger, Vec<PackOutcome>) {
        let mut ledger = ReleaseLedger::new();
        let builder = PackageBuilder::new().with_concurrency(2);
        let mut outcomes: Vec<PackOutcome> = Vec::new();

        let payloads = [
            vec![("app.bin", vec![1u8; 2048]), ("data.txt", b"alpha".to_vec())],
            vec![("app.bin", vec![2u8; 2048]), ("data.txt", b"alpha".to_vec())],
            vec![
                ("app.bin", vec![3u8; 2048]),
                ("data.txt", b"alpha".to_vec()),
                ("extra.txt", b"added".to_vec()),
            ],
        ];
        for (i, (version, payload)) in ["1.0.0", "1.1.0", "1.2.0"]
            .into_iter()
            .zip(payloads)
            .enumerate()
        {
            let previous = if i == 0 {
                None
            } else {
                Some(outcomes[i - 1].full_package.clone())
            };
            let outcome = builder
                .pack(request(version, payload), &mut ledger, previous)
                .await
                .unwrap();
            let ship = outcome
                .delta_package
                .as_deref()
                .unwrap_or(&outcome.full_package);
            persist_package(feed_dir, &outcome.release.filename, ship).unwrap();
            outcomes.push(outcome);
        }
        (ledger, outcomes)
    }

    fn context(feed_dir: &Path, cache_dir: &Path, mode: RestoreMode) -> RestoreContext {
        RestoreContext {
            packages_dir: cache_dir.to_path_buf(),
            source: UpdateSource::Plain {
                url: feed_dir.to_string_lossy().to_string(),
            },
            mode,
            channel: Some("stable".to_string()),
            cancel: CancellationToken::new(),
        }
    }

    fn orchestrator() -> RestoreOrchestrator {
        RestoreOrchestrator::new(Arc::new(FilesystemFeed::new())).with_concurrency(2)
    }

    #[tokio::test]
    async fn test_genesis_only_restore() {
        let feed_dir = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();

        let mut ledger = ReleaseLedger::new();
        let outcome = PackageBuilder::new()
            .pack(
                request("1.0.0", vec![("app.bin", b"payload".to_vec())]),
                &mut ledger,
                None,
            )
            .await
            .unwrap();
        persist_package(feed_dir.path(), &outcome.release.filename, &outcome.full_package)
            .unwrap();

        let ctx = context(feed_dir.path(), cache_dir.path(), RestoreMode::Install);
        let summary = orchestrator()
            .restore(&ledger, "demo", rid(), &ctx, &NoopObserver)
            .await
            .unwrap();

        assert!(summary.success);
        assert_eq!(summary.checksum.len(), 1);
        assert!(!summary.checksum[0].ok);
        assert_eq!(summary.download.len(), 1);
        assert!(summary.download[0].ok);
        assert!(summary.reassemble.is_empty());
        assert!(cache_dir.path().join(&outcome.release.filename).exists());
    }

    #[tokio::test]
    async fn test_install_restore_reassembles_newest_only() {
        let feed_dir = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let (ledger, outcomes) = publish_chain(feed_dir.path()).await;

        let ctx = context(feed_dir.path(), cache_dir.path(), RestoreMode::Install);
        let summary = orchestrator()
            .restore(&ledger, "demo", rid(), &ctx, &NoopObserver)
            .await
            .unwrap();

        assert!(summary.success);
        assert_eq!(summary.download.len(), 3);
        assert_eq!(summary.reassemble.len(), 1);
        assert_eq!(
            summary.reassemble[0].filename,
            "demo-linux-x64-1.2.0-full.zip"
        );

        // Only the newest full package is materialized.
        let newest_full = cache_dir.path().join("demo-linux-x64-1.2.0-full.zip");
        assert!(newest_full.exists());
        assert!(!cache_dir.path().join("demo-linux-x64-1.1.0-full.zip").exists());

        // Reconstruction is byte-identical to the directly built package.
        assert_eq!(
            std::fs::read(&newest_full).unwrap(),
            outcomes[2].full_package
        );
    }

    #[tokio::test]
    async fn test_pack_mode_skips_reassembly() {
        let feed_dir = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let (ledger, _) = publish_chain(feed_dir.path()).await;

        let ctx = context(feed_dir.path(), cache_dir.path(), RestoreMode::Pack);
        let summary = orchestrator()
            .restore(&ledger, "demo", rid(), &ctx, &NoopObserver)
            .await
            .unwrap();

        assert!(summary.success);
        assert_eq!(summary.download.len(), 3);
        assert!(summary.reassemble.is_empty());
        assert!(!cache_dir.path().join("demo-linux-x64-1.2.0-full.zip").exists());
    }

    #[tokio::test]
    async fn test_restore_is_idempotent() {
        let feed_dir = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let (ledger, _) = publish_chain(feed_dir.path()).await;

        let ctx = context(feed_dir.path(), cache_dir.path(), RestoreMode::Install);
        let first = orchestrator()
            .restore(&ledger, "demo", rid(), &ctx, &NoopObserver)
            .await
            .unwrap();
        assert!(first.success);

        let second = orchestrator()
            .restore(&ledger, "demo", rid(), &ctx, &NoopObserver)
            .await
            .unwrap();
        assert!(second.success);
        assert!(second.checksum.iter().all(|e| e.ok));
        assert!(second.download.is_empty());
        assert!(second.reassemble.is_empty());
    }

    #[tokio::test]
    async fn test_failed_download_fails_restore() {
        let feed_dir = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let (ledger, _) = publish_chain(feed_dir.path()).await;

        // Remove one ship file from the feed.
        std::fs::remove_file(feed_dir.path().join("demo-linux-x64-1.1.0-delta.zip")).unwrap();

        let ctx = context(feed_dir.path(), cache_dir.path(), RestoreMode::Install);
        let summary = orchestrator()
            .restore(&ledger, "demo", rid(), &ctx, &NoopObserver)
            .await
            .unwrap();

        assert!(!summary.success);
        assert!(summary.download.iter().any(|e| !e.ok));
        assert!(summary.reassemble.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_cached_file_redownloaded() {
        let feed_dir = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let (ledger, _) = publish_chain(feed_dir.path()).await;

        let ctx = context(feed_dir.path(), cache_dir.path(), RestoreMode::Install);
        orchestrator()
            .restore(&ledger, "demo", rid(), &ctx, &NoopObserver)
            .await
            .unwrap();

        // Corrupt one cached delta, keep its size.
        let victim = cache_dir.path().join("demo-linux-x64-1.1.0-delta.zip");
        let mut bytes = std::fs::read(&victim).unwrap();
        bytes[0] ^= 0xff;
        std::fs::write(&victim, &bytes).unwrap();

        let summary = orchestrator()
            .restore(&ledger, "demo", rid(), &ctx, &NoopObserver)
            .await
            .unwrap();
        assert!(summary.success);
        assert_eq!(summary.download.len(), 1);
        assert_eq!(summary.download[0].filename, "demo-linux-x64-1.1.0-delta.zip");
    }

    #[tokio::test]
    async fn test_cancelled_restore() {
        let feed_dir = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let (ledger, _) = publish_chain(feed_dir.path()).await;

        let ctx = context(feed_dir.path(), cache_dir.path(), RestoreMode::Install);
        ctx.cancel.cancel();
        let result = orchestrator()
            .restore(&ledger, "demo", rid(), &ctx, &NoopObserver)
            .await;
        assert!(matches!(result, Err(RolloutError::Cancelled)));
    }

    #[tokio::test]
    async fn test_empty_lineage() {
        let feed_dir = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let ledger = ReleaseLedger::new();

        let ctx = context(feed_dir.path(), cache_dir.path(), RestoreMode::Install);
        let summary = orchestrator()
            .restore(&ledger, "demo", rid(), &ctx, &NoopObserver)
            .await
            .unwrap();
        assert!(summary.success);
        assert!(summary.checksum.is_empty());
    }

    #[tokio::test]
    async fn test_progress_reported() {
        use std::sync::Mutex;

        #[derive(Default)]
        struct Recorder {
            checksum: Mutex<Vec<(u64, u64)>>,
            download_bytes: Mutex<u64>,
        }
        impl RestoreObserver for Recorder {
            fn checksum_progress(&self, _percent: u8, verified: u64, total: u64) {
                self.checksum.lock().unwrap().push((verified, total));
            }
            fn download_progress(
                &self,
                _percent: u8,
                _completed: u64,
                _total: u64,
                bytes: u64,
                _bytes_total: u64,
            ) {
                *self.download_bytes.lock().unwrap() = bytes;
            }
        }

        let feed_dir = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let (ledger, _) = publish_chain(feed_dir.path()).await;

        let recorder = Recorder::default();
        let ctx = context(feed_dir.path(), cache_dir.path(), RestoreMode::Install);
        let summary = orchestrator()
            .restore(&ledger, "demo", rid(), &ctx, &recorder)
            .await
            .unwrap();
        assert!(summary.success);

        let checksum = recorder.checksum.lock().unwrap();
        // Three ship files plus the newest full package.
        assert_eq!(checksum.last().copied(), Some((4, 4)));
        assert!(*recorder.download_bytes.lock().unwrap() > 0);
    }
}
