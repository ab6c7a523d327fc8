//! Package container format and the full/delta package builder.
//!
//! A package is a zip archive with a JSON metadata manifest, a plain-text
//! checksum manifest, and payload entries. Delta packages additionally carry
//! the delta report and the exact predecessor filename they patch against.
//!
//! Archives are written deterministically: fixed entry timestamps, sorted
//! entry order, one compression method. Reassembling a full package from a
//! delta chain therefore reproduces the published archive byte for byte.

use crate::checksum::{self, HashAlgorithm};
use crate::delta::{DeltaReport, DeltaReportEngine};
use crate::ledger::ReleaseLedger;
use crate::patch;
use crate::release::{
    DESCRIPTOR_TARGET_PATH, DeltaInfo, FileEntry, Release, ReleaseDescriptor, ReleaseKind,
    RuntimeId, SemanticVersion,
};
use crate::{PackageError, Result, RolloutError};
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Fixed internal path of the package metadata manifest
pub const MANIFEST_PATH: &str = ".rollout/manifest.json";
/// Fixed internal path of the plain-text checksum manifest
pub const CHECKSUM_MANIFEST_PATH: &str = ".rollout/checksums.txt";
/// Fixed internal path of the delta manifest (delta packages only)
pub const DELTA_MANIFEST_PATH: &str = ".rollout/delta.json";
/// Archive prefix for whole payload files
pub const PAYLOAD_PREFIX: &str = "payload/";
/// Archive prefix for binary patches (delta packages only)
pub const PATCH_PREFIX: &str = "patches/";

/// Target paths owned by the update runtime itself. Always regenerated by
/// the builder, never accepted from caller-supplied payload, so they match
/// the exact version performing the build.
pub const FRAMEWORK_TARGET_PATHS: &[&str] = &[DESCRIPTOR_TARGET_PATH];

/// One archive entry in the metadata manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub target_path: String,
    pub archive_path: String,
    pub size: u64,
    pub hash: String,
}

/// Package identity and file mapping, stored at [`MANIFEST_PATH`].
///
/// Deliberately carries no wall-clock timestamp: the manifest must be
/// reproducible from the release record alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub app_id: String,
    pub rid: RuntimeId,
    pub version: SemanticVersion,
    pub kind: ReleaseKind,
    pub entries: Vec<ManifestEntry>,
}

impl PackageManifest {
    /// Full-package filename for this manifest's identity
    pub fn full_filename(&self) -> String {
        format!("{}-{}-{}-full.zip", self.app_id, self.rid, self.version)
    }

    /// Transient release view used to feed the delta report engine
    pub(crate) fn to_release_stub(&self) -> Release {
        Release {
            app_id: self.app_id.clone(),
            rid: self.rid,
            version: self.version.clone(),
            channels: Vec::new(),
            kind: self.kind,
            filename: self.full_filename(),
            full_size: 0,
            full_checksum: String::new(),
            delta: None,
            new_files: Vec::new(),
            modified_files: Vec::new(),
            unmodified_files: Vec::new(),
            deleted_files: Vec::new(),
            files: self
                .entries
                .iter()
                .map(|e| FileEntry::new(e.target_path.clone(), e.size, e.hash.clone()))
                .collect(),
            created_at: Utc::now(),
            release_notes: None,
        }
    }
}

/// Predecessor pointer and audit copy of the delta report, stored at
/// [`DELTA_MANIFEST_PATH`] in delta packages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaManifest {
    pub predecessor_filename: String,
    pub report: DeltaReport,
}

/// One payload file handed to the builder
#[derive(Debug, Clone)]
pub struct PayloadFile {
    pub target_path: String,
    pub data: Vec<u8>,
}

impl PayloadFile {
    pub fn new(target_path: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            target_path: target_path.into(),
            data,
        }
    }
}

/// Collect payload files from a directory tree, target paths relative to
/// `dir` with forward slashes.
pub fn payload_from_dir(dir: &Path) -> Result<Vec<PayloadFile>> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<PayloadFile>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                walk(root, &path, out)?;
            } else {
                let target = path
                    .strip_prefix(root)
                    .map_err(|e| RolloutError::internal(e.to_string()))?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(PayloadFile::new(target, std::fs::read(&path)?));
            }
        }
        Ok(())
    }

    let mut out = Vec::new();
    walk(dir, dir, &mut out)?;
    Ok(out)
}

/// Read access to a package archive
pub struct PackageArchive {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    manifest: PackageManifest,
}

impl PackageArchive {
    /// Open a package from its raw bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).map_err(PackageError::from)?;
        let manifest_bytes = read_entry(&mut archive, MANIFEST_PATH)?;
        let manifest: PackageManifest =
            serde_json::from_slice(&manifest_bytes).map_err(PackageError::from)?;
        Ok(Self { archive, manifest })
    }

    /// Open a package file on disk
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_bytes(std::fs::read(path)?)
    }

    pub fn manifest(&self) -> &PackageManifest {
        &self.manifest
    }

    /// The raw checksum manifest text
    pub fn checksum_manifest(&mut self) -> Result<String> {
        let bytes = read_entry(&mut self.archive, CHECKSUM_MANIFEST_PATH)?;
        String::from_utf8(bytes)
            .map_err(|e| PackageError::invalid_archive(format!("checksum manifest: {}", e)).into())
    }

    /// The delta manifest; errors on full packages
    pub fn delta_manifest(&mut self) -> Result<DeltaManifest> {
        let bytes = read_entry(&mut self.archive, DELTA_MANIFEST_PATH)?;
        serde_json::from_slice(&bytes).map_err(|e| PackageError::from(e).into())
    }

    /// The embedded release descriptor
    pub fn descriptor(&mut self) -> Result<ReleaseDescriptor> {
        let bytes = self.read_target(DESCRIPTOR_TARGET_PATH)?;
        ReleaseDescriptor::from_bytes(&bytes)
    }

    /// Read a whole payload file by target path
    pub fn read_target(&mut self, target_path: &str) -> Result<Vec<u8>> {
        read_entry(&mut self.archive, &format!("{}{}", PAYLOAD_PREFIX, target_path))
    }

    /// Read a binary patch by target path (delta packages)
    pub fn read_patch(&mut self, target_path: &str) -> Result<Vec<u8>> {
        read_entry(&mut self.archive, &format!("{}{}", PATCH_PREFIX, target_path))
    }

    /// All whole payload files, keyed by target path
    pub fn payload_map(&mut self) -> Result<BTreeMap<String, Vec<u8>>> {
        let mut map = BTreeMap::new();
        for i in 0..self.archive.len() {
            let mut file = self.archive.by_index(i).map_err(PackageError::from)?;
            let name = file.name().to_string();
            if let Some(target) = name.strip_prefix(PAYLOAD_PREFIX) {
                let mut data = Vec::with_capacity(file.size() as usize);
                file.read_to_end(&mut data)?;
                map.insert(target.to_string(), data);
            }
        }
        Ok(map)
    }
}

fn read_entry(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> Result<Vec<u8>> {
    let mut file = archive
        .by_name(name)
        .map_err(|_| PackageError::missing_entry(name))?;
    let mut data = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut data)?;
    Ok(data)
}

/// Input for one publish operation
#[derive(Debug, Clone)]
pub struct PackRequest {
    pub app_id: String,
    pub rid: RuntimeId,
    pub version: SemanticVersion,
    pub channels: Vec<String>,
    pub release_notes: Option<String>,
    pub payload: Vec<PayloadFile>,
    /// Root a fresh lineage with a `Full` release instead of `Genesis`
    /// (used after a `gc` rebuild)
    pub full_root: bool,
}

/// Result of one publish operation. Nothing is written to disk; artifacts
/// are persisted by the caller via [`persist_package`] once the whole build
/// has succeeded.
#[derive(Debug)]
pub struct PackOutcome {
    pub release: Release,
    pub full_package: Vec<u8>,
    pub delta_package: Option<Vec<u8>>,
}

/// Builds full and delta packages and registers the resulting releases
#[derive(Debug)]
pub struct PackageBuilder {
    concurrency: usize,
}

impl PackageBuilder {
    pub fn new() -> Self {
        let concurrency = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self { concurrency }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Publish one version: build its full package and, when the lineage
    /// already has releases, the delta package against `previous_full`.
    ///
    /// The build is all-or-nothing: everything is assembled in memory and
    /// the ledger is only touched after every artifact exists.
    pub async fn pack(
        &self,
        request: PackRequest,
        ledger: &mut ReleaseLedger,
        previous_full: Option<Vec<u8>>,
    ) -> Result<PackOutcome> {
        let payload = validate_payload(request.payload)?;

        let lineage_empty = ledger.releases_for(&request.app_id, request.rid).is_empty();
        let kind = match (lineage_empty, previous_full.is_some()) {
            (true, false) => {
                if request.full_root {
                    ReleaseKind::Full
                } else {
                    ReleaseKind::Genesis
                }
            }
            (false, true) => ReleaseKind::Delta,
            (true, true) => {
                return Err(PackageError::invalid_input(
                    "predecessor package supplied for an empty lineage",
                )
                .into());
            }
            (false, false) => {
                return Err(PackageError::invalid_input(
                    "lineage has releases; the predecessor full package is required",
                )
                .into());
            }
        };

        let full_filename = format!(
            "{}-{}-{}-full.zip",
            request.app_id, request.rid, request.version
        );
        let delta_filename = format!(
            "{}-{}-{}-delta.zip",
            request.app_id, request.rid, request.version
        );
        let filename = if kind.is_delta() {
            delta_filename.clone()
        } else {
            full_filename.clone()
        };

        let descriptor = ReleaseDescriptor {
            format_version: ReleaseDescriptor::CURRENT_FORMAT,
            app_id: request.app_id.clone(),
            rid: request.rid,
            version: request.version.clone(),
            kind,
            filename: filename.clone(),
        };

        let mut payload_map: BTreeMap<String, Vec<u8>> = payload
            .into_iter()
            .map(|f| (f.target_path, f.data))
            .collect();
        payload_map.insert(DESCRIPTOR_TARGET_PATH.to_string(), descriptor.to_bytes()?);

        let files: Vec<FileEntry> = payload_map
            .iter()
            .map(|(target, data)| {
                FileEntry::new(
                    target.clone(),
                    data.len() as u64,
                    checksum::hash_bytes(data, HashAlgorithm::fast()),
                )
            })
            .collect();

        let archive_kind = if kind == ReleaseKind::Genesis {
            ReleaseKind::Genesis
        } else {
            ReleaseKind::Full
        };
        let full_package = write_full_archive(
            &request.app_id,
            request.rid,
            &request.version,
            archive_kind,
            &files,
            &payload_map,
        )?;
        let full_checksum = checksum::hash_bytes(&full_package, HashAlgorithm::strong());

        let span = tracing::info_span!(
            "pack",
            app_id = %request.app_id,
            rid = %request.rid,
            version = %request.version,
            kind = ?kind
        );
        let _guard = span.enter();

        let mut release = Release {
            app_id: request.app_id.clone(),
            rid: request.rid,
            version: request.version.clone(),
            channels: request.channels,
            kind,
            filename,
            full_size: full_package.len() as u64,
            full_checksum,
            delta: None,
            new_files: files.clone(),
            modified_files: Vec::new(),
            unmodified_files: Vec::new(),
            deleted_files: Vec::new(),
            files: files.clone(),
            created_at: Utc::now(),
            release_notes: request.release_notes,
        };

        let delta_package = match previous_full {
            None => None,
            Some(previous_bytes) => {
                let mut previous = PackageArchive::from_bytes(previous_bytes)?;
                let expected_predecessor = ledger
                    .most_recent_release(&request.app_id, request.rid)
                    .map(|r| r.full_filename())
                    .unwrap_or_default();
                if previous.manifest().full_filename() != expected_predecessor {
                    return Err(PackageError::invalid_input(format!(
                        "predecessor package is {}, expected {}",
                        previous.manifest().full_filename(),
                        expected_predecessor
                    ))
                    .into());
                }

                let (delta_bytes, report) = self
                    .build_delta(&mut previous, &release, &payload_map, &expected_predecessor)
                    .await?;
                release.new_files = report.new.clone();
                release.modified_files = report.modified.clone();
                release.unmodified_files = report.unmodified.clone();
                release.deleted_files = report.deleted.clone();
                release.delta = Some(DeltaInfo {
                    size: delta_bytes.len() as u64,
                    checksum: checksum::hash_bytes(&delta_bytes, HashAlgorithm::strong()),
                    predecessor_filename: previous.manifest().full_filename(),
                });
                Some(delta_bytes)
            }
        };

        ledger.add(release.clone())?;
        ledger.bump();

        tracing::info!(
            files = release.files.len(),
            full_size = release.full_size,
            delta = release.delta.is_some(),
            "Packaged release"
        );

        Ok(PackOutcome {
            release,
            full_package,
            delta_package,
        })
    }

    async fn build_delta(
        &self,
        previous: &mut PackageArchive,
        current: &Release,
        payload_map: &BTreeMap<String, Vec<u8>>,
        predecessor_filename: &str,
    ) -> Result<(Vec<u8>, DeltaReport)> {
        let previous_stub = previous.manifest().to_release_stub();
        let mut report = DeltaReportEngine::new().generate(&previous_stub, current)?;

        // Diff every modified pair concurrently; independent files, CPU bound.
        let mut jobs = Vec::with_capacity(report.modified.len());
        for entry in &report.modified {
            let old = previous.read_target(&entry.target_path)?;
            let new = payload_map
                .get(&entry.target_path)
                .cloned()
                .ok_or_else(|| {
                    RolloutError::internal(format!("modified file {} not in payload", entry.target_path))
                })?;
            jobs.push((entry.target_path.clone(), old, new));
        }

        let patches: BTreeMap<String, Vec<u8>> = stream::iter(jobs.into_iter().map(
            |(target, old, new)| async move {
                tokio::task::spawn_blocking(move || {
                    let patch = patch::diff(&old, &new)?;
                    Ok::<_, RolloutError>((target, patch))
                })
                .await
                .map_err(|e| RolloutError::internal(format!("diff task failed: {}", e)))?
            },
        ))
        .buffer_unordered(self.concurrency)
        .try_collect()
        .await?;

        for entry in &mut report.modified {
            let patch = patches
                .get(&entry.target_path)
                .ok_or_else(|| RolloutError::internal("patch missing for modified file"))?;
            entry.patch_hash = Some(checksum::hash_bytes(patch, HashAlgorithm::fast()));
        }

        let delta_bytes =
            write_delta_archive(current, &report, payload_map, &patches, predecessor_filename)?;
        Ok((delta_bytes, report))
    }
}

impl Default for PackageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_payload(payload: Vec<PayloadFile>) -> Result<Vec<PayloadFile>> {
    if payload.is_empty() {
        return Err(PackageError::invalid_input("payload is empty").into());
    }

    let mut seen = std::collections::HashSet::new();
    let mut accepted = Vec::with_capacity(payload.len());
    for file in payload {
        let target = &file.target_path;
        if target.is_empty()
            || target.starts_with('/')
            || target.contains('\\')
            || target.split('/').any(|c| c == ".." || c.is_empty())
        {
            return Err(
                PackageError::invalid_input(format!("invalid target path: {}", target)).into(),
            );
        }
        // Framework files are regenerated by the builder.
        if FRAMEWORK_TARGET_PATHS.contains(&target.as_str()) {
            continue;
        }
        if !seen.insert(target.clone()) {
            return Err(
                PackageError::invalid_input(format!("duplicate target path: {}", target)).into(),
            );
        }
        accepted.push(file);
    }
    Ok(accepted)
}

fn zip_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
}

/// Write a full package archive. Shared by the builder and the restore
/// reassembly path; both must produce identical bytes for identical inputs.
pub(crate) fn write_full_archive(
    app_id: &str,
    rid: RuntimeId,
    version: &SemanticVersion,
    kind: ReleaseKind,
    files: &[FileEntry],
    payload: &BTreeMap<String, Vec<u8>>,
) -> Result<Vec<u8>> {
    let entries: Vec<ManifestEntry> = files
        .iter()
        .map(|f| ManifestEntry {
            target_path: f.target_path.clone(),
            archive_path: format!("{}{}", PAYLOAD_PREFIX, f.target_path),
            size: f.size,
            hash: f.hash.clone(),
        })
        .collect();
    let manifest = PackageManifest {
        app_id: app_id.to_string(),
        rid,
        version: version.clone(),
        kind,
        entries,
    };

    let checksum_lines: String = files
        .iter()
        .map(|f| format!("{}:{}{}:{}\n", f.target_path, PAYLOAD_PREFIX, f.target_path, f.hash))
        .collect();

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip_options();

    zip.start_file(MANIFEST_PATH, options).map_err(PackageError::from)?;
    zip.write_all(&serde_json::to_vec_pretty(&manifest).map_err(PackageError::from)?)?;
    zip.start_file(CHECKSUM_MANIFEST_PATH, options).map_err(PackageError::from)?;
    zip.write_all(checksum_lines.as_bytes())?;

    for (target, data) in payload {
        zip.start_file(format!("{}{}", PAYLOAD_PREFIX, target), options)
            .map_err(PackageError::from)?;
        zip.write_all(data)?;
    }

    let cursor = zip.finish().map_err(PackageError::from)?;
    Ok(cursor.into_inner())
}

fn write_delta_archive(
    release: &Release,
    report: &DeltaReport,
    payload: &BTreeMap<String, Vec<u8>>,
    patches: &BTreeMap<String, Vec<u8>>,
    predecessor_filename: &str,
) -> Result<Vec<u8>> {
    let mut entries = Vec::new();
    for entry in &report.new {
        entries.push(ManifestEntry {
            target_path: entry.target_path.clone(),
            archive_path: format!("{}{}", PAYLOAD_PREFIX, entry.target_path),
            size: entry.size,
            hash: entry.hash.clone(),
        });
    }
    for entry in &report.modified {
        let patch = &patches[&entry.target_path];
        entries.push(ManifestEntry {
            target_path: entry.target_path.clone(),
            archive_path: format!("{}{}", PATCH_PREFIX, entry.target_path),
            size: patch.len() as u64,
            hash: entry.patch_hash.clone().unwrap_or_default(),
        });
    }
    entries.sort_by(|a, b| a.target_path.cmp(&b.target_path));

    let manifest = PackageManifest {
        app_id: release.app_id.clone(),
        rid: release.rid,
        version: release.version.clone(),
        kind: ReleaseKind::Delta,
        entries,
    };

    // The checksum manifest lists the complete full snapshot; entries not
    // shipped in this archive are marked "-" and resolved from the
    // predecessor (or dropped, for deleted files) during reassembly.
    let shipped: BTreeMap<&str, String> = report
        .new
        .iter()
        .map(|e| (e.target_path.as_str(), format!("{}{}", PAYLOAD_PREFIX, e.target_path)))
        .chain(
            report
                .modified
                .iter()
                .map(|e| (e.target_path.as_str(), format!("{}{}", PATCH_PREFIX, e.target_path))),
        )
        .collect();
    let checksum_lines: String = release
        .files
        .iter()
        .map(|f| {
            let archive = shipped
                .get(f.target_path.as_str())
                .map(String::as_str)
                .unwrap_or("-");
            format!("{}:{}:{}\n", f.target_path, archive, f.hash)
        })
        .collect();

    let delta_manifest = DeltaManifest {
        predecessor_filename: predecessor_filename.to_string(),
        report: report.clone(),
    };

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip_options();

    zip.start_file(MANIFEST_PATH, options).map_err(PackageError::from)?;
    zip.write_all(&serde_json::to_vec_pretty(&manifest).map_err(PackageError::from)?)?;
    zip.start_file(CHECKSUM_MANIFEST_PATH, options).map_err(PackageError::from)?;
    zip.write_all(checksum_lines.as_bytes())?;
    zip.start_file(DELTA_MANIFEST_PATH, options).map_err(PackageError::from)?;
    zip.write_all(&serde_json::to_vec_pretty(&delta_manifest).map_err(PackageError::from)?)?;

    for entry in &report.new {
        let data = payload.get(&entry.target_path).ok_or_else(|| {
            RolloutError::internal(format!("new file {} not in payload", entry.target_path))
        })?;
        zip.start_file(format!("{}{}", PAYLOAD_PREFIX, entry.target_path), options)
            .map_err(PackageError::from)?;
        zip.write_all(data)?;
    }
    for entry in &report.modified {
        zip.start_file(format!("{}{}", PATCH_PREFIX, entry.target_path), options)
            .map_err(PackageError::from)?;
        zip.write_all(&patches[&entry.target_path])?;
    }

    let cursor = zip.finish().map_err(PackageError::from)?;
    Ok(cursor.into_inner())
}

/// Persist a built package with write-to-temp-then-rename so a concurrent
/// restore never observes a half-written package.
pub fn persist_package(dir: &Path, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let dest = dir.join(filename);
    let tmp = dir.join(format!("{}.tmp", filename));
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, &dest)?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rid() -> RuntimeId {
        "linux-x64".parse().unwrap()
    }

    fn request(version: &str, payload: Vec<(&str, &[u8])>) -> PackRequest {
        PackRequest {
            app_id: "demo".to_string(),
            rid: rid(),
            version: SemanticVersion::parse(version).unwrap(),
            channels: vec!["stable".to_string()],
            release_notes: None,
            payload: payload
                .into_iter()
                .map(|(t, d)| PayloadFile::new(t, d.to_vec()))
                .collect(),
            full_root: false,
        }
    }

    #[tokio::test]
    async fn test_genesis_pack() {
        let mut ledger = ReleaseLedger::new();
        let outcome = PackageBuilder::new()
            .pack(
                request("1.0.0", vec![("app.bin", b"binary"), ("lib/lib.so", b"library")]),
                &mut ledger,
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.release.kind, ReleaseKind::Genesis);
        assert!(outcome.delta_package.is_none());
        assert_eq!(ledger.releases().len(), 1);
        assert_eq!(ledger.db_version(), 1);

        let mut archive = PackageArchive::from_bytes(outcome.full_package).unwrap();
        assert_eq!(archive.manifest().app_id, "demo");
        // payload plus the regenerated descriptor
        assert_eq!(archive.manifest().entries.len(), 3);
        assert_eq!(archive.read_target("app.bin").unwrap(), b"binary");

        let descriptor = archive.descriptor().unwrap();
        assert_eq!(descriptor.version, SemanticVersion::new(1, 0, 0));
        assert_eq!(descriptor.kind, ReleaseKind::Genesis);

        let manifest_text = archive.checksum_manifest().unwrap();
        assert_eq!(manifest_text.lines().count(), 3);
        let lines: Vec<&str> = manifest_text.lines().collect();
        let mut sorted = lines.clone();
        sorted.sort_unstable();
        assert_eq!(lines, sorted);
    }

    #[tokio::test]
    async fn test_caller_supplied_framework_file_regenerated() {
        let mut ledger = ReleaseLedger::new();
        let outcome = PackageBuilder::new()
            .pack(
                request(
                    "1.0.0",
                    vec![("app.bin", b"binary"), (DESCRIPTOR_TARGET_PATH, b"forged")],
                ),
                &mut ledger,
                None,
            )
            .await
            .unwrap();

        let mut archive = PackageArchive::from_bytes(outcome.full_package).unwrap();
        let descriptor_bytes = archive.read_target(DESCRIPTOR_TARGET_PATH).unwrap();
        assert_ne!(descriptor_bytes, b"forged");
        assert!(archive.descriptor().is_ok());
    }

    #[tokio::test]
    async fn test_delta_pack() {
        let mut ledger = ReleaseLedger::new();
        let builder = PackageBuilder::new().with_concurrency(2);

        let genesis = builder
            .pack(
                request("1.0.0", vec![("app.bin", b"version one"), ("keep.txt", b"same")]),
                &mut ledger,
                None,
            )
            .await
            .unwrap();

        let outcome = builder
            .pack(
                request(
                    "1.0.1",
                    vec![("app.bin", b"version two!"), ("keep.txt", b"same"), ("extra.txt", b"new")],
                ),
                &mut ledger,
                Some(genesis.full_package.clone()),
            )
            .await
            .unwrap();

        assert_eq!(outcome.release.kind, ReleaseKind::Delta);
        let delta_info = outcome.release.delta.as_ref().unwrap();
        assert_eq!(
            delta_info.predecessor_filename,
            "demo-linux-x64-1.0.0-full.zip"
        );

        let delta_bytes = outcome.delta_package.unwrap();
        let mut delta = PackageArchive::from_bytes(delta_bytes).unwrap();
        let delta_manifest = delta.delta_manifest().unwrap();
        assert_eq!(delta_manifest.report.modified.len(), 1);
        assert_eq!(delta_manifest.report.unmodified.len(), 1);
        // extra.txt plus the always-replaced descriptor
        assert_eq!(delta_manifest.report.new.len(), 2);

        // Modified files ship as patches, unmodified files not at all.
        assert!(delta.read_patch("app.bin").is_ok());
        assert!(delta.read_target("extra.txt").is_ok());
        assert!(delta.read_target("keep.txt").is_err());

        // The patch reconstructs the new file.
        let patch_bytes = delta.read_patch("app.bin").unwrap();
        let token = tokio_util::sync::CancellationToken::new();
        let restored = patch::apply(b"version one", &patch_bytes, &token).unwrap();
        assert_eq!(restored, b"version two!");
    }

    #[tokio::test]
    async fn test_delta_requires_predecessor() {
        let mut ledger = ReleaseLedger::new();
        let builder = PackageBuilder::new();
        builder
            .pack(request("1.0.0", vec![("a", b"1")]), &mut ledger, None)
            .await
            .unwrap();

        let result = builder
            .pack(request("1.0.1", vec![("a", b"2")]), &mut ledger, None)
            .await;
        assert!(matches!(
            result,
            Err(RolloutError::Package(PackageError::InvalidInput { .. }))
        ));
    }

    #[tokio::test]
    async fn test_wrong_predecessor_rejected() {
        let mut ledger = ReleaseLedger::new();
        let builder = PackageBuilder::new();
        let genesis = builder
            .pack(request("1.0.0", vec![("a", b"1")]), &mut ledger, None)
            .await
            .unwrap();
        builder
            .pack(
                request("1.0.1", vec![("a", b"2")]),
                &mut ledger,
                Some(genesis.full_package.clone()),
            )
            .await
            .unwrap();

        // 1.0.2 must patch against 1.0.1, not 1.0.0.
        let result = builder
            .pack(
                request("1.0.2", vec![("a", b"3")]),
                &mut ledger,
                Some(genesis.full_package.clone()),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_empty_payload_rejected() {
        let mut ledger = ReleaseLedger::new();
        let result = PackageBuilder::new()
            .pack(request("1.0.0", vec![]), &mut ledger, None)
            .await;
        assert!(result.is_err());
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_target_path_rejected() {
        let mut ledger = ReleaseLedger::new();
        let result = PackageBuilder::new()
            .pack(
                request("1.0.0", vec![("../escape", b"x")]),
                &mut ledger,
                None,
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_deterministic_archives() {
        let build = || async {
            let mut ledger = ReleaseLedger::new();
            PackageBuilder::new()
                .pack(
                    request("1.0.0", vec![("a.bin", b"aaaa"), ("b.bin", b"bbbb")]),
                    &mut ledger,
                    None,
                )
                .await
                .unwrap()
                .full_package
        };
        assert_eq!(build().await, build().await);
    }

    #[test]
    fn test_payload_from_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("root.txt"), b"r").unwrap();
        std::fs::write(dir.path().join("sub/nested.txt"), b"n").unwrap();

        let mut payload = payload_from_dir(dir.path()).unwrap();
        payload.sort_by(|a, b| a.target_path.cmp(&b.target_path));
        assert_eq!(payload.len(), 2);
        assert_eq!(payload[0].target_path, "root.txt");
        assert_eq!(payload[1].target_path, "sub/nested.txt");
    }

    #[test]
    fn test_persist_package() {
        let dir = TempDir::new().unwrap();
        let path = persist_package(dir.path(), "demo.zip", b"bytes").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"bytes");
        assert!(!dir.path().join("demo.zip.tmp").exists());
    }
}
