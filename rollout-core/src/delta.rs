use crate::release::{DESCRIPTOR_TARGET_PATH, FileEntry, Release};
use crate::{IntegrityError, LineageError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Target paths that are always shipped whole in a delta package, never as a
/// binary patch. These files change incompatibly on every release.
pub const ALWAYS_REPLACE_PATHS: &[&str] = &[DESCRIPTOR_TARGET_PATH];

/// Classification of every payload file between two consecutive releases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaReport {
    /// Files present only in the current manifest (or always-replace files)
    pub new: Vec<FileEntry>,
    /// Files whose content hash changed; shipped as binary patches
    pub modified: Vec<FileEntry>,
    /// Files with identical content; reused from the predecessor
    pub unmodified: Vec<FileEntry>,
    /// Files present only in the previous manifest; removed on restore
    pub deleted: Vec<FileEntry>,
}

impl DeltaReport {
    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        !self.new.is_empty() || !self.modified.is_empty() || !self.deleted.is_empty()
    }

    /// Get a summary of the report
    pub fn summary(&self) -> String {
        format!(
            "Delta report: {} new, {} modified, {} unmodified, {} deleted",
            self.new.len(),
            self.modified.len(),
            self.unmodified.len(),
            self.deleted.len()
        )
    }
}

/// Delta report engine: classifies payload files by comparing the previous
/// and current full-snapshot manifests.
#[derive(Debug, Default)]
pub struct DeltaReportEngine;

impl DeltaReportEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff the file manifests of two releases from the same lineage.
    ///
    /// Refuses to diff across lineages: the previous release must not be
    /// newer than the current one, and both must share a runtime identifier.
    pub fn generate(&self, previous: &Release, current: &Release) -> Result<DeltaReport> {
        if previous.version > current.version {
            return Err(LineageError::VersionOrder {
                previous: previous.version.to_string(),
                current: current.version.to_string(),
            }
            .into());
        }
        if previous.rid != current.rid {
            return Err(LineageError::RuntimeMismatch {
                previous: previous.rid.to_string(),
                current: current.rid.to_string(),
            }
            .into());
        }

        let previous_by_path: HashMap<&str, &FileEntry> = previous
            .files
            .iter()
            .map(|f| (f.target_path.as_str(), f))
            .collect();

        let mut new = Vec::new();
        let mut modified = Vec::new();
        let mut unmodified = Vec::new();

        for entry in &current.files {
            if ALWAYS_REPLACE_PATHS.contains(&entry.target_path.as_str()) {
                new.push(entry.clone());
                continue;
            }
            match previous_by_path.get(entry.target_path.as_str()) {
                None => new.push(entry.clone()),
                Some(old) if old.hash != entry.hash => modified.push(entry.clone()),
                Some(_) => unmodified.push(entry.clone()),
            }
        }

        let current_paths: HashSet<&str> = current
            .files
            .iter()
            .map(|f| f.target_path.as_str())
            .collect();
        let deleted: Vec<FileEntry> = previous
            .files
            .iter()
            .filter(|f| !current_paths.contains(f.target_path.as_str()))
            .cloned()
            .collect();

        let mut report = DeltaReport {
            new,
            modified,
            unmodified,
            deleted,
        };
        report.new.sort_by(|a, b| a.target_path.cmp(&b.target_path));
        report
            .modified
            .sort_by(|a, b| a.target_path.cmp(&b.target_path));
        report
            .unmodified
            .sort_by(|a, b| a.target_path.cmp(&b.target_path));
        report
            .deleted
            .sort_by(|a, b| a.target_path.cmp(&b.target_path));

        Self::check_partition(&report)?;
        Ok(report)
    }

    /// Internal consistency gate: no target path may appear in more than one
    /// classification list. Cannot fire if `generate` is correct.
    fn check_partition(report: &DeltaReport) -> Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        let lists = [
            &report.new,
            &report.modified,
            &report.unmodified,
            &report.deleted,
        ];
        for entry in lists.into_iter().flatten() {
            if !seen.insert(entry.target_path.as_str()) {
                return Err(IntegrityError::DuplicateClassification {
                    path: entry.target_path.clone(),
                }
                .into());
            }
        }
        Ok(())
    }
}
