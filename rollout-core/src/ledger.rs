//! The release ledger: the catalog of every release ever produced, published
//! to the feed as its own package and downloaded read-only by clients before
//! a restore.

use crate::release::{Release, ReleaseKind, RuntimeId, SemanticVersion};
use crate::{LedgerError, LineageError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ledger wire-format schema version. Bumped on incompatible layout changes;
/// readers reject catalogs they cannot interpret.
pub const LEDGER_SCHEMA_VERSION: u32 = 1;

/// Append-only catalog of all releases across all applications and runtime
/// identifiers. Mutated only by the package builder during a publish; the
/// restore side receives an immutable snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseLedger {
    schema_version: u32,
    /// Monotonically bumped on every publish; a lower value than the feed's
    /// copy means the local catalog is stale.
    db_version: u64,
    /// Regenerated on every publish; two catalogs with equal `db_version`
    /// but different pack ids signal conflicting concurrent publishes.
    pack_id: Uuid,
    releases: Vec<Release>,
}

impl ReleaseLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self {
            schema_version: LEDGER_SCHEMA_VERSION,
            db_version: 0,
            pack_id: Uuid::new_v4(),
            releases: Vec::new(),
        }
    }

    pub fn db_version(&self) -> u64 {
        self.db_version
    }

    pub fn pack_id(&self) -> Uuid {
        self.pack_id
    }

    pub fn releases(&self) -> &[Release] {
        &self.releases
    }

    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }

    /// Register a new release.
    ///
    /// Rejects duplicate filenames, non-increasing versions within the
    /// lineage, second lineage roots, and deltas whose named predecessor is
    /// not in the catalog.
    pub fn add(&mut self, release: Release) -> Result<()> {
        if self
            .releases
            .iter()
            .any(|r| r.filename == release.filename)
        {
            return Err(LedgerError::DuplicateFilename {
                filename: release.filename,
            }
            .into());
        }

        let lineage: Vec<&Release> = self
            .releases
            .iter()
            .filter(|r| r.same_lineage(&release))
            .collect();

        if let Some(max) = lineage.iter().map(|r| &r.version).max() {
            if release.version <= *max {
                return Err(LedgerError::NonIncreasingVersion {
                    app_id: release.app_id,
                    rid: release.rid.to_string(),
                    version: release.version.to_string(),
                }
                .into());
            }
        }

        if release.kind.is_root() && lineage.iter().any(|r| r.kind.is_root()) {
            return Err(LedgerError::DuplicateRoot {
                app_id: release.app_id,
                rid: release.rid.to_string(),
            }
            .into());
        }

        // The predecessor pointer names the predecessor's full package,
        // which for delta predecessors differs from their ship filename.
        if let Some(delta) = &release.delta {
            let predecessor_known = lineage
                .iter()
                .any(|r| r.full_filename() == delta.predecessor_filename);
            if !predecessor_known {
                return Err(LineageError::MissingPredecessor {
                    filename: release.filename,
                }
                .into());
            }
        }

        self.releases.push(release);
        self.sort();
        Ok(())
    }

    /// Remove all releases for a lineage. Used when rebuilding a lineage
    /// from scratch.
    pub fn gc(&mut self, app_id: &str, rid: RuntimeId) {
        self.releases
            .retain(|r| !(r.app_id == app_id && r.rid == rid));
    }

    /// Remove a specific subset of a lineage (e.g. releases that have been
    /// superseded), re-sorting by version.
    pub fn demote(&mut self, app_id: &str, rid: RuntimeId, filenames: &[String]) {
        self.releases.retain(|r| {
            !(r.app_id == app_id && r.rid == rid && filenames.contains(&r.filename))
        });
        self.sort();
    }

    /// Record a publish: bump the database version and regenerate the pack id
    pub fn bump(&mut self) {
        self.db_version += 1;
        self.pack_id = Uuid::new_v4();
    }

    /// All releases for a lineage, ordered by version
    pub fn releases_for(&self, app_id: &str, rid: RuntimeId) -> Vec<&Release> {
        self.releases
            .iter()
            .filter(|r| r.app_id == app_id && r.rid == rid)
            .collect()
    }

    /// Releases for a lineage restricted to one channel, ordered by version
    pub fn releases_in_channel(&self, app_id: &str, rid: RuntimeId, channel: &str) -> Vec<&Release> {
        self.releases
            .iter()
            .filter(|r| {
                r.app_id == app_id && r.rid == rid && r.channels.iter().any(|c| c == channel)
            })
            .collect()
    }

    /// Most recent release in a lineage
    pub fn most_recent_release(&self, app_id: &str, rid: RuntimeId) -> Option<&Release> {
        self.releases_for(app_id, rid).into_iter().next_back()
    }

    /// The genesis release of a lineage
    pub fn genesis_release(&self, app_id: &str, rid: RuntimeId) -> Option<&Release> {
        self.releases_for(app_id, rid)
            .into_iter()
            .find(|r| r.kind == ReleaseKind::Genesis)
    }

    /// Delta releases strictly newer than `version`, ordered by version
    pub fn delta_releases_newer_than(
        &self,
        app_id: &str,
        rid: RuntimeId,
        version: &SemanticVersion,
    ) -> Vec<&Release> {
        self.releases_for(app_id, rid)
            .into_iter()
            .filter(|r| r.is_delta() && r.version > *version)
            .collect()
    }

    /// Serialize to the compact catalog wire form
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| LedgerError::from(e).into())
    }

    /// Deserialize from the catalog wire form, rejecting incompatible schemas
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let ledger: Self = bincode::deserialize(bytes).map_err(LedgerError::from)?;
        if ledger.schema_version != LEDGER_SCHEMA_VERSION {
            return Err(LedgerError::SchemaVersion {
                found: ledger.schema_version,
                supported: LEDGER_SCHEMA_VERSION,
            }
            .into());
        }
        Ok(ledger)
    }

    fn sort(&mut self) {
        self.releases.sort_by(|a, b| {
            (&a.app_id, a.rid.to_string(), &a.version)
                .cmp(&(&b.app_id, b.rid.to_string(), &b.version))
        });
    }
}

impl Default for ReleaseLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::{DeltaInfo, FileEntry};
    use chrono::Utc;

    fn rid() -> RuntimeId {
        "linux-x64".parse().unwrap()
    }

    fn release(version: &str, kind: ReleaseKind) -> Release {
        let version = SemanticVersion::parse(version).unwrap();
        let filename = match kind {
            ReleaseKind::Delta => format!("app-linux-x64-{}-delta.zip", version),
            _ => format!("app-linux-x64-{}-full.zip", version),
        };
        Release {
            app_id: "app".to_string(),
            rid: rid(),
            version,
            channels: vec!["stable".to_string()],
            kind,
            filename,
            full_size: 100,
            full_checksum: "cafe".to_string(),
            delta: None,
            new_files: vec![],
            modified_files: vec![],
            unmodified_files: vec![],
            deleted_files: vec![],
            files: vec![FileEntry::new("app.bin", 100, "hash")],
            created_at: Utc::now(),
            release_notes: None,
        }
    }

    fn delta_release(version: &str, predecessor: &str) -> Release {
        let mut r = release(version, ReleaseKind::Delta);
        r.delta = Some(DeltaInfo {
            size: 10,
            checksum: "beef".to_string(),
            predecessor_filename: predecessor.to_string(),
        });
        r
    }

    #[test]
    fn test_add_and_query() {
        let mut ledger = ReleaseLedger::new();
        ledger.add(release("1.0.0", ReleaseKind::Genesis)).unwrap();
        ledger
            .add(delta_release("1.0.1", "app-linux-x64-1.0.0-full.zip"))
            .unwrap();
        ledger
            .add(delta_release("1.0.2", "app-linux-x64-1.0.1-full.zip"))
            .unwrap();

        assert_eq!(ledger.releases_for("app", rid()).len(), 3);
        assert_eq!(
            ledger.most_recent_release("app", rid()).unwrap().version,
            SemanticVersion::new(1, 0, 2)
        );
        assert_eq!(
            ledger.genesis_release("app", rid()).unwrap().version,
            SemanticVersion::new(1, 0, 0)
        );

        let newer =
            ledger.delta_releases_newer_than("app", rid(), &SemanticVersion::new(1, 0, 0));
        assert_eq!(newer.len(), 2);
        assert!(newer.iter().all(|r| r.is_delta()));
    }

    #[test]
    fn test_duplicate_filename_rejected() {
        let mut ledger = ReleaseLedger::new();
        ledger.add(release("1.0.0", ReleaseKind::Genesis)).unwrap();
        let mut dup = release("1.0.1", ReleaseKind::Full);
        dup.filename = "app-linux-x64-1.0.0-full.zip".to_string();
        assert!(matches!(
            ledger.add(dup),
            Err(crate::RolloutError::Ledger(LedgerError::DuplicateFilename { .. }))
        ));
    }

    #[test]
    fn test_non_increasing_version_rejected() {
        let mut ledger = ReleaseLedger::new();
        ledger.add(release("1.0.5", ReleaseKind::Genesis)).unwrap();
        assert!(matches!(
            ledger.add(delta_release("1.0.5", "app-linux-x64-1.0.5-full.zip")),
            Err(crate::RolloutError::Ledger(LedgerError::NonIncreasingVersion { .. }))
        ));
    }

    #[test]
    fn test_single_root_per_lineage() {
        let mut ledger = ReleaseLedger::new();
        ledger.add(release("1.0.0", ReleaseKind::Genesis)).unwrap();
        assert!(matches!(
            ledger.add(release("2.0.0", ReleaseKind::Full)),
            Err(crate::RolloutError::Ledger(LedgerError::DuplicateRoot { .. }))
        ));
    }

    #[test]
    fn test_delta_requires_known_predecessor() {
        let mut ledger = ReleaseLedger::new();
        ledger.add(release("1.0.0", ReleaseKind::Genesis)).unwrap();
        assert!(matches!(
            ledger.add(delta_release("1.0.1", "nonexistent.zip")),
            Err(crate::RolloutError::Lineage(LineageError::MissingPredecessor { .. }))
        ));
    }

    #[test]
    fn test_gc_and_demote() {
        let mut ledger = ReleaseLedger::new();
        ledger.add(release("1.0.0", ReleaseKind::Genesis)).unwrap();
        ledger
            .add(delta_release("1.0.1", "app-linux-x64-1.0.0-full.zip"))
            .unwrap();

        ledger.demote("app", rid(), &["app-linux-x64-1.0.1-delta.zip".to_string()]);
        assert_eq!(ledger.releases_for("app", rid()).len(), 1);

        ledger.gc("app", rid());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_bump_changes_identity() {
        let mut ledger = ReleaseLedger::new();
        let id = ledger.pack_id();
        let version = ledger.db_version();
        ledger.bump();
        assert_ne!(ledger.pack_id(), id);
        assert_eq!(ledger.db_version(), version + 1);
    }

    #[test]
    fn test_wire_roundtrip() {
        // Covers both settled and populated Option fields: bincode has no
        // notion of absent fields, so every one must encode.
        let mut ledger = ReleaseLedger::new();
        ledger.add(release("1.0.0", ReleaseKind::Genesis)).unwrap();
        let mut delta = delta_release("1.0.1", "app-linux-x64-1.0.0-full.zip");
        delta.release_notes = Some("fixes".to_string());
        delta.modified_files = vec![{
            let mut entry = FileEntry::new("app.bin", 100, "hash");
            entry.patch_hash = Some("patchhash".to_string());
            entry
        }];
        ledger.add(delta).unwrap();
        ledger.bump();

        let bytes = ledger.to_bytes().unwrap();
        let decoded = ReleaseLedger::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.db_version(), ledger.db_version());
        assert_eq!(decoded.pack_id(), ledger.pack_id());
        assert_eq!(decoded.releases(), ledger.releases());
    }

    #[test]
    fn test_channel_query() {
        let mut ledger = ReleaseLedger::new();
        let mut r = release("1.0.0", ReleaseKind::Genesis);
        r.channels = vec!["beta".to_string()];
        ledger.add(r).unwrap();

        assert!(ledger.releases_in_channel("app", rid(), "stable").is_empty());
        assert_eq!(ledger.releases_in_channel("app", rid(), "beta").len(), 1);
    }
}
