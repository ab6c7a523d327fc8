use crate::{PackageError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Install path of the embedded release descriptor blob. The descriptor
/// changes incompatibly on every release, so it is always shipped whole and
/// never binary-patched.
pub const DESCRIPTOR_TARGET_PATH: &str = "rollout.meta";

/// Semantic version following semver.org specification
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SemanticVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub pre_release: Option<String>,
    pub build_metadata: Option<String>,
}

impl SemanticVersion {
    /// Create a new semantic version
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            pre_release: None,
            build_metadata: None,
        }
    }

    /// Create with pre-release identifier
    pub fn with_pre_release(mut self, pre_release: String) -> Self {
        self.pre_release = Some(pre_release);
        self
    }

    /// Parse from string (e.g., "1.2.3" or "1.2.3-alpha.1+build.123")
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('+').collect();
        let (version_part, build_metadata) = match parts.as_slice() {
            [v] => (*v, None),
            [v, b] => (*v, Some(b.to_string())),
            _ => return Err(invalid_version(s)),
        };

        let parts: Vec<&str> = version_part.splitn(2, '-').collect();
        let (core_version, pre_release) = match parts.as_slice() {
            [v] => (*v, None),
            [v, p] => (*v, Some(p.to_string())),
            _ => return Err(invalid_version(s)),
        };

        let version_parts: Vec<&str> = core_version.split('.').collect();
        if version_parts.len() != 3 {
            return Err(invalid_version(s));
        }

        let major = version_parts[0].parse::<u32>().map_err(|_| invalid_version(s))?;
        let minor = version_parts[1].parse::<u32>().map_err(|_| invalid_version(s))?;
        let patch = version_parts[2].parse::<u32>().map_err(|_| invalid_version(s))?;

        Ok(Self {
            major,
            minor,
            patch,
            pre_release,
            build_metadata,
        })
    }

    /// Check if this version is newer than the other
    pub fn is_newer_than(&self, other: &SemanticVersion) -> bool {
        self > other
    }
}

fn invalid_version(s: &str) -> crate::RolloutError {
    PackageError::invalid_input(format!("Invalid version: {}", s)).into()
}

impl std::fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref pre) = self.pre_release {
            write!(f, "-{}", pre)?;
        }
        if let Some(ref build) = self.build_metadata {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for SemanticVersion {
    type Err = crate::RolloutError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Operating system component of a runtime identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Windows,
    Linux,
    MacOs,
}

impl std::fmt::Display for Os {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Os::Windows => write!(f, "win"),
            Os::Linux => write!(f, "linux"),
            Os::MacOs => write!(f, "osx"),
        }
    }
}

/// CPU architecture component of a runtime identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X64,
    Arm64,
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arch::X64 => write!(f, "x64"),
            Arch::Arm64 => write!(f, "arm64"),
        }
    }
}

/// Runtime identifier (`win-x64`, `linux-x64`, `osx-arm64`, ...). Releases
/// with different runtime ids are separate lineages and never delta against
/// each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuntimeId {
    pub os: Os,
    pub arch: Arch,
}

impl RuntimeId {
    pub fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }
}

impl std::fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

impl std::str::FromStr for RuntimeId {
    type Err = crate::RolloutError;

    fn from_str(s: &str) -> Result<Self> {
        let (os, arch) = s
            .split_once('-')
            .ok_or_else(|| PackageError::invalid_input(format!("Invalid runtime id: {}", s)))?;
        let os = match os {
            "win" => Os::Windows,
            "linux" => Os::Linux,
            "osx" => Os::MacOs,
            _ => return Err(PackageError::invalid_input(format!("Unknown os: {}", os)).into()),
        };
        let arch = match arch {
            "x64" => Arch::X64,
            "arm64" => Arch::Arm64,
            _ => {
                return Err(PackageError::invalid_input(format!("Unknown arch: {}", arch)).into());
            }
        };
        Ok(Self { os, arch })
    }
}

/// Release kind. `Genesis` opens a lineage, `Full` is a self-contained
/// snapshot, `Delta` is a patch relative to a named predecessor file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseKind {
    Genesis,
    Full,
    Delta,
}

impl ReleaseKind {
    pub fn is_delta(&self) -> bool {
        matches!(self, ReleaseKind::Delta)
    }

    /// Genesis and full releases can root a restore chain
    pub fn is_root(&self) -> bool {
        !self.is_delta()
    }
}

/// One payload file in a package manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Install path relative to the application root
    pub target_path: String,
    /// Size of the full file in bytes
    pub size: u64,
    /// Fast content hash of the full file
    pub hash: String,
    /// Fast content hash of the binary patch, for modified delta entries.
    /// No `skip_serializing_if` here: these types go through bincode, which
    /// cannot represent absent fields.
    #[serde(default)]
    pub patch_hash: Option<String>,
}

impl FileEntry {
    pub fn new(target_path: impl Into<String>, size: u64, hash: impl Into<String>) -> Self {
        Self {
            target_path: target_path.into(),
            size,
            hash: hash.into(),
            patch_hash: None,
        }
    }
}

/// Delta-specific integrity data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaInfo {
    /// Size of the delta package file in bytes
    pub size: u64,
    /// Strong checksum of the delta package file
    pub checksum: String,
    /// Filename of the exact predecessor this delta patches against
    pub predecessor_filename: String,
}

/// One immutable record per published package version for a given
/// (application id, runtime identifier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    /// Application identifier
    pub app_id: String,
    /// Runtime identifier
    pub rid: RuntimeId,
    /// Semantic version, strictly increasing within a lineage
    pub version: SemanticVersion,
    /// Channels this release belongs to
    pub channels: Vec<String>,
    /// Release kind
    pub kind: ReleaseKind,
    /// Package filename in the feed and the local cache
    pub filename: String,
    /// Size of the full package in bytes
    pub full_size: u64,
    /// Strong checksum of the full package
    pub full_checksum: String,
    /// Delta integrity data; present iff `kind` is `Delta`
    #[serde(default)]
    pub delta: Option<DeltaInfo>,
    /// Payload files introduced by this release
    pub new_files: Vec<FileEntry>,
    /// Payload files changed since the predecessor, shipped as patches
    pub modified_files: Vec<FileEntry>,
    /// Payload files carried over unchanged
    pub unmodified_files: Vec<FileEntry>,
    /// Payload files removed since the predecessor
    pub deleted_files: Vec<FileEntry>,
    /// Complete manifest of the full snapshot. Kept even on delta releases:
    /// the next delta diffs against this list.
    pub files: Vec<FileEntry>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Human-readable release notes
    #[serde(default)]
    pub release_notes: Option<String>,
}

impl Release {
    pub fn is_delta(&self) -> bool {
        self.kind.is_delta()
    }

    /// Filename of the full package for this release. Delta releases name
    /// both a delta file (`filename`) and the full package it reconstructs.
    pub fn full_filename(&self) -> String {
        if self.is_delta() {
            format!("{}-{}-{}-full.zip", self.app_id, self.rid, self.version)
        } else {
            self.filename.clone()
        }
    }

    /// True when `other` belongs to the same lineage
    pub fn same_lineage(&self, other: &Release) -> bool {
        self.app_id == other.app_id && self.rid == other.rid
    }
}

/// Self-describing metadata record embedded inside every package. Readable
/// without executing any package code: a plain tagged struct, bincode-encoded
/// at a fixed archive path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    /// Descriptor format version, bumped on incompatible layout changes
    pub format_version: u32,
    pub app_id: String,
    pub rid: RuntimeId,
    pub version: SemanticVersion,
    pub kind: ReleaseKind,
    pub filename: String,
}

impl ReleaseDescriptor {
    pub const CURRENT_FORMAT: u32 = 1;

    pub fn new(release: &Release) -> Self {
        Self {
            format_version: Self::CURRENT_FORMAT,
            app_id: release.app_id.clone(),
            rid: release.rid,
            version: release.version.clone(),
            kind: release.kind,
            filename: release.filename.clone(),
        }
    }

    /// Encode to the embedded wire form
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| PackageError::MetadataParse { reason: e.to_string() }.into())
    }

    /// Decode from the embedded wire form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let descriptor: Self = bincode::deserialize(bytes)
            .map_err(|e| PackageError::MetadataParse { reason: e.to_string() })?;
        if descriptor.format_version > Self::CURRENT_FORMAT {
            return Err(PackageError::MetadataParse {
                reason: format!("descriptor format {} too new", descriptor.format_version),
            }
            .into());
        }
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_version() {
        let version = SemanticVersion::new(1, 2, 3);
        assert_eq!(version.to_string(), "1.2.3");

        let parsed = SemanticVersion::parse("1.2.3-alpha.1+build.123").unwrap();
        assert_eq!(parsed.major, 1);
        assert_eq!(parsed.minor, 2);
        assert_eq!(parsed.patch, 3);
        assert_eq!(parsed.pre_release, Some("alpha.1".to_string()));
        assert_eq!(parsed.build_metadata, Some("build.123".to_string()));

        assert!(SemanticVersion::parse("invalid").is_err());
    }

    #[test]
    fn test_version_ordering() {
        let v1 = SemanticVersion::new(1, 2, 3);
        let v2 = SemanticVersion::new(1, 2, 4);
        let v3 = SemanticVersion::new(2, 0, 0);

        assert!(v2.is_newer_than(&v1));
        assert!(v3.is_newer_than(&v2));
        assert!(!v1.is_newer_than(&v2));
    }

    #[test]
    fn test_runtime_id() {
        let rid: RuntimeId = "win-x64".parse().unwrap();
        assert_eq!(rid.os, Os::Windows);
        assert_eq!(rid.arch, Arch::X64);
        assert_eq!(rid.to_string(), "win-x64");

        assert!("win".parse::<RuntimeId>().is_err());
        assert!("beos-x64".parse::<RuntimeId>().is_err());
    }

    #[test]
    fn test_release_kind() {
        assert!(ReleaseKind::Genesis.is_root());
        assert!(ReleaseKind::Full.is_root());
        assert!(ReleaseKind::Delta.is_delta());
        assert!(!ReleaseKind::Delta.is_root());
    }

    #[test]
    fn test_descriptor_roundtrip() {
        let descriptor = ReleaseDescriptor {
            format_version: ReleaseDescriptor::CURRENT_FORMAT,
            app_id: "demoapp".to_string(),
            rid: "linux-x64".parse().unwrap(),
            version: SemanticVersion::new(1, 0, 0),
            kind: ReleaseKind::Genesis,
            filename: "demoapp-linux-x64-1.0.0-full.zip".to_string(),
        };

        let bytes = descriptor.to_bytes().unwrap();
        let decoded = ReleaseDescriptor::from_bytes(&bytes).unwrap();
        assert_eq!(descriptor, decoded);
    }
}
