use thiserror::Error;

/// Main result type for Rollout operations
pub type Result<T> = std::result::Result<T, RolloutError>;

/// Main error type for Rollout operations
#[derive(Debug, Error)]
pub enum RolloutError {
    /// Integrity violations (checksum mismatch, classification conflicts)
    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    /// Binary patch errors
    #[error("Patch error: {0}")]
    Patch(PatchError),

    /// Lineage violations (incompatible versions or runtimes)
    #[error("Lineage error: {0}")]
    Lineage(#[from] LineageError),

    /// Release ledger errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Package archive errors
    #[error("Package error: {0}")]
    Package(#[from] PackageError),

    /// Feed/download errors
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    /// IO-related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal errors (should not normally occur)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Integrity-specific errors
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// Checksum verification failed
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// File size on disk does not match the recorded size
    #[error("Size mismatch for {path}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    /// A target path was classified into more than one delta report list
    #[error("Duplicate classification for target path: {path}")]
    DuplicateClassification { path: String },
}

/// Binary patch errors
#[derive(Debug, Error)]
pub enum PatchError {
    /// Malformed or inapplicable patch
    #[error("Corrupt patch: {reason}")]
    Corrupt { reason: String },

    /// Patch application was cancelled
    #[error("Patch application cancelled")]
    Cancelled,
}

/// Lineage violations
#[derive(Debug, Error)]
pub enum LineageError {
    /// Previous release is newer than the current one
    #[error("Version order violation: previous {previous} > current {current}")]
    VersionOrder { previous: String, current: String },

    /// Runtime identifiers differ between releases
    #[error("Runtime mismatch: {previous} vs {current}")]
    RuntimeMismatch { previous: String, current: String },

    /// Delta release with no resolvable predecessor
    #[error("No predecessor release for delta {filename}")]
    MissingPredecessor { filename: String },

    /// No usable full-package ancestor in the release chain
    #[error("No full-package ancestor for {app_id} {version}")]
    MissingAncestor { app_id: String, version: String },
}

/// Release ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Release filename already registered
    #[error("Duplicate release filename: {filename}")]
    DuplicateFilename { filename: String },

    /// Version must be strictly increasing within a lineage
    #[error("Non-increasing version {version} for {app_id} ({rid})")]
    NonIncreasingVersion {
        app_id: String,
        rid: String,
        version: String,
    },

    /// A lineage may only contain one genesis/full root
    #[error("Lineage root already exists for {app_id} ({rid})")]
    DuplicateRoot { app_id: String, rid: String },

    /// Ledger schema version is not readable by this build
    #[error("Unsupported ledger schema version {found} (supported: {supported})")]
    SchemaVersion { found: u32, supported: u32 },

    /// Serialization failure
    #[error("Ledger serialization failed: {message}")]
    Serialization { message: String },
}

/// Package archive errors
#[derive(Debug, Error)]
pub enum PackageError {
    /// Archive is not a readable package
    #[error("Invalid package archive: {reason}")]
    InvalidArchive { reason: String },

    /// Required internal entry is missing
    #[error("Missing package entry: {entry}")]
    MissingEntry { entry: String },

    /// Metadata parsing failed
    #[error("Failed to parse package metadata: {reason}")]
    MetadataParse { reason: String },

    /// Build input was missing or invalid
    #[error("Invalid build input: {reason}")]
    InvalidInput { reason: String },
}

/// Feed/download errors
#[derive(Debug, Error)]
pub enum FeedError {
    /// Download failed
    #[error("Download failed for {filename}: {reason}")]
    DownloadFailed { filename: String, reason: String },

    /// Package not present in the feed
    #[error("Package not found in feed: {filename}")]
    NotFound { filename: String },

    /// Source rejected the request
    #[error("Source error: {message}")]
    Source { message: String },
}

/// Convenience methods for creating specific errors
impl RolloutError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl IntegrityError {
    /// Create a checksum mismatch error
    pub fn checksum_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::ChecksumMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl PatchError {
    /// Create a corrupt-patch error
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::Corrupt {
            reason: reason.into(),
        }
    }
}

impl PackageError {
    /// Create an invalid-archive error
    pub fn invalid_archive(reason: impl Into<String>) -> Self {
        Self::InvalidArchive {
            reason: reason.into(),
        }
    }

    /// Create a missing-entry error
    pub fn missing_entry(entry: impl Into<String>) -> Self {
        Self::MissingEntry {
            entry: entry.into(),
        }
    }

    /// Create an invalid-input error
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }
}

impl FeedError {
    /// Create a download-failed error
    pub fn download_failed(filename: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DownloadFailed {
            filename: filename.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for PackageError {
    fn from(error: serde_json::Error) -> Self {
        Self::MetadataParse {
            reason: error.to_string(),
        }
    }
}

impl From<bincode::Error> for LedgerError {
    fn from(error: bincode::Error) -> Self {
        Self::Serialization {
            message: error.to_string(),
        }
    }
}

impl From<zip::result::ZipError> for PackageError {
    fn from(error: zip::result::ZipError) -> Self {
        Self::InvalidArchive {
            reason: error.to_string(),
        }
    }
}

/// Cancelled patches surface as the top-level cancellation variant so callers
/// can distinguish abandonment from corruption.
impl From<PatchError> for RolloutError {
    fn from(error: PatchError) -> Self {
        match error {
            PatchError::Cancelled => Self::Cancelled,
            other => Self::Patch(other),
        }
    }
}
