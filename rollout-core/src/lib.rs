pub mod error;
pub mod logging;
pub mod checksum;
pub mod patch;
pub mod release;
pub mod ledger;
pub mod delta;
pub mod package;
pub mod feed;
pub mod restore;

pub use error::{
    FeedError, IntegrityError, LedgerError, LineageError, PackageError, PatchError, Result,
    RolloutError,
};
pub use logging::{LogConfig, LogFormat, init_cli_logging, init_logging};
pub use checksum::{
    Blake3Hasher, ChecksumVerifier, HashAlgorithm, Hasher, Sha256Hasher, hash_bytes, hash_file,
    hash_reader, secure_compare,
};
pub use release::{
    Arch, DeltaInfo, FileEntry, Os, Release, ReleaseDescriptor, ReleaseKind, RuntimeId,
    SemanticVersion, DESCRIPTOR_TARGET_PATH,
};
pub use ledger::{ReleaseLedger, LEDGER_SCHEMA_VERSION};
pub use delta::{ALWAYS_REPLACE_PATHS, DeltaReport, DeltaReportEngine};
pub use package::{
    PackOutcome, PackRequest, PackageArchive, PackageBuilder, PackageManifest, PayloadFile,
    payload_from_dir, persist_package,
};
pub use feed::{DownloadProgress, FilesystemFeed, PackageFeed, UpdateSource};
pub use restore::{
    NoopObserver, PhaseEntry, RestoreContext, RestoreMode, RestoreObserver, RestoreOrchestrator,
    RestoreSummary,
};
