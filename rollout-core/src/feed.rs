//! Feed abstraction: the injected download service used during restore.
//!
//! The engine never talks to a transport directly; it receives a
//! [`PackageFeed`] implementation and an [`UpdateSource`] describing where
//! packages live. A directory-backed implementation is provided for local
//! feeds and tests; network transports live outside the core.

use crate::{FeedError, Result, RolloutError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Where packages are published. Two variants, dispatched explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateSource {
    /// An endpoint reachable without credentials
    Plain { url: String },
    /// An endpoint requiring a bearer token
    Authenticated { url: String, token: String },
}

impl UpdateSource {
    pub fn url(&self) -> &str {
        match self {
            UpdateSource::Plain { url } => url,
            UpdateSource::Authenticated { url, .. } => url,
        }
    }
}

/// Byte-level progress callback invoked as a download advances
pub type DownloadProgress<'a> = &'a (dyn Fn(u64) + Send + Sync);

/// Injected download service
#[async_trait]
pub trait PackageFeed: Send + Sync {
    /// Fetch `filename` from `source` into `dest`, reporting received bytes
    /// through `progress`. Returns the total byte count.
    ///
    /// Implementations must not leave a partial file at `dest` on failure.
    async fn download(
        &self,
        filename: &str,
        source: &UpdateSource,
        dest: &Path,
        progress: DownloadProgress<'_>,
    ) -> Result<u64>;

    /// List package filenames available for `app_id`, newest last
    async fn find_latest(&self, app_id: &str, source: &UpdateSource) -> Result<Vec<String>>;
}

/// Directory-backed feed. The source url is a local path; packages are plain
/// files inside it.
#[derive(Debug, Default)]
pub struct FilesystemFeed;

impl FilesystemFeed {
    pub fn new() -> Self {
        Self
    }

    fn source_dir(source: &UpdateSource) -> PathBuf {
        PathBuf::from(source.url())
    }
}

#[async_trait]
impl PackageFeed for FilesystemFeed {
    async fn download(
        &self,
        filename: &str,
        source: &UpdateSource,
        dest: &Path,
        progress: DownloadProgress<'_>,
    ) -> Result<u64> {
        let src_path = Self::source_dir(source).join(filename);
        let mut src = fs::File::open(&src_path).await.map_err(|_| {
            RolloutError::from(FeedError::NotFound {
                filename: filename.to_string(),
            })
        })?;

        // Write to a temp name and rename so a concurrent reader never sees
        // a half-written package. An aborted copy removes the temp file.
        let tmp = dest.with_extension("partial");
        let mut out = fs::File::create(&tmp).await?;

        let copy = async {
            let mut buffer = [0u8; 8192];
            let mut total: u64 = 0;
            loop {
                let n = src.read(&mut buffer).await?;
                if n == 0 {
                    break;
                }
                out.write_all(&buffer[..n]).await?;
                total += n as u64;
                progress(n as u64);
            }
            out.flush().await?;
            Ok::<u64, RolloutError>(total)
        };
        let total = match copy.await {
            Ok(total) => total,
            Err(e) => {
                let _ = fs::remove_file(&tmp).await;
                return Err(e);
            }
        };
        drop(out);
        fs::rename(&tmp, dest).await?;

        Ok(total)
    }

    async fn find_latest(&self, app_id: &str, source: &UpdateSource) -> Result<Vec<String>> {
        let dir = Self::source_dir(source);
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&dir).await.map_err(|e| {
            RolloutError::from(FeedError::Source {
                message: format!("cannot list feed {}: {}", dir.display(), e),
            })
        })?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(app_id) && name.ends_with(".zip") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}
