//! Single-item downloader.
//!
//! Thingiverse only hands out zip archives of a whole thing, and only after a
//! JavaScript countdown on the files page. Fetching one STL therefore means:
//!
//! - checking whether the file is already on disk
//! - letting an [`ArchiveFetcher`] obtain the archive into a temporary directory
//! - pulling the one named entry out of the archive into the output directory
//!

use std::path::{Path, PathBuf};

use bytesize::ByteSize;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::registry::{ThingId, validate_file_name};

pub mod browser;
pub mod extract;

pub use browser::ChromiumFetcher;
pub use extract::{extract_entry, select_entry};

/// Files at or below this size are treated as broken leftovers and fetched again.
pub const MIN_VALID_SIZE: u64 = 1024;

pub const DEFAULT_SITE_URL: &str = "https://www.thingiverse.com";

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Browser automation unavailable: {0}")]
    BrowserUnavailable(String),

    #[error("Browser error: {0}")]
    Browser(#[from] chromiumoxide::error::CdpError),

    #[error("Invalid browser command: {0}")]
    Protocol(String),

    #[error("Timed out after {0:?} while {1}")]
    Timeout(std::time::Duration, &'static str),

    #[error("Could not find a download control on {url} (page title: {title:?})")]
    ControlNotFound { url: String, title: Option<String> },

    #[error("Download was cancelled by the browser")]
    DownloadCancelled,

    #[error("Zip error: {0}")]
    ZipError(#[from] async_zip::error::ZipError),

    #[error("Checksum mismatch for '{entry}': expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        entry: String,
        expected: u32,
        actual: u32,
    },

    #[error("'{wanted}' not found in archive ({} STL candidates)", .candidates.len())]
    EntryNotFound {
        wanted: String,
        candidates: Vec<String>,
    },

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Something that can obtain the download archive for a thing.
pub trait ArchiveFetcher {
    /// Saves the thing's archive somewhere under `download_dir` and returns its path.
    async fn fetch_archive(&self, thing_id: &ThingId, download_dir: &Path) -> Result<PathBuf>;

    /// Page a human can use to download the archive by hand
    fn manual_url(&self, thing_id: &ThingId) -> String {
        format!("{DEFAULT_SITE_URL}/thing:{thing_id}/files")
    }
}

/// Builds the files page URL for a thing, e.g. `https://www.thingiverse.com/thing:182114/files`
pub fn thing_files_url(site: &Url, thing_id: &ThingId) -> Result<Url> {
    let base = site.as_str().trim_end_matches('/');
    Ok(Url::parse(&format!("{base}/thing:{thing_id}/files"))?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// A valid file was already on disk; nothing was fetched
    AlreadyPresent { path: PathBuf, size: u64 },
    Downloaded { path: PathBuf, size: u64 },
}

impl DownloadOutcome {
    pub fn path(&self) -> &Path {
        match self {
            Self::AlreadyPresent { path, .. } | Self::Downloaded { path, .. } => path,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Self::AlreadyPresent { size, .. } | Self::Downloaded { size, .. } => *size,
        }
    }
}

/// Size of the file at `path` if it exists and is large enough to count as downloaded.
pub async fn satisfied_size(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > MIN_VALID_SIZE => Some(meta.len()),
        _ => None,
    }
}

/// Deletes `output_dir/file_name` if it exists. Returns whether anything was removed.
///
/// The name is validated first, so a path-like name never deletes anything.
pub async fn remove_existing(output_dir: &Path, file_name: &str) -> Result<bool> {
    validate_file_name(file_name)?;
    let path = output_dir.join(file_name);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {
            info!(path = ?path, "Removed existing file");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Fetches `file_name` out of the archive for `thing_id` into `output_dir`.
///
/// Performs no fetch at all when a valid copy is already present. The temporary
/// download directory is removed before this returns, on success and on error.
pub async fn download_stl<F: ArchiveFetcher>(
    fetcher: &F,
    thing_id: &ThingId,
    file_name: &str,
    output_dir: &Path,
) -> Result<DownloadOutcome> {
    validate_file_name(file_name)?;
    info!(thing = %thing_id, stl = file_name, "Downloading Thingiverse thing");

    tokio::fs::create_dir_all(output_dir).await?;

    let output_path = output_dir.join(file_name);
    if let Some(size) = satisfied_size(&output_path).await {
        info!(
            path = ?output_path,
            size = %ByteSize::b(size),
            "STL file already exists, use --force to re-download"
        );
        return Ok(DownloadOutcome::AlreadyPresent {
            path: output_path,
            size,
        });
    }

    let temp_dir = crate::util::tempdir()?;
    debug!(temp_dir = ?temp_dir.path(), "Created temporary download directory");

    let result = fetch_and_extract(fetcher, thing_id, file_name, temp_dir.path(), output_dir).await;

    if let Err(e) = temp_dir.close() {
        debug!(error = %e, "Failed to remove temporary download directory");
    }

    let size = result?;
    info!(path = ?output_path, size = %ByteSize::b(size), "Saved STL");
    Ok(DownloadOutcome::Downloaded {
        path: output_path,
        size,
    })
}

async fn fetch_and_extract<F: ArchiveFetcher>(
    fetcher: &F,
    thing_id: &ThingId,
    file_name: &str,
    download_dir: &Path,
    output_dir: &Path,
) -> Result<u64> {
    let archive = match fetcher.fetch_archive(thing_id, download_dir).await {
        Ok(archive) => archive,
        Err(e) => {
            error!(
                thing = %thing_id,
                error = %e,
                manual_url = %fetcher.manual_url(thing_id),
                "Failed to download archive, try a manual download"
            );
            return Err(e);
        }
    };

    if let Ok(meta) = tokio::fs::metadata(&archive).await {
        info!(archive = ?archive, size = %ByteSize::b(meta.len()), "Archive downloaded");
    }

    extract_entry(&archive, file_name, output_dir).await
}
