//! Engine error type.
//!
//! Library operations return [`Error`]. Repository and index failures arrive
//! as `anyhow::Error` from their traits and are wrapped transparently.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("album not found: {0}")]
    AlbumNotFound(String),

    #[error("album path {path} overlaps existing album {existing}")]
    AlbumOverlap { path: String, existing: String },

    #[error("picture not found: {0}")]
    PictureNotFound(String),

    #[error("picture {0} has no content fingerprint")]
    MissingFingerprint(i64),

    #[error("invalid image {path}: {reason}")]
    InvalidImage { path: PathBuf, reason: String },

    #[error("tagging service error: {0}")]
    TaggingService(String),

    #[error("{role} did not become ready within {timeout:?}")]
    ProcessStartupTimeout { role: String, timeout: Duration },

    #[error("{role} exited before becoming ready ({status})")]
    ProcessExited { role: String, status: String },

    #[error("failed to terminate {role}: {reason}")]
    ProcessTerminationFailure { role: String, reason: String },

    #[error("cannot read directory {path}: {source}")]
    DirectoryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("download of {url} failed: {reason}")]
    DownloadFailure { url: String, reason: String },

    #[error("cannot watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("a scan is already running for {0}")]
    ScanAlreadyRunning(String),

    #[error("store error: {0:#}")]
    Store(anyhow::Error),

    #[error("index error: {0:#}")]
    Index(anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl Error {
    pub(crate) fn store(err: anyhow::Error) -> Self {
        Error::Store(err)
    }

    pub(crate) fn index(err: anyhow::Error) -> Self {
        Error::Index(err)
    }
}
