//! Directory scanning.
//!
//! [`ScanCoordinator::scan`] walks an album root recursively and feeds every
//! eligible image through the [`Ingestor`]. Files in one directory are
//! processed in batches: all files of a batch run concurrently, batches run
//! one after another, and subdirectories are visited after the files of
//! their parent, one at a time.
//!
//! At most one scan runs per root. The [`ScanRegistry`] entry for a root is
//! both the mutual-exclusion lock and the cancellation flag: cancelling
//! removes the entry and trips the scan's token, and the walk stops at the
//! next batch or subdirectory boundary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use phologix_core::models::ScanSummary;

use crate::error::{Error, Result};
use crate::ingest::Ingestor;
use crate::progress::{NoProgress, ScanProgressEvent, ScanProgressReporter};

/// AVIF needs the `avif` feature, which links the system dav1d decoder.
/// Without it `.avif` files are not eligible rather than failing every scan.
#[cfg(feature = "avif")]
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "avif"];
#[cfg(not(feature = "avif"))]
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Whether `path` has an image extension this library ingests.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(ext))
        })
}

struct Entry {
    id: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct RegistryInner {
    entries: Mutex<HashMap<String, Entry>>,
    next_id: AtomicU64,
}

/// Active scans keyed by root path.
#[derive(Clone, Default)]
pub struct ScanRegistry {
    inner: Arc<RegistryInner>,
}

/// Registration of one running scan. Dropping it removes the registry
/// entry if the entry still belongs to this scan.
pub struct ScanTask {
    registry: ScanRegistry,
    key: String,
    id: u64,
    token: CancellationToken,
}

impl ScanTask {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for ScanTask {
    fn drop(&mut self) {
        let mut entries = self.registry.entries();
        if entries.get(&self.key).is_some_and(|e| e.id == self.id) {
            entries.remove(&self.key);
        }
    }
}

impl ScanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a scan of `key`. Fails if one is already active.
    pub fn begin(&self, key: &str) -> Result<ScanTask> {
        let mut entries = self.entries();
        if entries.contains_key(key) {
            return Err(Error::ScanAlreadyRunning(key.to_string()));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        entries.insert(
            key.to_string(),
            Entry {
                id,
                token: token.clone(),
            },
        );
        Ok(ScanTask {
            registry: self.clone(),
            key: key.to_string(),
            id,
            token,
        })
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    /// Request cancellation of the scan of `key`. Returns `false` if no
    /// scan was active.
    pub fn cancel(&self, key: &str) -> bool {
        match self.entries().remove(key) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries().keys().cloned().collect();
        keys.sort();
        keys
    }
}

pub struct ScanCoordinator {
    ingestor: Arc<Ingestor>,
    registry: ScanRegistry,
    progress: Arc<dyn ScanProgressReporter>,
}

impl ScanCoordinator {
    pub fn new(ingestor: Arc<Ingestor>, registry: ScanRegistry) -> Self {
        Self {
            ingestor,
            registry,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ScanProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn registry(&self) -> &ScanRegistry {
        &self.registry
    }

    /// Scan the album rooted at `root`.
    ///
    /// Fails only if a scan of `root` is already running. Per-file failures
    /// are counted in [`ScanSummary::error_count`]; unreadable directories
    /// are logged and skipped. A `batch_size` of 0 is treated as 1.
    pub async fn scan(
        &self,
        root: &Path,
        batch_size: usize,
        skip_dedup: bool,
    ) -> Result<ScanSummary> {
        let key = root.to_string_lossy().into_owned();
        let task = self.registry.begin(&key)?;
        info!(root = %key, batch_size, skip_dedup, "scan started");

        let summary = self
            .walk(root, &key, task.token(), batch_size.max(1), skip_dedup)
            .await;

        let outcome = if task.is_cancelled() {
            "cancelled"
        } else {
            "finished"
        };
        info!(
            root = %key,
            total = summary.total_count,
            errors = summary.error_count,
            "scan {outcome}"
        );
        Ok(summary)
    }

    async fn walk(
        &self,
        dir: &Path,
        root: &str,
        token: &CancellationToken,
        batch_size: usize,
        skip_dedup: bool,
    ) -> ScanSummary {
        let mut summary = ScanSummary::default();

        let (files, subdirs) = match list_dir(dir).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory");
                return summary;
            }
        };

        self.progress.report(ScanProgressEvent::Directory {
            root: root.to_string(),
            dir: dir.display().to_string(),
            files: files.len() as u64,
        });

        for batch in files.chunks(batch_size) {
            if token.is_cancelled() {
                return summary;
            }
            let results = join_all(
                batch
                    .iter()
                    .map(|file| self.ingestor.ingest(file, root, skip_dedup)),
            )
            .await;
            for (file, result) in batch.iter().zip(results) {
                match result {
                    Ok(_) => summary.total_count += 1,
                    Err(e) => {
                        summary.error_count += 1;
                        warn!(path = %file.display(), error = %e, "failed to ingest");
                    }
                }
            }
            self.progress.report(ScanProgressEvent::Batch {
                root: root.to_string(),
                done: summary.total_count,
                errors: summary.error_count,
            });
        }

        for subdir in subdirs {
            if token.is_cancelled() {
                return summary;
            }
            summary += Box::pin(self.walk(&subdir, root, token, batch_size, skip_dedup)).await;
        }

        summary
    }
}

/// Eligible image files and subdirectories of `dir`, each sorted by name.
async fn list_dir(dir: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let read_err = |source| Error::DirectoryRead {
        path: dir.to_path_buf(),
        source,
    };
    let mut reader = tokio::fs::read_dir(dir).await.map_err(read_err)?;

    let mut files = Vec::new();
    let mut subdirs = Vec::new();
    while let Some(entry) = reader.next_entry().await.map_err(read_err)? {
        let path = entry.path();
        let file_type = match entry.file_type().await {
            Ok(ft) => ft,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot stat entry");
                continue;
            }
        };
        if file_type.is_dir() {
            subdirs.push(path);
        } else if file_type.is_file() && is_supported_image(&path) {
            files.push(path);
        }
    }

    files.sort();
    subdirs.sort();
    Ok((files, subdirs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_match_case_insensitively() {
        assert!(is_supported_image(Path::new("/a/b.JPG")));
        assert_eq!(
            is_supported_image(Path::new("/a/b.avif")),
            cfg!(feature = "avif")
        );
        assert!(is_supported_image(Path::new("c.Webp")));
        assert!(!is_supported_image(Path::new("notes.txt")));
        assert!(!is_supported_image(Path::new("jpg")));
        assert!(!is_supported_image(Path::new("archive.png.zip")));
    }

    #[test]
    fn second_begin_on_active_root_fails() {
        let registry = ScanRegistry::new();
        let task = registry.begin("/photos").unwrap();
        assert!(matches!(
            registry.begin("/photos"),
            Err(Error::ScanAlreadyRunning(_))
        ));
        assert!(registry.begin("/other").is_ok());
        drop(task);
        assert!(!registry.is_active("/photos"));
    }

    #[test]
    fn cancel_trips_token_and_frees_the_root() {
        let registry = ScanRegistry::new();
        let task = registry.begin("/photos").unwrap();

        assert!(registry.cancel("/photos"));
        assert!(task.is_cancelled());
        assert!(!registry.is_active("/photos"));
        assert!(!registry.cancel("/photos"));
    }

    #[test]
    fn stale_guard_does_not_remove_newer_entry() {
        let registry = ScanRegistry::new();
        let old = registry.begin("/photos").unwrap();
        registry.cancel("/photos");

        let _new = registry.begin("/photos").unwrap();
        drop(old);
        assert!(registry.is_active("/photos"));
    }
}
