//! Album and picture operations.
//!
//! [`Library`] is the surface a front end drives: it ties the store, the
//! scan coordinator, the watchers and the search index together and owns
//! the ordering rules between them (drain a scan before deleting its album,
//! delete index documents before the rows, and so on).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use phologix_core::index::{SearchRequest, SimilarRequest};
use phologix_core::models::{Album, NewAlbum, Picture, ScanSummary};
use phologix_core::store::LibraryStore;

use crate::config::WatcherConfig;
use crate::error::{Error, Result};
use crate::ingest::Ingestor;
use crate::progress::ScanProgressReporter;
use crate::scan::{ScanCoordinator, ScanRegistry};
use crate::watcher::WatcherManager;

/// Prefix that turns a search query into a similarity lookup by
/// fingerprint.
pub const SIMILAR_PREFIX: &str = "$similar:";

/// Waits used while draining a running scan.
#[derive(Debug, Clone, Copy)]
pub struct DrainDelays {
    /// After the first cancel on album deletion.
    pub cancel_grace: Duration,
    /// After the second cancel on album deletion.
    pub settle: Duration,
    /// After cancelling a scan that is about to be restarted.
    pub rescan_grace: Duration,
}

impl Default for DrainDelays {
    fn default() -> Self {
        Self {
            cancel_grace: Duration::from_millis(1500),
            settle: Duration::from_millis(500),
            rescan_grace: Duration::from_millis(1000),
        }
    }
}

/// One page of search results, hydrated from the store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub pictures: Vec<Picture>,
    pub total_hits: u64,
    pub page: u32,
    pub hits_per_page: u32,
    pub processing_time_ms: u64,
}

pub struct Library {
    ingestor: Arc<Ingestor>,
    scanner: ScanCoordinator,
    watchers: WatcherManager,
    delays: DrainDelays,
}

impl Library {
    pub fn new(ingestor: Arc<Ingestor>, watcher: WatcherConfig) -> Self {
        let registry = ScanRegistry::new();
        Self {
            scanner: ScanCoordinator::new(ingestor.clone(), registry),
            watchers: WatcherManager::new(ingestor.clone(), watcher),
            ingestor,
            delays: DrainDelays::default(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ScanProgressReporter>) -> Self {
        self.scanner = self.scanner.with_progress(progress);
        self
    }

    pub fn with_drain_delays(mut self, delays: DrainDelays) -> Self {
        self.delays = delays;
        self
    }

    pub fn ingestor(&self) -> &Arc<Ingestor> {
        &self.ingestor
    }

    pub fn registry(&self) -> &ScanRegistry {
        self.scanner.registry()
    }

    pub fn watchers(&self) -> &WatcherManager {
        &self.watchers
    }

    fn store(&self) -> &Arc<dyn LibraryStore> {
        self.ingestor.store()
    }

    /// Register a new album rooted at `path`.
    ///
    /// Album roots never nest: a path equal to, inside, or containing an
    /// existing root is rejected.
    pub async fn add_album(
        &self,
        path: &str,
        name: Option<String>,
        description: Option<String>,
        watch: bool,
    ) -> Result<Album> {
        let candidate = Path::new(path);
        for existing in self.store().list_albums(false).await.map_err(Error::store)? {
            let root = Path::new(&existing.path);
            if candidate.starts_with(root) || root.starts_with(candidate) {
                return Err(Error::AlbumOverlap {
                    path: path.to_string(),
                    existing: existing.path,
                });
            }
        }

        let album = self
            .store()
            .insert_album(&NewAlbum {
                path: path.to_string(),
                name,
                description,
                watch,
            })
            .await
            .map_err(Error::store)?;
        info!(path = %album.path, id = album.id, "album added");

        if album.watch {
            self.watchers.start(Path::new(&album.path))?;
        }
        Ok(album)
    }

    /// Persist name, description and watch flag. Toggling `watch` starts or
    /// stops the album's watcher.
    pub async fn update_album(&self, album: &Album) -> Result<Album> {
        let current = self
            .store()
            .find_album_by_id(album.id)
            .await
            .map_err(Error::store)?
            .ok_or_else(|| Error::AlbumNotFound(album.id.to_string()))?;

        let updated = Album {
            path: current.path.clone(),
            ..album.clone()
        };
        self.store()
            .update_album(&updated)
            .await
            .map_err(Error::store)?;

        let root = Path::new(&updated.path);
        match (current.watch, updated.watch) {
            (false, true) => {
                self.watchers.start(root)?;
            }
            (true, false) => {
                self.watchers.stop(root).await;
            }
            _ => {}
        }
        Ok(updated)
    }

    /// Delete the album at `path` with every picture it owns.
    ///
    /// A running scan is drained first. Index documents go before the rows;
    /// if the row removal fails they are restored and the error returned.
    /// Thumbnails are removed last and their failures only logged. Returns
    /// `false` when no album is registered at `path`.
    pub async fn delete_album(&self, path: &str) -> Result<bool> {
        let registry = self.registry();
        if registry.is_active(path) {
            registry.cancel(path);
            tokio::time::sleep(self.delays.cancel_grace).await;
            if registry.is_active(path) {
                registry.cancel(path);
            }
            tokio::time::sleep(self.delays.settle).await;
        }

        self.watchers.stop(Path::new(path)).await;

        let Some(album) = self
            .store()
            .find_album_by_path(path)
            .await
            .map_err(Error::store)?
        else {
            return Ok(false);
        };

        let pictures = self
            .store()
            .list_album_pictures(album.id)
            .await
            .map_err(Error::store)?;
        let fingerprints: Vec<String> = pictures
            .iter()
            .filter(|p| !p.fingerprint.is_empty())
            .map(|p| p.fingerprint.clone())
            .collect();
        let index = self.ingestor.index();
        index.remove_many(&fingerprints).await?;

        let removed = match self.store().remove_album_tree(path).await {
            Ok(removed) => removed.unwrap_or_default(),
            Err(e) => {
                if let Err(restore) = index.push_many(&pictures).await {
                    warn!(path, error = %restore, "failed to restore index documents");
                }
                return Err(Error::store(e));
            }
        };

        let thumbnails = self.ingestor.thumbnails();
        for picture in &removed {
            if let Some(thumb) = &picture.thumbnail_path {
                if let Err(e) = thumbnails.remove(Path::new(thumb)).await {
                    warn!(thumbnail = %thumb, error = %e, "failed to delete thumbnail");
                }
            }
        }

        info!(path, pictures = removed.len(), "album deleted");
        Ok(true)
    }

    /// Scan the album at `path` again, draining a scan already running on
    /// it.
    pub async fn rescan_album(
        &self,
        path: &str,
        batch_size: usize,
        skip_dedup: bool,
    ) -> Result<ScanSummary> {
        let registry = self.registry();
        if registry.is_active(path) {
            registry.cancel(path);
            tokio::time::sleep(self.delays.rescan_grace).await;
        }

        tokio::fs::metadata(path)
            .await
            .map_err(|source| Error::DirectoryRead {
                path: path.into(),
                source,
            })?;
        if self
            .store()
            .find_album_by_path(path)
            .await
            .map_err(Error::store)?
            .is_none()
        {
            return Err(Error::AlbumNotFound(path.to_string()));
        }

        self.scanner.scan(Path::new(path), batch_size, skip_dedup).await
    }

    /// Edit a picture's description and/or tags, then refresh its index
    /// document. An empty description clears it.
    pub async fn update_picture(
        &self,
        id: i64,
        description: Option<String>,
        tags: Option<Vec<String>>,
    ) -> Result<Picture> {
        let mut picture = self
            .store()
            .find_picture_by_id(id)
            .await
            .map_err(Error::store)?
            .ok_or_else(|| Error::PictureNotFound(id.to_string()))?;

        if let Some(description) = description {
            picture.description = Some(description).filter(|d| !d.is_empty());
        }
        if let Some(names) = tags {
            picture.tags = self.ingestor.resolve_tags(&names).await?;
        }

        let picture = self
            .store()
            .update_picture(&picture)
            .await
            .map_err(Error::store)?;
        self.ingestor.index().push(&picture).await?;
        Ok(picture)
    }

    /// Search the library.
    ///
    /// An empty query pages through the store. `$similar:<fingerprint>`
    /// finds pictures similar to a known one. Otherwise a `semantic_ratio`
    /// of 0 is a keyword search and anything higher a hybrid one.
    pub async fn search_pictures(
        &self,
        query: &str,
        hits_per_page: u32,
        page: u32,
        semantic_ratio: f32,
        ranking_score_threshold: Option<f64>,
    ) -> Result<SearchPage> {
        let page = page.max(1);
        let hits_per_page = hits_per_page.max(1);
        let offset = (page - 1).saturating_mul(hits_per_page);
        let query = query.trim();

        if query.is_empty() {
            let pictures = self
                .store()
                .list_pictures(i64::from(hits_per_page), i64::from(offset))
                .await
                .map_err(Error::store)?;
            let total = self.store().count_pictures().await.map_err(Error::store)?;
            return Ok(SearchPage {
                pictures,
                total_hits: total.max(0) as u64,
                page,
                hits_per_page,
                processing_time_ms: 0,
            });
        }

        let index = self.ingestor.index().index();
        let hits = if let Some(fingerprint) = query.strip_prefix(SIMILAR_PREFIX) {
            let fingerprint = fingerprint.trim();
            if self
                .store()
                .find_picture_by_fingerprint(fingerprint)
                .await
                .map_err(Error::store)?
                .is_none()
            {
                return Err(Error::PictureNotFound(fingerprint.to_string()));
            }
            index
                .similar(&SimilarRequest {
                    fingerprint: fingerprint.to_string(),
                    limit: hits_per_page,
                    offset,
                    ranking_score_threshold,
                })
                .await
                .map_err(Error::index)?
        } else {
            index
                .search(&SearchRequest {
                    query: query.to_string(),
                    hits_per_page,
                    page,
                    semantic_ratio: semantic_ratio.clamp(0.0, 1.0),
                    ranking_score_threshold,
                })
                .await
                .map_err(Error::index)?
        };

        let found = self
            .store()
            .find_pictures_by_fingerprints(&hits.fingerprints)
            .await
            .map_err(Error::store)?;
        let pictures = hits
            .fingerprints
            .iter()
            .filter_map(|fp| found.iter().find(|p| &p.fingerprint == fp).cloned())
            .collect();

        Ok(SearchPage {
            pictures,
            total_hits: hits.total_hits,
            page,
            hits_per_page,
            processing_time_ms: hits.processing_time_ms,
        })
    }

    /// Start a watcher for every album flagged `watch`. Returns how many
    /// were started.
    pub async fn start_watchers(&self) -> Result<usize> {
        let mut started = 0;
        for album in self.store().list_albums(true).await.map_err(Error::store)? {
            match self.watchers.start(Path::new(&album.path)) {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => warn!(path = %album.path, error = %e, "failed to start watcher"),
            }
        }
        Ok(started)
    }

    pub async fn stop_watchers(&self) {
        self.watchers.stop_all().await;
    }

    pub fn scanning_status(&self, path: &str) -> bool {
        self.registry().is_active(path)
    }

    pub async fn count_pictures(&self) -> Result<i64> {
        self.store().count_pictures().await.map_err(Error::store)
    }

    pub async fn list_albums(&self) -> Result<Vec<Album>> {
        self.store().list_albums(false).await.map_err(Error::store)
    }
}
