//! Per-file ingestion pipeline.
//!
//! ```text
//! file ──▶ fingerprint ──▶ dedup ──▶ tagger ──▶ dimensions ──▶ thumbnail ──▶ store ──▶ index
//! ```
//!
//! Ingestion is idempotent: a file whose content or path is already known
//! returns the existing [`Picture`] untouched. The steps after tagging are
//! not transactional; a thumbnail written before a failed insert is left
//! in place and reused when the same content is ingested again.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use phologix_core::models::{Album, NewPicture, Picture, Tag, TagInsert};
use phologix_core::store::LibraryStore;
use phologix_core::tagging::Tagger;

use crate::error::{Error, Result};
use crate::hasher;
use crate::index_sync::IndexSync;
use crate::thumbnail::{self, ThumbnailGenerator};

pub struct Ingestor {
    store: Arc<dyn LibraryStore>,
    tagger: Arc<dyn Tagger>,
    thumbnails: ThumbnailGenerator,
    index: IndexSync,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn LibraryStore>,
        tagger: Arc<dyn Tagger>,
        thumbnails: ThumbnailGenerator,
        index: IndexSync,
    ) -> Self {
        Self {
            store,
            tagger,
            thumbnails,
            index,
        }
    }

    pub fn store(&self) -> &Arc<dyn LibraryStore> {
        &self.store
    }

    pub fn thumbnails(&self) -> &ThumbnailGenerator {
        &self.thumbnails
    }

    pub fn index(&self) -> &IndexSync {
        &self.index
    }

    async fn album(&self, album_path: &str) -> Result<Album> {
        self.store
            .find_album_by_path(album_path)
            .await
            .map_err(Error::store)?
            .ok_or_else(|| Error::AlbumNotFound(album_path.to_string()))
    }

    /// Run the full pipeline for `file`, which belongs to the album rooted
    /// at `album_path`.
    ///
    /// With `skip_dedup` the content fingerprint is not consulted before
    /// tagging; the path check still applies and the store's unique
    /// constraint still rejects duplicate content.
    pub async fn ingest(&self, file: &Path, album_path: &str, skip_dedup: bool) -> Result<Picture> {
        let path = file.to_string_lossy().into_owned();
        let mut album = None;
        let mut fingerprint = None;

        if !skip_dedup {
            let found = self.album(album_path).await?;
            let fp = hasher::fingerprint(file).await?;
            if let Some(existing) = self
                .store
                .find_picture_by_fingerprint(&fp)
                .await
                .map_err(Error::store)?
            {
                debug!(%path, existing = %existing.path, "content already ingested");
                return Ok(existing);
            }
            album = Some(found);
            fingerprint = Some(fp);
        }

        if let Some(existing) = self
            .store
            .find_picture_by_path(&path)
            .await
            .map_err(Error::store)?
        {
            debug!(%path, "path already ingested");
            return Ok(existing);
        }

        let prediction = self
            .tagger
            .predict(file)
            .await
            .map_err(|e| Error::TaggingService(format!("{e:#}")))?;
        if let Some(err) = prediction.error {
            return Err(Error::TaggingService(err));
        }
        let tags = self.resolve_tags(&prediction.predicted_tags).await?;

        let (width, height) = thumbnail::probe_dimensions(file).await?;

        let album = match album {
            Some(album) => album,
            None => self.album(album_path).await?,
        };
        let fingerprint = match fingerprint {
            Some(fp) => fp,
            None => hasher::fingerprint(file).await?,
        };

        let thumb = self.thumbnails.generate(file, &fingerprint).await?;
        let modified = tokio::fs::metadata(file).await?.modified()?;
        let updated_at = chrono::DateTime::<chrono::Utc>::from(modified).timestamp();

        let picture = self
            .store
            .insert_picture(&NewPicture {
                path: path.clone(),
                fingerprint,
                width,
                height,
                thumbnail_path: Some(thumb.to_string_lossy().into_owned()),
                description: None,
                updated_at,
                album_id: album.id,
                tags,
            })
            .await
            .map_err(Error::store)?;

        self.index.push(&picture).await?;
        info!(
            %path,
            fingerprint = %picture.fingerprint,
            tags = picture.tags.len(),
            "picture ingested"
        );
        Ok(picture)
    }

    /// Map tag names onto persisted tags, creating the missing ones.
    ///
    /// A creation lost to a concurrent writer is resolved by a single
    /// re-read; a name still missing after that is logged and dropped.
    /// Duplicate names collapse; input order is kept.
    pub async fn resolve_tags(&self, names: &[String]) -> Result<Vec<Tag>> {
        let mut seen = HashSet::new();
        let names: Vec<String> = names
            .iter()
            .filter(|n| !n.is_empty() && seen.insert(n.as_str()))
            .cloned()
            .collect();
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let mut resolved = self
            .store
            .find_tags_by_names(&names)
            .await
            .map_err(Error::store)?;

        let mut lost = Vec::new();
        for name in &names {
            if resolved.iter().any(|t| &t.name == name) {
                continue;
            }
            match self.store.insert_tag(name).await.map_err(Error::store)? {
                TagInsert::Created(tag) => resolved.push(tag),
                TagInsert::AlreadyExists => lost.push(name.clone()),
            }
        }

        if !lost.is_empty() {
            let reread = self
                .store
                .find_tags_by_names(&lost)
                .await
                .map_err(Error::store)?;
            for name in &lost {
                match reread.iter().find(|t| &t.name == name) {
                    Some(tag) => resolved.push(tag.clone()),
                    None => warn!(tag = %name, "tag missing after creation race, skipping"),
                }
            }
        }

        resolved.sort_by_key(|t| names.iter().position(|n| n == &t.name));
        Ok(resolved)
    }

    /// Destroy a picture: row, index document, then thumbnail file.
    ///
    /// A failure to delete the thumbnail is logged and does not fail the
    /// removal.
    pub async fn remove_picture(&self, picture: &Picture) -> Result<()> {
        if picture.fingerprint.is_empty() {
            return Err(Error::MissingFingerprint(picture.id));
        }

        self.store
            .remove_picture(picture.id)
            .await
            .map_err(Error::store)?;
        self.index.remove(&picture.fingerprint).await?;

        if let Some(thumb) = &picture.thumbnail_path {
            if let Err(e) = self.thumbnails.remove(Path::new(thumb)).await {
                warn!(thumbnail = %thumb, error = %e, "failed to delete thumbnail");
            }
        }
        info!(path = %picture.path, "picture removed");
        Ok(())
    }

    /// Remove every picture of the album at `album_path` stored beneath
    /// `dir`. Returns how many were removed.
    pub async fn remove_under(&self, album_path: &str, dir: &Path) -> Result<usize> {
        let Some(album) = self
            .store
            .find_album_by_path(album_path)
            .await
            .map_err(Error::store)?
        else {
            return Ok(0);
        };
        let pictures = self
            .store
            .list_album_pictures(album.id)
            .await
            .map_err(Error::store)?;

        let mut removed = 0;
        for picture in pictures
            .iter()
            .filter(|p| Path::new(&p.path).starts_with(dir))
        {
            self.remove_picture(picture).await?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Remove the picture stored at `path`, if any. Returns whether one
    /// was removed.
    pub async fn remove_path(&self, path: &Path) -> Result<bool> {
        let key = path.to_string_lossy();
        match self
            .store
            .find_picture_by_path(&key)
            .await
            .map_err(Error::store)?
        {
            Some(picture) => {
                self.remove_picture(&picture).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
