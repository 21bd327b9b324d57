//! Repository abstraction for Phologix.
//!
//! The [`LibraryStore`] trait is the only view the ingestion pipeline has of
//! the relational store: find-by-unique-key, save, remove, and one
//! transactional tree removal. Backends must enforce the unique constraints
//! on album path, picture path, picture fingerprint, and tag name; the
//! pipeline relies on them as the final backstop against double-processing.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Album, NewAlbum, NewPicture, Picture, Tag, TagInsert};

/// Abstract storage backend for albums, pictures, and tags.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find_album_by_path`](LibraryStore::find_album_by_path) | Album lookup by its unique root path |
/// | [`find_picture_by_fingerprint`](LibraryStore::find_picture_by_fingerprint) | Content dedup lookup |
/// | [`find_picture_by_path`](LibraryStore::find_picture_by_path) | Path dedup lookup |
/// | [`insert_tag`](LibraryStore::insert_tag) | Create a tag, reporting unique-constraint losses |
/// | [`insert_picture`](LibraryStore::insert_picture) | Persist a picture with its tag links |
/// | [`remove_album_tree`](LibraryStore::remove_album_tree) | Atomically drop an album and all its pictures |
#[async_trait]
pub trait LibraryStore: Send + Sync {
    async fn find_album_by_path(&self, path: &str) -> Result<Option<Album>>;

    async fn find_album_by_id(&self, id: i64) -> Result<Option<Album>>;

    /// All albums, or only those with `watch = true`.
    async fn list_albums(&self, watch_only: bool) -> Result<Vec<Album>>;

    /// Insert an album. Fails if the path is already registered.
    async fn insert_album(&self, album: &NewAlbum) -> Result<Album>;

    /// Update name, description and watch flag of an existing album.
    async fn update_album(&self, album: &Album) -> Result<()>;

    async fn find_picture_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Picture>>;

    async fn find_picture_by_path(&self, path: &str) -> Result<Option<Picture>>;

    async fn find_picture_by_id(&self, id: i64) -> Result<Option<Picture>>;

    /// Pictures matching any of the fingerprints, in no particular order.
    async fn find_pictures_by_fingerprints(&self, fingerprints: &[String]) -> Result<Vec<Picture>>;

    async fn list_pictures(&self, limit: i64, offset: i64) -> Result<Vec<Picture>>;

    async fn count_pictures(&self) -> Result<i64>;

    /// Every picture of one album, tags attached.
    async fn list_album_pictures(&self, album_id: i64) -> Result<Vec<Picture>>;

    /// Bulk lookup of existing tags by name. Missing names are omitted.
    async fn find_tags_by_names(&self, names: &[String]) -> Result<Vec<Tag>>;

    /// Create a tag.
    ///
    /// Returns [`TagInsert::AlreadyExists`] when the name is taken, which
    /// happens when another worker created it first.
    async fn insert_tag(&self, name: &str) -> Result<TagInsert>;

    /// Persist a new picture and link its tags.
    ///
    /// Fails if the path or the fingerprint is already present.
    async fn insert_picture(&self, picture: &NewPicture) -> Result<Picture>;

    /// Update the mutable fields of a picture (path, description, thumbnail,
    /// tags). The fingerprint is never rewritten.
    async fn update_picture(&self, picture: &Picture) -> Result<Picture>;

    /// Delete a single picture and its tag links.
    async fn remove_picture(&self, id: i64) -> Result<()>;

    /// In one transaction, delete every picture of the album at `path` and
    /// the album itself. Returns the removed pictures, or `None` when no
    /// album is registered at `path`. Either everything is removed or
    /// nothing is.
    async fn remove_album_tree(&self, path: &str) -> Result<Option<Vec<Picture>>>;
}
