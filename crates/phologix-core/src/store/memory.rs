//! In-memory [`LibraryStore`] implementation for testing.
//!
//! All state lives behind one `std::sync::RwLock`, so every operation is
//! atomic with respect to the others. Unique constraints mirror the SQLite
//! schema: album path, picture path, picture fingerprint, tag name.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{Album, NewAlbum, NewPicture, Picture, Tag, TagInsert};

use super::LibraryStore;

#[derive(Default)]
struct State {
    albums: BTreeMap<i64, Album>,
    pictures: BTreeMap<i64, Picture>,
    tags: BTreeMap<i64, Tag>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory store for tests.
pub struct InMemoryStore {
    state: RwLock<State>,
    fail_tree_removal: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            fail_tree_removal: AtomicBool::new(false),
        }
    }

    /// Make subsequent [`LibraryStore::remove_album_tree`] calls fail
    /// without touching any state, to exercise rollback paths.
    pub fn fail_album_removals(&self, fail: bool) {
        self.fail_tree_removal.store(fail, Ordering::SeqCst);
    }

    pub fn picture_count(&self) -> usize {
        self.state.read().unwrap().pictures.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LibraryStore for InMemoryStore {
    async fn find_album_by_path(&self, path: &str) -> Result<Option<Album>> {
        let state = self.state.read().unwrap();
        Ok(state.albums.values().find(|a| a.path == path).cloned())
    }

    async fn find_album_by_id(&self, id: i64) -> Result<Option<Album>> {
        Ok(self.state.read().unwrap().albums.get(&id).cloned())
    }

    async fn list_albums(&self, watch_only: bool) -> Result<Vec<Album>> {
        let state = self.state.read().unwrap();
        Ok(state
            .albums
            .values()
            .filter(|a| !watch_only || a.watch)
            .cloned()
            .collect())
    }

    async fn insert_album(&self, album: &NewAlbum) -> Result<Album> {
        let mut state = self.state.write().unwrap();
        if state.albums.values().any(|a| a.path == album.path) {
            bail!("UNIQUE constraint failed: albums.path ({})", album.path);
        }
        let id = state.next_id();
        let created = Album {
            id,
            path: album.path.clone(),
            name: album.name.clone(),
            description: album.description.clone(),
            watch: album.watch,
        };
        state.albums.insert(id, created.clone());
        Ok(created)
    }

    async fn update_album(&self, album: &Album) -> Result<()> {
        let mut state = self.state.write().unwrap();
        match state.albums.get_mut(&album.id) {
            Some(existing) => {
                existing.name = album.name.clone();
                existing.description = album.description.clone();
                existing.watch = album.watch;
                Ok(())
            }
            None => bail!("album {} does not exist", album.id),
        }
    }

    async fn find_picture_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Picture>> {
        let state = self.state.read().unwrap();
        Ok(state
            .pictures
            .values()
            .find(|p| p.fingerprint == fingerprint)
            .cloned())
    }

    async fn find_picture_by_path(&self, path: &str) -> Result<Option<Picture>> {
        let state = self.state.read().unwrap();
        Ok(state.pictures.values().find(|p| p.path == path).cloned())
    }

    async fn find_picture_by_id(&self, id: i64) -> Result<Option<Picture>> {
        Ok(self.state.read().unwrap().pictures.get(&id).cloned())
    }

    async fn find_pictures_by_fingerprints(&self, fingerprints: &[String]) -> Result<Vec<Picture>> {
        let state = self.state.read().unwrap();
        Ok(state
            .pictures
            .values()
            .filter(|p| fingerprints.contains(&p.fingerprint))
            .cloned()
            .collect())
    }

    async fn list_pictures(&self, limit: i64, offset: i64) -> Result<Vec<Picture>> {
        let state = self.state.read().unwrap();
        Ok(state
            .pictures
            .values()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn count_pictures(&self) -> Result<i64> {
        Ok(self.state.read().unwrap().pictures.len() as i64)
    }

    async fn list_album_pictures(&self, album_id: i64) -> Result<Vec<Picture>> {
        let state = self.state.read().unwrap();
        Ok(state
            .pictures
            .values()
            .filter(|p| p.album_id == album_id)
            .cloned()
            .collect())
    }

    async fn find_tags_by_names(&self, names: &[String]) -> Result<Vec<Tag>> {
        let state = self.state.read().unwrap();
        Ok(state
            .tags
            .values()
            .filter(|t| names.contains(&t.name))
            .cloned()
            .collect())
    }

    async fn insert_tag(&self, name: &str) -> Result<TagInsert> {
        let mut state = self.state.write().unwrap();
        if state.tags.values().any(|t| t.name == name) {
            return Ok(TagInsert::AlreadyExists);
        }
        let id = state.next_id();
        let tag = Tag {
            id,
            name: name.to_string(),
            translation: None,
        };
        state.tags.insert(id, tag.clone());
        Ok(TagInsert::Created(tag))
    }

    async fn insert_picture(&self, picture: &NewPicture) -> Result<Picture> {
        let mut state = self.state.write().unwrap();
        if state.pictures.values().any(|p| p.path == picture.path) {
            bail!("UNIQUE constraint failed: pictures.path ({})", picture.path);
        }
        if state
            .pictures
            .values()
            .any(|p| p.fingerprint == picture.fingerprint)
        {
            bail!(
                "UNIQUE constraint failed: pictures.fingerprint ({})",
                picture.fingerprint
            );
        }
        if !state.albums.contains_key(&picture.album_id) {
            bail!("FOREIGN KEY constraint failed: album {}", picture.album_id);
        }
        let id = state.next_id();
        let created = Picture {
            id,
            path: picture.path.clone(),
            fingerprint: picture.fingerprint.clone(),
            width: picture.width,
            height: picture.height,
            thumbnail_path: picture.thumbnail_path.clone(),
            description: picture.description.clone(),
            updated_at: picture.updated_at,
            album_id: picture.album_id,
            tags: picture.tags.clone(),
        };
        state.pictures.insert(id, created.clone());
        Ok(created)
    }

    async fn update_picture(&self, picture: &Picture) -> Result<Picture> {
        let mut state = self.state.write().unwrap();
        if state
            .pictures
            .values()
            .any(|p| p.id != picture.id && p.path == picture.path)
        {
            bail!("UNIQUE constraint failed: pictures.path ({})", picture.path);
        }
        let Some(existing) = state.pictures.get_mut(&picture.id) else {
            bail!("picture {} does not exist", picture.id);
        };
        existing.path = picture.path.clone();
        existing.description = picture.description.clone();
        existing.thumbnail_path = picture.thumbnail_path.clone();
        existing.tags = picture.tags.clone();
        existing.album_id = picture.album_id;
        existing.updated_at = picture.updated_at;
        Ok(existing.clone())
    }

    async fn remove_picture(&self, id: i64) -> Result<()> {
        self.state.write().unwrap().pictures.remove(&id);
        Ok(())
    }

    async fn remove_album_tree(&self, path: &str) -> Result<Option<Vec<Picture>>> {
        if self.fail_tree_removal.load(Ordering::SeqCst) {
            bail!("album removal failed: {}", path);
        }
        let mut state = self.state.write().unwrap();
        let Some(album_id) = state.albums.values().find(|a| a.path == path).map(|a| a.id) else {
            return Ok(None);
        };
        let picture_ids: Vec<i64> = state
            .pictures
            .values()
            .filter(|p| p.album_id == album_id)
            .map(|p| p.id)
            .collect();
        let removed = picture_ids
            .iter()
            .filter_map(|id| state.pictures.remove(id))
            .collect();
        state.albums.remove(&album_id);
        Ok(Some(removed))
    }
}
