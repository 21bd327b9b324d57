//! SQLite-backed [`LibraryStore`] implementation.
//!
//! Maps each [`LibraryStore`] operation onto the `albums`, `pictures`,
//! `tags` and `picture_tags` tables created by [`crate::migrate`]. Unique
//! constraints live in the schema; a lost race on `tags.name` is reported as
//! [`TagInsert::AlreadyExists`] instead of an error.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use phologix_core::models::{Album, NewAlbum, NewPicture, Picture, Tag, TagInsert};
use phologix_core::store::LibraryStore;

const PICTURE_COLUMNS: &str =
    "id, path, fingerprint, width, height, thumbnail_path, description, updated_at, album_id";

/// SQLite implementation of the [`LibraryStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn find_picture_where(&self, column: &str, value: &str) -> Result<Option<Picture>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT {PICTURE_COLUMNS} FROM pictures WHERE {column} = ?");
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => {
                let mut pictures = vec![picture_from_row(&row)];
                attach_tags(&mut conn, &mut pictures).await?;
                Ok(pictures.pop())
            }
            None => Ok(None),
        }
    }
}

fn album_from_row(row: &SqliteRow) -> Album {
    Album {
        id: row.get("id"),
        path: row.get("path"),
        name: row.get("name"),
        description: row.get("description"),
        watch: row.get::<i64, _>("watch") != 0,
    }
}

fn picture_from_row(row: &SqliteRow) -> Picture {
    Picture {
        id: row.get("id"),
        path: row.get("path"),
        fingerprint: row.get("fingerprint"),
        width: row.get::<i64, _>("width") as u32,
        height: row.get::<i64, _>("height") as u32,
        thumbnail_path: row.get("thumbnail_path"),
        description: row.get("description"),
        updated_at: row.get("updated_at"),
        album_id: row.get("album_id"),
        tags: Vec::new(),
    }
}

fn tag_from_row(row: &SqliteRow) -> Tag {
    Tag {
        id: row.get("id"),
        name: row.get("name"),
        translation: row.get("translation"),
    }
}

async fn attach_tags(conn: &mut SqliteConnection, pictures: &mut [Picture]) -> Result<()> {
    for picture in pictures.iter_mut() {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.name, t.translation
            FROM tags t
            JOIN picture_tags pt ON pt.tag_id = t.id
            WHERE pt.picture_id = ?
            ORDER BY t.name
            "#,
        )
        .bind(picture.id)
        .fetch_all(&mut *conn)
        .await?;
        picture.tags = rows.iter().map(tag_from_row).collect();
    }
    Ok(())
}

async fn link_tags(conn: &mut SqliteConnection, picture_id: i64, tags: &[Tag]) -> Result<()> {
    for tag in tags {
        sqlx::query("INSERT OR IGNORE INTO picture_tags (picture_id, tag_id) VALUES (?, ?)")
            .bind(picture_id)
            .bind(tag.id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[async_trait]
impl LibraryStore for SqliteStore {
    async fn find_album_by_path(&self, path: &str) -> Result<Option<Album>> {
        let row =
            sqlx::query("SELECT id, path, name, description, watch FROM albums WHERE path = ?")
                .bind(path)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.as_ref().map(album_from_row))
    }

    async fn find_album_by_id(&self, id: i64) -> Result<Option<Album>> {
        let row = sqlx::query("SELECT id, path, name, description, watch FROM albums WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(album_from_row))
    }

    async fn list_albums(&self, watch_only: bool) -> Result<Vec<Album>> {
        let sql = if watch_only {
            "SELECT id, path, name, description, watch FROM albums WHERE watch = 1 ORDER BY path"
        } else {
            "SELECT id, path, name, description, watch FROM albums ORDER BY path"
        };
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(album_from_row).collect())
    }

    async fn insert_album(&self, album: &NewAlbum) -> Result<Album> {
        let result =
            sqlx::query("INSERT INTO albums (path, name, description, watch) VALUES (?, ?, ?, ?)")
                .bind(&album.path)
                .bind(&album.name)
                .bind(&album.description)
                .bind(album.watch as i64)
                .execute(&self.pool)
                .await?;

        Ok(Album {
            id: result.last_insert_rowid(),
            path: album.path.clone(),
            name: album.name.clone(),
            description: album.description.clone(),
            watch: album.watch,
        })
    }

    async fn update_album(&self, album: &Album) -> Result<()> {
        let result =
            sqlx::query("UPDATE albums SET name = ?, description = ?, watch = ? WHERE id = ?")
                .bind(&album.name)
                .bind(&album.description)
                .bind(album.watch as i64)
                .bind(album.id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("album {} does not exist", album.id);
        }
        Ok(())
    }

    async fn find_picture_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Picture>> {
        self.find_picture_where("fingerprint", fingerprint).await
    }

    async fn find_picture_by_path(&self, path: &str) -> Result<Option<Picture>> {
        self.find_picture_where("path", path).await
    }

    async fn find_picture_by_id(&self, id: i64) -> Result<Option<Picture>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT {PICTURE_COLUMNS} FROM pictures WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut pictures = vec![picture_from_row(&row)];
        attach_tags(&mut conn, &mut pictures).await?;
        Ok(pictures.pop())
    }

    async fn find_pictures_by_fingerprints(&self, fingerprints: &[String]) -> Result<Vec<Picture>> {
        if fingerprints.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {PICTURE_COLUMNS} FROM pictures WHERE fingerprint IN ({})",
            placeholders(fingerprints.len())
        );
        let mut query = sqlx::query(&sql);
        for fp in fingerprints {
            query = query.bind(fp);
        }
        let rows = query.fetch_all(&mut *conn).await?;
        let mut pictures: Vec<Picture> = rows.iter().map(picture_from_row).collect();
        attach_tags(&mut conn, &mut pictures).await?;
        Ok(pictures)
    }

    async fn list_pictures(&self, limit: i64, offset: i64) -> Result<Vec<Picture>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT {PICTURE_COLUMNS} FROM pictures ORDER BY id LIMIT ? OFFSET ?");
        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut *conn)
            .await?;
        let mut pictures: Vec<Picture> = rows.iter().map(picture_from_row).collect();
        attach_tags(&mut conn, &mut pictures).await?;
        Ok(pictures)
    }

    async fn count_pictures(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pictures")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn list_album_pictures(&self, album_id: i64) -> Result<Vec<Picture>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT {PICTURE_COLUMNS} FROM pictures WHERE album_id = ? ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(album_id)
            .fetch_all(&mut *conn)
            .await?;
        let mut pictures: Vec<Picture> = rows.iter().map(picture_from_row).collect();
        attach_tags(&mut conn, &mut pictures).await?;
        Ok(pictures)
    }

    async fn find_tags_by_names(&self, names: &[String]) -> Result<Vec<Tag>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, name, translation FROM tags WHERE name IN ({})",
            placeholders(names.len())
        );
        let mut query = sqlx::query(&sql);
        for name in names {
            query = query.bind(name);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(tag_from_row).collect())
    }

    async fn insert_tag(&self, name: &str) -> Result<TagInsert> {
        let result = sqlx::query("INSERT INTO tags (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) => Ok(TagInsert::Created(Tag {
                id: done.last_insert_rowid(),
                name: name.to_string(),
                translation: None,
            })),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Ok(TagInsert::AlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_picture(&self, picture: &NewPicture) -> Result<Picture> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO pictures (path, fingerprint, width, height, thumbnail_path,
                                  description, updated_at, album_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&picture.path)
        .bind(&picture.fingerprint)
        .bind(picture.width as i64)
        .bind(picture.height as i64)
        .bind(&picture.thumbnail_path)
        .bind(&picture.description)
        .bind(picture.updated_at)
        .bind(picture.album_id)
        .execute(&mut *tx)
        .await?;

        let id = result.last_insert_rowid();
        link_tags(&mut tx, id, &picture.tags).await?;
        tx.commit().await?;

        Ok(Picture {
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
        })
    }

    async fn update_picture(&self, picture: &Picture) -> Result<Picture> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE pictures
            SET path = ?, thumbnail_path = ?, description = ?, updated_at = ?, album_id = ?
            WHERE id = ?
            "#,
        )
        .bind(&picture.path)
        .bind(&picture.thumbnail_path)
        .bind(&picture.description)
        .bind(picture.updated_at)
        .bind(picture.album_id)
        .bind(picture.id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("picture {} does not exist", picture.id);
        }

        sqlx::query("DELETE FROM picture_tags WHERE picture_id = ?")
            .bind(picture.id)
            .execute(&mut *tx)
            .await?;
        link_tags(&mut tx, picture.id, &picture.tags).await?;

        tx.commit().await?;

        self.find_picture_by_id(picture.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("picture {} vanished during update", picture.id))
    }

    async fn remove_picture(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM picture_tags WHERE picture_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM pictures WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn remove_album_tree(&self, path: &str) -> Result<Option<Vec<Picture>>> {
        let mut tx = self.pool.begin().await?;

        let album_id: Option<i64> = sqlx::query_scalar("SELECT id FROM albums WHERE path = ?")
            .bind(path)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(album_id) = album_id else {
            tx.rollback().await?;
            return Ok(None);
        };

        let sql = format!("SELECT {PICTURE_COLUMNS} FROM pictures WHERE album_id = ? ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(album_id)
            .fetch_all(&mut *tx)
            .await?;
        let mut pictures: Vec<Picture> = rows.iter().map(picture_from_row).collect();
        attach_tags(&mut tx, &mut pictures).await?;

        sqlx::query(
            "DELETE FROM picture_tags WHERE picture_id IN (SELECT id FROM pictures WHERE album_id = ?)",
        )
        .bind(album_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM pictures WHERE album_id = ?")
            .bind(album_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM albums WHERE id = ?")
            .bind(album_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(pictures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn open_store(tmp: &TempDir) -> SqliteStore {
        let config = Config::rooted(tmp.path());
        migrate::run_migrations(&config).await.unwrap();
        SqliteStore::new(db::connect(&config).await.unwrap())
    }

    fn new_picture(album_id: i64, path: &str, fp: &str, tags: Vec<Tag>) -> NewPicture {
        NewPicture {
            path: path.to_string(),
            fingerprint: fp.to_string(),
            width: 640,
            height: 480,
            thumbnail_path: Some(format!("/thumbs/{fp}.webp")),
            description: None,
            updated_at: 1_700_000_000,
            album_id,
            tags,
        }
    }

    async fn created(store: &SqliteStore, name: &str) -> Tag {
        match store.insert_tag(name).await.unwrap() {
            TagInsert::Created(tag) => tag,
            TagInsert::AlreadyExists => panic!("tag {name} already existed"),
        }
    }

    #[tokio::test]
    async fn duplicate_tag_reports_already_exists() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        created(&store, "cat").await;
        assert_eq!(
            store.insert_tag("cat").await.unwrap(),
            TagInsert::AlreadyExists
        );
        let found = store
            .find_tags_by_names(&["cat".to_string(), "dog".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn picture_round_trips_with_tags() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let album = store
            .insert_album(&NewAlbum {
                path: "/photos".into(),
                name: Some("Photos".into()),
                description: None,
                watch: true,
            })
            .await
            .unwrap();
        let cat = created(&store, "cat").await;
        let sofa = created(&store, "sofa").await;

        let inserted = store
            .insert_picture(&new_picture(album.id, "/photos/a.png", "aa11", vec![cat, sofa]))
            .await
            .unwrap();

        let by_fp = store
            .find_picture_by_fingerprint("aa11")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_fp.id, inserted.id);
        assert_eq!(by_fp.tag_names(), vec!["cat".to_string(), "sofa".to_string()]);

        assert!(store
            .insert_picture(&new_picture(album.id, "/photos/b.png", "aa11", vec![]))
            .await
            .is_err());
        assert_eq!(store.count_pictures().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn album_tree_removal_drops_pictures_and_links() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let album = store
            .insert_album(&NewAlbum {
                path: "/photos".into(),
                name: None,
                description: None,
                watch: false,
            })
            .await
            .unwrap();
        let cat = created(&store, "cat").await;
        for i in 0..3 {
            store
                .insert_picture(&new_picture(
                    album.id,
                    &format!("/photos/{i}.png"),
                    &format!("fp{i}"),
                    vec![cat.clone()],
                ))
                .await
                .unwrap();
        }

        let removed = store.remove_album_tree("/photos").await.unwrap().unwrap();
        assert_eq!(removed.len(), 3);
        assert!(removed.iter().all(|p| p.tag_names() == vec!["cat".to_string()]));
        assert_eq!(store.count_pictures().await.unwrap(), 0);
        assert!(store.find_album_by_path("/photos").await.unwrap().is_none());

        let links: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM picture_tags")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(links, 0);
        assert!(store.remove_album_tree("/photos").await.unwrap().is_none());
    }
}
