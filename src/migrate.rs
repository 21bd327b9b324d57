use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS albums (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            name TEXT,
            description TEXT,
            watch INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pictures (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            fingerprint TEXT NOT NULL UNIQUE,
            width INTEGER NOT NULL,
            height INTEGER NOT NULL,
            thumbnail_path TEXT UNIQUE,
            description TEXT,
            updated_at INTEGER NOT NULL,
            album_id INTEGER NOT NULL,
            FOREIGN KEY (album_id) REFERENCES albums(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            translation TEXT
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Tag links, removed with either side
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS picture_tags (
            picture_id INTEGER NOT NULL,
            tag_id INTEGER NOT NULL,
            PRIMARY KEY (picture_id, tag_id),
            FOREIGN KEY (picture_id) REFERENCES pictures(id) ON DELETE CASCADE,
            FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pictures_album_id ON pictures(album_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_picture_tags_tag_id ON picture_tags(tag_id)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
