//! CLI command runners.
//!
//! Each `run_*` function backs one `phologix` subcommand: it builds the
//! pieces it needs from [`Config`], does the work and prints a short
//! summary on stdout.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};

use phologix_core::index::{EmbedderSettings, EmbedderSource, SearchIndex};
use phologix_core::models::Picture;
use phologix_core::tagging::Tagger;

use crate::config::Config;
use crate::db;
use crate::index_sync::IndexSync;
use crate::ingest::Ingestor;
use crate::library::Library;
use crate::meili::MeiliIndex;
use crate::progress::ScanProgressReporter;
use crate::services::Services;
use crate::sqlite_store::SqliteStore;
use crate::supervisor::ProcessSupervisor;
use crate::tagger::HttpTagger;
use crate::thumbnail::ThumbnailGenerator;

fn index_sync(config: &Config) -> Result<IndexSync> {
    let index = MeiliIndex::from_config(&config.index)?;
    Ok(IndexSync::new(Arc::new(index)))
}

/// Wire the production store, tagger and index into a [`Library`].
pub async fn open_library(
    config: &Config,
    progress: Arc<dyn ScanProgressReporter>,
) -> Result<Library> {
    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteStore::new(pool));
    let tagger = Arc::new(HttpTagger::from_config(&config.tagger)?);
    let ingestor = Ingestor::new(
        store,
        tagger,
        ThumbnailGenerator::new(&config.library.thumbnail_dir),
        index_sync(config)?,
    );
    Ok(Library::new(Arc::new(ingestor), config.watcher.clone()).with_progress(progress))
}

pub async fn run_album_add(
    library: &Library,
    path: &Path,
    name: Option<String>,
    description: Option<String>,
    no_watch: bool,
) -> Result<()> {
    let path = std::fs::canonicalize(path)
        .with_context(|| format!("Album path not accessible: {}", path.display()))?;
    let album = library
        .add_album(&path.to_string_lossy(), name, description, !no_watch)
        .await?;
    println!("Added album {} (id {}).", album.path, album.id);
    Ok(())
}

pub async fn run_album_list(library: &Library) -> Result<()> {
    let albums = library.list_albums().await?;
    if albums.is_empty() {
        println!("No albums.");
        return Ok(());
    }
    for album in albums {
        println!(
            "{:>4}  {}  {}{}",
            album.id,
            album.path,
            album.name.as_deref().unwrap_or("-"),
            if album.watch { "  (watched)" } else { "" }
        );
    }
    Ok(())
}

pub async fn run_album_update(
    library: &Library,
    path: &str,
    name: Option<String>,
    description: Option<String>,
    watch: Option<bool>,
) -> Result<()> {
    let Some(mut album) = library
        .list_albums()
        .await?
        .into_iter()
        .find(|a| a.path == path)
    else {
        bail!("No album registered at {}", path);
    };
    if let Some(name) = name {
        album.name = Some(name).filter(|n| !n.is_empty());
    }
    if let Some(description) = description {
        album.description = Some(description).filter(|d| !d.is_empty());
    }
    if let Some(watch) = watch {
        album.watch = watch;
    }
    library.update_album(&album).await?;
    println!("ok");
    Ok(())
}

pub async fn run_album_remove(library: &Library, path: &str) -> Result<()> {
    if library.delete_album(path).await? {
        println!("Removed album {}.", path);
    } else {
        println!("No album registered at {}.", path);
    }
    Ok(())
}

pub async fn run_scan(
    config: &Config,
    library: &Library,
    path: &str,
    batch_size: Option<usize>,
    skip_dedup: bool,
) -> Result<()> {
    let batch_size = batch_size.unwrap_or(config.library.batch_size);
    let skip_dedup = skip_dedup || config.library.skip_dedup;
    let summary = library.rescan_album(path, batch_size, skip_dedup).await?;
    println!(
        "Scan complete: {} ingested, {} failed.",
        summary.total_count, summary.error_count
    );
    Ok(())
}

pub async fn run_watch(library: &Library) -> Result<()> {
    let started = library.start_watchers().await?;
    if started == 0 {
        println!("No watched albums.");
        return Ok(());
    }
    println!("Watching {} album(s). Press Ctrl-C to stop.", started);
    tokio::signal::ctrl_c().await?;
    library.stop_watchers().await;
    println!("ok");
    Ok(())
}

pub async fn run_services(config: &Config) -> Result<()> {
    let supervisor =
        ProcessSupervisor::new(Duration::from_secs(config.supervisor.kill_timeout_secs));
    let services = Services::new(config.clone(), supervisor.clone(), index_sync(config)?)?;

    if let Err(e) = services.start_all().await {
        services.stop_all().await?;
        return Err(e.into());
    }
    for process in supervisor.running().await {
        println!("{:<16} pid {}", process.name, process.pid.unwrap_or_default());
    }
    println!("Services running. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await?;
    services.stop_all().await?;
    println!("ok");
    Ok(())
}

fn print_picture(picture: &Picture) {
    let updated = Utc
        .timestamp_opt(picture.updated_at, 0)
        .single()
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!("{:>6}  {}", picture.id, picture.path);
    println!("    size: {}x{}", picture.width, picture.height);
    println!("    updated: {}", updated);
    if !picture.tags.is_empty() {
        println!("    tags: {}", picture.tag_names().join(", "));
    }
    if let Some(description) = &picture.description {
        println!("    description: {}", description);
    }
    println!("    fingerprint: {}", picture.fingerprint);
    println!();
}

pub async fn run_search(
    library: &Library,
    query: &str,
    semantic_ratio: f32,
    page: u32,
    hits_per_page: u32,
    threshold: Option<f64>,
) -> Result<()> {
    if !(0.0..=1.0).contains(&semantic_ratio) {
        bail!("--semantic-ratio must be between 0 and 1, got {}", semantic_ratio);
    }
    let results = library
        .search_pictures(query, hits_per_page, page, semantic_ratio, threshold)
        .await?;
    if results.pictures.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for picture in &results.pictures {
        print_picture(picture);
    }
    println!(
        "page {}, {} hit(s), {} ms",
        results.page, results.total_hits, results.processing_time_ms
    );
    Ok(())
}

pub async fn run_picture_update(
    library: &Library,
    id: i64,
    description: Option<String>,
    tags: Vec<String>,
    clear_tags: bool,
) -> Result<()> {
    let tags = if clear_tags {
        Some(Vec::new())
    } else if tags.is_empty() {
        None
    } else {
        Some(tags)
    };
    let picture = library.update_picture(id, description, tags).await?;
    print_picture(&picture);
    Ok(())
}

pub async fn run_count(library: &Library) -> Result<()> {
    println!("{}", library.count_pictures().await?);
    Ok(())
}

pub async fn run_embedder_show(config: &Config) -> Result<()> {
    let index = MeiliIndex::from_config(&config.index)?;
    match index.embedder_settings().await? {
        Some(settings) => println!("{}", serde_json::to_string_pretty(&settings)?),
        None => println!("No embedder configured."),
    }
    Ok(())
}

/// Overrides for `embedder set`; unset fields keep the configured value.
#[derive(Debug, Default)]
pub struct EmbedderOverrides {
    pub source: Option<String>,
    pub url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub dimensions: Option<u32>,
}

pub fn merge_embedder(
    base: EmbedderSettings,
    overrides: EmbedderOverrides,
) -> Result<EmbedderSettings> {
    let mut settings = base;
    if let Some(source) = overrides.source {
        settings.source = match source.as_str() {
            "ollama" => EmbedderSource::Ollama,
            "openai" | "openAi" => EmbedderSource::OpenAi,
            other => bail!("Unknown embedder source: {}. Use ollama or openai.", other),
        };
    }
    if let Some(url) = overrides.url {
        settings.url = url;
    }
    if let Some(model) = overrides.model {
        settings.model = model;
    }
    if let Some(key) = overrides.api_key {
        settings.api_key = Some(key).filter(|k| !k.is_empty());
    }
    if let Some(dimensions) = overrides.dimensions {
        settings.dimensions = dimensions;
    }
    if settings.dimensions == 0 {
        bail!("Embedder dimensions must be > 0");
    }
    Ok(settings)
}

pub async fn run_embedder_set(config: &Config, overrides: EmbedderOverrides) -> Result<()> {
    let base = config.embedder.settings.clone().unwrap_or_default();
    let settings = merge_embedder(base, overrides)?;
    let index = MeiliIndex::from_config(&config.index)?;
    index.update_embedder_settings(&settings).await?;
    println!("ok");
    Ok(())
}

pub async fn run_tag(config: &Config, files: &[PathBuf]) -> Result<()> {
    let tagger = HttpTagger::from_config(&config.tagger)?;
    let responses = match files {
        [] => bail!("No files given"),
        [file] => vec![tagger.predict(file).await?],
        _ => {
            let paths: Vec<&Path> = files.iter().map(PathBuf::as_path).collect();
            tagger.predict_batch(&paths).await?
        }
    };
    for response in responses {
        match response.error {
            Some(error) => println!("{}: error: {}", response.file_path, error),
            None => println!("{}: {}", response.file_path, response.predicted_tags.join(", ")),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedder_overrides_apply_on_top_of_base() {
        let merged = merge_embedder(
            EmbedderSettings::default(),
            EmbedderOverrides {
                source: Some("openai".into()),
                model: Some("text-embedding-3-small".into()),
                dimensions: Some(1536),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(merged.source, EmbedderSource::OpenAi);
        assert_eq!(merged.model, "text-embedding-3-small");
        assert_eq!(merged.dimensions, 1536);
        assert_eq!(merged.url, EmbedderSettings::default().url);
    }

    #[test]
    fn unknown_embedder_source_is_rejected() {
        let err = merge_embedder(
            EmbedderSettings::default(),
            EmbedderOverrides {
                source: Some("cohere".into()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("cohere"));
    }
}
