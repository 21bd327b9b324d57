//! # Phologix CLI (`phologix`)
//!
//! The `phologix` binary drives the library engine: database setup, album
//! management, scans, live watching, helper services and search.
//!
//! ## Usage
//!
//! ```bash
//! phologix --config ./config/phologix.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `phologix init` | Create the SQLite database and run schema migrations |
//! | `phologix album add <path>` | Register an album root |
//! | `phologix album list` | List albums |
//! | `phologix album update <path>` | Rename, describe, or toggle watching |
//! | `phologix album remove <path>` | Delete an album with its pictures |
//! | `phologix scan <path>` | Ingest every image under an album |
//! | `phologix watch` | Watch all watched albums until Ctrl-C |
//! | `phologix services` | Install and run the tagger and index |
//! | `phologix search "<query>"` | Keyword, hybrid, or similarity search |
//! | `phologix picture update <id>` | Edit description or tags |
//! | `phologix count` | Number of pictures |
//! | `phologix embedder show\|set` | Inspect or change the index embedder |
//! | `phologix tag <files...>` | Ask the tagger about files directly |
//!
//! Logs go to stderr and honour `RUST_LOG`.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use phologix::commands::{self, EmbedderOverrides};
use phologix::config;
use phologix::migrate;
use phologix::progress::ProgressMode;

/// Phologix: a local photo library with tagging and hybrid search.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/phologix.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "phologix",
    about = "Phologix: a local photo library with automatic tagging and hybrid search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/phologix.toml")]
    config: PathBuf,

    /// Scan progress on stderr: `off`, `human`, or `json`. Defaults to
    /// `human` on a terminal and `off` otherwise.
    #[arg(long, global = true)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Manage albums.
    Album {
        #[command(subcommand)]
        action: AlbumAction,
    },

    /// Scan an album and ingest every supported image under it.
    Scan {
        /// Album root.
        path: PathBuf,

        /// Images processed concurrently per batch (defaults to config).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Do not consult content fingerprints before tagging.
        #[arg(long)]
        skip_dedup: bool,
    },

    /// Watch every album flagged for watching until Ctrl-C.
    Watch,

    /// Install and start the helper services, then wait for Ctrl-C.
    Services,

    /// Search pictures.
    ///
    /// An empty query lists the library page by page. `$similar:<fingerprint>`
    /// finds pictures similar to a known one.
    Search {
        query: String,

        /// 0 for keyword search, up to 1 for purely semantic ranking.
        #[arg(long, default_value_t = 0.0)]
        semantic_ratio: f32,

        /// 1-based page number.
        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 20)]
        hits_per_page: u32,

        /// Drop hits ranked below this score.
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Edit pictures.
    Picture {
        #[command(subcommand)]
        action: PictureAction,
    },

    /// Print the number of pictures in the library.
    Count,

    /// Inspect or change the search index embedder.
    Embedder {
        #[command(subcommand)]
        action: EmbedderAction,
    },

    /// Send files to the tagging service and print the predicted tags.
    Tag {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Subcommand)]
enum AlbumAction {
    /// Register a directory as an album.
    Add {
        path: PathBuf,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Do not watch the album for changes.
        #[arg(long)]
        no_watch: bool,
    },
    /// List albums.
    List,
    /// Update album metadata. Empty strings clear a field.
    Update {
        path: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        watch: Option<bool>,
    },
    /// Delete an album and every picture it owns.
    Remove { path: String },
}

#[derive(Subcommand)]
enum PictureAction {
    /// Update a picture's description and/or tags.
    Update {
        id: i64,
        /// New description; an empty string clears it.
        #[arg(long)]
        description: Option<String>,
        /// Replace the tags (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Remove every tag.
        #[arg(long, conflicts_with = "tags")]
        clear_tags: bool,
    },
}

#[derive(Subcommand)]
enum EmbedderAction {
    /// Print the embedder configured in the index.
    Show,
    /// Configure the embedder. Unset flags keep the value from config.
    Set {
        /// `ollama` or `openai`.
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        dimensions: Option<u32>,
    },
}

/// Album roots are stored canonicalized; fall back to the given text when
/// the directory no longer exists.
fn album_key(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
            return Ok(());
        }
        Commands::Services => return commands::run_services(&cfg).await,
        Commands::Tag { files } => return commands::run_tag(&cfg, &files).await,
        Commands::Embedder { action } => {
            return match action {
                EmbedderAction::Show => commands::run_embedder_show(&cfg).await,
                EmbedderAction::Set {
                    source,
                    url,
                    model,
                    api_key,
                    dimensions,
                } => {
                    let overrides = EmbedderOverrides {
                        source,
                        url,
                        model,
                        api_key,
                        dimensions,
                    };
                    commands::run_embedder_set(&cfg, overrides).await
                }
            };
        }
        command => {
            let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
            let library = commands::open_library(&cfg, progress.reporter()).await?;

            match command {
                Commands::Album { action } => match action {
                    AlbumAction::Add {
                        path,
                        name,
                        description,
                        no_watch,
                    } => {
                        commands::run_album_add(&library, &path, name, description, no_watch).await?
                    }
                    AlbumAction::List => commands::run_album_list(&library).await?,
                    AlbumAction::Update {
                        path,
                        name,
                        description,
                        watch,
                    } => {
                        let key = album_key(Path::new(&path));
                        commands::run_album_update(&library, &key, name, description, watch).await?
                    }
                    AlbumAction::Remove { path } => {
                        commands::run_album_remove(&library, &album_key(Path::new(&path))).await?
                    }
                },
                Commands::Scan {
                    path,
                    batch_size,
                    skip_dedup,
                } => {
                    commands::run_scan(&cfg, &library, &album_key(&path), batch_size, skip_dedup)
                        .await?
                }
                Commands::Watch => commands::run_watch(&library).await?,
                Commands::Search {
                    query,
                    semantic_ratio,
                    page,
                    hits_per_page,
                    threshold,
                } => {
                    commands::run_search(
                        &library,
                        &query,
                        semantic_ratio,
                        page,
                        hits_per_page,
                        threshold,
                    )
                    .await?
                }
                Commands::Picture {
                    action:
                        PictureAction::Update {
                            id,
                            description,
                            tags,
                            clear_tags,
                        },
                } => {
                    commands::run_picture_update(&library, id, description, tags, clear_tags)
                        .await?
                }
                Commands::Count => commands::run_count(&library).await?,
                Commands::Init
                | Commands::Services
                | Commands::Tag { .. }
                | Commands::Embedder { .. } => {
                    unreachable!("handled before opening the library")
                }
            }
        }
    }

    Ok(())
}
