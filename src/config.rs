use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use phologix_core::index::EmbedderSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub tagger: TaggerConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedder: EmbedderConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LibraryConfig {
    #[serde(default = "default_thumbnail_dir")]
    pub thumbnail_dir: PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub skip_dedup: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            thumbnail_dir: default_thumbnail_dir(),
            batch_size: default_batch_size(),
            skip_dedup: false,
        }
    }
}

fn default_thumbnail_dir() -> PathBuf {
    PathBuf::from("./data/thumbs")
}
fn default_batch_size() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct TaggerConfig {
    #[serde(default = "default_tagger_port")]
    pub port: u16,
    /// Directory holding `api.py` and its virtualenv.
    #[serde(default = "default_tagger_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub install_script: Option<PathBuf>,
    #[serde(default = "default_model_url")]
    pub model_url: String,
    #[serde(default = "default_tagger_startup")]
    pub startup_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for TaggerConfig {
    fn default() -> Self {
        Self {
            port: default_tagger_port(),
            dir: default_tagger_dir(),
            install_script: None,
            model_url: default_model_url(),
            startup_timeout_secs: default_tagger_startup(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl TaggerConfig {
    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// The virtualenv interpreter the tagger runs under.
    pub fn python(&self) -> PathBuf {
        if cfg!(windows) {
            self.dir.join(".venv").join("Scripts").join("python.exe")
        } else {
            self.dir.join(".venv").join("bin").join("python")
        }
    }

    pub fn model_path(&self) -> PathBuf {
        self.dir.join("model").join("model.safetensors")
    }
}

fn default_tagger_port() -> u16 {
    39070
}
fn default_tagger_dir() -> PathBuf {
    PathBuf::from("./services/tagger")
}
fn default_model_url() -> String {
    "https://huggingface.co/fancyfeast/joytag/resolve/main/model.safetensors?download=true"
        .to_string()
}
fn default_tagger_startup() -> u64 {
    60
}
fn default_request_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_port")]
    pub port: u16,
    /// Where the index server binary is installed.
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_index_db_path")]
    pub db_path: PathBuf,
    /// Fixed binary URL. When unset the latest release is looked up.
    #[serde(default)]
    pub download_url: Option<String>,
    /// Release metadata endpoint used to pick a binary for this platform.
    #[serde(default = "default_index_release_api")]
    pub release_api: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_index_startup")]
    pub startup_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            port: default_index_port(),
            dir: default_index_dir(),
            db_path: default_index_db_path(),
            download_url: None,
            release_api: default_index_release_api(),
            api_key: None,
            startup_timeout_secs: default_index_startup(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl IndexConfig {
    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    pub fn binary(&self) -> PathBuf {
        if cfg!(windows) {
            self.dir.join("meilisearch.exe")
        } else {
            self.dir.join("meilisearch")
        }
    }
}

fn default_index_port() -> u16 {
    39071
}
fn default_index_dir() -> PathBuf {
    PathBuf::from("./services/index")
}
fn default_index_db_path() -> PathBuf {
    PathBuf::from("./data/index")
}
fn default_index_release_api() -> String {
    "https://api.github.com/repos/meilisearch/meilisearch/releases/latest".to_string()
}
fn default_index_startup() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EmbedderConfig {
    /// Optional embedding service binary, started alongside the index.
    #[serde(default)]
    pub binary: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Model created through `<binary> create <model> -f <modelfile>` once
    /// the service is up. Both must be set.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub modelfile: Option<PathBuf>,
    /// Settings pushed to the index when it has no embedder yet.
    #[serde(default)]
    pub settings: Option<EmbedderSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SupervisorConfig {
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            kill_timeout_secs: default_kill_timeout(),
        }
    }
}

fn default_kill_timeout() -> u64 {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatcherConfig {
    #[serde(default = "default_stability_ms")]
    pub stability_ms: u64,
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            stability_ms: default_stability_ms(),
            poll_ms: default_poll_ms(),
        }
    }
}

fn default_stability_ms() -> u64 {
    2000
}
fn default_poll_ms() -> u64 {
    100
}

impl Config {
    /// Defaults rooted at `dir`, used by tests and `init` scaffolding.
    pub fn rooted(dir: &Path) -> Self {
        let data = dir.join("data");
        Self {
            db: DbConfig {
                path: data.join("phologix.sqlite"),
            },
            library: LibraryConfig {
                thumbnail_dir: data.join("thumbs"),
                ..LibraryConfig::default()
            },
            tagger: TaggerConfig {
                dir: dir.join("services").join("tagger"),
                ..TaggerConfig::default()
            },
            index: IndexConfig {
                dir: dir.join("services").join("index"),
                db_path: data.join("index"),
                ..IndexConfig::default()
            },
            embedder: EmbedderConfig::default(),
            supervisor: SupervisorConfig::default(),
            watcher: WatcherConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.library.batch_size == 0 {
        anyhow::bail!("library.batch_size must be > 0");
    }

    if config.tagger.port == 0 {
        anyhow::bail!("tagger.port must be > 0");
    }
    if config.index.port == 0 {
        anyhow::bail!("index.port must be > 0");
    }
    if config.tagger.port == config.index.port {
        anyhow::bail!("tagger.port and index.port must differ");
    }

    if config.supervisor.kill_timeout_secs == 0 {
        anyhow::bail!("supervisor.kill_timeout_secs must be > 0");
    }

    if config.watcher.poll_ms == 0 {
        anyhow::bail!("watcher.poll_ms must be > 0");
    }

    if let Some(settings) = &config.embedder.settings {
        if settings.dimensions == 0 {
            anyhow::bail!("embedder.dimensions must be > 0");
        }
        if settings.model.is_empty() {
            anyhow::bail!("embedder.model must be specified");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_text)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse("[db]\npath = \"./data/p.sqlite\"\n").unwrap();
        assert_eq!(config.library.batch_size, 4);
        assert_eq!(config.tagger.port, 39070);
        assert_eq!(config.index.port, 39071);
        assert_eq!(config.supervisor.kill_timeout_secs, 8);
        assert_eq!(config.watcher.stability_ms, 2000);
        assert!(config.embedder.settings.is_none());
    }

    #[test]
    fn zero_batch_size_rejected() {
        let err = parse("[db]\npath = \"x\"\n[library]\nbatch_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn embedder_section_parses_settings() {
        let config = parse(
            r#"
[db]
path = "x"

[embedder.settings]
source = "openAi"
url = "https://api.example.com/v1/embeddings"
model = "text-embedding-3-small"
dimensions = 1536
"#,
        )
        .unwrap();
        let settings = config.embedder.settings.unwrap();
        assert_eq!(settings.dimensions, 1536);
        assert_eq!(settings.model, "text-embedding-3-small");
    }
}
