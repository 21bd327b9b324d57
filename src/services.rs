//! Installers and launchers for the helper processes.
//!
//! | Role | Process | Ready when |
//! |------|---------|------------|
//! | `tagger` | `python api.py --port <port>` in the tagger dir | stdout prints `SERVER_READY` |
//! | `index` | search server with `--db-path`, `--http-addr` | stdout or stderr prints `Server listening on` or `Ready` |
//! | `embedder` | optional configured binary | not awaited |
//! | `install-tagger` | configured install script | exit status 0 |
//! | `install-embedder` | `<embedder> create <model> -f <modelfile>` | exit status 0 |
//!
//! Every process is registered with the [`ProcessSupervisor`]; its output is
//! forwarded to `tracing` line by line with the role as a field.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use phologix_core::index::EmbedderSettings;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::index_sync::IndexSync;
use crate::supervisor::{prepare_command, wait_exit, ProcessSupervisor};

pub const ROLE_TAGGER: &str = "tagger";
pub const ROLE_INDEX: &str = "index";
pub const ROLE_EMBEDDER: &str = "embedder";
pub const ROLE_INSTALL_TAGGER: &str = "install-tagger";
pub const ROLE_INSTALL_EMBEDDER: &str = "install-embedder";

pub const TAGGER_MODEL_URL_ENV: &str = "PHOLOGIX_TAGGER_MODEL_URL";
pub const INDEX_DOWNLOAD_URL_ENV: &str = "PHOLOGIX_INDEX_DOWNLOAD_URL";

const PARTIAL_SUFFIX: &str = ".downloading";

/// The embedding server may still be starting when the model is created.
const MODEL_CREATE_ATTEMPTS: u32 = 5;
const MODEL_CREATE_RETRY: Duration = Duration::from_secs(1);

/// Output substrings that mark a process as ready, per stream.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub stdout: &'static [&'static str],
    pub stderr: &'static [&'static str],
}

const TAGGER_READY: Readiness = Readiness {
    stdout: &["SERVER_READY"],
    stderr: &[],
};

const NO_MARKERS: &[&str] = &[];

const INDEX_READY: Readiness = Readiness {
    stdout: &["Server listening on", "Ready"],
    stderr: &["Server listening on", "Ready"],
};

pub struct Services {
    config: Config,
    supervisor: ProcessSupervisor,
    index: IndexSync,
    http: reqwest::Client,
}

/// `<dest>.downloading`
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

async fn non_empty_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Release asset holding the index server for `os`/`arch`, named the way
/// upstream publishes them. `None` where no prebuilt binary exists.
pub fn index_asset_name(os: &str, arch: &str) -> Option<&'static str> {
    match (os, arch) {
        ("windows", _) => Some("meilisearch-windows-amd64.exe"),
        ("macos", "x86_64") => Some("meilisearch-macos-amd64"),
        ("macos", "aarch64") => Some("meilisearch-macos-apple-silicon"),
        ("linux", "x86_64") => Some("meilisearch-linux-amd64"),
        ("linux", "aarch64") => Some("meilisearch-linux-aarch64"),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

/// Turns streamed byte counts into whole-ten percentages, each reported
/// once. Silent when the length is unknown.
struct DownloadProgress {
    total: Option<u64>,
    written: u64,
    last_step: u64,
}

impl DownloadProgress {
    fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|&t| t > 0),
            written: 0,
            last_step: 0,
        }
    }

    fn advance(&mut self, bytes: u64) -> Option<u64> {
        self.written += bytes;
        let total = self.total?;
        let step = (self.written.min(total) * 10 / total).min(10);
        if step > self.last_step {
            self.last_step = step;
            Some(step * 10)
        } else {
            None
        }
    }
}

impl Services {
    pub fn new(config: Config, supervisor: ProcessSupervisor, index: IndexSync) -> Result<Self> {
        // The release API rejects requests without a user agent
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("phologix/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            config,
            supervisor,
            index,
            http,
        })
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Stream `url` into `dest` through a tracked `<dest>.downloading` file.
    ///
    /// The partial file is renamed into place only after the body has been
    /// fully written. On failure it is deleted and untracked.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let partial = partial_path(dest);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::try_exists(&partial).await.unwrap_or(false) {
            tokio::fs::remove_file(&partial).await?;
        }

        self.supervisor.register_temp_file(&partial).await;
        info!(%url, dest = %dest.display(), "downloading");

        let outcome = self.fetch_into(url, &partial, dest).await;
        self.supervisor.unregister_temp_file(&partial).await;

        match outcome {
            Ok(bytes) => {
                info!(%url, bytes, "download complete");
                Ok(())
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                Err(Error::DownloadFailure {
                    url: url.to_string(),
                    reason: format!("{e:#}"),
                })
            }
        }
    }

    async fn fetch_into(&self, url: &str, partial: &Path, dest: &Path) -> anyhow::Result<u64> {
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("server returned {}", status);
        }

        let mut file = tokio::fs::File::create(partial)
            .await
            .with_context(|| format!("create {}", partial.display()))?;
        let mut progress = DownloadProgress::new(response.content_length());
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if let Some(percent) = progress.advance(chunk.len() as u64) {
                info!(%url, percent, "downloading");
            }
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(partial, dest)
            .await
            .with_context(|| format!("rename into {}", dest.display()))?;
        Ok(written)
    }

    /// Run the tagger install script unless its virtualenv already exists.
    /// Returns whether the installer ran.
    pub async fn install_tagger(&self) -> Result<bool> {
        let tagger = &self.config.tagger;
        if tokio::fs::try_exists(tagger.python()).await.unwrap_or(false) {
            info!("tagger environment already installed");
            return Ok(false);
        }
        let Some(script) = &tagger.install_script else {
            warn!("tagger environment missing and no install script configured");
            return Ok(false);
        };

        let mut cmd = shell_command(script);
        cmd.current_dir(&tagger.dir);
        tokio::fs::create_dir_all(&tagger.dir).await?;
        self.run_to_completion(ROLE_INSTALL_TAGGER, cmd).await?;
        info!("tagger installed");
        Ok(true)
    }

    /// Run a one-shot installer process under `role` and wait for it.
    /// A non-zero exit is [`Error::ProcessExited`].
    async fn run_to_completion(&self, role: &str, cmd: Command) -> Result<()> {
        let mut exit = self.spawn(role, cmd, None).await?;
        wait_exit(&mut exit).await;

        let outcome = exit.borrow().clone();
        match outcome {
            Some(exit) if exit.success => Ok(()),
            Some(exit) => Err(Error::ProcessExited {
                role: role.to_string(),
                status: exit.description,
            }),
            None => Err(Error::ProcessExited {
                role: role.to_string(),
                status: "unknown".to_string(),
            }),
        }
    }

    /// Download the tagger model if it is missing or empty.
    pub async fn ensure_tagger_model(&self) -> Result<bool> {
        let path = self.config.tagger.model_path();
        if non_empty_file(&path).await {
            return Ok(false);
        }
        let url = std::env::var(TAGGER_MODEL_URL_ENV)
            .unwrap_or_else(|_| self.config.tagger.model_url.clone());
        self.download(&url, &path).await?;
        Ok(true)
    }

    pub async fn start_tagger(&self) -> Result<()> {
        let tagger = &self.config.tagger;
        let mut cmd = Command::new(tagger.python());
        cmd.arg("api.py")
            .arg("--port")
            .arg(tagger.port.to_string())
            .current_dir(&tagger.dir);
        self.launch(
            ROLE_TAGGER,
            cmd,
            TAGGER_READY,
            Duration::from_secs(tagger.startup_timeout_secs),
        )
        .await
    }

    /// Fetch the index server binary if it is missing or empty.
    ///
    /// The URL comes from `PHOLOGIX_INDEX_DOWNLOAD_URL`, then the config,
    /// then the latest release's asset for this platform.
    pub async fn install_index(&self) -> Result<bool> {
        let index = &self.config.index;
        let binary = index.binary();
        if non_empty_file(&binary).await {
            return Ok(false);
        }
        let url = match std::env::var(INDEX_DOWNLOAD_URL_ENV)
            .ok()
            .or_else(|| index.download_url.clone())
        {
            Some(url) => url,
            None => self.latest_index_url().await?,
        };
        self.download(&url, &binary).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).await?;
        }
        Ok(true)
    }

    async fn latest_index_url(&self) -> Result<String> {
        let api = &self.config.index.release_api;
        let failure = |reason: String| Error::DownloadFailure {
            url: api.clone(),
            reason,
        };
        let (os, arch) = (std::env::consts::OS, std::env::consts::ARCH);
        let asset = index_asset_name(os, arch)
            .ok_or_else(|| failure(format!("no prebuilt index server for {os}/{arch}")))?;

        let release: Release = self
            .http
            .get(api)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| failure(e.to_string()))?
            .json()
            .await
            .map_err(|e| failure(format!("malformed release: {e}")))?;
        info!(version = %release.tag_name, asset, "latest index server release");

        release
            .assets
            .into_iter()
            .find(|a| a.name == asset)
            .map(|a| a.browser_download_url)
            .ok_or_else(|| failure(format!("release {} has no {asset}", release.tag_name)))
    }

    /// Start the index server, then apply the one-time index settings.
    pub async fn start_index(&self) -> Result<()> {
        let index = &self.config.index;
        tokio::fs::create_dir_all(&index.db_path).await?;

        let mut cmd = Command::new(index.binary());
        cmd.arg("--db-path")
            .arg(&index.db_path)
            .arg("--env")
            .arg("development")
            .arg("--http-addr")
            .arg(format!("localhost:{}", index.port));
        if let Some(key) = &index.api_key {
            cmd.arg("--master-key").arg(key);
        }
        self.launch(
            ROLE_INDEX,
            cmd,
            INDEX_READY,
            Duration::from_secs(index.startup_timeout_secs),
        )
        .await?;

        let embedder = self
            .config
            .embedder
            .settings
            .clone()
            .unwrap_or_else(EmbedderSettings::default);
        self.index.configure(&embedder).await;
        Ok(())
    }

    /// Start the optional embedding service, then create its model. Returns
    /// whether the service was started. A failed model creation is logged.
    pub async fn start_embedder(&self) -> Result<bool> {
        let Some(binary) = &self.config.embedder.binary else {
            return Ok(false);
        };
        if !tokio::fs::try_exists(binary).await.unwrap_or(false) {
            warn!(binary = %binary.display(), "embedder binary not found, skipping");
            return Ok(false);
        }
        let mut cmd = Command::new(binary);
        cmd.args(&self.config.embedder.args);
        self.spawn(ROLE_EMBEDDER, cmd, None).await?;

        if let Err(e) = self.create_embedder_model().await {
            warn!(error = %e, "failed to create embedding model");
        }
        Ok(true)
    }

    /// Run `<binary> create <model> -f <modelfile>` under the
    /// `install-embedder` role, retrying while the service starts. Returns
    /// whether a model was configured.
    pub async fn create_embedder_model(&self) -> Result<bool> {
        let embedder = &self.config.embedder;
        let (Some(binary), Some(model), Some(modelfile)) =
            (&embedder.binary, &embedder.model, &embedder.modelfile)
        else {
            return Ok(false);
        };

        let mut attempt = 1;
        loop {
            let mut cmd = Command::new(binary);
            cmd.arg("create").arg(model).arg("-f").arg(modelfile);
            match self.run_to_completion(ROLE_INSTALL_EMBEDDER, cmd).await {
                Ok(()) => {
                    info!(model = %model, "embedding model created");
                    return Ok(true);
                }
                Err(e) if attempt < MODEL_CREATE_ATTEMPTS => {
                    debug!(attempt, error = %e, "model creation failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(MODEL_CREATE_RETRY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Install and start every helper in dependency order.
    pub async fn start_all(&self) -> Result<()> {
        self.install_tagger().await?;
        self.ensure_tagger_model().await?;
        self.install_index().await?;
        self.start_embedder().await?;

        let (tagger, index) = tokio::join!(self.start_tagger(), self.start_index());
        tagger?;
        index?;
        Ok(())
    }

    /// Terminate every helper and sweep partial downloads.
    pub async fn stop_all(&self) -> Result<()> {
        if self.supervisor.terminate_all().await {
            return Ok(());
        }
        let left: Vec<String> = self
            .supervisor
            .running()
            .await
            .into_iter()
            .map(|p| p.name)
            .collect();
        Err(Error::ProcessTerminationFailure {
            role: left.join(", "),
            reason: "still running after SIGKILL".to_string(),
        })
    }

    /// Spawn `cmd` under `role` and wait for a readiness marker.
    ///
    /// Fails with [`Error::ProcessExited`] if both output streams close
    /// before a marker appears, and with [`Error::ProcessStartupTimeout`]
    /// (after terminating the process) if `timeout` elapses first.
    pub async fn launch(
        &self,
        role: &str,
        cmd: Command,
        readiness: Readiness,
        timeout: Duration,
    ) -> Result<()> {
        let (ready_tx, mut ready_rx) = watch::channel(false);
        let mut exit = self.spawn(role, cmd, Some((readiness, ready_tx))).await?;

        let waited = tokio::time::timeout(timeout, async {
            if ready_rx.wait_for(|ready| *ready).await.is_ok() {
                return Ok(());
            }
            // Output closed without a marker
            wait_exit(&mut exit).await;
            let status = exit
                .borrow()
                .as_ref()
                .map(|e| e.description.clone())
                .unwrap_or_else(|| "output closed".to_string());
            Err(status)
        })
        .await;

        match waited {
            Ok(Ok(())) => {
                info!(role, "process ready");
                Ok(())
            }
            Ok(Err(status)) => Err(Error::ProcessExited {
                role: role.to_string(),
                status,
            }),
            Err(_) => {
                warn!(role, ?timeout, "process did not become ready");
                self.supervisor.terminate(role).await;
                Err(Error::ProcessStartupTimeout {
                    role: role.to_string(),
                    timeout,
                })
            }
        }
    }

    async fn spawn(
        &self,
        role: &str,
        mut cmd: Command,
        readiness: Option<(Readiness, watch::Sender<bool>)>,
    ) -> Result<crate::supervisor::ExitWatch> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        prepare_command(&mut cmd);
        let mut child = cmd.spawn()?;

        let (stdout_markers, stderr_markers, ready) = match readiness {
            Some((r, tx)) => (r.stdout, r.stderr, Some(Arc::new(tx))),
            None => (NO_MARKERS, NO_MARKERS, None),
        };
        if let Some(out) = child.stdout.take() {
            tokio::spawn(forward_lines(
                role.to_string(),
                out,
                stdout_markers,
                ready.clone(),
            ));
        }
        if let Some(err) = child.stderr.take() {
            tokio::spawn(forward_lines(role.to_string(), err, stderr_markers, ready));
        }

        Ok(self.supervisor.register(role, child).await)
    }
}

fn shell_command(script: &Path) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(script);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg(script);
        cmd
    }
}

async fn forward_lines<R>(
    role: String,
    stream: R,
    markers: &'static [&'static str],
    ready: Option<Arc<watch::Sender<bool>>>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(role = %role, "{}", line);
        if let Some(tx) = &ready {
            if markers.iter().any(|m| line.contains(m)) {
                let _ = tx.send(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use phologix_core::index::memory::InMemoryIndex;
    use tempfile::TempDir;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn services(tmp: &TempDir, kill_timeout: Duration) -> Services {
        services_with(Config::rooted(tmp.path()), kill_timeout)
    }

    fn services_with(config: Config, kill_timeout: Duration) -> Services {
        Services::new(
            config,
            ProcessSupervisor::new(kill_timeout),
            IndexSync::new(Arc::new(InMemoryIndex::new())),
        )
        .unwrap()
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/x/model.safetensors")),
            PathBuf::from("/x/model.safetensors.downloading")
        );
    }

    #[tokio::test]
    async fn download_renames_into_place() {
        let tmp = TempDir::new().unwrap();
        let base = serve(Router::new().route("/model", get(|| async { "weights" }))).await;
        let svc = services(&tmp, Duration::from_secs(1));

        let dest = tmp.path().join("nested").join("model.bin");
        svc.download(&format!("{base}/model"), &dest).await.unwrap();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "weights");
        assert!(!partial_path(&dest).exists());
        assert!(svc.supervisor().tracked_temp_files().await.is_empty());
    }

    #[tokio::test]
    async fn failed_download_leaves_nothing_behind() {
        let tmp = TempDir::new().unwrap();
        let base = serve(Router::new().route(
            "/model",
            get(|| async { (StatusCode::NOT_FOUND, "gone") }),
        ))
        .await;
        let svc = services(&tmp, Duration::from_secs(1));

        let dest = tmp.path().join("model.bin");
        let err = svc
            .download(&format!("{base}/model"), &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DownloadFailure { .. }));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
        assert!(svc.supervisor().tracked_temp_files().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launch_waits_for_marker() {
        let tmp = TempDir::new().unwrap();
        let svc = services(&tmp, Duration::from_secs(2));
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo booting; sleep 0.1; echo SERVER_READY; sleep 30");

        svc.launch(ROLE_TAGGER, cmd, TAGGER_READY, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(svc.supervisor().is_running(ROLE_TAGGER).await);
        assert!(svc.supervisor().terminate_all().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launch_reports_early_exit() {
        let tmp = TempDir::new().unwrap();
        let svc = services(&tmp, Duration::from_secs(2));
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo failing >&2; exit 3");

        let err = svc
            .launch(ROLE_INDEX, cmd, INDEX_READY, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProcessExited { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launch_times_out_and_terminates() {
        let tmp = TempDir::new().unwrap();
        let svc = services(&tmp, Duration::from_secs(2));
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo still loading; sleep 30");

        let err = svc
            .launch(ROLE_TAGGER, cmd, TAGGER_READY, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProcessStartupTimeout { .. }));
        assert!(!svc.supervisor().is_running(ROLE_TAGGER).await);
    }

    #[test]
    fn asset_names_follow_upstream_release_naming() {
        assert_eq!(
            index_asset_name("linux", "x86_64"),
            Some("meilisearch-linux-amd64")
        );
        assert_eq!(
            index_asset_name("macos", "aarch64"),
            Some("meilisearch-macos-apple-silicon")
        );
        assert_eq!(
            index_asset_name("windows", "x86_64"),
            Some("meilisearch-windows-amd64.exe")
        );
        assert_eq!(index_asset_name("freebsd", "x86_64"), None);
    }

    #[test]
    fn progress_reports_each_tenth_once() {
        let mut progress = DownloadProgress::new(Some(200));
        assert_eq!(progress.advance(10), None);
        assert_eq!(progress.advance(10), Some(10));
        assert_eq!(progress.advance(5), None);
        assert_eq!(progress.advance(75), Some(50));
        assert_eq!(progress.advance(100), Some(100));
        assert_eq!(progress.advance(1), None);

        let mut unknown = DownloadProgress::new(None);
        assert_eq!(unknown.advance(1_000), None);
    }

    #[tokio::test]
    async fn install_index_resolves_the_latest_release() {
        let (os, arch) = (std::env::consts::OS, std::env::consts::ARCH);
        let Some(asset) = index_asset_name(os, arch) else {
            return;
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let release = serde_json::json!({
            "tag_name": "v1.12.0",
            "assets": [
                { "name": "meilisearch-other", "browser_download_url": format!("{base}/wrong") },
                { "name": asset, "browser_download_url": format!("{base}/binary") },
            ],
        });
        let app = Router::new()
            .route(
                "/releases/latest",
                get(move || {
                    let release = release.clone();
                    async move { axum::Json(release) }
                }),
            )
            .route("/binary", get(|| async { "index-server" }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let tmp = TempDir::new().unwrap();
        let mut config = Config::rooted(tmp.path());
        config.index.release_api = format!("{base}/releases/latest");
        let svc = services_with(config, Duration::from_secs(1));

        assert!(svc.install_index().await.unwrap());
        let binary = svc.config.index.binary();
        assert_eq!(std::fs::read_to_string(&binary).unwrap(), "index-server");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&binary).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
        assert!(!svc.install_index().await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn embedder_model_is_created_after_the_service_starts() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let binary = tmp.path().join("embedder");
        std::fs::write(
            &binary,
            "#!/bin/sh\n\
             if [ \"$1\" = create ]; then echo \"$@\" > \"$(dirname \"$0\")/created\"; exit 0; fi\n\
             sleep 30\n",
        )
        .unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        let modelfile = tmp.path().join("Modelfile");
        std::fs::write(&modelfile, "FROM ./bge-m3.gguf\n").unwrap();

        let mut config = Config::rooted(tmp.path());
        config.embedder.binary = Some(binary);
        config.embedder.args = vec!["serve".into()];
        config.embedder.model = Some("bge-m3".into());
        config.embedder.modelfile = Some(modelfile.clone());
        let svc = services_with(config, Duration::from_secs(2));

        assert!(svc.start_embedder().await.unwrap());
        let created = std::fs::read_to_string(tmp.path().join("created")).unwrap();
        assert_eq!(
            created.trim(),
            format!("create bge-m3 -f {}", modelfile.display())
        );
        assert!(svc.supervisor().is_running(ROLE_EMBEDDER).await);
        assert!(!svc.supervisor().is_running(ROLE_INSTALL_EMBEDDER).await);
        assert!(svc.supervisor().terminate_all().await);
    }

    #[tokio::test]
    async fn embedder_model_needs_binary_model_and_modelfile() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::rooted(tmp.path());
        config.embedder.model = Some("bge-m3".into());
        let svc = services_with(config, Duration::from_secs(1));
        assert!(!svc.create_embedder_model().await.unwrap());
    }
}
