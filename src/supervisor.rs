//! Helper-process supervision.
//!
//! [`ProcessSupervisor`] owns every long-lived child process by role name
//! (`tagger`, `index`, ...). Each registered child is moved into a waiter
//! task that reaps it and deregisters the role when it exits. Termination
//! signals the whole process tree: children spawned through
//! [`prepare_command`] lead their own process group on Unix, so one signal
//! reaches every descendant.
//!
//! The supervisor also tracks temp files (partial downloads) so they can be
//! swept on shutdown.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, warn};

/// How a supervised process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exit {
    pub success: bool,
    pub description: String,
}

/// `None` while the process runs.
pub type ExitWatch = watch::Receiver<Option<Exit>>;

enum Signal {
    Term,
    Kill(oneshot::Sender<std::io::Result<()>>),
}

#[derive(Clone)]
struct Handle {
    id: u64,
    pid: Option<u32>,
    registered_at: Instant,
    signals: mpsc::UnboundedSender<Signal>,
    exited: ExitWatch,
}

/// A registered process, as reported by [`ProcessSupervisor::running`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub name: String,
    pub pid: Option<u32>,
    pub uptime: Duration,
}

struct Inner {
    handles: Mutex<HashMap<String, Handle>>,
    temp_files: Mutex<HashSet<PathBuf>>,
    kill_timeout: Duration,
    stopping: AtomicBool,
    next_id: AtomicU64,
}

#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

/// Put the child in its own process group and tie its lifetime to the
/// handle, so a dropped supervisor never leaks helpers.
pub fn prepare_command(cmd: &mut Command) {
    #[cfg(unix)]
    cmd.process_group(0);
    cmd.kill_on_drop(true);
}

impl ProcessSupervisor {
    pub fn new(kill_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                handles: Mutex::new(HashMap::new()),
                temp_files: Mutex::new(HashSet::new()),
                kill_timeout,
                stopping: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn kill_timeout(&self) -> Duration {
        self.inner.kill_timeout
    }

    /// Take ownership of `child` under `name`.
    ///
    /// A process already registered under the same name is terminated
    /// first. Returns an [`ExitWatch`] for the new process.
    pub async fn register(&self, name: &str, child: Child) -> ExitWatch {
        if !self.terminate(name).await {
            warn!(role = name, "previous process did not terminate cleanly");
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let pid = child.id();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        let handle = Handle {
            id,
            pid,
            registered_at: Instant::now(),
            signals: signal_tx,
            exited: exit_rx.clone(),
        };
        self.inner
            .handles
            .lock()
            .await
            .insert(name.to_string(), handle);
        info!(role = name, pid = ?pid, "process registered");

        tokio::spawn(supervise(
            self.inner.clone(),
            name.to_string(),
            id,
            child,
            signal_rx,
            exit_tx,
        ));

        exit_rx
    }

    /// Stop the process registered under `name` and its descendants.
    ///
    /// Sends SIGTERM and waits up to the kill timeout; if the process is
    /// still alive it is sent SIGKILL. Returns `true` when nothing was
    /// registered, the process had already exited, or it exited after
    /// signalling. Returns `false` only if the forceful kill failed.
    pub async fn terminate(&self, name: &str) -> bool {
        let handle = self.inner.handles.lock().await.get(name).cloned();
        let Some(handle) = handle else {
            return true;
        };
        let mut exited = handle.exited.clone();
        if exited.borrow().is_some() {
            return true;
        }

        info!(role = name, pid = ?handle.pid, "terminating process");
        if handle.signals.send(Signal::Term).is_err() {
            // Waiter already finished
            return true;
        }

        let timeout = self.inner.kill_timeout;
        if tokio::time::timeout(timeout, wait_exit(&mut exited))
            .await
            .is_ok()
        {
            info!(role = name, "process exited gracefully");
            return true;
        }

        warn!(role = name, ?timeout, "graceful termination timed out, killing");
        let (reply_tx, reply_rx) = oneshot::channel();
        if handle.signals.send(Signal::Kill(reply_tx)).is_err() {
            return true;
        }
        match reply_rx.await {
            Ok(Ok(())) | Err(_) => {}
            Ok(Err(e)) => {
                warn!(role = name, error = %e, "forceful kill failed");
                return false;
            }
        }

        if tokio::time::timeout(timeout, wait_exit(&mut exited))
            .await
            .is_err()
        {
            warn!(role = name, "process survived SIGKILL");
            return false;
        }
        true
    }

    /// Terminate every registered process and sweep tracked temp files.
    ///
    /// Installer roles go last. A call made while another is in progress
    /// returns `true` immediately. Returns `true` iff every termination
    /// succeeded and nothing is left registered.
    pub async fn terminate_all(&self) -> bool {
        if self.inner.stopping.swap(true, Ordering::SeqCst) {
            debug!("terminate_all already in progress");
            return true;
        }

        self.cleanup_temp_files().await;

        let mut names: Vec<String> = self
            .running()
            .await
            .into_iter()
            .map(|p| p.name)
            .collect();
        names.sort_by_key(|name| name.contains("install"));
        info!(roles = ?names, "terminating all processes");

        let results = join_all(names.iter().map(|name| self.terminate(name))).await;
        let all_ok = results.iter().all(|ok| *ok) && self.inner.handles.lock().await.is_empty();

        self.inner.stopping.store(false, Ordering::SeqCst);
        all_ok
    }

    /// Registered processes sorted by name.
    pub async fn running(&self) -> Vec<ProcessInfo> {
        let handles = self.inner.handles.lock().await;
        let mut out: Vec<ProcessInfo> = handles
            .iter()
            .map(|(name, h)| ProcessInfo {
                name: name.clone(),
                pid: h.pid,
                uptime: h.registered_at.elapsed(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub async fn is_running(&self, name: &str) -> bool {
        self.inner.handles.lock().await.contains_key(name)
    }

    pub async fn register_temp_file(&self, path: &Path) {
        self.inner
            .temp_files
            .lock()
            .await
            .insert(path.to_path_buf());
    }

    pub async fn unregister_temp_file(&self, path: &Path) {
        self.inner.temp_files.lock().await.remove(path);
    }

    pub async fn tracked_temp_files(&self) -> Vec<PathBuf> {
        self.inner.temp_files.lock().await.iter().cloned().collect()
    }

    /// Delete every tracked temp file that still exists. Failures are
    /// logged; the tracking set is always emptied.
    pub async fn cleanup_temp_files(&self) {
        let files: Vec<PathBuf> = self.inner.temp_files.lock().await.drain().collect();
        for path in files {
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "removed temp file"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temp file"),
            }
        }
    }
}

/// Resolve once the watched process has exited.
pub async fn wait_exit(exited: &mut ExitWatch) {
    // A dropped sender means the waiter task is gone, which only happens
    // after the child was reaped.
    let _ = exited.wait_for(|status| status.is_some()).await;
}

async fn supervise(
    inner: Arc<Inner>,
    name: String,
    id: u64,
    mut child: Child,
    mut signals: mpsc::UnboundedReceiver<Signal>,
    exited: watch::Sender<Option<Exit>>,
) {
    let pid = child.id();
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(signal) = signals.recv() => deliver(&mut child, pid, signal),
        }
    };

    let exit = match status {
        Ok(status) => {
            info!(role = %name, %status, "process exited");
            Exit {
                success: status.success(),
                description: status.to_string(),
            }
        }
        Err(e) => {
            warn!(role = %name, error = %e, "failed to wait on process");
            Exit {
                success: false,
                description: format!("wait failed: {e}"),
            }
        }
    };

    {
        let mut handles = inner.handles.lock().await;
        if handles.get(&name).is_some_and(|h| h.id == id) {
            handles.remove(&name);
        }
    }
    let _ = exited.send(Some(exit));
}

fn deliver(child: &mut Child, pid: Option<u32>, signal: Signal) {
    match signal {
        Signal::Term => {
            if let Err(e) = send_term(child, pid) {
                warn!(pid = ?pid, error = %e, "failed to send SIGTERM");
            }
        }
        Signal::Kill(reply) => {
            let _ = reply.send(send_kill(child, pid));
        }
    }
}

#[cfg(unix)]
fn send_term(_child: &mut Child, pid: Option<u32>) -> std::io::Result<()> {
    match pid {
        Some(pid) => signal_tree(pid, libc::SIGTERM),
        None => Ok(()),
    }
}

#[cfg(unix)]
fn send_kill(child: &mut Child, pid: Option<u32>) -> std::io::Result<()> {
    match pid {
        Some(pid) => signal_tree(pid, libc::SIGKILL),
        None => child.start_kill(),
    }
}

/// Signal the process group led by `pid`, falling back to the process
/// alone when it does not lead a group. A vanished target is not an error.
#[cfg(unix)]
fn signal_tree(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    let pid = pid as libc::pid_t;
    // SAFETY: kill(2) takes plain integers and has no memory-safety requirements.
    if unsafe { libc::kill(-pid, signal) } == 0 {
        return Ok(());
    }
    if unsafe { libc::kill(pid, signal) } == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

// No process groups or graceful signal elsewhere: both stages kill.
#[cfg(not(unix))]
fn send_term(child: &mut Child, _pid: Option<u32>) -> std::io::Result<()> {
    child.start_kill()
}

#[cfg(not(unix))]
fn send_kill(child: &mut Child, _pid: Option<u32>) -> std::io::Result<()> {
    child.start_kill()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(script: &str) -> Child {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        prepare_command(&mut cmd);
        cmd.spawn().unwrap()
    }

    #[tokio::test]
    async fn unknown_role_terminates_trivially() {
        let sup = ProcessSupervisor::new(Duration::from_millis(200));
        assert!(sup.terminate("nothing").await);
    }

    #[tokio::test]
    async fn natural_exit_deregisters() {
        let sup = ProcessSupervisor::new(Duration::from_secs(1));
        let mut exit = sup.register("short", sh("sleep 0.2")).await;
        assert!(sup.is_running("short").await);

        wait_exit(&mut exit).await;
        assert!(!sup.is_running("short").await);
        assert!(exit.borrow().as_ref().is_some_and(|e| e.success));
    }

    #[tokio::test]
    async fn graceful_termination_is_fast() {
        let sup = ProcessSupervisor::new(Duration::from_secs(5));
        sup.register("sleeper", sh("sleep 30")).await;

        let started = Instant::now();
        assert!(sup.terminate("sleeper").await);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(sup.running().await.is_empty());
    }

    #[tokio::test]
    async fn term_ignoring_process_is_killed_after_timeout() {
        let sup = ProcessSupervisor::new(Duration::from_millis(300));
        sup.register("stubborn", sh("trap '' TERM; sleep 30")).await;
        // Let the shell install its trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        assert!(sup.terminate("stubborn").await);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(3));
        assert!(!sup.is_running("stubborn").await);
    }

    #[tokio::test]
    async fn re_registering_replaces_the_old_process() {
        let sup = ProcessSupervisor::new(Duration::from_secs(2));
        let mut first = sup.register("tagger", sh("sleep 30")).await;
        let second = sup.register("tagger", sh("sleep 30")).await;

        wait_exit(&mut first).await;
        let running = sup.running().await;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].name, "tagger");
        assert!(second.borrow().is_none());

        assert!(sup.terminate_all().await);
    }

    #[tokio::test]
    async fn terminate_all_sweeps_processes_and_temp_files() {
        let tmp = TempDir::new().unwrap();
        let partial = tmp.path().join("model.bin.downloading");
        std::fs::write(&partial, b"partial").unwrap();

        let sup = ProcessSupervisor::new(Duration::from_secs(2));
        sup.register("install-tagger", sh("sleep 30")).await;
        sup.register("index", sh("sleep 30")).await;
        sup.register_temp_file(&partial).await;

        assert!(sup.terminate_all().await);
        assert!(sup.running().await.is_empty());
        assert!(!partial.exists());
        assert!(sup.tracked_temp_files().await.is_empty());
    }

    #[tokio::test]
    async fn temp_cleanup_clears_tracking_even_on_failure() {
        let tmp = TempDir::new().unwrap();
        // remove_file on a directory fails.
        let dir = tmp.path().join("not-a-file");
        std::fs::create_dir(&dir).unwrap();
        let gone = tmp.path().join("never-existed");

        let sup = ProcessSupervisor::new(Duration::from_secs(1));
        sup.register_temp_file(&dir).await;
        sup.register_temp_file(&gone).await;
        sup.cleanup_temp_files().await;

        assert!(sup.tracked_temp_files().await.is_empty());
        assert!(dir.exists());
    }
}
