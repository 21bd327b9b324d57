//! Live album watching.
//!
//! Each watched album gets a recursive OS watch and one event task. New or
//! renamed-in images are held in a pending set until their size stops
//! changing for the configured stability window, then ingested. Removed or
//! renamed-out images have their pictures destroyed immediately.
//!
//! Directories matter too. A directory that appears is walked, since files
//! written before the OS watch reached it produce no events of their own. A
//! directory that disappears takes every picture stored beneath it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::error::{Error, Result};
use crate::ingest::Ingestor;
use crate::scan::is_supported_image;

/// What a filesystem event means for the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// An image appeared or was written to; ingest once it settles.
    Candidate(PathBuf),
    Removed(PathBuf),
    /// A directory appeared. Images inside it may predate the OS watch on
    /// it, so the directory is walked.
    DirectoryAdded(PathBuf),
    /// A directory vanished or moved out; every picture beneath it goes.
    DirectoryRemoved(PathBuf),
}

/// A path that now exists. Directories are told apart by a stat when the
/// event does not say.
fn appeared(path: &Path, folder: bool) -> Option<Change> {
    if folder || path.is_dir() {
        Some(Change::DirectoryAdded(path.to_path_buf()))
    } else if is_supported_image(path) {
        Some(Change::Candidate(path.to_path_buf()))
    } else {
        None
    }
}

/// A path that no longer exists and cannot be stat'ed. Anything without an
/// image extension may have been a directory.
fn vanished(path: &Path, folder: bool) -> Change {
    if !folder && is_supported_image(path) {
        Change::Removed(path.to_path_buf())
    } else {
        Change::DirectoryRemoved(path.to_path_buf())
    }
}

/// Translate a notify event into library changes. Files without an
/// eligible image extension are dropped.
pub fn classify(event: &Event) -> Vec<Change> {
    let paths = event.paths.iter().map(PathBuf::as_path);
    match event.kind {
        EventKind::Create(CreateKind::Folder) => paths.filter_map(|p| appeared(p, true)).collect(),
        EventKind::Create(CreateKind::File) => paths
            .filter(|p| is_supported_image(p))
            .map(|p| Change::Candidate(p.to_path_buf()))
            .collect(),
        EventKind::Create(_) => paths.filter_map(|p| appeared(p, false)).collect(),
        EventKind::Remove(RemoveKind::Folder) => paths.map(|p| vanished(p, true)).collect(),
        EventKind::Remove(RemoveKind::File) => paths
            .filter(|p| is_supported_image(p))
            .map(|p| Change::Removed(p.to_path_buf()))
            .collect(),
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.map(|p| vanished(p, false)).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.filter_map(|p| appeared(p, false)).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = paths;
            paths
                .next()
                .map(|p| vanished(p, false))
                .into_iter()
                .chain(paths.filter_map(|p| appeared(p, false)))
                .collect()
        }
        // Platforms that cannot tell the two sides of a rename apart.
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .filter_map(|p| {
                if p.exists() {
                    appeared(p, false)
                } else {
                    Some(vanished(p, false))
                }
            })
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => paths
            .filter(|p| is_supported_image(p))
            .map(|p| Change::Candidate(p.to_path_buf()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Every eligible image beneath `dir`, sorted.
async fn images_under(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "cannot list new directory");
                continue;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            match entry.file_type().await {
                Ok(ft) if ft.is_dir() => stack.push(path),
                Ok(ft) if ft.is_file() && is_supported_image(&path) => found.push(path),
                _ => {}
            }
        }
    }
    found.sort();
    found
}

struct Pending {
    size: Option<u64>,
    since: Instant,
}

/// Files waiting for their size to settle.
#[derive(Default)]
struct PendingSet {
    files: HashMap<PathBuf, Pending>,
}

impl PendingSet {
    fn touch(&mut self, path: PathBuf) {
        self.files.entry(path).or_insert(Pending {
            size: None,
            since: Instant::now(),
        });
    }

    fn forget(&mut self, path: &Path) {
        self.files.remove(path);
    }

    fn forget_under(&mut self, dir: &Path) {
        self.files.retain(|path, _| !path.starts_with(dir));
    }

    /// Re-stat every pending file and return those whose size has been
    /// unchanged for `stability`. Files that vanished are dropped.
    async fn settled(&mut self, stability: Duration) -> Vec<PathBuf> {
        let mut ready = Vec::new();
        let mut gone = Vec::new();
        for (path, pending) in self.files.iter_mut() {
            let size = match tokio::fs::metadata(path).await {
                Ok(meta) => meta.len(),
                Err(_) => {
                    gone.push(path.clone());
                    continue;
                }
            };
            if pending.size != Some(size) {
                pending.size = Some(size);
                pending.since = Instant::now();
            } else if pending.since.elapsed() >= stability {
                ready.push(path.clone());
            }
        }
        for path in gone.iter().chain(ready.iter()) {
            self.files.remove(path);
        }
        ready.sort();
        ready
    }
}

struct ActiveWatch {
    _watcher: RecommendedWatcher,
    token: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    ingestor: Arc<Ingestor>,
    config: WatcherConfig,
    watches: Mutex<HashMap<String, ActiveWatch>>,
}

/// One filesystem watcher per album root.
#[derive(Clone)]
pub struct WatcherManager {
    inner: Arc<Inner>,
}

impl WatcherManager {
    pub fn new(ingestor: Arc<Ingestor>, config: WatcherConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                ingestor,
                config,
                watches: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn watches(&self) -> MutexGuard<'_, HashMap<String, ActiveWatch>> {
        self.inner
            .watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start watching the album rooted at `root`. Returns `false` if it was
    /// already watched.
    pub fn start(&self, root: &Path) -> Result<bool> {
        let key = root.to_string_lossy().into_owned();
        let mut watches = self.watches();
        if watches.contains_key(&key) {
            return Ok(false);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let watch_err = |source| Error::Watch {
            path: root.to_path_buf(),
            source,
        };
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )
        .map_err(watch_err)?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(watch_err)?;

        let token = CancellationToken::new();
        let task = tokio::spawn(run(
            self.inner.ingestor.clone(),
            key.clone(),
            self.inner.config.clone(),
            rx,
            token.clone(),
        ));

        watches.insert(
            key.clone(),
            ActiveWatch {
                _watcher: watcher,
                token,
                task,
            },
        );
        info!(root = %key, "watching album");
        Ok(true)
    }

    /// Stop watching `root`. Returns `false` if it was not watched.
    pub async fn stop(&self, root: &Path) -> bool {
        let key = root.to_string_lossy();
        let removed = self.watches().remove(key.as_ref());
        match removed {
            Some(active) => {
                shutdown(active).await;
                info!(root = %key, "stopped watching album");
                true
            }
            None => false,
        }
    }

    pub async fn stop_all(&self) {
        let drained: Vec<ActiveWatch> = self.watches().drain().map(|(_, w)| w).collect();
        for active in drained {
            shutdown(active).await;
        }
    }

    pub fn is_watching(&self, root: &Path) -> bool {
        self.watches().contains_key(root.to_string_lossy().as_ref())
    }

    pub fn watched(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.watches().keys().cloned().collect();
        keys.sort();
        keys
    }
}

async fn shutdown(active: ActiveWatch) {
    let ActiveWatch {
        _watcher: watcher,
        token,
        task,
    } = active;
    drop(watcher);
    token.cancel();
    if let Err(e) = task.await {
        warn!(error = %e, "watch task ended abnormally");
    }
}

async fn run(
    ingestor: Arc<Ingestor>,
    root: String,
    config: WatcherConfig,
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    token: CancellationToken,
) {
    let stability = Duration::from_millis(config.stability_ms);
    let mut ticker = interval(Duration::from_millis(config.poll_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pending = PendingSet::default();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = events.recv() => match event {
                Some(Ok(event)) => {
                    for change in classify(&event) {
                        match change {
                            Change::Candidate(path) => pending.touch(path),
                            Change::Removed(path) => {
                                pending.forget(&path);
                                removed(&ingestor, &path).await;
                            }
                            Change::DirectoryAdded(dir) => {
                                for path in images_under(&dir).await {
                                    pending.touch(path);
                                }
                            }
                            Change::DirectoryRemoved(dir) => {
                                pending.forget_under(&dir);
                                removed_under(&ingestor, &root, &dir).await;
                            }
                        }
                    }
                }
                Some(Err(e)) => warn!(root = %root, error = %e, "watch error"),
                None => break,
            },
            _ = ticker.tick() => {
                for path in pending.settled(stability).await {
                    if token.is_cancelled() {
                        break;
                    }
                    added(&ingestor, &root, &path).await;
                }
            }
        }
    }
    debug!(root = %root, "watch task exited");
}

async fn added(ingestor: &Ingestor, root: &str, path: &Path) {
    let key = path.to_string_lossy();
    match ingestor.store().find_picture_by_path(&key).await {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(e) => {
            warn!(path = %key, error = %e, "picture lookup failed");
            return;
        }
    }
    if let Err(e) = ingestor.ingest(path, root, false).await {
        warn!(path = %key, error = %e, "failed to ingest new file");
    }
}

async fn removed(ingestor: &Ingestor, path: &Path) {
    if let Err(e) = ingestor.remove_path(path).await {
        warn!(path = %path.display(), error = %e, "failed to remove picture");
    }
}

async fn removed_under(ingestor: &Ingestor, root: &str, dir: &Path) {
    match ingestor.remove_under(root, dir).await {
        Ok(0) => {}
        Ok(n) => info!(dir = %dir.display(), pictures = n, "directory left album"),
        Err(e) => warn!(dir = %dir.display(), error = %e, "failed to remove pictures"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{DataChange, MetadataKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    #[test]
    fn create_is_candidate_only_for_images() {
        let changes = classify(&event(
            EventKind::Create(CreateKind::File),
            &["/a/cat.jpg", "/a/notes.txt"],
        ));
        assert_eq!(changes, vec![Change::Candidate("/a/cat.jpg".into())]);
    }

    #[test]
    fn rename_sides_map_to_remove_and_add() {
        let from = classify(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/a/old.png"],
        ));
        assert_eq!(from, vec![Change::Removed("/a/old.png".into())]);

        let both = classify(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/a/old.png", "/a/new.png"],
        ));
        assert_eq!(
            both,
            vec![
                Change::Removed("/a/old.png".into()),
                Change::Candidate("/a/new.png".into()),
            ]
        );
    }

    #[test]
    fn data_writes_are_candidates_metadata_is_ignored() {
        let data = classify(&event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/a/b.webp"],
        ));
        assert_eq!(data, vec![Change::Candidate("/a/b.webp".into())]);

        let meta = classify(&event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            &["/a/b.webp"],
        ));
        assert!(meta.is_empty());
    }

    #[test]
    fn removed_non_image_file_is_dropped() {
        let changes = classify(&event(
            EventKind::Remove(RemoveKind::File),
            &["/a/notes.txt"],
        ));
        assert!(changes.is_empty());
    }

    #[test]
    fn directory_events_are_kept() {
        let removed = classify(&event(
            EventKind::Remove(RemoveKind::Folder),
            &["/a/holidays"],
        ));
        assert_eq!(removed, vec![Change::DirectoryRemoved("/a/holidays".into())]);

        let moved_out = classify(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/a/holidays"],
        ));
        assert_eq!(moved_out, vec![Change::DirectoryRemoved("/a/holidays".into())]);

        let created = classify(&event(
            EventKind::Create(CreateKind::Folder),
            &["/a/holidays"],
        ));
        assert_eq!(created, vec![Change::DirectoryAdded("/a/holidays".into())]);
    }

    #[test]
    fn renamed_in_directory_is_detected_by_stat() {
        let dir = tempfile::TempDir::new().unwrap();
        let moved = dir.path().join("trip");
        std::fs::create_dir(&moved).unwrap();

        let changes = classify(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &[moved.to_str().unwrap()],
        ));
        assert_eq!(changes, vec![Change::DirectoryAdded(moved)]);
    }

    #[tokio::test]
    async fn new_directory_is_walked_for_images() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("b/c")).unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("b/c/d.PNG"), b"x").unwrap();
        std::fs::write(dir.path().join("b/notes.txt"), b"x").unwrap();

        assert_eq!(
            images_under(dir.path()).await,
            vec![dir.path().join("a.jpg"), dir.path().join("b/c/d.PNG")]
        );
    }

    #[test]
    fn forgetting_a_directory_drops_its_pending_files() {
        let mut pending = PendingSet::default();
        pending.touch(PathBuf::from("/a/trip/x.jpg"));
        pending.touch(PathBuf::from("/a/trip/deep/y.jpg"));
        pending.touch(PathBuf::from("/a/tripod.jpg"));

        pending.forget_under(Path::new("/a/trip"));
        let left: Vec<&PathBuf> = pending.files.keys().collect();
        assert_eq!(left, vec![&PathBuf::from("/a/tripod.jpg")]);
    }

    #[tokio::test]
    async fn pending_file_settles_after_stable_window() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("x.jpg");
        std::fs::write(&path, b"abc").unwrap();

        let mut pending = PendingSet::default();
        pending.touch(path.clone());

        // First pass records the size.
        assert!(pending.settled(Duration::from_millis(50)).await.is_empty());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(pending.settled(Duration::from_millis(50)).await, vec![path]);
        assert!(pending.files.is_empty());
    }

    #[tokio::test]
    async fn growing_file_stays_pending() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("x.jpg");
        std::fs::write(&path, b"a").unwrap();

        let mut pending = PendingSet::default();
        pending.touch(path.clone());
        pending.settled(Duration::from_millis(50)).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        std::fs::write(&path, b"abcdef").unwrap();

        assert!(pending.settled(Duration::from_millis(50)).await.is_empty());
        assert_eq!(pending.files.len(), 1);
    }

    #[tokio::test]
    async fn vanished_file_is_dropped() {
        let mut pending = PendingSet::default();
        pending.touch(PathBuf::from("/nonexistent/phologix/x.jpg"));
        assert!(pending.settled(Duration::ZERO).await.is_empty());
        assert!(pending.files.is_empty());
    }
}
