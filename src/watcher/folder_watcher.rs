//! notify-backed watcher for deployed folders and build files.
//!
//! Events are pulled from a channel and debounced; nothing runs on the
//! notify thread except the send.
//!
//! Build files are watched through their directory, not their inode: a save
//! that renames a new file into place must keep being reported.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::debouncer::Debouncer;
use super::error::{WatchError, WatchResult};

/// A settled change, ready to be applied on the owning thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WatchEvent {
    /// Contents of a directory below a watched folder changed.
    FolderChanged(PathBuf),
    /// A `.pro`/`.pri` file was edited on disk.
    BuildFileChanged(PathBuf),
}

pub struct FolderWatcher {
    watcher: RecommendedWatcher,
    event_rx: Receiver<notify::Result<Event>>,
    folders: BTreeSet<PathBuf>,
    build_files: BTreeSet<PathBuf>,
    /// Directories holding build files, with the number of files in each.
    build_dirs: BTreeMap<PathBuf, usize>,
    /// Build directories with their own non-recursive watch. Directories
    /// inside a watched folder are covered by the folder's watch instead.
    build_dir_watches: BTreeSet<PathBuf>,
    debouncer: Debouncer<WatchEvent>,
}

impl FolderWatcher {
    pub fn new(debounce_ms: u64) -> WatchResult<Self> {
        let (tx, event_rx) = unbounded();
        let watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        Ok(Self {
            watcher,
            event_rx,
            folders: BTreeSet::new(),
            build_files: BTreeSet::new(),
            build_dirs: BTreeMap::new(),
            build_dir_watches: BTreeSet::new(),
            debouncer: Debouncer::new(debounce_ms),
        })
    }

    pub fn watch_folder(&mut self, folder: &Path) -> WatchResult<()> {
        if self.folders.contains(folder) {
            return Ok(());
        }
        // The recursive watch takes over any build directory below it.
        let covered: Vec<PathBuf> = self
            .build_dir_watches
            .iter()
            .filter(|dir| dir.starts_with(folder))
            .cloned()
            .collect();
        for dir in covered {
            self.build_dir_watches.remove(&dir);
            if let Err(e) = self.watcher.unwatch(&dir) {
                tracing::debug!("[watcher] unwatch {} failed: {e}", dir.display());
            }
        }

        self.folders.insert(folder.to_path_buf());
        if let Err(e) = self.watcher.watch(folder, RecursiveMode::Recursive) {
            self.folders.remove(folder);
            self.rewatch_build_dirs();
            return Err(WatchError::PathWatchFailed {
                path: folder.to_path_buf(),
                reason: e.to_string(),
            });
        }
        crate::debug_event!("watcher", "watching", "{}", folder.display());
        Ok(())
    }

    pub fn unwatch_folder(&mut self, folder: &Path) {
        if self.folders.remove(folder) {
            if let Err(e) = self.watcher.unwatch(folder) {
                tracing::debug!("[watcher] unwatch {} failed: {e}", folder.display());
            }
            self.rewatch_build_dirs();
        }
    }

    fn covered_by_folder(&self, dir: &Path) -> bool {
        dir.ancestors().any(|ancestor| self.folders.contains(ancestor))
    }

    fn watch_build_dir(&mut self, dir: &Path) -> WatchResult<()> {
        if self.build_dir_watches.contains(dir) || self.covered_by_folder(dir) {
            return Ok(());
        }
        self.watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::PathWatchFailed {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            })?;
        self.build_dir_watches.insert(dir.to_path_buf());
        Ok(())
    }

    /// Give every build directory that lost its covering folder a watch of
    /// its own again.
    fn rewatch_build_dirs(&mut self) {
        let dirs: Vec<PathBuf> = self.build_dirs.keys().cloned().collect();
        for dir in dirs {
            if let Err(e) = self.watch_build_dir(&dir) {
                tracing::warn!("[watcher] {e}");
            }
        }
    }

    pub fn watch_build_file(&mut self, file: &Path) -> WatchResult<()> {
        let Some(dir) = file.parent().map(Path::to_path_buf) else {
            return Err(WatchError::PathWatchFailed {
                path: file.to_path_buf(),
                reason: "no parent directory".to_string(),
            });
        };
        if !self.build_files.insert(file.to_path_buf()) {
            return Ok(());
        }
        *self.build_dirs.entry(dir.clone()).or_default() += 1;
        if let Err(e) = self.watch_build_dir(&dir) {
            self.unwatch_build_file(file);
            return Err(e);
        }
        Ok(())
    }

    pub fn unwatch_build_file(&mut self, file: &Path) {
        if !self.build_files.remove(file) {
            return;
        }
        let Some(dir) = file.parent() else {
            return;
        };
        let Some(count) = self.build_dirs.get_mut(dir) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.build_dirs.remove(dir);
            if self.build_dir_watches.remove(dir) {
                let _ = self.watcher.unwatch(dir);
            }
        }
    }

    /// Drain pending raw events and return the settled changes.
    pub fn poll(&mut self) -> Vec<WatchEvent> {
        while let Ok(res) = self.event_rx.try_recv() {
            self.record(res);
        }
        let mut ready = self.debouncer.take_ready();
        ready.sort();
        ready
    }

    /// Block up to `timeout` for at least one settled change.
    pub fn wait(&mut self, timeout: Duration) -> WatchResult<Vec<WatchEvent>> {
        let wait_for = self
            .debouncer
            .next_deadline()
            .map_or(timeout, |deadline| deadline.min(timeout));
        match self.event_rx.recv_timeout(wait_for) {
            Ok(res) => self.record(res),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Err(WatchError::ChannelClosed),
        }
        Ok(self.poll())
    }

    fn record(&mut self, res: notify::Result<Event>) {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("[watcher] file watch error: {e}");
                return;
            }
        };
        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }
        for path in event.paths {
            if let Some(change) = self.classify(&path) {
                self.debouncer.record(change);
            }
        }
    }

    fn classify(&self, path: &Path) -> Option<WatchEvent> {
        if self.build_files.contains(path) {
            return Some(WatchEvent::BuildFileChanged(path.to_path_buf()));
        }
        if self.folders.contains(path) {
            return Some(WatchEvent::FolderChanged(path.to_path_buf()));
        }
        let dir = path.parent()?;
        dir.ancestors()
            .any(|ancestor| self.folders.contains(ancestor))
            .then(|| WatchEvent::FolderChanged(dir.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Instant;
    use tempfile::TempDir;

    #[test]
    fn test_classify_routes_to_parent_folder() {
        let dir = TempDir::new().unwrap();
        let mut watcher = FolderWatcher::new(10).unwrap();
        let deploy = dir.path().join("deploy");
        fs::create_dir_all(deploy.join("sub")).unwrap();
        watcher.watch_folder(&deploy).unwrap();

        assert_eq!(
            watcher.classify(&deploy.join("sub/a.qml")),
            Some(WatchEvent::FolderChanged(deploy.join("sub")))
        );
        assert_eq!(watcher.classify(&dir.path().join("elsewhere.txt")), None);
    }

    #[test]
    fn test_new_file_reported_after_debounce() {
        let dir = TempDir::new().unwrap();
        let deploy = dir.path().join("deploy");
        fs::create_dir_all(&deploy).unwrap();
        let deploy = deploy.canonicalize().unwrap();

        let mut watcher = FolderWatcher::new(20).unwrap();
        watcher.watch_folder(&deploy).unwrap();
        fs::write(deploy.join("new.qml"), "Item {}").unwrap();

        let started = Instant::now();
        let mut events = Vec::new();
        while events.is_empty() && started.elapsed() < Duration::from_secs(5) {
            events = watcher.wait(Duration::from_millis(100)).unwrap();
        }
        assert!(events.contains(&WatchEvent::FolderChanged(deploy.clone())));
    }

    fn wait_for_event(watcher: &mut FolderWatcher, wanted: &WatchEvent) -> bool {
        let started = Instant::now();
        while started.elapsed() < Duration::from_secs(5) {
            let events = watcher.wait(Duration::from_millis(100)).unwrap();
            if events.contains(wanted) {
                return true;
            }
        }
        false
    }

    #[test]
    fn test_build_file_reported_after_atomic_save() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let pro = root.join("app.pro");
        fs::write(&pro, "SOURCES += a.cpp\n").unwrap();

        let mut watcher = FolderWatcher::new(20).unwrap();
        watcher.watch_build_file(&pro).unwrap();
        let changed = WatchEvent::BuildFileChanged(pro.clone());

        crate::writer::write_atomic(&pro, "SOURCES += b.cpp\n").unwrap();
        assert!(wait_for_event(&mut watcher, &changed));

        // A later in-place edit must still be seen.
        fs::write(&pro, "SOURCES += c.cpp\n").unwrap();
        assert!(wait_for_event(&mut watcher, &changed));
    }

    #[test]
    fn test_build_dir_watch_survives_covering_folder() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let pro = root.join("sub/sub.pro");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(&pro, "").unwrap();

        let mut watcher = FolderWatcher::new(20).unwrap();
        watcher.watch_build_file(&pro).unwrap();
        assert!(watcher.build_dir_watches.contains(&root.join("sub")));

        watcher.watch_folder(&root).unwrap();
        assert!(watcher.build_dir_watches.is_empty());

        watcher.unwatch_folder(&root);
        assert!(watcher.build_dir_watches.contains(&root.join("sub")));

        fs::write(&pro, "TEMPLATE = app\n").unwrap();
        assert!(wait_for_event(&mut watcher, &WatchEvent::BuildFileChanged(pro.clone())));

        watcher.unwatch_build_file(&pro);
        assert!(watcher.build_dirs.is_empty());
        assert!(watcher.build_dir_watches.is_empty());
    }
}
