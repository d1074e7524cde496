//! Keeps the filesystem watches in step with what units deploy.
//!
//! Units only talk to the registry; the coordinator turns registry
//! changes into notify watch/unwatch calls. Without a live watcher (tests,
//! one-shot CLI commands) it still tracks ownership so change routing and
//! `deploys_folder` keep working.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::WatchResult;
use super::folder_watcher::{FolderWatcher, WatchEvent};
use super::registry::{FolderWatchRegistry, WatchChange};
use crate::types::NodeId;

#[derive(Default)]
pub struct FolderWatchCoordinator {
    registry: FolderWatchRegistry,
    watcher: Option<FolderWatcher>,
}

impl std::fmt::Debug for FolderWatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderWatchCoordinator")
            .field("folders", &self.registry.folder_count())
            .field("live", &self.watcher.is_some())
            .finish()
    }
}

impl FolderWatchCoordinator {
    /// Ownership tracking only; no filesystem watches.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn with_watcher(debounce_ms: u64) -> WatchResult<Self> {
        Ok(Self {
            registry: FolderWatchRegistry::new(),
            watcher: Some(FolderWatcher::new(debounce_ms)?),
        })
    }

    pub fn is_live(&self) -> bool {
        self.watcher.is_some()
    }

    /// Replace the folders `unit` watches.
    pub fn set_unit_folders(
        &mut self,
        unit: NodeId,
        current: &BTreeSet<PathBuf>,
        wanted: &BTreeSet<PathBuf>,
    ) -> WatchChange {
        let change = self.registry.set_unit_folders(unit, current, wanted);
        self.apply(&change);
        change
    }

    pub fn remove_unit(&mut self, unit: NodeId) {
        let gone = self.registry.remove_unit(unit);
        self.apply(&WatchChange {
            to_watch: Vec::new(),
            to_unwatch: gone,
        });
    }

    fn apply(&mut self, change: &WatchChange) {
        let Some(watcher) = self.watcher.as_mut() else {
            return;
        };
        for folder in &change.to_unwatch {
            watcher.unwatch_folder(folder);
        }
        for folder in &change.to_watch {
            if let Err(e) = watcher.watch_folder(folder) {
                tracing::warn!(target: "watcher", "{e}");
            }
        }
    }

    pub fn units_for_change(&self, changed: &Path) -> BTreeSet<NodeId> {
        self.registry.units_for_change(changed)
    }

    pub fn watched_folders(&self) -> impl Iterator<Item = &Path> {
        self.registry.watched_folders()
    }

    pub fn watch_build_file(&mut self, file: &Path) {
        if let Some(watcher) = self.watcher.as_mut() {
            if let Err(e) = watcher.watch_build_file(file) {
                tracing::warn!(target: "watcher", "{e}");
            }
        }
    }

    pub fn unwatch_build_file(&mut self, file: &Path) {
        if let Some(watcher) = self.watcher.as_mut() {
            watcher.unwatch_build_file(file);
        }
    }

    pub fn poll(&mut self) -> Vec<WatchEvent> {
        self.watcher.as_mut().map(FolderWatcher::poll).unwrap_or_default()
    }

    pub fn wait(&mut self, timeout: Duration) -> WatchResult<Vec<WatchEvent>> {
        match self.watcher.as_mut() {
            Some(watcher) => watcher.wait(timeout),
            None => {
                std::thread::sleep(timeout);
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_tracks_ownership() {
        let mut coordinator = FolderWatchCoordinator::detached();
        let unit = NodeId::new(3).unwrap();
        let wanted: BTreeSet<PathBuf> = [PathBuf::from("/p/qml")].into_iter().collect();

        let change = coordinator.set_unit_folders(unit, &BTreeSet::new(), &wanted);
        assert_eq!(change.to_watch, vec![PathBuf::from("/p/qml")]);
        assert_eq!(
            coordinator.units_for_change(Path::new("/p/qml/views")),
            [unit].into_iter().collect()
        );
        assert!(coordinator.poll().is_empty());

        coordinator.remove_unit(unit);
        assert_eq!(coordinator.watched_folders().count(), 0);
    }
}
