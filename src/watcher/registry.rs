//! Which unit watches which folder.
//!
//! Several units may deploy the same folder; the filesystem watch is only
//! added for the first and dropped with the last.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::types::NodeId;

#[derive(Debug, Default)]
pub struct FolderWatchRegistry {
    folders: BTreeMap<PathBuf, BTreeSet<NodeId>>,
}

/// Filesystem watches to add and drop after a registry change.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WatchChange {
    pub to_watch: Vec<PathBuf>,
    pub to_unwatch: Vec<PathBuf>,
}

impl WatchChange {
    pub fn is_empty(&self) -> bool {
        self.to_watch.is_empty() && self.to_unwatch.is_empty()
    }
}

impl FolderWatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `unit` for `folders`. Returns folders nobody watched before.
    pub fn watch<'a>(&mut self, unit: NodeId, folders: impl IntoIterator<Item = &'a PathBuf>) -> Vec<PathBuf> {
        let mut fresh = Vec::new();
        for folder in folders {
            let units = self.folders.entry(folder.clone()).or_default();
            if units.is_empty() {
                fresh.push(folder.clone());
            }
            units.insert(unit);
        }
        fresh
    }

    /// Drop `unit` from `folders`. Returns folders nobody watches anymore.
    pub fn unwatch<'a>(&mut self, unit: NodeId, folders: impl IntoIterator<Item = &'a PathBuf>) -> Vec<PathBuf> {
        let mut gone = Vec::new();
        for folder in folders {
            if let Some(units) = self.folders.get_mut(folder) {
                units.remove(&unit);
                if units.is_empty() {
                    self.folders.remove(folder);
                    gone.push(folder.clone());
                }
            }
        }
        gone
    }

    /// Move `unit` from its `current` folders to `wanted`.
    pub fn set_unit_folders(
        &mut self,
        unit: NodeId,
        current: &BTreeSet<PathBuf>,
        wanted: &BTreeSet<PathBuf>,
    ) -> WatchChange {
        let to_unwatch = self.unwatch(unit, current.difference(wanted));
        let to_watch = self.watch(unit, wanted.difference(current));
        WatchChange { to_watch, to_unwatch }
    }

    /// Forget `unit` everywhere. Returns folders nobody watches anymore.
    pub fn remove_unit(&mut self, unit: NodeId) -> Vec<PathBuf> {
        let folders: Vec<PathBuf> = self
            .folders
            .iter()
            .filter(|(_, units)| units.contains(&unit))
            .map(|(folder, _)| folder.clone())
            .collect();
        self.unwatch(unit, folders.iter())
    }

    /// Units watching `changed` or any folder containing it.
    pub fn units_for_change(&self, changed: &Path) -> BTreeSet<NodeId> {
        changed
            .ancestors()
            .filter_map(|dir| self.folders.get(dir))
            .flatten()
            .copied()
            .collect()
    }

    pub fn is_watched(&self, folder: &Path) -> bool {
        self.folders.contains_key(folder)
    }

    pub fn watched_folders(&self) -> impl Iterator<Item = &Path> {
        self.folders.keys().map(PathBuf::as_path)
    }

    pub fn folder_count(&self) -> usize {
        self.folders.len()
    }
}
