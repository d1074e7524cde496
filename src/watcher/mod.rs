//! Folder watching for deployed directories.
//!
//! ```text
//! notify ─> FolderWatcher (debounced WatchEvent)
//!              │
//!              └─> Project::handle_watch_events
//!                    └─ FolderWatchCoordinator routes folder -> units
//!                         └─ recursive_enumerate + PriUnit::folder_changed
//! ```

mod coordinator;
mod debouncer;
mod enumerate;
mod error;
mod folder_watcher;
mod registry;

pub use coordinator::FolderWatchCoordinator;
pub use debouncer::Debouncer;
pub use enumerate::{is_auto_save_file, recursive_enumerate};
pub use error::{WatchError, WatchResult};
pub use folder_watcher::{FolderWatcher, WatchEvent};
pub use registry::{FolderWatchRegistry, WatchChange};
