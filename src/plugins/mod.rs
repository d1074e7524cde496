//! Type information for QML modules with native plugins.
//!
//! ```text
//! load_plugin_types ─┬─ typeinfo files ──> TypeDescriptionParser ─┐
//!                    └─ helper process (thread) ── poll ──────────┴─> LibraryInfo cache
//! ```

mod dumper;
mod error;
mod library_info;

pub use dumper::{Plugin, PluginDumper, resolve_plugin};
pub use error::{DumpError, DumpResult};
pub use library_info::{
    LibraryInfo, ModuleApi, ParsedTypes, Qmldir, QmldirPlugin, QmltypesParser,
    TypeDescription, TypeDescriptionParser, TypeInfoStatus,
};
