//! Build-file rewriting and the collaborators an edit consults.

mod document;
mod form;
pub mod prowriter;

pub use document::{
    DocumentHost, HeadlessDocuments, NoVersionControl, VersionControl, ensure_writable,
    write_atomic,
};
pub use form::{FormResources, XmlFormResources};
