//! Units of a qmake project tree and how they stay in sync.
//!
//! ```text
//! Project ── owns ──> NodeTree, units, scheduler, watches
//!   │
//!   ├─ ProUnit  (.pro)  evaluate ─> apply: merge sub-units, sync files, variables
//!   └─ PriUnit  (.pri)  sync files from the owning .pro's readers
//! ```
//!
//! All mutation happens on the thread that owns the [`Project`].

mod edit;
mod engine;
mod error;
pub mod merge;
mod observer;
mod pri;
mod pro;
pub mod variables;

pub use edit::{ProjectAction, can_add_sub_project, simplify_pro_file_path};
pub use engine::{Project, ProjectBuilder, Unit};
pub use error::{EditError, EditResult, ProjectError, ProjectResult};
pub use merge::{Found, MergePlan, merge_sub_units};
pub use observer::{ProjectListener, SubscriptionId};
pub use pri::{PriInput, PriUnit};
pub use pro::{ProUnit, subdirs_paths};
pub use variables::{InstallsItem, InstallsList, TargetInformation, Variable, VariableTable};
