//! Build-file evaluation.
//!
//! Every `.pro` unit is evaluated twice: once exactly (honoring the active
//! configuration) and once cumulatively (union of all branches). The exact
//! pass drives build information; the cumulative pass keeps files from
//! inactive branches visible in the tree.

mod error;
pub mod parser;
mod qmake;
mod reader;
mod scheduler;

pub use error::{EvaluationError, EvaluationResult};
pub use qmake::{QmakeReader, QmakeReaderFactory, ReaderContext};
pub use reader::{
    EvalRequest, EvaluationReader, LoadMode, ProFile, ReaderFactory, ReaderMode, TemplateType,
};
pub use scheduler::{EvalResult, EvaluationOutcome, EvaluationScheduler, EvaluationTask, evaluate};
