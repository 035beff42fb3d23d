//! The reconciliation engine: per-object change reports, the chunked phase
//! processor, run summaries, and the expand/compare/apply/dump entry points
//! a CLI wires up.

pub mod processor;
pub mod report;
pub mod run;
pub mod summary;

pub use processor::{Processor, ProcessorOptions, RunMode, RunReport};
pub use report::{ChangeReport, ReportState};
pub use run::{apply, build_namespace, compare, dump, expand, DumpReport, RunConfig};
pub use summary::{RunOutcome, RunSummary};
