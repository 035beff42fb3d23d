//! Object model: configuration documents, the kind registry, the eleven
//! concrete object kinds with their read probes and diff logic, typed change
//! records, and deferred-update shadows.

pub mod change;
pub mod data;
pub mod deferred;
pub mod kinds;
pub mod object;
pub mod registry;

pub use change::{Change, ChangeOp, ChangeStatus};
pub use data::{parse_documents, Document};
pub use deferred::DeferredUpdate;
pub use object::{
    dump_document, dump_probes, existence_probe, observed_exists, HubObject, ReadSet, Slot,
};
pub use registry::ModelRegistry;
