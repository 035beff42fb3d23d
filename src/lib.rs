//! forgesync — reconcile declared build-system configuration against a hub.
//!
//! These modules are shared between the binary and the integration tests;
//! the heavy lifting lives in the workspace crates.

pub mod format;
pub mod loader;
