//! Template namespace: holds templates and raw objects, drives recursive
//! macro expansion with trace-preserving origins, and resolves `(kind,
//! name)` references after expansion.

pub mod namespace;
pub mod resolver;
pub mod template;

pub use namespace::{Diagnostic, Namespace};
pub use resolver::{Presence, Resolver};
pub use template::Template;
