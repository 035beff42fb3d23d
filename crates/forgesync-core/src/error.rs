//! Error taxonomy for forgesync.
//!
//! Load, expansion, and solver errors are fatal to a run. Per-entity read and
//! apply failures are not: the engine records them on the entity's change
//! report and cascades them to dependents, so only the variants that abort a
//! run normally travel through `Result`.

use crate::key::Key;
use crate::origin::Origin;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// A remote fault as surfaced by the hub, XML-RPC style.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Fault {
    pub code: i32,
    pub message: String,
}

impl Fault {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Fault used when the transport itself failed and no per-call fault
    /// exists (connection refused, deadline exceeded).
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(-1, message)
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fault {}: {}", self.code, self.message)
    }
}

type Source = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{file}:{line}: malformed document: {message}")]
    DocumentParse {
        file: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{origin}: validation failed at `{field}`: {message}")]
    Validation {
        origin: Origin,
        field: String,
        message: String,
    },

    #[error("template `{template}` failed to parse: {message}")]
    TemplateSyntax {
        template: String,
        message: String,
        #[source]
        source: Option<Source>,
    },

    #[error("{origin}: template `{template}` failed to render: {message}")]
    TemplateRender {
        template: String,
        origin: Origin,
        message: String,
        #[source]
        source: Option<Source>,
    },

    #[error("{origin}: template `{template}` produced invalid documents")]
    TemplateOutput {
        template: String,
        origin: Origin,
        #[source]
        source: Box<Error>,
    },

    #[error("{origin}: cannot expand `{call}`: {message}")]
    Expansion {
        call: String,
        origin: Origin,
        message: String,
    },

    #[error("{key} redefined at {second}; first declared at {first}")]
    Redefine {
        key: Key,
        first: Origin,
        second: Origin,
    },

    #[error("read failed for {key}: {method}: {fault}")]
    ChangeRead {
        key: Key,
        method: String,
        fault: Fault,
    },

    #[error("apply failed for {key}: {description}: {fault}")]
    ChangeApply {
        key: Key,
        method: String,
        description: String,
        fault: Fault,
    },

    #[error("{key} is not declared; first referenced from {origin}")]
    Phantom { key: Key, origin: Origin },

    #[error("dependency cycle cannot be broken: {}", join_keys(.members))]
    Solver { members: Vec<Key> },

    #[error("config error: {0}")]
    Config(String),

    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Source>,
    },

    #[error("run cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

fn join_keys(members: &[Key]) -> String {
    members
        .iter()
        .map(Key::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl Error {
    pub fn document_parse(
        file: impl Into<PathBuf>,
        line: usize,
        message: impl Into<String>,
    ) -> Self {
        Self::DocumentParse {
            file: file.into(),
            line,
            message: message.into(),
        }
    }

    pub fn validation(origin: &Origin, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            origin: origin.clone(),
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn expansion(call: impl Into<String>, origin: &Origin, message: impl Into<String>) -> Self {
        Self::Expansion {
            call: call.into(),
            origin: origin.clone(),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    pub fn transport_from(message: impl Into<String>, source: Source) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Whether this error aborts the whole run (everything except per-entity
    /// read/apply failures does).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ChangeRead { .. } | Self::ChangeApply { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solver_error_lists_cycle_members() {
        let err = Error::Solver {
            members: vec![Key::new("tag", "a"), Key::new("tag", "b")],
        };
        assert_eq!(
            err.to_string(),
            "dependency cycle cannot be broken: tag:a -> tag:b"
        );
    }

    #[test]
    fn fatal_classification() {
        let read = Error::ChangeRead {
            key: Key::new("tag", "a"),
            method: "getTag".into(),
            fault: Fault::new(1, "boom"),
        };
        assert!(!read.is_fatal());
        assert!(Error::Config("bad".into()).is_fatal());
    }
}
