//! Position metadata attached to every declared entity and carried through
//! expansion, solving, and reporting.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One step of template expansion: which template produced a document, and
/// where that template was declared.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceFrame {
    pub template: String,
    pub file: PathBuf,
    pub line: usize,
}

/// Where an entity came from. `trace` lists the templates that produced it,
/// outermost first; a directly declared entity has an empty trace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub file: PathBuf,
    pub line: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<TraceFrame>,
}

impl Origin {
    pub fn new(file: impl Into<PathBuf>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
            trace: Vec::new(),
        }
    }

    /// Synthetic origin for objects that have no backing file, such as
    /// solver-created shadows and remote-discovered placeholders.
    pub fn synthetic(label: &str) -> Self {
        Self::new(format!("<{}>", label), 0)
    }

    /// Expansion depth: how many template calls deep this entity is.
    pub fn depth(&self) -> usize {
        self.trace.len()
    }

    /// A new origin one expansion step deeper, positioned at `file:line`
    /// inside the rendered output.
    pub fn expanded_through(&self, frame: TraceFrame, file: impl Into<PathBuf>, line: usize) -> Self {
        let mut trace = self.trace.clone();
        trace.push(frame);
        Self {
            file: file.into(),
            line,
            trace,
        }
    }

    /// True when `self.trace` is a prefix of `other.trace`.
    pub fn is_trace_prefix_of(&self, other: &Origin) -> bool {
        other.trace.len() >= self.trace.len() && other.trace[..self.trace.len()] == self.trace[..]
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)?;
        for frame in self.trace.iter().rev() {
            write!(
                f,
                " (via template {} at {}:{})",
                frame.template,
                frame.file.display(),
                frame.line
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expanded_origin_extends_trace() {
        let caller = Origin::new("site.yaml", 10);
        let frame = TraceFrame {
            template: "build-tags".into(),
            file: "templates.yaml".into(),
            line: 3,
        };
        let child = caller.expanded_through(frame, "templates.yaml", 1);
        assert_eq!(child.depth(), 1);
        assert!(caller.is_trace_prefix_of(&child));
        assert!(!child.is_trace_prefix_of(&caller));
    }

    #[test]
    fn display_includes_trace() {
        let caller = Origin::new("site.yaml", 10);
        let frame = TraceFrame {
            template: "build-tags".into(),
            file: "templates.yaml".into(),
            line: 3,
        };
        let child = caller.expanded_through(frame, "templates.yaml", 1);
        let s = child.to_string();
        assert!(s.starts_with("templates.yaml:1"));
        assert!(s.contains("via template build-tags"));
    }
}
