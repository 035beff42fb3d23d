//! Per-object change reports.
//!
//! Every object emitted by the solver gets a report with a bounded state
//! machine; a failed object never blocks its tier, only its dependents.

use forgesync_client::Promise;
use forgesync_core::{Error, Key, Origin};
use forgesync_model::{Change, ChangeStatus};
use serde::Serialize;

/// Report lifecycle:
///
///   INIT → READING → COMPARED → APPLYING → {APPLIED | FAILED}
///
/// An empty diff jumps straight from READING to APPLIED. Compare-only runs
/// stop at COMPARED.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportState {
    Init,
    Reading,
    Compared,
    Applying,
    Applied,
    Failed,
}

impl std::fmt::Display for ReportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Reading => "reading",
            Self::Compared => "compared",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Serialize)]
pub struct ChangeReport {
    pub key: Key,
    pub origin: Origin,
    pub state: ReportState,
    pub changes: Vec<Change>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    reads: Vec<Promise>,
}

impl ChangeReport {
    pub fn new(key: Key, origin: Origin) -> Self {
        Self {
            key,
            origin,
            state: ReportState::Init,
            changes: Vec::new(),
            error: None,
            reads: Vec::new(),
        }
    }

    pub fn begin_read(&mut self, reads: Vec<Promise>) {
        self.reads = reads;
        self.state = ReportState::Reading;
    }

    pub(crate) fn reads(&self) -> &[Promise] {
        &self.reads
    }

    /// Record the diff. An empty diff is terminal success with zero ops.
    pub fn compared(&mut self, changes: Vec<Change>) {
        self.state = if changes.is_empty() {
            ReportState::Applied
        } else {
            ReportState::Compared
        };
        self.changes = changes;
    }

    pub fn read_failed(&mut self, error: &Error) {
        self.state = ReportState::Failed;
        self.error = Some(error.to_string());
    }

    pub fn applying(&mut self) {
        self.state = ReportState::Applying;
    }

    /// Enqueue one write per change on the open batch; the returned
    /// promises line up with `changes`.
    pub fn enqueue_writes(&mut self, batch: &mut forgesync_client::Multicall) -> Vec<Promise> {
        self.state = ReportState::Applying;
        self.changes
            .iter()
            .map(|change| batch.call(change.call.clone()))
            .collect()
    }

    /// Settle the terminal state from the per-change statuses.
    pub fn finish_apply(&mut self) {
        let failed = self.changes.iter().find(|c| c.is_failed());
        match failed {
            Some(change) => {
                self.state = ReportState::Failed;
                if let ChangeStatus::Failed(message) = &change.status {
                    self.error = Some(message.clone());
                }
            }
            None => self.state = ReportState::Applied,
        }
    }

    pub fn fail_upstream(&mut self, dependency: &Key) {
        self.state = ReportState::Failed;
        self.error = Some(format!("upstream failure: {}", dependency));
    }

    pub fn is_failed(&self) -> bool {
        self.state == ReportState::Failed
    }

    /// Changes this report would (or did) perform.
    pub fn change_count(&self) -> usize {
        self.changes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgesync_client::CallDescriptor;
    use forgesync_model::ChangeOp;

    fn report() -> ChangeReport {
        ChangeReport::new(Key::new("tag", "a"), Origin::new("site.yaml", 1))
    }

    #[test]
    fn empty_diff_is_terminal_success() {
        let mut r = report();
        r.begin_read(Vec::new());
        r.compared(Vec::new());
        assert_eq!(r.state, ReportState::Applied);
        assert_eq!(r.change_count(), 0);
    }

    #[test]
    fn one_failed_change_fails_the_report() {
        let mut r = report();
        r.begin_read(Vec::new());
        let mut change = Change::new(
            ChangeOp::CreateObject,
            CallDescriptor::new("createTag").arg("a"),
            "create tag a",
        );
        change.status = ChangeStatus::Failed("fault 1: boom".into());
        r.compared(vec![change]);
        r.applying();
        r.finish_apply();
        assert!(r.is_failed());
        assert!(r.error.as_deref().unwrap().contains("boom"));
    }

    #[test]
    fn upstream_failure_is_recorded_with_the_dependency() {
        let mut r = report();
        r.fail_upstream(&Key::new("tag", "b"));
        assert!(r.is_failed());
        assert_eq!(r.error.as_deref(), Some("upstream failure: tag:b"));
    }
}
