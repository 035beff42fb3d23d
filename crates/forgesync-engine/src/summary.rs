//! Run summary: structured metadata for every engine run.

use crate::processor::RunMode;
use crate::report::{ChangeReport, ReportState};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Pending,
    Success,
    Failure,
    Cancelled,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct RunSummary {
    pub run_id: String,
    pub mode: RunMode,
    pub hub: String,
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    pub outcome: RunOutcome,
    pub tiers: usize,
    pub objects: usize,
    /// Objects applied with at least one change.
    pub changed: usize,
    /// Objects whose diff was empty.
    pub unchanged: usize,
    pub failed: usize,
    /// Objects dropped from the stream under skip-phantoms.
    pub skipped: usize,
    /// Total change records across all reports.
    pub changes: usize,
    pub diagnostics: Vec<String>,
}

impl RunSummary {
    pub fn new(mode: RunMode, hub: impl Into<String>) -> Self {
        let started = Utc::now();
        Self {
            run_id: format!("{}-{}", mode, started.format("%Y%m%dT%H%M%S")),
            mode,
            hub: hub.into(),
            started,
            ended: None,
            outcome: RunOutcome::Pending,
            tiers: 0,
            objects: 0,
            changed: 0,
            unchanged: 0,
            failed: 0,
            skipped: 0,
            changes: 0,
            diagnostics: Vec::new(),
        }
    }

    pub fn record(&mut self, report: &ChangeReport) {
        self.objects += 1;
        self.changes += report.change_count();
        match report.state {
            ReportState::Failed => self.failed += 1,
            ReportState::Applied | ReportState::Compared if report.change_count() > 0 => {
                self.changed += 1
            }
            _ => self.unchanged += 1,
        }
    }

    pub fn diagnostic(&mut self, message: impl Into<String>) {
        self.diagnostics.push(message.into());
    }

    pub fn finalize(&mut self, cancelled: bool) {
        self.ended = Some(Utc::now());
        self.outcome = if cancelled {
            RunOutcome::Cancelled
        } else if self.failed > 0 {
            RunOutcome::Failure
        } else {
            RunOutcome::Success
        };
    }

    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(self).unwrap_or_default()
    }

    pub fn log_line(&self) -> String {
        format!(
            "| {} | {} | {} objects | {} changed | {} failed | {} |",
            self.run_id, self.hub, self.objects, self.changed, self.failed, self.outcome,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgesync_core::{Key, Origin};

    #[test]
    fn summary_tallies_reports() {
        let mut summary = RunSummary::new(RunMode::Apply, "mock://hub");

        let mut ok = ChangeReport::new(Key::new("tag", "a"), Origin::new("t.yaml", 1));
        ok.compared(Vec::new());
        summary.record(&ok);

        let mut bad = ChangeReport::new(Key::new("tag", "b"), Origin::new("t.yaml", 2));
        bad.fail_upstream(&Key::new("tag", "a"));
        summary.record(&bad);

        summary.finalize(false);
        assert_eq!(summary.objects, 2);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.outcome, RunOutcome::Failure);
        assert!(summary.to_yaml().contains("failure"));
        assert!(summary.log_line().contains("mock://hub"));
    }
}
