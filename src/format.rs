//! Terminal rendering of documents, change reports, and run summaries.

use forgesync_engine::{ChangeReport, ReportState, RunReport};
use forgesync_model::{ChangeStatus, Document};

#[derive(Default)]
pub struct FormatOptions {
    /// Include objects whose diff was empty.
    pub show_unchanged: bool,
    /// Show the hub method behind each change.
    pub show_calls: bool,
}

/// Render documents as a YAML stream.
pub fn format_documents(documents: &[Document]) -> String {
    let mut out = String::new();
    for (idx, doc) in documents.iter().enumerate() {
        if idx > 0 {
            out.push_str("---\n");
        }
        match serde_yaml::to_string(&doc.to_value()) {
            Ok(yaml) => out.push_str(&yaml),
            Err(e) => out.push_str(&format!("# failed to render {}: {}\n", doc.origin, e)),
        }
    }
    out
}

/// Render a finished run: per-object sections, then totals.
pub fn format_run(run: &RunReport, opts: &FormatOptions) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "═══ {} against {} ═══\n\n",
        run.summary.mode, run.summary.hub
    ));

    for report in &run.reports {
        if !opts.show_unchanged && report.changes.is_empty() && !report.is_failed() {
            continue;
        }
        format_report(&mut out, report, opts);
    }

    out.push_str(&format!(
        "{} objects: {} changed, {} unchanged, {} failed, {} skipped ({} changes)\n",
        run.summary.objects,
        run.summary.changed,
        run.summary.unchanged,
        run.summary.failed,
        run.summary.skipped,
        run.summary.changes,
    ));
    for diagnostic in &run.summary.diagnostics {
        out.push_str(&format!("warning: {}\n", diagnostic));
    }
    out.push_str(&format!("outcome: {}\n", run.summary.outcome));
    out
}

fn format_report(out: &mut String, report: &ChangeReport, opts: &FormatOptions) {
    out.push_str(&format!("─── {} [{}] ───\n", report.key, report.state));

    for change in &report.changes {
        let marker = match (&change.status, report.state) {
            (ChangeStatus::Applied, _) => "✓",
            (ChangeStatus::Failed(_), _) => "✗",
            (ChangeStatus::Planned, ReportState::Compared) => "→",
            (ChangeStatus::Planned, _) => "·",
        };
        out.push_str(&format!("  {} {}\n", marker, change));
        if opts.show_calls {
            out.push_str(&format!("      {}\n", change.call.method));
        }
        if let ChangeStatus::Failed(message) = &change.status {
            out.push_str(&format!("      error: {}\n", message));
        }
    }

    if let Some(error) = &report.error {
        out.push_str(&format!("  error: {}\n", error));
    }
    out.push('\n');
}
