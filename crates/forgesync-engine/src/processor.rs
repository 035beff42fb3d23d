//! The chunked phase engine.
//!
//! Single-threaded and cooperative: tiers come from the solver, each tier is
//! processed in chunks, and each chunk suspends exactly twice, once for the
//! read multicall and once for the write multicall. Compare-only runs never
//! open a write batch.

use crate::report::{ChangeReport, ReportState};
use crate::summary::RunSummary;
use forgesync_client::{HubSession, Promise};
use forgesync_core::{Error, Key, Result};
use forgesync_model::{ChangeStatus, HubObject, ReadSet};
use forgesync_solver::Solver;
use serde::Serialize;
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Read and diff only; every change stays planned.
    Compare,
    /// Read, diff, and write.
    Apply,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compare => write!(f, "compare"),
            Self::Apply => write!(f, "apply"),
        }
    }
}

pub struct ProcessorOptions {
    pub mode: RunMode,
    pub chunk_size: usize,
    /// Drop phantom-tainted objects with a diagnostic instead of refusing
    /// the run (apply mode only; compare always proceeds).
    pub skip_phantoms: bool,
    pub cancel: CancellationToken,
}

enum Triage {
    Workable,
    /// Short-circuited to FAILED before any remote call.
    Failed(ChangeReport),
    /// Dropped from the stream under skip-phantoms; no report, no exit
    /// status impact.
    Dropped,
}

/// Everything a finished run produces: the summary plus per-object reports
/// in processing order.
#[derive(Debug)]
pub struct RunReport {
    pub summary: RunSummary,
    pub reports: Vec<ChangeReport>,
}

impl RunReport {
    pub fn any_failed(&self) -> bool {
        self.reports.iter().any(ChangeReport::is_failed)
    }
}

pub struct Processor {
    solver: Solver,
    options: ProcessorOptions,
    summary: RunSummary,
    reports: Vec<ChangeReport>,
    /// Failed keys; dependents short-circuit to FAILED.
    poisoned: BTreeSet<Key>,
    /// Keys dropped under skip-phantoms; dependents drop silently too and
    /// none of them count against the exit status.
    dropped: BTreeSet<Key>,
    cancelled: bool,
}

impl Processor {
    pub fn new(solver: Solver, options: ProcessorOptions, summary: RunSummary) -> Self {
        Self {
            solver,
            options,
            summary,
            reports: Vec::new(),
            poisoned: BTreeSet::new(),
            dropped: BTreeSet::new(),
            cancelled: false,
        }
    }

    /// Drive the solver-to-remote pipeline to completion.
    pub async fn run(mut self, session: &HubSession) -> Result<RunReport> {
        while let Some(tier) = self.solver.next_tier()? {
            if self.check_cancelled() {
                break;
            }
            self.summary.tiers += 1;
            debug!(tier = self.summary.tiers, size = tier.len(), "processing tier");

            let mut workable: Vec<(HubObject, ChangeReport)> = Vec::new();
            for object in tier {
                match self.triage(&object) {
                    Triage::Failed(report) => {
                        // short-circuited: contributes no remote calls
                        self.summary.record(&report);
                        self.reports.push(report);
                    }
                    Triage::Dropped => {}
                    Triage::Workable => {
                        let report = ChangeReport::new(object.key(), object.origin().clone());
                        workable.push((object, report));
                    }
                }
            }

            let mut start = 0;
            while start < workable.len() {
                if self.check_cancelled() {
                    break;
                }
                let end = (start + self.options.chunk_size).min(workable.len());
                self.process_chunk(session, &mut workable[start..end]).await?;
                start = end;
            }

            for (_, report) in workable {
                // a chunk never reached before cancellation is discarded
                if report.state == ReportState::Init {
                    continue;
                }
                if report.is_failed() {
                    self.poisoned.insert(report.key.clone());
                }
                self.summary.record(&report);
                self.reports.push(report);
            }

            if self.cancelled {
                break;
            }
        }

        if self.cancelled && self.solver.remaining() > 0 {
            self.summary.diagnostic(format!(
                "cancelled with {} objects unprocessed",
                self.solver.remaining()
            ));
        }

        self.summary.finalize(self.cancelled);
        info!(
            run = %self.summary.run_id,
            outcome = %self.summary.outcome,
            objects = self.summary.objects,
            changed = self.summary.changed,
            failed = self.summary.failed,
            "run complete"
        );
        Ok(RunReport {
            summary: self.summary,
            reports: self.reports,
        })
    }

    /// Decide whether an object can be processed at all: dependents of a
    /// failure short-circuit to FAILED; phantom-tainted objects drop from
    /// the stream under skip-phantoms (apply mode refuses the run earlier
    /// otherwise, compare always proceeds).
    fn triage(&mut self, object: &HubObject) -> Triage {
        let key = object.key();

        if let Some(dependency) = self
            .solver
            .dependencies_of(&key)
            .iter()
            .find(|d| self.poisoned.contains(*d))
        {
            warn!(key = %key, dependency = %dependency, "short-circuiting: upstream failure");
            let mut report = ChangeReport::new(key.clone(), object.origin().clone());
            report.fail_upstream(dependency);
            self.poisoned.insert(key);
            return Triage::Failed(report);
        }

        if self.options.mode == RunMode::Apply && self.options.skip_phantoms {
            let phantoms = self.solver.phantom_refs_of(&key);
            let dropped_dep = self
                .solver
                .dependencies_of(&key)
                .iter()
                .find(|d| self.dropped.contains(*d));
            if !phantoms.is_empty() || dropped_dep.is_some() {
                warn!(key = %key, "dropping: dependency closure contains a phantom");
                self.summary.diagnostic(match dropped_dep {
                    Some(dep) => format!("{} skipped: depends on skipped {}", key, dep),
                    None => format!("{} skipped: undeclared dependencies", key),
                });
                self.summary.skipped += 1;
                self.dropped.insert(key);
                return Triage::Dropped;
            }
        }

        Triage::Workable
    }

    /// One chunk: READ multicall, then COMPARE, then (apply mode) one write
    /// multicall. The two `execute` awaits are the only suspension points.
    async fn process_chunk(
        &mut self,
        session: &HubSession,
        chunk: &mut [(HubObject, ChangeReport)],
    ) -> Result<()> {
        // READY_READ
        let mut batch = session.batch();
        for (object, report) in chunk.iter_mut() {
            let promises = object.enqueue_read(&mut batch);
            report.begin_read(promises);
        }
        session.execute(batch).await?;

        // READY_COMPARE
        for (object, report) in chunk.iter_mut() {
            let outcome = {
                let reads = ReadSet::new(report.key.clone(), report.reads());
                object.diff(&reads)
            };
            match outcome {
                Ok(changes) => report.compared(changes),
                Err(error) if !error.is_fatal() => {
                    warn!(key = %report.key, error = %error, "read failed");
                    report.read_failed(&error);
                }
                Err(error) => return Err(error),
            }
        }

        if self.options.mode == RunMode::Compare || self.check_cancelled() {
            return Ok(());
        }

        // READY_APPLY
        let mut batch = session.batch();
        let mut submitted: Vec<(usize, Vec<Promise>)> = Vec::new();
        for (idx, (_, report)) in chunk.iter_mut().enumerate() {
            if report.state != ReportState::Compared {
                continue;
            }
            let promises = report.enqueue_writes(&mut batch);
            submitted.push((idx, promises));
        }
        session.execute(batch).await?;

        for (idx, promises) in submitted {
            let report = &mut chunk[idx].1;
            let key = report.key.clone();
            for (change, promise) in report.changes.iter_mut().zip(promises) {
                match promise.value() {
                    Ok(_) => change.status = ChangeStatus::Applied,
                    Err(fault) => {
                        let error = Error::ChangeApply {
                            key: key.clone(),
                            method: promise.method().to_string(),
                            description: change.description.clone(),
                            fault,
                        };
                        change.status = ChangeStatus::Failed(error.to_string());
                    }
                }
            }
            report.finish_apply();
        }

        Ok(())
    }

    /// Cancellation is honoured between phases, never mid-batch.
    fn check_cancelled(&mut self) -> bool {
        if !self.cancelled && self.options.cancel.is_cancelled() {
            warn!("cancellation requested, stopping between phases");
            self.cancelled = true;
        }
        self.cancelled
    }
}
