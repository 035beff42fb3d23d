//! Multicall batches and the hub session.
//!
//! A batch collects call descriptors and hands out promise handles; the
//! session executes at most one batch at a time against its transport. The
//! processor opens a batch per phase, lets entities append calls, then
//! executes it as a single suspension point.

use crate::call::{CallDescriptor, Promise};
use crate::transport::HubTransport;
use forgesync_core::{Fault, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// An open batch of remote calls.
pub struct Multicall {
    id: String,
    promises: Vec<Promise>,
}

impl Multicall {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            promises: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Append a call and get the handle that will carry its outcome.
    pub fn call(&mut self, descriptor: CallDescriptor) -> Promise {
        let promise = Promise::new(descriptor);
        self.promises.push(promise.clone());
        promise
    }

    pub fn len(&self) -> usize {
        self.promises.len()
    }

    pub fn is_empty(&self) -> bool {
        self.promises.is_empty()
    }

    fn settle_all(&self, fault: &Fault) {
        for promise in &self.promises {
            promise.settle(Err(fault.clone()));
        }
    }
}

impl Default for Multicall {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-owner session over a hub transport. One batch may be in flight at
/// a time; executing consumes the batch, so a stale handle cannot be reused.
pub struct HubSession {
    transport: Arc<dyn HubTransport>,
    deadline: Duration,
}

impl HubSession {
    pub fn new(transport: Arc<dyn HubTransport>, deadline: Duration) -> Self {
        Self { transport, deadline }
    }

    pub fn endpoint(&self) -> String {
        self.transport.endpoint()
    }

    pub fn batch(&self) -> Multicall {
        Multicall::new()
    }

    /// Execute a batch. Every promise in the batch is settled on return:
    /// with per-call outcomes on success, or with a batch-wide fault when the
    /// transport fails or the deadline elapses. Transport-level failures are
    /// per-entity failures, not run-fatal errors, so this returns `Ok` for
    /// them; callers observe the faults through the promises.
    pub async fn execute(&self, batch: Multicall) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let descriptors: Vec<CallDescriptor> = batch
            .promises
            .iter()
            .map(|p| p.descriptor().clone())
            .collect();
        debug!(batch = %batch.id(), calls = batch.len(), "executing multicall");

        let outcomes =
            match tokio::time::timeout(self.deadline, self.transport.multicall(&descriptors)).await
            {
                Err(_) => {
                    warn!(batch = %batch.id(), "multicall deadline exceeded");
                    batch.settle_all(&Fault::transport(format!(
                        "deadline of {}s exceeded",
                        self.deadline.as_secs()
                    )));
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!(batch = %batch.id(), error = %e, "multicall transport failed");
                    batch.settle_all(&Fault::transport(e.to_string()));
                    return Ok(());
                }
                Ok(Ok(outcomes)) => outcomes,
            };

        if outcomes.len() != batch.len() {
            batch.settle_all(&Fault::transport(format!(
                "hub returned {} results for {} calls",
                outcomes.len(),
                batch.len()
            )));
            return Ok(());
        }

        for (promise, outcome) in batch.promises.iter().zip(outcomes) {
            promise.settle(outcome);
        }
        Ok(())
    }
}
