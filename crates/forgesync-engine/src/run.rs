//! Top-level entry points consumed by the CLI: expand, compare, apply, and
//! dump. Each is a thin orchestration over the namespace, resolver, solver,
//! and processor.

use crate::processor::{Processor, ProcessorOptions, RunMode, RunReport};
use crate::summary::RunSummary;
use forgesync_client::HubSession;
use forgesync_core::{Error, Key, Result, RunPolicies};
use forgesync_model::{self as model, Document, ModelRegistry, ReadSet};
use forgesync_namespace::{Namespace, Resolver};
use forgesync_solver::Solver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Per-run knobs shared by every entry point.
#[derive(Clone)]
pub struct RunConfig {
    pub policies: RunPolicies,
    pub chunk_size: usize,
    pub cancel: CancellationToken,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            policies: RunPolicies::default(),
            chunk_size: forgesync_core::config::DEFAULT_CHUNK_SIZE,
            cancel: CancellationToken::new(),
        }
    }
}

/// Ingest and expand documents into a namespace. Fatal on any load or
/// expansion error.
pub fn build_namespace(docs: Vec<Document>, policies: &RunPolicies) -> Result<Namespace> {
    let mut namespace = Namespace::new(ModelRegistry::builtin(), policies.clone());
    namespace.ingest_all(docs)?;
    namespace.expand()?;
    info!(objects = namespace.expanded().len(), "namespace expanded");
    Ok(namespace)
}

/// Run ingest + expand and yield the resulting document sequence.
pub fn expand(docs: Vec<Document>, policies: &RunPolicies) -> Result<Vec<Document>> {
    let namespace = build_namespace(docs, policies)?;
    Ok(namespace.to_documents(policies.include_defaults))
}

/// Solver + compare-only processor: reads and diffs, never writes.
pub async fn compare(
    namespace: &Namespace,
    session: &HubSession,
    config: &RunConfig,
) -> Result<RunReport> {
    run_mode(namespace, session, config, RunMode::Compare).await
}

/// Solver + applying processor.
///
/// With `skip_phantoms` unset, any phantom reference refuses the run before
/// a single batch is opened; with it set, tainted objects drop from the
/// stream with a diagnostic.
pub async fn apply(
    namespace: &Namespace,
    session: &HubSession,
    config: &RunConfig,
) -> Result<RunReport> {
    run_mode(namespace, session, config, RunMode::Apply).await
}

async fn run_mode(
    namespace: &Namespace,
    session: &HubSession,
    config: &RunConfig,
    mode: RunMode,
) -> Result<RunReport> {
    let mut resolver = Resolver::from_namespace(namespace);

    if config.policies.check_remote && resolver.has_phantoms() {
        promote_discovered(&mut resolver, session).await?;
    }

    let mut summary = RunSummary::new(mode, session.endpoint());
    for (key, origin) in resolver.phantoms() {
        summary.diagnostic(format!(
            "{} is not declared; first referenced from {}",
            key, origin
        ));
    }

    if mode == RunMode::Apply && !config.policies.skip_phantoms {
        if let Some((key, origin)) = resolver.phantoms().iter().next() {
            return Err(Error::Phantom {
                key: key.clone(),
                origin: origin.clone(),
            });
        }
    }

    let solver = Solver::new(namespace, &resolver);
    let processor = Processor::new(
        solver,
        ProcessorOptions {
            mode,
            chunk_size: config.chunk_size.max(1),
            skip_phantoms: config.policies.skip_phantoms,
            cancel: config.cancel.clone(),
        },
        summary,
    );
    processor.run(session).await
}

/// Probe every phantom against the hub in one multicall; keys that already
/// exist remotely become Discovered and satisfy their edges.
async fn promote_discovered(resolver: &mut Resolver, session: &HubSession) -> Result<()> {
    let phantoms: Vec<Key> = resolver.phantoms().keys().cloned().collect();

    let mut batch = session.batch();
    let probes: Vec<(Key, forgesync_client::Promise)> = phantoms
        .into_iter()
        .filter_map(|key| {
            model::existence_probe(&key).map(|probe| (key, batch.call(probe)))
        })
        .collect();
    session.execute(batch).await?;

    for (key, promise) in probes {
        if let Ok(value) = promise.value() {
            if model::observed_exists(&key, value) {
                debug!(key = %key, "phantom exists remotely, promoting to discovered");
                resolver.add_discovered(key);
            }
        }
    }
    Ok(())
}

/// The result of a read-only fetch of observed state.
pub struct DumpReport {
    pub documents: Vec<Document>,
    /// Requested keys that do not exist on the hub.
    pub missing: Vec<Key>,
}

/// READ-only inverse: fetch the given keys and render observed state as
/// documents with the usual default elision.
pub async fn dump(keys: &[Key], session: &HubSession, config: &RunConfig) -> Result<DumpReport> {
    let mut batch = session.batch();
    let mut probes = Vec::new();
    for key in keys {
        let promises = model::dump_probes(key, &mut batch)
            .ok_or_else(|| Error::Config(format!("cannot dump unknown kind `{}`", key.kind)))?;
        probes.push((key.clone(), promises));
    }
    session.execute(batch).await?;

    let mut documents = Vec::new();
    let mut missing = Vec::new();
    for (key, promises) in probes {
        let reads = ReadSet::new(key.clone(), &promises);
        match model::dump_document(&key, &reads, config.policies.include_defaults)? {
            Some(doc) => documents.push(doc),
            None => missing.push(key),
        }
    }
    Ok(DumpReport { documents, missing })
}
