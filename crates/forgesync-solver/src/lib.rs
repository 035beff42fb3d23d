//! Tiered dependency solver.
//!
//! Builds the dependency graph over the expanded namespace and emits tiers:
//! maximal groups of objects with no edges between them, in topological
//! order, each tier sorted by `(kind, name)`. When no node is free but nodes
//! remain, the remaining subgraph contains a cycle; the solver breaks it by
//! splitting members into a primary (deferrable edges dropped) plus a
//! deferred-update shadow scheduled into a later tier.
//!
//! Edges to phantoms contribute no ordering obligation; they are recorded
//! per node so the engine can apply its phantom policy. Edges to discovered
//! keys are satisfied outright.

use forgesync_core::{Error, Key, Result};
use forgesync_model::{HubObject, Slot};
use forgesync_namespace::{Namespace, Presence, Resolver};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub struct Solver {
    nodes: BTreeMap<Key, HubObject>,
    /// Every key that was ever a node, including already-emitted ones.
    declared: BTreeSet<Key>,
    discovered: BTreeSet<Key>,
    /// u → the remaining nodes u still waits on.
    deps: BTreeMap<Key, BTreeSet<Key>>,
    /// v → the remaining nodes waiting on v.
    rdeps: BTreeMap<Key, BTreeSet<Key>>,
    /// Full direct-dependency lists, kept after emission for the engine's
    /// failure cascade.
    all_deps: BTreeMap<Key, Vec<Key>>,
    /// Direct references to undeclared, undiscovered keys.
    phantom_refs: BTreeMap<Key, Vec<Key>>,
    /// Keys that already went through a split; a member of a stuck cycle
    /// that is in here no longer admits splitting.
    split_done: BTreeSet<Key>,
    tiers_emitted: usize,
}

impl Solver {
    pub fn new(namespace: &Namespace, resolver: &Resolver) -> Self {
        let nodes: BTreeMap<Key, HubObject> = namespace
            .expanded()
            .iter()
            .map(|(k, o)| (k.clone(), o.clone()))
            .collect();

        let mut solver = Self {
            declared: nodes.keys().cloned().collect(),
            discovered: BTreeSet::new(),
            deps: nodes.keys().map(|k| (k.clone(), BTreeSet::new())).collect(),
            rdeps: nodes.keys().map(|k| (k.clone(), BTreeSet::new())).collect(),
            all_deps: BTreeMap::new(),
            phantom_refs: BTreeMap::new(),
            split_done: BTreeSet::new(),
            tiers_emitted: 0,
            nodes,
        };

        let keys: Vec<Key> = solver.nodes.keys().cloned().collect();
        for key in keys {
            for (target, _slot) in solver.nodes[&key].dependency_keys() {
                match resolver.lookup(&target) {
                    Presence::Present => solver.record_dependency(&key, target),
                    Presence::Discovered => {
                        solver.discovered.insert(target);
                    }
                    Presence::Phantom(_) | Presence::Pending => {
                        solver
                            .phantom_refs
                            .entry(key.clone())
                            .or_default()
                            .push(target);
                    }
                }
            }
        }

        solver
    }

    /// Record a dependency on a declared key: always into `all_deps`, and
    /// into the live graph while the target has not been emitted yet.
    fn record_dependency(&mut self, from: &Key, target: Key) {
        let entry = self.all_deps.entry(from.clone()).or_default();
        if !entry.contains(&target) {
            entry.push(target.clone());
        }
        if self.nodes.contains_key(&target) {
            self.deps.entry(from.clone()).or_default().insert(target.clone());
            self.rdeps.entry(target).or_default().insert(from.clone());
        }
    }

    /// Direct dependencies of a node, for the cross-tier failure cascade.
    /// Phantom references are not included.
    pub fn dependencies_of(&self, key: &Key) -> &[Key] {
        self.all_deps.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct references to phantom keys.
    pub fn phantom_refs_of(&self, key: &Key) -> &[Key] {
        self.phantom_refs.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn remaining(&self) -> usize {
        self.nodes.len()
    }

    /// The next tier, or `None` when every node has been emitted. Splits
    /// cycles as needed; a cycle with no splittable member is fatal.
    pub fn next_tier(&mut self) -> Result<Option<Vec<HubObject>>> {
        if self.nodes.is_empty() {
            return Ok(None);
        }

        loop {
            let ready: Vec<Key> = self
                .nodes
                .keys()
                .filter(|key| self.deps.get(*key).is_none_or(BTreeSet::is_empty))
                .cloned()
                .collect();

            if !ready.is_empty() {
                let tier: Vec<HubObject> = ready
                    .iter()
                    .map(|key| self.nodes.remove(key).unwrap())
                    .collect();
                for key in &ready {
                    self.deps.remove(key);
                    if let Some(dependents) = self.rdeps.remove(key) {
                        for dependent in dependents {
                            if let Some(waiting) = self.deps.get_mut(&dependent) {
                                waiting.remove(key);
                            }
                        }
                    }
                }
                self.tiers_emitted += 1;
                debug!(
                    tier = self.tiers_emitted,
                    size = tier.len(),
                    remaining = self.nodes.len(),
                    "emitting tier"
                );
                return Ok(Some(tier));
            }

            self.split_cycle()?;
        }
    }

    /// Find the minimal stuck strongly connected set and split its members'
    /// deferrable edges off into deferred-update shadows.
    fn split_cycle(&mut self) -> Result<()> {
        let sccs = self.cyclic_sccs();
        let scc = sccs
            .into_iter()
            .min_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)))
            .ok_or_else(|| Error::Solver {
                members: self.nodes.keys().cloned().collect(),
            })?;

        debug!(members = scc.len(), first = %scc[0], "splitting cycle");

        let mut split_any = false;
        for key in &scc {
            if self.split_done.contains(key) {
                continue;
            }
            let object = &self.nodes[key];

            // slots whose edges stay inside the stuck set
            let drop_slots: Vec<Slot> = object
                .dependency_keys()
                .into_iter()
                .filter(|(target, slot)| scc.contains(target) && object.can_defer(*slot))
                .map(|(_, slot)| slot)
                .collect();
            if drop_slots.is_empty() {
                continue;
            }

            let (primary, shadow) = object.split(&drop_slots);
            let Some(shadow) = shadow else { continue };
            split_any = true;
            self.split_done.insert(key.clone());
            self.install_split(key.clone(), primary, shadow);
        }

        if !split_any {
            return Err(Error::Solver { members: scc });
        }
        Ok(())
    }

    /// Replace a node by its primary (rebuilt edge set) and add the shadow
    /// with edges to the primary and the dropped targets.
    fn install_split(&mut self, key: Key, primary: HubObject, shadow: HubObject) {
        // tear down the old node's edges and classifications
        if let Some(old) = self.deps.insert(key.clone(), BTreeSet::new()) {
            for target in old {
                if let Some(dependents) = self.rdeps.get_mut(&target) {
                    dependents.remove(&key);
                }
            }
        }
        self.all_deps.remove(&key);
        self.phantom_refs.remove(&key);

        let primary_targets = primary.dependency_keys();
        self.nodes.insert(key.clone(), primary);
        self.classify_targets(&key, primary_targets);

        let shadow_key = shadow.key();
        let shadow_targets = shadow.dependency_keys();
        self.declared.insert(shadow_key.clone());
        self.nodes.insert(shadow_key.clone(), shadow);
        self.deps.entry(shadow_key.clone()).or_default();
        self.rdeps.entry(shadow_key.clone()).or_default();
        self.classify_targets(&shadow_key, shadow_targets);
    }

    fn classify_targets(&mut self, from: &Key, targets: Vec<(Key, Slot)>) {
        for (target, _slot) in targets {
            if self.declared.contains(&target) {
                self.record_dependency(from, target);
            } else if !self.discovered.contains(&target) {
                let refs = self.phantom_refs.entry(from.clone()).or_default();
                if !refs.contains(&target) {
                    refs.push(target);
                }
            }
        }
    }

    /// Strongly connected components of the remaining graph that are actual
    /// cycles (more than one member, or a self-loop), each sorted by key.
    fn cyclic_sccs(&self) -> Vec<Vec<Key>> {
        let mut state = TarjanState {
            deps: &self.deps,
            index: 0,
            indices: BTreeMap::new(),
            lowlinks: BTreeMap::new(),
            on_stack: BTreeSet::new(),
            stack: Vec::new(),
            sccs: Vec::new(),
        };
        for key in self.nodes.keys() {
            if !state.indices.contains_key(key) {
                state.visit(key);
            }
        }

        state
            .sccs
            .into_iter()
            .filter(|scc| {
                scc.len() > 1
                    || self
                        .deps
                        .get(&scc[0])
                        .is_some_and(|waiting| waiting.contains(&scc[0]))
            })
            .map(|mut scc| {
                scc.sort();
                scc
            })
            .collect()
    }
}

struct TarjanState<'a> {
    deps: &'a BTreeMap<Key, BTreeSet<Key>>,
    index: usize,
    indices: BTreeMap<Key, usize>,
    lowlinks: BTreeMap<Key, usize>,
    on_stack: BTreeSet<Key>,
    stack: Vec<Key>,
    sccs: Vec<Vec<Key>>,
}

impl TarjanState<'_> {
    fn visit(&mut self, key: &Key) {
        self.indices.insert(key.clone(), self.index);
        self.lowlinks.insert(key.clone(), self.index);
        self.index += 1;
        self.stack.push(key.clone());
        self.on_stack.insert(key.clone());

        let targets: Vec<Key> = self
            .deps
            .get(key)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default();
        for target in targets {
            if !self.deps.contains_key(&target) {
                continue;
            }
            if !self.indices.contains_key(&target) {
                self.visit(&target);
                let low = self.lowlinks[&target].min(self.lowlinks[key]);
                self.lowlinks.insert(key.clone(), low);
            } else if self.on_stack.contains(&target) {
                let low = self.indices[&target].min(self.lowlinks[key]);
                self.lowlinks.insert(key.clone(), low);
            }
        }

        if self.lowlinks[key] == self.indices[key] {
            let mut scc = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.remove(&member);
                let done = member == *key;
                scc.push(member);
                if done {
                    break;
                }
            }
            self.sccs.push(scc);
        }
    }
}
