//! Reference resolution over the post-expansion namespace.

use crate::namespace::Namespace;
use forgesync_core::{Key, Origin};
use std::collections::{BTreeMap, BTreeSet};

/// How a referenced key resolves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Presence {
    /// Declared in the namespace.
    Present,
    /// Referenced but not declared; carries the first reference's origin.
    Phantom(Origin),
    /// Not declared, but confirmed to exist on the hub.
    Discovered,
    /// A deferred-update shadow created by the solver.
    Pending,
}

pub struct Resolver {
    declared: BTreeSet<Key>,
    discovered: BTreeSet<Key>,
    pending: BTreeSet<Key>,
    phantoms: BTreeMap<Key, Origin>,
}

impl Resolver {
    /// Scan the namespace: every dependency target that is not declared
    /// becomes a phantom recording its first referencing origin.
    pub fn from_namespace(namespace: &Namespace) -> Self {
        let declared: BTreeSet<Key> = namespace.expanded().keys().cloned().collect();

        let mut phantoms = BTreeMap::new();
        for object in namespace.objects() {
            for (target, _slot) in object.dependency_keys() {
                if !declared.contains(&target) {
                    phantoms
                        .entry(target)
                        .or_insert_with(|| object.origin().clone());
                }
            }
        }

        Self {
            declared,
            discovered: BTreeSet::new(),
            pending: BTreeSet::new(),
            phantoms,
        }
    }

    /// Promote a phantom to Discovered after the hub confirmed it exists.
    pub fn add_discovered(&mut self, key: Key) {
        self.phantoms.remove(&key);
        self.discovered.insert(key);
    }

    /// Reserve a key for a solver-created deferred-update shadow.
    pub fn mark_pending(&mut self, key: Key) {
        self.pending.insert(key);
    }

    pub fn lookup(&self, key: &Key) -> Presence {
        if self.declared.contains(key) {
            return Presence::Present;
        }
        if self.pending.contains(key) {
            return Presence::Pending;
        }
        if self.discovered.contains(key) {
            return Presence::Discovered;
        }
        match self.phantoms.get(key) {
            Some(origin) => Presence::Phantom(origin.clone()),
            None => Presence::Phantom(Origin::synthetic("unreferenced")),
        }
    }

    /// All phantoms, in key order.
    pub fn phantoms(&self) -> &BTreeMap<Key, Origin> {
        &self.phantoms
    }

    pub fn has_phantoms(&self) -> bool {
        !self.phantoms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgesync_core::RunPolicies;
    use forgesync_model::{parse_documents, ModelRegistry};
    use std::path::Path;

    fn resolver_for(yaml: &str) -> Resolver {
        let docs = parse_documents(yaml, Path::new("site.yaml")).unwrap();
        let mut ns = Namespace::new(ModelRegistry::builtin(), RunPolicies::default());
        ns.ingest_all(docs).unwrap();
        ns.expand().unwrap();
        Resolver::from_namespace(&ns)
    }

    #[test]
    fn declared_references_are_present() {
        let resolver = resolver_for(
            "type: tag\nname: base\n---\ntype: tag\nname: child\ninherit:\n  - parent: base\n",
        );
        assert_eq!(resolver.lookup(&Key::new("tag", "base")), Presence::Present);
        assert!(!resolver.has_phantoms());
    }

    #[test]
    fn undeclared_references_become_phantoms() {
        let resolver =
            resolver_for("type: tag\nname: child\ninherit:\n  - parent: missing\n");
        match resolver.lookup(&Key::new("tag", "missing")) {
            Presence::Phantom(origin) => assert_eq!(origin.line, 1),
            other => panic!("expected phantom, got {:?}", other),
        }
    }

    #[test]
    fn discovery_clears_the_phantom() {
        let mut resolver =
            resolver_for("type: tag\nname: child\ninherit:\n  - parent: missing\n");
        resolver.add_discovered(Key::new("tag", "missing"));
        assert_eq!(
            resolver.lookup(&Key::new("tag", "missing")),
            Presence::Discovered
        );
        assert!(!resolver.has_phantoms());
    }
}
