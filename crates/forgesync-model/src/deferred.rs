//! Deferred-update shadows.
//!
//! When the solver breaks a cycle it splits an object into a primary copy
//! (deferrable slots dropped) and one of these shadows carrying only the
//! dropped slots. The shadow orders after its primary and after every target
//! of the dropped edges, and at apply time contributes only the update
//! fragments for those slots.

use crate::change::Change;
use crate::object::{HubObject, ReadSet, Slot};
use crate::Document;
use forgesync_client::{Multicall, Promise};
use forgesync_core::{Key, Origin};

#[derive(Clone, Debug)]
pub struct DeferredUpdate {
    key: Key,
    /// The full desired object, used to compute the slot fragments.
    inner: Box<HubObject>,
    slots: Vec<Slot>,
}

impl DeferredUpdate {
    pub fn new(inner: HubObject, slots: Vec<Slot>) -> Self {
        Self {
            key: inner.key().deferred(),
            inner: Box::new(inner),
            slots,
        }
    }

    pub fn key(&self) -> Key {
        self.key.clone()
    }

    pub fn origin(&self) -> &Origin {
        self.inner.origin()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// The primary object, plus the targets of every dropped edge.
    pub fn dependency_keys(&self) -> Vec<(Key, Slot)> {
        let mut deps = vec![(self.inner.key(), Slot::Primary)];
        // the inner object is unsuppressed, so its full edge set is visible
        for (key, slot) in self.inner.dependency_keys() {
            if self.slots.contains(&slot) {
                deps.push((key, slot));
            }
        }
        deps
    }

    /// Same probes as the primary kind; the shadow diffs a subset of them.
    pub fn enqueue_read(&self, batch: &mut Multicall) -> Vec<Promise> {
        self.inner.enqueue_read(batch)
    }

    /// Only the dropped slots' changes; never a create.
    pub fn diff(&self, reads: &ReadSet) -> forgesync_core::Result<Vec<Change>> {
        match &*self.inner {
            HubObject::Tag(o) => o.diff_inner(reads, Some(&self.slots), false),
            HubObject::User(o) => o.diff_inner(reads, Some(&self.slots), false),
            HubObject::Group(o) => o.diff_inner(reads, Some(&self.slots), false),
            HubObject::Host(o) => o.diff_inner(reads, Some(&self.slots), false),
            HubObject::Channel(o) => o.diff_inner(reads, Some(&self.slots), false),
            // only the kinds above declare deferrable slots
            other => other.diff(reads),
        }
    }

    /// Uniform surface for the kind dispatch; a shadow's slot filter is
    /// fixed at construction, so the arguments are ignored.
    pub(crate) fn diff_inner(
        &self,
        reads: &ReadSet,
        _only: Option<&[Slot]>,
        _allow_create: bool,
    ) -> forgesync_core::Result<Vec<Change>> {
        self.diff(reads)
    }

    pub fn to_document(&self, include_defaults: bool) -> Document {
        self.inner.to_document(include_defaults)
    }
}
