//! Kind registry: maps a document's `type` tag to the constructor that
//! builds the corresponding object.

use crate::object::HubObject;
use crate::Document;
use forgesync_core::{Error, Result};
use std::collections::BTreeMap;

pub type Constructor = fn(&Document) -> Result<HubObject>;

/// The registry of known object kinds. Sealed once expansion begins;
/// re-registration before that point replaces silently.
#[derive(Debug)]
pub struct ModelRegistry {
    kinds: BTreeMap<String, Constructor>,
    sealed: bool,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            kinds: BTreeMap::new(),
            sealed: false,
        }
    }

    /// The registry with all built-in kinds.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let entries: &[(&str, Constructor)] = &[
            (crate::kinds::tag::KIND, crate::kinds::tag::build),
            (crate::kinds::target::KIND, crate::kinds::target::build),
            (crate::kinds::repo::KIND, crate::kinds::repo::build),
            (crate::kinds::user::KIND, crate::kinds::user::build),
            (crate::kinds::group::KIND, crate::kinds::group::build),
            (crate::kinds::host::KIND, crate::kinds::host::build),
            (crate::kinds::channel::KIND, crate::kinds::channel::build),
            (crate::kinds::perm::KIND, crate::kinds::perm::build),
            (
                crate::kinds::misc::BUILD_TYPE_KIND,
                crate::kinds::misc::build_build_type,
            ),
            (
                crate::kinds::misc::CONTENT_GENERATOR_KIND,
                crate::kinds::misc::build_content_generator,
            ),
            (
                crate::kinds::misc::ARCHIVE_TYPE_KIND,
                crate::kinds::misc::build_archive_type,
            ),
        ];
        for (kind, ctor) in entries {
            registry
                .register(kind, *ctor)
                .expect("builtin registration on an unsealed registry");
        }
        registry
    }

    pub fn register(&mut self, kind: &str, constructor: Constructor) -> Result<()> {
        if self.sealed {
            return Err(Error::Config(format!(
                "cannot register kind `{}` after expansion has begun",
                kind
            )));
        }
        self.kinds.insert(kind.to_string(), constructor);
        Ok(())
    }

    /// Called by the namespace when expansion starts.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    pub fn build(&self, doc: &Document) -> Result<HubObject> {
        let constructor = self.kinds.get(&doc.doc_type).ok_or_else(|| {
            Error::validation(
                &doc.origin,
                "type",
                format!("unknown kind `{}`", doc.doc_type),
            )
        })?;
        constructor(doc)
    }

    pub fn kind_names(&self) -> Vec<&str> {
        self.kinds.keys().map(String::as_str).collect()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
