//! The namespace: ingest documents, expand template calls through an
//! explicit work queue, and hold the final `(kind, name) → object` map.

use crate::template::Template;
use forgesync_core::{Error, Key, Origin, RedefinePolicy, Result, RunPolicies};
use forgesync_model::registry::Constructor;
use forgesync_model::{Document, HubObject, ModelRegistry};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// A non-fatal observation recorded during ingest/expansion.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub origin: Option<Origin>,
    pub message: String,
}

/// A document whose `type` named no core kind: a call awaiting expansion.
#[derive(Debug)]
struct TemplateCall {
    name: String,
    data: Map<String, Value>,
    origin: Origin,
}

#[derive(Debug)]
enum PendingEntry {
    Object(HubObject),
    Call(TemplateCall),
}

#[derive(Debug)]
pub struct Namespace {
    registry: ModelRegistry,
    policies: RunPolicies,
    templates: IndexMap<String, Template>,
    pending: VecDeque<PendingEntry>,
    expanded: IndexMap<Key, HubObject>,
    diagnostics: Vec<Diagnostic>,
    expansion_started: bool,
}

impl Namespace {
    pub fn new(registry: ModelRegistry, policies: RunPolicies) -> Self {
        Self {
            registry,
            policies,
            templates: IndexMap::new(),
            pending: VecDeque::new(),
            expanded: IndexMap::new(),
            diagnostics: Vec::new(),
            expansion_started: false,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ModelRegistry::builtin(), RunPolicies::default())
    }

    /// Register an additional kind. Allowed only before expansion begins.
    pub fn register_kind(&mut self, kind: &str, constructor: Constructor) -> Result<()> {
        if self.expansion_started {
            return Err(Error::Config(format!(
                "cannot register kind `{}` after expansion has begun",
                kind
            )));
        }
        self.registry.register(kind, constructor)
    }

    /// Dispatch one document: templates register, known kinds build an
    /// object, unknown kinds queue a template call.
    pub fn ingest(&mut self, doc: Document) -> Result<()> {
        if doc.doc_type == "template" {
            let template = Template::from_document(&doc)?;
            return self.install_template(template);
        }

        if self.registry.contains(&doc.doc_type) {
            let object = self.registry.build(&doc)?;
            self.pending.push_back(PendingEntry::Object(object));
        } else {
            debug!(kind = %doc.doc_type, origin = %doc.origin, "queueing template call");
            self.pending.push_back(PendingEntry::Call(TemplateCall {
                name: doc.doc_type,
                data: doc.data,
                origin: doc.origin,
            }));
        }
        Ok(())
    }

    pub fn ingest_all(&mut self, docs: impl IntoIterator<Item = Document>) -> Result<()> {
        for doc in docs {
            self.ingest(doc)?;
        }
        Ok(())
    }

    /// Consume the pending queue in insertion order, expanding template
    /// calls as they surface. Expansion output is appended to the queue, so
    /// nested calls expand too; depth is bounded by the trace length.
    pub fn expand(&mut self) -> Result<()> {
        self.expansion_started = true;
        self.registry.seal();

        while let Some(entry) = self.pending.pop_front() {
            match entry {
                PendingEntry::Object(object) => self.install(object)?,
                PendingEntry::Call(call) => self.expand_call(call)?,
            }
        }
        Ok(())
    }

    fn expand_call(&mut self, call: TemplateCall) -> Result<()> {
        if call.origin.depth() >= self.policies.max_expansion_depth {
            return Err(Error::expansion(
                &call.name,
                &call.origin,
                format!(
                    "expansion depth {} exceeds the maximum of {}",
                    call.origin.depth(),
                    self.policies.max_expansion_depth
                ),
            ));
        }

        let produced = {
            let template = self.templates.get(&call.name).ok_or_else(|| {
                let mut known: Vec<&str> = self.templates.keys().map(String::as_str).collect();
                known.sort_unstable();
                Error::expansion(
                    &call.name,
                    &call.origin,
                    if known.is_empty() {
                        "unknown template (no templates are defined)".to_string()
                    } else {
                        format!("unknown template (known templates: {})", known.join(", "))
                    },
                )
            })?;
            template.expand(&call.data, &call.origin)?
        };
        debug!(
            template = %call.name,
            documents = produced.len(),
            origin = %call.origin,
            "expanded template call"
        );
        for doc in produced {
            self.ingest(doc)?;
        }
        Ok(())
    }

    fn install_template(&mut self, template: Template) -> Result<()> {
        if let Some(existing) = self.templates.get(&template.name) {
            match self.policies.redefine {
                RedefinePolicy::Error => {
                    return Err(Error::Redefine {
                        key: Key::new("template", &template.name),
                        first: existing.origin.clone(),
                        second: template.origin.clone(),
                    })
                }
                RedefinePolicy::Skip => return Ok(()),
                RedefinePolicy::Warn => {
                    warn!(template = %template.name, "template redefined, keeping the latest");
                    self.diagnostics.push(Diagnostic {
                        origin: Some(template.origin.clone()),
                        message: format!("template `{}` redefined", template.name),
                    });
                }
                RedefinePolicy::Replace => {}
            }
        }
        self.templates.insert(template.name.clone(), template);
        Ok(())
    }

    fn install(&mut self, object: HubObject) -> Result<()> {
        let key = object.key();
        if let Some(existing) = self.expanded.get(&key) {
            match self.policies.redefine {
                RedefinePolicy::Error => {
                    return Err(Error::Redefine {
                        key,
                        first: existing.origin().clone(),
                        second: object.origin().clone(),
                    })
                }
                RedefinePolicy::Skip => return Ok(()),
                RedefinePolicy::Warn => {
                    warn!(key = %key, "object redefined, keeping the latest");
                    self.diagnostics.push(Diagnostic {
                        origin: Some(object.origin().clone()),
                        message: format!("{} redefined", key),
                    });
                }
                RedefinePolicy::Replace => {}
            }
        }
        self.expanded.insert(key, object);
        Ok(())
    }

    pub fn expanded(&self) -> &IndexMap<Key, HubObject> {
        &self.expanded
    }

    pub fn get(&self, key: &Key) -> Option<&HubObject> {
        self.expanded.get(key)
    }

    pub fn objects(&self) -> impl Iterator<Item = &HubObject> {
        self.expanded.values()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Expanded objects rendered back out as documents, in namespace order.
    pub fn to_documents(&self, include_defaults: bool) -> Vec<Document> {
        self.expanded
            .values()
            .map(|o| o.to_document(include_defaults))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgesync_model::parse_documents;
    use std::path::Path;

    fn namespace_from(yaml: &str, policies: RunPolicies) -> Result<Namespace> {
        let docs = parse_documents(yaml, Path::new("site.yaml")).unwrap();
        let mut ns = Namespace::new(ModelRegistry::builtin(), policies);
        ns.ingest_all(docs)?;
        ns.expand()?;
        Ok(ns)
    }

    #[test]
    fn core_documents_install_directly() {
        let ns = namespace_from(
            "type: tag\nname: a\n---\ntype: tag\nname: b\ninherit:\n  - parent: a\n",
            RunPolicies::default(),
        )
        .unwrap();
        assert_eq!(ns.expanded().len(), 2);
        assert!(ns.get(&Key::new("tag", "a")).is_some());
    }

    #[test]
    fn template_call_expands_into_objects() {
        let ns = namespace_from(
            "type: template\n\
             name: build-pair\n\
             content: |\n\
             \x20 type: tag\n\
             \x20 name: {{ name }}-build\n\
             \x20 ---\n\
             \x20 type: target\n\
             \x20 name: {{ name }}\n\
             \x20 build-tag: {{ name }}-build\n\
             ---\n\
             type: build-pair\n\
             name: f42\n",
            RunPolicies::default(),
        )
        .unwrap();

        assert_eq!(ns.expanded().len(), 2);
        let tag = ns.get(&Key::new("tag", "f42-build")).unwrap();
        assert_eq!(tag.origin().depth(), 1);
        assert!(ns.get(&Key::new("target", "f42")).is_some());
    }

    // a template that calls itself runs into the depth bound
    #[test]
    fn runaway_recursion_hits_the_depth_bound() {
        let result = namespace_from(
            "type: template\n\
             name: loop\n\
             content: |\n\
             \x20 type: loop\n\
             \x20 name: {{ name }}\n\
             ---\n\
             type: loop\nname: x\n",
            RunPolicies {
                max_expansion_depth: 5,
                ..RunPolicies::default()
            },
        );
        let err = result.unwrap_err();
        assert!(matches!(err, Error::Expansion { .. }));
        assert!(err.to_string().contains("depth"));
    }

    #[test]
    fn unknown_template_lists_known_names() {
        let err = namespace_from(
            "type: template\nname: real\ncontent: |\n\x20 type: tag\n\x20 name: x\n---\ntype: not-a-template\nname: y\n",
            RunPolicies::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("known templates: real"));
    }

    #[test]
    fn redefine_error_by_default() {
        let err = namespace_from(
            "type: tag\nname: a\n---\ntype: tag\nname: a\nlocked: true\n",
            RunPolicies::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Redefine { .. }));
    }

    #[test]
    fn redefine_skip_keeps_the_first() {
        let ns = namespace_from(
            "type: tag\nname: a\n---\ntype: tag\nname: a\nlocked: true\n",
            RunPolicies {
                redefine: RedefinePolicy::Skip,
                ..RunPolicies::default()
            },
        )
        .unwrap();
        let HubObject::Tag(tag) = ns.get(&Key::new("tag", "a")).unwrap() else {
            panic!("expected tag");
        };
        assert!(!tag.locked);
    }

    #[test]
    fn redefine_warn_keeps_the_latest_and_records() {
        let ns = namespace_from(
            "type: tag\nname: a\n---\ntype: tag\nname: a\nlocked: true\n",
            RunPolicies {
                redefine: RedefinePolicy::Warn,
                ..RunPolicies::default()
            },
        )
        .unwrap();
        let HubObject::Tag(tag) = ns.get(&Key::new("tag", "a")).unwrap() else {
            panic!("expected tag");
        };
        assert!(tag.locked);
        assert_eq!(ns.diagnostics().len(), 1);
    }

    #[test]
    fn kind_registration_is_refused_after_expansion() {
        let mut ns = namespace_from("type: tag\nname: a\n", RunPolicies::default()).unwrap();
        assert!(ns
            .register_kind("custom", forgesync_model::kinds::tag::build)
            .is_err());
    }
}
