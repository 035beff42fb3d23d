//! Build tags: inheritance links, external-repo links, package groups,
//! arches, lock/maven flags, extras, and an optional gating permission.

use super::{
    arches_equal, arches_from_observed, arches_to_string, render_document, spec_from_doc,
};
use crate::change::{Change, ChangeOp};
use crate::object::{HubObject, ReadSet, Slot};
use crate::Document;
use forgesync_client::{CallDescriptor, Multicall, Promise};
use forgesync_core::{Error, Key, Origin, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{json, Map, Value};

pub const KIND: &str = "tag";

/// Priorities assigned to links declared without one: 10, 20, 30, ...
const PRIORITY_STEP: i64 = 10;

// read probe indices
const READ_INFO: usize = 0;
const READ_INHERITANCE: usize = 1;
const READ_REPOS: usize = 2;
const READ_GROUPS: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InheritLink {
    pub parent: String,
    pub priority: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepoLink {
    pub repo: String,
    pub priority: i64,
}

#[derive(Clone, Debug)]
pub struct Tag {
    pub name: String,
    pub origin: Origin,
    pub inherit: Vec<InheritLink>,
    pub external_repos: Vec<RepoLink>,
    pub extras: Map<String, Value>,
    pub groups: IndexMap<String, Vec<String>>,
    pub arches: Vec<String>,
    pub locked: bool,
    pub maven_support: bool,
    pub permission: Option<String>,
    pub(crate) suppressed: Vec<Slot>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct TagSpec {
    name: String,
    #[serde(default)]
    inherit: Vec<InheritSpec>,
    #[serde(default)]
    external_repos: Vec<RepoLinkSpec>,
    #[serde(default)]
    extras: Map<String, Value>,
    #[serde(default)]
    groups: IndexMap<String, Vec<String>>,
    #[serde(default)]
    arches: Vec<String>,
    #[serde(default)]
    locked: bool,
    #[serde(default)]
    maven_support: bool,
    #[serde(default)]
    permission: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct InheritSpec {
    parent: String,
    #[serde(default)]
    priority: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RepoLinkSpec {
    repo: String,
    #[serde(default)]
    priority: Option<i64>,
}

pub fn build(doc: &Document) -> Result<HubObject> {
    let spec: TagSpec = spec_from_doc(doc)?;

    let inherit = assign_priorities(
        spec.inherit.into_iter().map(|l| (l.parent, l.priority)),
        &doc.origin,
        "inherit",
    )?
    .into_iter()
    .map(|(parent, priority)| InheritLink { parent, priority })
    .collect();

    let external_repos = assign_priorities(
        spec.external_repos.into_iter().map(|l| (l.repo, l.priority)),
        &doc.origin,
        "external-repos",
    )?
    .into_iter()
    .map(|(repo, priority)| RepoLink { repo, priority })
    .collect();

    Ok(HubObject::Tag(Tag {
        name: spec.name,
        origin: doc.origin.clone(),
        inherit,
        external_repos,
        extras: spec.extras,
        groups: spec.groups,
        arches: spec.arches,
        locked: spec.locked,
        maven_support: spec.maven_support,
        permission: spec.permission,
        suppressed: Vec::new(),
    }))
}

/// Fill in missing priorities by declaration order and reject duplicates;
/// priorities are unique within a tag.
fn assign_priorities(
    links: impl Iterator<Item = (String, Option<i64>)>,
    origin: &Origin,
    field: &str,
) -> Result<Vec<(String, i64)>> {
    let mut assigned = Vec::new();
    let mut seen = std::collections::BTreeSet::new();
    for (idx, (name, priority)) in links.enumerate() {
        let priority = priority.unwrap_or((idx as i64 + 1) * PRIORITY_STEP);
        if !seen.insert(priority) {
            return Err(Error::validation(
                origin,
                field,
                format!("duplicate priority {}", priority),
            ));
        }
        assigned.push((name, priority));
    }
    Ok(assigned)
}

impl Tag {
    pub fn key(&self) -> Key {
        Key::new(KIND, &self.name)
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn dependency_keys(&self) -> Vec<(Key, Slot)> {
        let mut deps = Vec::new();
        if !self.suppressed.contains(&Slot::Inheritance) {
            for link in &self.inherit {
                deps.push((Key::new(KIND, &link.parent), Slot::Inheritance));
            }
        }
        if !self.suppressed.contains(&Slot::ExternalRepos) {
            for link in &self.external_repos {
                deps.push((
                    Key::new(super::repo::KIND, &link.repo),
                    Slot::ExternalRepos,
                ));
            }
        }
        if let Some(perm) = &self.permission {
            deps.push((Key::new(super::perm::KIND, perm), Slot::Permission));
        }
        deps
    }

    pub fn enqueue_read(&self, batch: &mut Multicall) -> Vec<Promise> {
        vec![
            batch.call(CallDescriptor::new("getTag").arg(self.name.as_str())),
            batch.call(CallDescriptor::new("getInheritanceData").arg(self.name.as_str())),
            batch.call(CallDescriptor::new("getTagExternalRepos").arg(self.name.as_str())),
            batch.call(CallDescriptor::new("getTagGroups").arg(self.name.as_str())),
        ]
    }

    pub fn diff_inner(
        &self,
        reads: &ReadSet,
        only: Option<&[Slot]>,
        allow_create: bool,
    ) -> Result<Vec<Change>> {
        let on = |slot: Slot| match only {
            Some(slots) => slots.contains(&slot),
            None => !self.suppressed.contains(&slot),
        };

        let mut changes = Vec::new();
        let info = reads.value(READ_INFO)?;

        if info.is_null() {
            if allow_create {
                changes.push(self.create_change());
                self.group_additions(&json!([]), &mut changes);
            }
            if on(Slot::Inheritance) && !self.inherit.is_empty() {
                changes.push(self.inheritance_change());
            }
            if on(Slot::ExternalRepos) {
                for link in &self.external_repos {
                    changes.push(self.add_repo_change(link));
                }
            }
            return Ok(changes);
        }

        if allow_create {
            self.field_edits(info, &mut changes);
            self.group_additions(reads.value(READ_GROUPS)?, &mut changes);
        }

        if on(Slot::Inheritance) {
            let observed = observed_inheritance(reads.value(READ_INHERITANCE)?);
            let desired: Vec<(String, i64)> = sorted_links(
                self.inherit.iter().map(|l| (l.parent.clone(), l.priority)),
            );
            if desired != observed {
                changes.push(self.inheritance_change());
            }
        }

        if on(Slot::ExternalRepos) {
            self.repo_edits(reads.value(READ_REPOS)?, &mut changes);
        }

        Ok(changes)
    }

    fn create_change(&self) -> Change {
        let mut call = CallDescriptor::new("createTag").arg(self.name.as_str());
        if !self.arches.is_empty() {
            call = call.kwarg("arches", arches_to_string(&self.arches));
        }
        if self.locked {
            call = call.kwarg("locked", true);
        }
        if self.maven_support {
            call = call.kwarg("maven_support", true);
        }
        if let Some(perm) = &self.permission {
            call = call.kwarg("perm", perm.as_str());
        }
        if !self.extras.is_empty() {
            call = call.kwarg("extra", Value::Object(self.extras.clone()));
        }
        Change::new(
            ChangeOp::CreateObject,
            call,
            format!("create tag {}", self.name),
        )
    }

    /// One change carrying the full desired ruleset.
    fn inheritance_change(&self) -> Change {
        let rules: Vec<Value> = self
            .inherit
            .iter()
            .map(|l| json!({"name": l.parent, "priority": l.priority}))
            .collect();
        Change::new(
            ChangeOp::SetInheritance,
            CallDescriptor::new("setInheritanceData")
                .arg(self.name.as_str())
                .arg(Value::Array(rules)),
            format!(
                "set inheritance of {} ({} parents)",
                self.name,
                self.inherit.len()
            ),
        )
    }

    fn add_repo_change(&self, link: &RepoLink) -> Change {
        Change::new(
            ChangeOp::AddExternalRepo,
            CallDescriptor::new("addExternalRepoToTag")
                .arg(self.name.as_str())
                .arg(link.repo.as_str())
                .arg(link.priority),
            format!(
                "attach repo {} to {} at priority {}",
                link.repo, self.name, link.priority
            ),
        )
    }

    fn field_edits(&self, info: &Value, changes: &mut Vec<Change>) {
        let mut edit = |field: &str, value: Value, description: String| {
            changes.push(Change::new(
                ChangeOp::SetField,
                CallDescriptor::new("editTag")
                    .arg(self.name.as_str())
                    .kwarg(field, value),
                description,
            ));
        };

        if info["locked"].as_bool().unwrap_or(false) != self.locked {
            edit(
                "locked",
                json!(self.locked),
                format!("set locked = {} on {}", self.locked, self.name),
            );
        }
        if info["maven_support"].as_bool().unwrap_or(false) != self.maven_support {
            edit(
                "maven_support",
                json!(self.maven_support),
                format!("set maven-support = {} on {}", self.maven_support, self.name),
            );
        }

        let observed_perm = info["perm"].as_str();
        if observed_perm != self.permission.as_deref() {
            edit(
                "perm",
                self.permission.as_deref().map(Value::from).unwrap_or(Value::Null),
                format!(
                    "set permission = {} on {}",
                    self.permission.as_deref().unwrap_or("none"),
                    self.name
                ),
            );
        }

        let observed_arches = arches_from_observed(&info["arches"]);
        if !arches_equal(&self.arches, &observed_arches) {
            edit(
                "arches",
                json!(arches_to_string(&self.arches)),
                format!("set arches = [{}] on {}", self.arches.join(", "), self.name),
            );
        }

        let observed_extras = info["extra"].as_object().cloned().unwrap_or_default();
        if observed_extras != self.extras {
            edit(
                "extra",
                Value::Object(self.extras.clone()),
                format!("set extras on {} ({} entries)", self.name, self.extras.len()),
            );
        }
    }

    /// Package groups are additive: missing groups and missing packages are
    /// added, observed extras are left alone.
    fn group_additions(&self, observed: &Value, changes: &mut Vec<Change>) {
        let empty = Vec::new();
        let observed_groups = observed.as_array().unwrap_or(&empty);
        for (group, packages) in &self.groups {
            let observed_entry = observed_groups
                .iter()
                .find(|g| g["name"].as_str() == Some(group.as_str()));
            if observed_entry.is_none() {
                changes.push(Change::new(
                    ChangeOp::AddGroup,
                    CallDescriptor::new("groupListAdd")
                        .arg(self.name.as_str())
                        .arg(group.as_str()),
                    format!("add package group {} to {}", group, self.name),
                ));
            }
            let observed_packages: Vec<String> = observed_entry
                .map(|g| {
                    g["packagelist"]
                        .as_array()
                        .map(|items| {
                            items
                                .iter()
                                .filter_map(|p| p["package"].as_str().map(String::from))
                                .collect()
                        })
                        .unwrap_or_default()
                })
                .unwrap_or_default();
            for package in packages {
                if !observed_packages.contains(package) {
                    changes.push(Change::new(
                        ChangeOp::AddGroupPackage,
                        CallDescriptor::new("groupPackageListAdd")
                            .arg(self.name.as_str())
                            .arg(group.as_str())
                            .arg(package.as_str()),
                        format!("add {} to group {} of {}", package, group, self.name),
                    ));
                }
            }
        }
    }

    /// External-repo links are full state: attach, reprioritize, detach.
    fn repo_edits(&self, observed: &Value, changes: &mut Vec<Change>) {
        let empty = Vec::new();
        let observed_links = observed.as_array().unwrap_or(&empty);
        let observed_of = |repo: &str| {
            observed_links
                .iter()
                .find(|l| l["external_repo_name"].as_str() == Some(repo))
        };

        for link in &self.external_repos {
            match observed_of(&link.repo) {
                None => changes.push(self.add_repo_change(link)),
                Some(entry) => {
                    if entry["priority"].as_i64() != Some(link.priority) {
                        changes.push(Change::new(
                            ChangeOp::EditExternalRepo,
                            CallDescriptor::new("editTagExternalRepo")
                                .arg(self.name.as_str())
                                .arg(link.repo.as_str())
                                .arg(link.priority),
                            format!(
                                "move repo {} on {} to priority {}",
                                link.repo, self.name, link.priority
                            ),
                        ));
                    }
                }
            }
        }

        for entry in observed_links {
            let Some(repo) = entry["external_repo_name"].as_str() else {
                continue;
            };
            if !self.external_repos.iter().any(|l| l.repo == repo) {
                changes.push(Change::new(
                    ChangeOp::RemoveExternalRepo,
                    CallDescriptor::new("removeExternalRepoFromTag")
                        .arg(self.name.as_str())
                        .arg(repo),
                    format!("detach repo {} from {}", repo, self.name),
                ));
            }
        }
    }

    pub fn to_document(&self, include_defaults: bool) -> Document {
        let mut fields: Vec<(&str, Value)> = Vec::new();
        if include_defaults || !self.inherit.is_empty() {
            fields.push((
                "inherit",
                Value::Array(
                    self.inherit
                        .iter()
                        .map(|l| json!({"parent": l.parent, "priority": l.priority}))
                        .collect(),
                ),
            ));
        }
        if include_defaults || !self.external_repos.is_empty() {
            fields.push((
                "external-repos",
                Value::Array(
                    self.external_repos
                        .iter()
                        .map(|l| json!({"repo": l.repo, "priority": l.priority}))
                        .collect(),
                ),
            ));
        }
        if include_defaults || !self.extras.is_empty() {
            fields.push(("extras", Value::Object(self.extras.clone())));
        }
        if include_defaults || !self.groups.is_empty() {
            let mut groups = Map::new();
            for (group, packages) in &self.groups {
                groups.insert(group.clone(), json!(packages));
            }
            fields.push(("groups", Value::Object(groups)));
        }
        if include_defaults || !self.arches.is_empty() {
            fields.push(("arches", json!(self.arches)));
        }
        if include_defaults || self.locked {
            fields.push(("locked", json!(self.locked)));
        }
        if include_defaults || self.maven_support {
            fields.push(("maven-support", json!(self.maven_support)));
        }
        if include_defaults || self.permission.is_some() {
            fields.push((
                "permission",
                self.permission.as_deref().map(Value::from).unwrap_or(Value::Null),
            ));
        }
        render_document(KIND, &self.name, self.origin.clone(), fields)
    }

    /// Render observed hub state as a document, for `dump`.
    pub fn observed_document(
        name: &str,
        reads: &ReadSet,
        include_defaults: bool,
    ) -> Result<Option<Document>> {
        let info = reads.value(READ_INFO)?;
        if info.is_null() {
            return Ok(None);
        }

        let inherit: Vec<InheritLink> = observed_inheritance(reads.value(READ_INHERITANCE)?)
            .into_iter()
            .map(|(parent, priority)| InheritLink { parent, priority })
            .collect();

        let empty = Vec::new();
        let external_repos: Vec<RepoLink> = reads
            .value(READ_REPOS)?
            .as_array()
            .unwrap_or(&empty)
            .iter()
            .filter_map(|l| {
                Some(RepoLink {
                    repo: l["external_repo_name"].as_str()?.to_string(),
                    priority: l["priority"].as_i64().unwrap_or(0),
                })
            })
            .collect();

        let mut groups = IndexMap::new();
        for entry in reads.value(READ_GROUPS)?.as_array().unwrap_or(&empty) {
            let Some(group) = entry["name"].as_str() else {
                continue;
            };
            let packages: Vec<String> = entry["packagelist"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|p| p["package"].as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            groups.insert(group.to_string(), packages);
        }

        let tag = Tag {
            name: name.to_string(),
            origin: Origin::synthetic("remote"),
            inherit,
            external_repos,
            extras: info["extra"].as_object().cloned().unwrap_or_default(),
            groups,
            arches: arches_from_observed(&info["arches"]),
            locked: info["locked"].as_bool().unwrap_or(false),
            maven_support: info["maven_support"].as_bool().unwrap_or(false),
            permission: info["perm"].as_str().map(String::from),
            suppressed: Vec::new(),
        };
        Ok(Some(tag.to_document(include_defaults)))
    }
}

fn observed_inheritance(value: &Value) -> Vec<(String, i64)> {
    let empty = Vec::new();
    sorted_links(value.as_array().unwrap_or(&empty).iter().filter_map(|r| {
        Some((
            r["name"].as_str()?.to_string(),
            r["priority"].as_i64().unwrap_or(0),
        ))
    }))
}

fn sorted_links(links: impl Iterator<Item = (String, i64)>) -> Vec<(String, i64)> {
    let mut links: Vec<(String, i64)> = links.collect();
    links.sort_by_key(|(_, priority)| *priority);
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_documents;
    use crate::kinds::testutil::read_set;
    use forgesync_core::Fault;
    use std::path::Path;

    fn tag_from(yaml: &str) -> Tag {
        let docs = parse_documents(yaml, Path::new("tags.yaml")).unwrap();
        match build(&docs[0]).unwrap() {
            HubObject::Tag(tag) => tag,
            other => panic!("expected tag, got {:?}", other),
        }
    }

    #[test]
    fn priorities_default_by_declaration_order() {
        let tag = tag_from(
            "type: tag\nname: child\ninherit:\n  - parent: base\n  - parent: extras\n",
        );
        assert_eq!(tag.inherit[0].priority, 10);
        assert_eq!(tag.inherit[1].priority, 20);
    }

    #[test]
    fn duplicate_priorities_are_rejected() {
        let docs = parse_documents(
            "type: tag\nname: child\ninherit:\n  - {parent: a, priority: 5}\n  - {parent: b, priority: 5}\n",
            Path::new("tags.yaml"),
        )
        .unwrap();
        let err = build(&docs[0]).unwrap_err();
        assert!(err.to_string().contains("duplicate priority"));
    }

    #[test]
    fn unknown_fields_are_validation_errors() {
        let docs = parse_documents(
            "type: tag\nname: a\narchs: [x86_64]\n",
            Path::new("tags.yaml"),
        )
        .unwrap();
        assert!(build(&docs[0]).is_err());
    }

    #[test]
    fn missing_tag_diffs_to_create_and_inheritance() {
        let tag = tag_from(
            "type: tag\nname: child\narches: [x86_64]\ninherit:\n  - parent: base\n",
        );
        let reads = read_set(
            &tag.key(),
            vec![Ok(Value::Null), Ok(json!([])), Ok(json!([])), Ok(json!([]))],
        );
        let changes = tag.diff_inner(&reads, None, true).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].op, ChangeOp::CreateObject);
        assert_eq!(changes[0].call.kwargs["arches"], json!("x86_64"));
        assert_eq!(changes[1].op, ChangeOp::SetInheritance);
    }

    #[test]
    fn matching_tag_diffs_to_nothing() {
        let tag = tag_from(
            "type: tag\nname: child\narches: [x86_64]\nlocked: true\ninherit:\n  - parent: base\n",
        );
        let reads = read_set(
            &tag.key(),
            vec![
                Ok(json!({
                    "name": "child", "arches": "x86_64", "locked": true,
                    "maven_support": false, "perm": null, "extra": {},
                })),
                Ok(json!([{"name": "base", "priority": 10}])),
                Ok(json!([])),
                Ok(json!([])),
            ],
        );
        assert!(tag.diff_inner(&reads, None, true).unwrap().is_empty());
    }

    #[test]
    fn repo_links_reconcile_as_full_state() {
        let tag = tag_from(
            "type: tag\nname: a\nexternal-repos:\n  - {repo: keep, priority: 10}\n  - {repo: new, priority: 20}\n",
        );
        let reads = read_set(
            &tag.key(),
            vec![
                Ok(json!({"name": "a", "arches": "", "locked": false, "maven_support": false, "perm": null, "extra": {}})),
                Ok(json!([])),
                Ok(json!([
                    {"external_repo_name": "keep", "priority": 5},
                    {"external_repo_name": "stale", "priority": 30},
                ])),
                Ok(json!([])),
            ],
        );
        let changes = tag.diff_inner(&reads, None, true).unwrap();
        let ops: Vec<ChangeOp> = changes.iter().map(|c| c.op).collect();
        assert_eq!(
            ops,
            vec![
                ChangeOp::EditExternalRepo,
                ChangeOp::AddExternalRepo,
                ChangeOp::RemoveExternalRepo,
            ]
        );
    }

    #[test]
    fn deferred_slot_filter_limits_changes() {
        let tag = tag_from("type: tag\nname: a\ninherit:\n  - parent: b\n");
        let reads = read_set(
            &tag.key(),
            vec![
                Ok(json!({"name": "a", "arches": "", "locked": false, "maven_support": false, "perm": null, "extra": {}})),
                Ok(json!([])),
                Ok(json!([])),
                Ok(json!([])),
            ],
        );
        let changes = tag
            .diff_inner(&reads, Some(&[Slot::Inheritance]), false)
            .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].op, ChangeOp::SetInheritance);
    }

    #[test]
    fn faulted_primary_read_is_a_read_error() {
        let tag = tag_from("type: tag\nname: a\n");
        let reads = read_set(&tag.key(), vec![Err(Fault::new(1, "boom"))]);
        let err = tag.diff_inner(&reads, None, true).unwrap_err();
        assert!(matches!(err, Error::ChangeRead { .. }));
    }

    #[test]
    fn document_round_trip_elides_defaults() {
        let tag = tag_from("type: tag\nname: a\narches: [x86_64]\n");
        let doc = tag.to_document(false);
        assert_eq!(doc.doc_type, "tag");
        assert_eq!(doc.data["arches"], json!(["x86_64"]));
        assert!(!doc.data.contains_key("locked"));

        let full = tag.to_document(true);
        assert_eq!(full.data["locked"], json!(false));
    }
}
