//! The small administrative kinds: build types, content generators, and
//! archive types.

use super::{additions, removals, render_document, spec_from_doc};
use crate::change::{Change, ChangeOp};
use crate::object::{HubObject, ReadSet, Slot};
use crate::Document;
use forgesync_client::{CallDescriptor, Multicall, Promise};
use forgesync_core::{Key, Origin, Result};
use serde::Deserialize;
use serde_json::json;

pub const BUILD_TYPE_KIND: &str = "build-type";
pub const CONTENT_GENERATOR_KIND: &str = "content-generator";
pub const ARCHIVE_TYPE_KIND: &str = "archive-type";

// ---------------------------------------------------------------------------
// build-type
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct BuildType {
    pub name: String,
    pub origin: Origin,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct BuildTypeSpec {
    name: String,
}

pub fn build_build_type(doc: &Document) -> Result<HubObject> {
    let spec: BuildTypeSpec = spec_from_doc(doc)?;
    Ok(HubObject::BuildType(BuildType {
        name: spec.name,
        origin: doc.origin.clone(),
    }))
}

impl BuildType {
    pub fn key(&self) -> Key {
        Key::new(BUILD_TYPE_KIND, &self.name)
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn dependency_keys(&self) -> Vec<(Key, Slot)> {
        Vec::new()
    }

    pub fn enqueue_read(&self, batch: &mut Multicall) -> Vec<Promise> {
        vec![batch.call(CallDescriptor::new("listBTypes"))]
    }

    pub fn diff_inner(
        &self,
        reads: &ReadSet,
        _only: Option<&[Slot]>,
        allow_create: bool,
    ) -> Result<Vec<Change>> {
        let all = reads.value(0)?;
        let exists = all.as_array().is_some_and(|types| {
            types
                .iter()
                .any(|t| t["name"].as_str() == Some(self.name.as_str()))
        });
        if exists || !allow_create {
            return Ok(Vec::new());
        }
        Ok(vec![Change::new(
            ChangeOp::CreateObject,
            CallDescriptor::new("addBType").arg(self.name.as_str()),
            format!("create build type {}", self.name),
        )])
    }

    pub fn to_document(&self, _include_defaults: bool) -> Document {
        render_document(BUILD_TYPE_KIND, &self.name, self.origin.clone(), Vec::new())
    }
}

// ---------------------------------------------------------------------------
// content-generator
// ---------------------------------------------------------------------------

/// Content generators exist only through their access grants; with no users
/// declared and nothing observed there is nothing to write.
#[derive(Clone, Debug)]
pub struct ContentGenerator {
    pub name: String,
    pub origin: Origin,
    pub users: Vec<String>,
    pub exact_users: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ContentGeneratorSpec {
    name: String,
    #[serde(default)]
    users: Vec<String>,
    #[serde(default)]
    exact_users: bool,
}

pub fn build_content_generator(doc: &Document) -> Result<HubObject> {
    let spec: ContentGeneratorSpec = spec_from_doc(doc)?;
    Ok(HubObject::ContentGenerator(ContentGenerator {
        name: spec.name,
        origin: doc.origin.clone(),
        users: spec.users,
        exact_users: spec.exact_users,
    }))
}

impl ContentGenerator {
    pub fn key(&self) -> Key {
        Key::new(CONTENT_GENERATOR_KIND, &self.name)
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn dependency_keys(&self) -> Vec<(Key, Slot)> {
        self.users
            .iter()
            .map(|u| (Key::new(super::user::KIND, u), Slot::Users))
            .collect()
    }

    pub fn enqueue_read(&self, batch: &mut Multicall) -> Vec<Promise> {
        vec![batch.call(CallDescriptor::new("listCGs"))]
    }

    pub fn diff_inner(
        &self,
        reads: &ReadSet,
        _only: Option<&[Slot]>,
        _allow_create: bool,
    ) -> Result<Vec<Change>> {
        let all = reads.value(0)?;
        let observed: Vec<String> = all[&self.name]["users"]
            .as_array()
            .map(|users| {
                users
                    .iter()
                    .filter_map(|u| u.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let mut changes = Vec::new();
        for user in additions(&self.users, &observed) {
            changes.push(Change::new(
                ChangeOp::GrantAccess,
                CallDescriptor::new("grantCGAccess")
                    .arg(user)
                    .arg(self.name.as_str())
                    .kwarg("create", true),
                format!("grant {} access to {}", user, self.name),
            ));
        }
        if self.exact_users {
            for user in removals(&self.users, &observed) {
                changes.push(Change::new(
                    ChangeOp::RevokeAccess,
                    CallDescriptor::new("revokeCGAccess")
                        .arg(user)
                        .arg(self.name.as_str()),
                    format!("revoke {} access to {}", user, self.name),
                ));
            }
        }
        Ok(changes)
    }

    pub fn to_document(&self, include_defaults: bool) -> Document {
        let mut fields = Vec::new();
        if include_defaults || !self.users.is_empty() {
            fields.push(("users", json!(self.users)));
        }
        if include_defaults || self.exact_users {
            fields.push(("exact-users", json!(self.exact_users)));
        }
        render_document(CONTENT_GENERATOR_KIND, &self.name, self.origin.clone(), fields)
    }
}

// ---------------------------------------------------------------------------
// archive-type
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct ArchiveType {
    pub name: String,
    pub origin: Origin,
    pub description: Option<String>,
    /// Normalized: leading dots stripped, first occurrence wins.
    pub extensions: Vec<String>,
    pub compression: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ArchiveTypeSpec {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    extensions: Vec<String>,
    #[serde(default)]
    compression: Option<String>,
}

pub fn build_archive_type(doc: &Document) -> Result<HubObject> {
    let spec: ArchiveTypeSpec = spec_from_doc(doc)?;

    let mut extensions = Vec::new();
    for ext in spec.extensions {
        let ext = ext.trim_start_matches('.').to_string();
        if !ext.is_empty() && !extensions.contains(&ext) {
            extensions.push(ext);
        }
    }

    Ok(HubObject::ArchiveType(ArchiveType {
        name: spec.name,
        origin: doc.origin.clone(),
        description: spec.description,
        extensions,
        compression: spec.compression,
    }))
}

impl ArchiveType {
    pub fn key(&self) -> Key {
        Key::new(ARCHIVE_TYPE_KIND, &self.name)
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn dependency_keys(&self) -> Vec<(Key, Slot)> {
        Vec::new()
    }

    pub fn enqueue_read(&self, batch: &mut Multicall) -> Vec<Promise> {
        vec![batch.call(CallDescriptor::new("getArchiveTypes"))]
    }

    /// The hub has no edit call for archive types; an existing entry is
    /// left as-is.
    pub fn diff_inner(
        &self,
        reads: &ReadSet,
        _only: Option<&[Slot]>,
        allow_create: bool,
    ) -> Result<Vec<Change>> {
        let all = reads.value(0)?;
        let exists = all.as_array().is_some_and(|types| {
            types
                .iter()
                .any(|t| t["name"].as_str() == Some(self.name.as_str()))
        });
        if exists || !allow_create {
            return Ok(Vec::new());
        }

        let mut call = CallDescriptor::new("addArchiveType")
            .arg(self.name.as_str())
            .arg(self.description.as_deref().unwrap_or(""))
            .arg(self.extensions.join(" "));
        if let Some(compression) = &self.compression {
            call = call.kwarg("compression_type", compression.as_str());
        }
        Ok(vec![Change::new(
            ChangeOp::AddExtensionType,
            call,
            format!(
                "create archive type {} ({})",
                self.name,
                self.extensions.join(", ")
            ),
        )])
    }

    pub fn to_document(&self, include_defaults: bool) -> Document {
        let mut fields = Vec::new();
        if include_defaults || self.description.is_some() {
            fields.push((
                "description",
                self.description
                    .as_deref()
                    .map(serde_json::Value::from)
                    .unwrap_or(json!(null)),
            ));
        }
        if include_defaults || !self.extensions.is_empty() {
            fields.push(("extensions", json!(self.extensions)));
        }
        if include_defaults || self.compression.is_some() {
            fields.push((
                "compression",
                self.compression
                    .as_deref()
                    .map(serde_json::Value::from)
                    .unwrap_or(json!(null)),
            ));
        }
        render_document(ARCHIVE_TYPE_KIND, &self.name, self.origin.clone(), fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_documents;
    use crate::kinds::testutil::read_set;
    use std::path::Path;

    #[test]
    fn archive_extensions_strip_dots_and_dedup() {
        let docs = parse_documents(
            "type: archive-type\nname: jar\nextensions: ['.jar', 'jar', '.war']\n",
            Path::new("types.yaml"),
        )
        .unwrap();
        let HubObject::ArchiveType(at) = build_archive_type(&docs[0]).unwrap() else {
            panic!("expected archive type");
        };
        assert_eq!(at.extensions, vec!["jar", "war"]);
    }

    #[test]
    fn existing_archive_type_is_left_alone() {
        let at = ArchiveType {
            name: "jar".into(),
            origin: Origin::new("types.yaml", 1),
            description: None,
            extensions: vec!["jar".into()],
            compression: None,
        };
        let reads = read_set(&at.key(), vec![Ok(json!([{"name": "jar"}]))]);
        assert!(at.diff_inner(&reads, None, true).unwrap().is_empty());
    }

    #[test]
    fn cg_access_reconciles_per_user() {
        let cg = ContentGenerator {
            name: "osbuild".into(),
            origin: Origin::new("cgs.yaml", 1),
            users: vec!["worker".into()],
            exact_users: true,
        };
        let reads = read_set(
            &cg.key(),
            vec![Ok(json!({"osbuild": {"users": ["stale"]}}))],
        );
        let changes = cg.diff_inner(&reads, None, true).unwrap();
        let ops: Vec<ChangeOp> = changes.iter().map(|c| c.op).collect();
        assert_eq!(ops, vec![ChangeOp::GrantAccess, ChangeOp::RevokeAccess]);
    }
}
