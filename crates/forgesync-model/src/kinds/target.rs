//! Build targets: a build tag plus a destination tag, which defaults to the
//! target's own name.

use super::{render_document, spec_from_doc};
use crate::change::{Change, ChangeOp};
use crate::object::{HubObject, ReadSet, Slot};
use crate::Document;
use forgesync_client::{CallDescriptor, Multicall, Promise};
use forgesync_core::{Key, Origin, Result};
use serde::Deserialize;
use serde_json::json;

pub const KIND: &str = "target";

#[derive(Clone, Debug)]
pub struct Target {
    pub name: String,
    pub origin: Origin,
    pub build_tag: String,
    pub dest_tag: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct TargetSpec {
    name: String,
    build_tag: String,
    #[serde(default)]
    dest_tag: Option<String>,
}

pub fn build(doc: &Document) -> Result<HubObject> {
    let spec: TargetSpec = spec_from_doc(doc)?;
    Ok(HubObject::Target(Target {
        name: spec.name,
        origin: doc.origin.clone(),
        build_tag: spec.build_tag,
        dest_tag: spec.dest_tag,
    }))
}

impl Target {
    pub fn key(&self) -> Key {
        Key::new(KIND, &self.name)
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// The destination tag actually used on the hub.
    pub fn effective_dest_tag(&self) -> &str {
        self.dest_tag.as_deref().unwrap_or(&self.name)
    }

    pub fn dependency_keys(&self) -> Vec<(Key, Slot)> {
        vec![
            (Key::new(super::tag::KIND, &self.build_tag), Slot::BuildTag),
            (
                Key::new(super::tag::KIND, self.effective_dest_tag()),
                Slot::DestTag,
            ),
        ]
    }

    pub fn enqueue_read(&self, batch: &mut Multicall) -> Vec<Promise> {
        vec![batch.call(CallDescriptor::new("getBuildTarget").arg(self.name.as_str()))]
    }

    pub fn diff_inner(
        &self,
        reads: &ReadSet,
        _only: Option<&[Slot]>,
        allow_create: bool,
    ) -> Result<Vec<Change>> {
        let mut changes = Vec::new();
        let info = reads.value(0)?;

        if info.is_null() {
            if allow_create {
                changes.push(Change::new(
                    ChangeOp::CreateObject,
                    CallDescriptor::new("createBuildTarget")
                        .arg(self.name.as_str())
                        .arg(self.build_tag.as_str())
                        .arg(self.effective_dest_tag()),
                    format!("create target {}", self.name),
                ));
            }
            return Ok(changes);
        }

        if info["build_tag_name"].as_str() != Some(self.build_tag.as_str()) {
            changes.push(Change::new(
                ChangeOp::SetField,
                CallDescriptor::new("editBuildTarget")
                    .arg(self.name.as_str())
                    .kwarg("build_tag", self.build_tag.as_str()),
                format!("set build tag = {} on {}", self.build_tag, self.name),
            ));
        }
        if info["dest_tag_name"].as_str() != Some(self.effective_dest_tag()) {
            changes.push(Change::new(
                ChangeOp::SetField,
                CallDescriptor::new("editBuildTarget")
                    .arg(self.name.as_str())
                    .kwarg("dest_tag", self.effective_dest_tag()),
                format!(
                    "set dest tag = {} on {}",
                    self.effective_dest_tag(),
                    self.name
                ),
            ));
        }
        Ok(changes)
    }

    pub fn to_document(&self, include_defaults: bool) -> Document {
        let mut fields = vec![("build-tag", json!(self.build_tag))];
        // dest-tag equal to the target name is the default and elides
        if include_defaults || self.dest_tag.as_deref().is_some_and(|d| d != self.name) {
            fields.push(("dest-tag", json!(self.effective_dest_tag())));
        }
        render_document(KIND, &self.name, self.origin.clone(), fields)
    }

    pub fn observed_document(
        name: &str,
        reads: &ReadSet,
        include_defaults: bool,
    ) -> Result<Option<Document>> {
        let info = reads.value(0)?;
        if info.is_null() {
            return Ok(None);
        }
        let target = Target {
            name: name.to_string(),
            origin: Origin::synthetic("remote"),
            build_tag: info["build_tag_name"].as_str().unwrap_or_default().to_string(),
            dest_tag: info["dest_tag_name"].as_str().map(String::from),
        };
        Ok(Some(target.to_document(include_defaults)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_documents;
    use crate::kinds::testutil::read_set;
    use std::path::Path;

    fn target_from(yaml: &str) -> Target {
        let docs = parse_documents(yaml, Path::new("targets.yaml")).unwrap();
        match build(&docs[0]).unwrap() {
            HubObject::Target(t) => t,
            other => panic!("expected target, got {:?}", other),
        }
    }

    #[test]
    fn dest_tag_defaults_to_own_name() {
        let target = target_from("type: target\nname: f42\nbuild-tag: f42-build\n");
        assert_eq!(target.effective_dest_tag(), "f42");
        let deps = target.dependency_keys();
        assert_eq!(deps[0].0, Key::new("tag", "f42-build"));
        assert_eq!(deps[1].0, Key::new("tag", "f42"));
    }

    #[test]
    fn missing_build_tag_is_a_validation_error() {
        let docs =
            parse_documents("type: target\nname: f42\n", Path::new("targets.yaml")).unwrap();
        assert!(build(&docs[0]).is_err());
    }

    #[test]
    fn drifted_target_gets_field_edits() {
        let target = target_from("type: target\nname: f42\nbuild-tag: f42-build\n");
        let reads = read_set(
            &target.key(),
            vec![Ok(json!({
                "name": "f42",
                "build_tag_name": "f41-build",
                "dest_tag_name": "f42",
            }))],
        );
        let changes = target.diff_inner(&reads, None, true).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].op, ChangeOp::SetField);
        assert_eq!(changes[0].call.kwargs["build_tag"], json!("f42-build"));
    }
}
