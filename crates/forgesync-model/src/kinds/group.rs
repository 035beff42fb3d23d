//! Groups: member lists and permission grants. The hub stores groups in the
//! account table, so enable/disable and permission calls reuse the user
//! methods.

use super::{additions, observed_names, removals, render_document, spec_from_doc};
use crate::change::{Change, ChangeOp};
use crate::object::{HubObject, ReadSet, Slot};
use crate::Document;
use forgesync_client::{CallDescriptor, Multicall, Promise};
use forgesync_core::{Key, Origin, Result};
use serde::Deserialize;
use serde_json::json;

pub const KIND: &str = "group";

#[derive(Clone, Debug)]
pub struct Group {
    pub name: String,
    pub origin: Origin,
    pub members: Vec<String>,
    pub permissions: Vec<String>,
    pub enabled: bool,
    pub exact_members: bool,
    pub exact_permissions: bool,
    pub(crate) suppressed: Vec<Slot>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct GroupSpec {
    name: String,
    #[serde(default)]
    members: Vec<String>,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    exact_members: bool,
    #[serde(default)]
    exact_permissions: bool,
}

fn default_true() -> bool {
    true
}

pub fn build(doc: &Document) -> Result<HubObject> {
    let spec: GroupSpec = spec_from_doc(doc)?;
    Ok(HubObject::Group(Group {
        name: spec.name,
        origin: doc.origin.clone(),
        members: spec.members,
        permissions: spec.permissions,
        enabled: spec.enabled,
        exact_members: spec.exact_members,
        exact_permissions: spec.exact_permissions,
        suppressed: Vec::new(),
    }))
}

impl Group {
    pub fn key(&self) -> Key {
        Key::new(KIND, &self.name)
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn dependency_keys(&self) -> Vec<(Key, Slot)> {
        let mut deps = Vec::new();
        if !self.suppressed.contains(&Slot::Members) {
            for member in &self.members {
                deps.push((Key::new(super::user::KIND, member), Slot::Members));
            }
        }
        for perm in &self.permissions {
            deps.push((Key::new(super::perm::KIND, perm), Slot::Permissions));
        }
        deps
    }

    pub fn enqueue_read(&self, batch: &mut Multicall) -> Vec<Promise> {
        vec![
            batch.call(CallDescriptor::new("getUser").arg(self.name.as_str())),
            batch.call(CallDescriptor::new("getUserPerms").arg(self.name.as_str())),
            batch.call(CallDescriptor::new("getGroupMembers").arg(self.name.as_str())),
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
        let info = reads.value(0)?;
        let missing = info.is_null();

        if missing && allow_create {
            changes.push(Change::new(
                ChangeOp::CreateObject,
                CallDescriptor::new("newGroup").arg(self.name.as_str()),
                format!("create group {}", self.name),
            ));
            if !self.enabled {
                changes.push(self.enable_change(false));
            }
        } else if !missing && allow_create {
            let observed_enabled = info["status"].as_i64() == Some(0);
            if observed_enabled != self.enabled {
                changes.push(self.enable_change(self.enabled));
            }
        }

        if on(Slot::Permissions) {
            let observed = if missing {
                Vec::new()
            } else {
                observed_names(reads.value(1)?)
            };
            for perm in additions(&self.permissions, &observed) {
                changes.push(Change::new(
                    ChangeOp::SetPermissionGrant,
                    CallDescriptor::new("grantPermission")
                        .arg(self.name.as_str())
                        .arg(perm),
                    format!("grant {} to group {}", perm, self.name),
                ));
            }
            if self.exact_permissions {
                for perm in removals(&self.permissions, &observed) {
                    changes.push(Change::new(
                        ChangeOp::RevokePermissionGrant,
                        CallDescriptor::new("revokePermission")
                            .arg(self.name.as_str())
                            .arg(perm),
                        format!("revoke {} from group {}", perm, self.name),
                    ));
                }
            }
        }

        if on(Slot::Members) {
            let observed = if missing {
                Vec::new()
            } else {
                observed_names(reads.value(2)?)
            };
            for member in additions(&self.members, &observed) {
                changes.push(Change::new(
                    ChangeOp::AddMember,
                    CallDescriptor::new("addGroupMember")
                        .arg(self.name.as_str())
                        .arg(member),
                    format!("add {} to {}", member, self.name),
                ));
            }
            if self.exact_members {
                for member in removals(&self.members, &observed) {
                    changes.push(Change::new(
                        ChangeOp::RemoveMember,
                        CallDescriptor::new("dropGroupMember")
                            .arg(self.name.as_str())
                            .arg(member),
                        format!("remove {} from {}", member, self.name),
                    ));
                }
            }
        }

        Ok(changes)
    }

    fn enable_change(&self, enabled: bool) -> Change {
        let method = if enabled { "enableUser" } else { "disableUser" };
        Change::new(
            ChangeOp::SetField,
            CallDescriptor::new(method).arg(self.name.as_str()),
            format!("set enabled = {} on group {}", enabled, self.name),
        )
    }

    pub fn to_document(&self, include_defaults: bool) -> Document {
        let mut fields = Vec::new();
        if include_defaults || !self.members.is_empty() {
            fields.push(("members", json!(self.members)));
        }
        if include_defaults || !self.permissions.is_empty() {
            fields.push(("permissions", json!(self.permissions)));
        }
        if include_defaults || !self.enabled {
            fields.push(("enabled", json!(self.enabled)));
        }
        if include_defaults || self.exact_members {
            fields.push(("exact-members", json!(self.exact_members)));
        }
        if include_defaults || self.exact_permissions {
            fields.push(("exact-permissions", json!(self.exact_permissions)));
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
        let group = Group {
            name: name.to_string(),
            origin: Origin::synthetic("remote"),
            members: observed_names(reads.value(2)?),
            permissions: observed_names(reads.value(1)?),
            enabled: info["status"].as_i64() == Some(0),
            exact_members: false,
            exact_permissions: false,
            suppressed: Vec::new(),
        };
        Ok(Some(group.to_document(include_defaults)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_documents;
    use crate::kinds::testutil::read_set;
    use std::path::Path;

    fn group_from(yaml: &str) -> Group {
        let docs = parse_documents(yaml, Path::new("groups.yaml")).unwrap();
        match build(&docs[0]).unwrap() {
            HubObject::Group(g) => g,
            other => panic!("expected group, got {:?}", other),
        }
    }

    // desired {u1, u2} exact, observed {u2, u3}
    #[test]
    fn exact_members_add_and_remove() {
        let group = group_from(
            "type: group\nname: g\nmembers: [u1, u2]\nexact-members: true\n",
        );
        let reads = read_set(
            &group.key(),
            vec![
                Ok(json!({"name": "g", "status": 0, "usertype": 2})),
                Ok(json!([])),
                Ok(json!([{"name": "u2"}, {"name": "u3"}])),
            ],
        );
        let changes = group.diff_inner(&reads, None, true).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].op, ChangeOp::AddMember);
        assert_eq!(changes[0].call.args[1], json!("u1"));
        assert_eq!(changes[1].op, ChangeOp::RemoveMember);
        assert_eq!(changes[1].call.args[1], json!("u3"));
    }

    #[test]
    fn loose_members_only_add() {
        let group = group_from("type: group\nname: g\nmembers: [u1, u2]\n");
        let reads = read_set(
            &group.key(),
            vec![
                Ok(json!({"name": "g", "status": 0, "usertype": 2})),
                Ok(json!([])),
                Ok(json!([{"name": "u2"}, {"name": "u3"}])),
            ],
        );
        let changes = group.diff_inner(&reads, None, true).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].op, ChangeOp::AddMember);
    }

    #[test]
    fn members_only_filter_skips_creation() {
        let group = group_from("type: group\nname: g\nmembers: [u1]\n");
        let reads = read_set(
            &group.key(),
            vec![Ok(json!(null)), Ok(json!([])), Ok(json!([]))],
        );
        let changes = group
            .diff_inner(&reads, Some(&[Slot::Members]), false)
            .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].op, ChangeOp::AddMember);
    }
}
