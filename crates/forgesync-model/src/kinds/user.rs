//! Users: group memberships, permission grants, and an enabled flag.
//!
//! Users and groups are intentionally mutually referential at the
//! declaration level; the membership slot is deferrable so the solver can
//! order either side first.

use super::{additions, observed_names, removals, render_document, spec_from_doc};
use crate::change::{Change, ChangeOp};
use crate::object::{HubObject, ReadSet, Slot};
use crate::Document;
use forgesync_client::{CallDescriptor, Multicall, Promise};
use forgesync_core::{Key, Origin, Result};
use serde::Deserialize;
use serde_json::json;

pub const KIND: &str = "user";

#[derive(Clone, Debug)]
pub struct User {
    pub name: String,
    pub origin: Origin,
    pub groups: Vec<String>,
    pub permissions: Vec<String>,
    pub enabled: bool,
    pub exact_groups: bool,
    pub exact_permissions: bool,
    pub(crate) suppressed: Vec<Slot>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct UserSpec {
    name: String,
    #[serde(default)]
    groups: Vec<String>,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    exact_groups: bool,
    #[serde(default)]
    exact_permissions: bool,
}

fn default_true() -> bool {
    true
}

pub fn build(doc: &Document) -> Result<HubObject> {
    let spec: UserSpec = spec_from_doc(doc)?;
    Ok(HubObject::User(User {
        name: spec.name,
        origin: doc.origin.clone(),
        groups: spec.groups,
        permissions: spec.permissions,
        enabled: spec.enabled,
        exact_groups: spec.exact_groups,
        exact_permissions: spec.exact_permissions,
        suppressed: Vec::new(),
    }))
}

impl User {
    pub fn key(&self) -> Key {
        Key::new(KIND, &self.name)
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn dependency_keys(&self) -> Vec<(Key, Slot)> {
        let mut deps = Vec::new();
        if !self.suppressed.contains(&Slot::Groups) {
            for group in &self.groups {
                deps.push((Key::new(super::group::KIND, group), Slot::Groups));
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
            batch.call(CallDescriptor::new("getUserGroups").arg(self.name.as_str())),
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
                CallDescriptor::new("createUser").arg(self.name.as_str()),
                format!("create user {}", self.name),
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
                    format!("grant {} to {}", perm, self.name),
                ));
            }
            if self.exact_permissions {
                for perm in removals(&self.permissions, &observed) {
                    changes.push(Change::new(
                        ChangeOp::RevokePermissionGrant,
                        CallDescriptor::new("revokePermission")
                            .arg(self.name.as_str())
                            .arg(perm),
                        format!("revoke {} from {}", perm, self.name),
                    ));
                }
            }
        }

        if on(Slot::Groups) {
            let observed = if missing {
                Vec::new()
            } else {
                observed_names(reads.value(2)?)
            };
            for group in additions(&self.groups, &observed) {
                changes.push(Change::new(
                    ChangeOp::AddMember,
                    CallDescriptor::new("addGroupMember")
                        .arg(group)
                        .arg(self.name.as_str()),
                    format!("add {} to group {}", self.name, group),
                ));
            }
            if self.exact_groups {
                for group in removals(&self.groups, &observed) {
                    changes.push(Change::new(
                        ChangeOp::RemoveMember,
                        CallDescriptor::new("dropGroupMember")
                            .arg(group)
                            .arg(self.name.as_str()),
                        format!("drop {} from group {}", self.name, group),
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
            format!("set enabled = {} on {}", enabled, self.name),
        )
    }

    pub fn to_document(&self, include_defaults: bool) -> Document {
        let mut fields = Vec::new();
        if include_defaults || !self.groups.is_empty() {
            fields.push(("groups", json!(self.groups)));
        }
        if include_defaults || !self.permissions.is_empty() {
            fields.push(("permissions", json!(self.permissions)));
        }
        if include_defaults || !self.enabled {
            fields.push(("enabled", json!(self.enabled)));
        }
        if include_defaults || self.exact_groups {
            fields.push(("exact-groups", json!(self.exact_groups)));
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
        let user = User {
            name: name.to_string(),
            origin: Origin::synthetic("remote"),
            groups: observed_names(reads.value(2)?),
            permissions: observed_names(reads.value(1)?),
            enabled: info["status"].as_i64() == Some(0),
            exact_groups: false,
            exact_permissions: false,
            suppressed: Vec::new(),
        };
        Ok(Some(user.to_document(include_defaults)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_documents;
    use crate::kinds::testutil::read_set;
    use std::path::Path;

    fn user_from(yaml: &str) -> User {
        let docs = parse_documents(yaml, Path::new("users.yaml")).unwrap();
        match build(&docs[0]).unwrap() {
            HubObject::User(u) => u,
            other => panic!("expected user, got {:?}", other),
        }
    }

    #[test]
    fn fresh_user_gets_create_grants_and_memberships() {
        let user = user_from(
            "type: user\nname: alice\ngroups: [releng]\npermissions: [repo]\n",
        );
        let reads = read_set(
            &user.key(),
            vec![Ok(json!(null)), Ok(json!([])), Ok(json!([]))],
        );
        let changes = user.diff_inner(&reads, None, true).unwrap();
        let ops: Vec<ChangeOp> = changes.iter().map(|c| c.op).collect();
        assert_eq!(
            ops,
            vec![
                ChangeOp::CreateObject,
                ChangeOp::SetPermissionGrant,
                ChangeOp::AddMember,
            ]
        );
    }

    #[test]
    fn loose_permissions_never_revoke() {
        let user = user_from("type: user\nname: alice\npermissions: [repo]\n");
        let reads = read_set(
            &user.key(),
            vec![
                Ok(json!({"name": "alice", "status": 0, "usertype": 0})),
                Ok(json!(["repo", "admin"])),
                Ok(json!([])),
            ],
        );
        assert!(user.diff_inner(&reads, None, true).unwrap().is_empty());
    }

    #[test]
    fn exact_permissions_revoke_observed_extras() {
        let user = user_from(
            "type: user\nname: alice\npermissions: [repo]\nexact-permissions: true\n",
        );
        let reads = read_set(
            &user.key(),
            vec![
                Ok(json!({"name": "alice", "status": 0, "usertype": 0})),
                Ok(json!(["repo", "admin"])),
                Ok(json!([])),
            ],
        );
        let changes = user.diff_inner(&reads, None, true).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].op, ChangeOp::RevokePermissionGrant);
        assert_eq!(changes[0].call.args[1], json!("admin"));
    }

    #[test]
    fn disabled_user_gets_disable_edit() {
        let user = user_from("type: user\nname: bot\nenabled: false\n");
        let reads = read_set(
            &user.key(),
            vec![
                Ok(json!({"name": "bot", "status": 0, "usertype": 0})),
                Ok(json!([])),
                Ok(json!([])),
            ],
        );
        let changes = user.diff_inner(&reads, None, true).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].call.method, "disableUser");
    }
}
