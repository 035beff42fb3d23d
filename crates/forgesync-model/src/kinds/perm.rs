//! Permissions. The hub keeps a flat list; creation is the only write.

use super::{render_document, spec_from_doc};
use crate::change::{Change, ChangeOp};
use crate::object::{HubObject, ReadSet, Slot};
use crate::Document;
use forgesync_client::{CallDescriptor, Multicall, Promise};
use forgesync_core::{Key, Origin, Result};
use serde::Deserialize;

pub const KIND: &str = "permission";

#[derive(Clone, Debug)]
pub struct Permission {
    pub name: String,
    pub origin: Origin,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PermissionSpec {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

pub fn build(doc: &Document) -> Result<HubObject> {
    let spec: PermissionSpec = spec_from_doc(doc)?;
    Ok(HubObject::Permission(Permission {
        name: spec.name,
        origin: doc.origin.clone(),
        description: spec.description,
    }))
}

impl Permission {
    pub fn key(&self) -> Key {
        Key::new(KIND, &self.name)
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn dependency_keys(&self) -> Vec<(Key, Slot)> {
        Vec::new()
    }

    pub fn enqueue_read(&self, batch: &mut Multicall) -> Vec<Promise> {
        vec![batch.call(CallDescriptor::new("getAllPerms"))]
    }

    pub fn diff_inner(
        &self,
        reads: &ReadSet,
        _only: Option<&[Slot]>,
        allow_create: bool,
    ) -> Result<Vec<Change>> {
        let all = reads.value(0)?;
        let exists = all.as_array().is_some_and(|perms| {
            perms
                .iter()
                .any(|p| p["name"].as_str() == Some(self.name.as_str()))
        });
        if exists || !allow_create {
            return Ok(Vec::new());
        }
        Ok(vec![Change::new(
            ChangeOp::CreateObject,
            CallDescriptor::new("createPermission").arg(self.name.as_str()),
            format!("create permission {}", self.name),
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
                    .unwrap_or(serde_json::Value::Null),
            ));
        }
        render_document(KIND, &self.name, self.origin.clone(), fields)
    }

    pub fn observed_document(
        name: &str,
        reads: &ReadSet,
        include_defaults: bool,
    ) -> Result<Option<Document>> {
        let all = reads.value(0)?;
        let exists = all.as_array().is_some_and(|perms| {
            perms.iter().any(|p| p["name"].as_str() == Some(name))
        });
        if !exists {
            return Ok(None);
        }
        let perm = Permission {
            name: name.to_string(),
            origin: Origin::synthetic("remote"),
            description: None,
        };
        Ok(Some(perm.to_document(include_defaults)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::testutil::read_set;
    use serde_json::json;

    fn permission(name: &str) -> Permission {
        Permission {
            name: name.to_string(),
            origin: Origin::new("perms.yaml", 1),
            description: None,
        }
    }

    #[test]
    fn present_permission_is_a_no_op() {
        let perm = permission("admin");
        let reads = read_set(&perm.key(), vec![Ok(json!([{"name": "admin"}]))]);
        assert!(perm.diff_inner(&reads, None, true).unwrap().is_empty());
    }

    #[test]
    fn missing_permission_is_created() {
        let perm = permission("sign");
        let reads = read_set(&perm.key(), vec![Ok(json!([{"name": "admin"}]))]);
        let changes = perm.diff_inner(&reads, None, true).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].op, ChangeOp::CreateObject);
        assert_eq!(changes[0].call.method, "createPermission");
    }
}
