//! Typed write operations produced by diffing desired against observed.

use forgesync_client::CallDescriptor;
use serde::Serialize;
use std::fmt;

/// What a change does to the remote object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeOp {
    CreateObject,
    SetField,
    SetInheritance,
    AddExternalRepo,
    EditExternalRepo,
    RemoveExternalRepo,
    AddGroup,
    AddGroupPackage,
    AddMember,
    RemoveMember,
    SetPermissionGrant,
    RevokePermissionGrant,
    AddChannel,
    RemoveChannel,
    AddHost,
    RemoveHost,
    GrantAccess,
    RevokeAccess,
    AddExtensionType,
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CreateObject => "create-object",
            Self::SetField => "set-field",
            Self::SetInheritance => "set-inheritance",
            Self::AddExternalRepo => "add-external-repo",
            Self::EditExternalRepo => "edit-external-repo",
            Self::RemoveExternalRepo => "remove-external-repo",
            Self::AddGroup => "add-group",
            Self::AddGroupPackage => "add-group-package",
            Self::AddMember => "add-member",
            Self::RemoveMember => "remove-member",
            Self::SetPermissionGrant => "set-permission-grant",
            Self::RevokePermissionGrant => "revoke-permission-grant",
            Self::AddChannel => "add-channel",
            Self::RemoveChannel => "remove-channel",
            Self::AddHost => "add-host",
            Self::RemoveHost => "remove-host",
            Self::GrantAccess => "grant-access",
            Self::RevokeAccess => "revoke-access",
            Self::AddExtensionType => "add-extension-type",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle of one change. `Planned` is terminal in compare-only runs.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Planned,
    Applied,
    Failed(String),
}

/// One write operation: the op, the hub call that performs it, and a
/// human-readable description.
#[derive(Clone, Debug, Serialize)]
pub struct Change {
    pub op: ChangeOp,
    pub call: CallDescriptor,
    pub description: String,
    pub status: ChangeStatus,
}

impl Change {
    pub fn new(op: ChangeOp, call: CallDescriptor, description: impl Into<String>) -> Self {
        Self {
            op,
            call,
            description: description.into(),
            status: ChangeStatus::Planned,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, ChangeStatus::Failed(_))
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.op, self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_displays_op_and_description() {
        let change = Change::new(
            ChangeOp::AddMember,
            CallDescriptor::new("addGroupMember").arg("releng").arg("alice"),
            "add alice to releng",
        );
        assert_eq!(change.to_string(), "add-member: add alice to releng");
        assert_eq!(change.status, ChangeStatus::Planned);
        assert!(!change.is_failed());
    }
}
