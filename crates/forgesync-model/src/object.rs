//! The entity contract and the sum type over object kinds.
//!
//! Every kind provides the same surface: identity, dependency edges with
//! slot ids, read probes, a diff against observed state, and document
//! rendering. The solver additionally uses `can_defer`/`split` to break
//! cycles by shaving deferrable slots off into shadow objects.

use crate::change::Change;
use crate::deferred::DeferredUpdate;
use crate::kinds::channel::Channel;
use crate::kinds::group::Group;
use crate::kinds::host::Host;
use crate::kinds::misc::{ArchiveType, BuildType, ContentGenerator};
use crate::kinds::perm::Permission;
use crate::kinds::repo::ExternalRepo;
use crate::kinds::tag::Tag;
use crate::kinds::target::Target;
use crate::kinds::user::User;
use crate::Document;
use forgesync_client::{CallDescriptor, Multicall, Promise};
use forgesync_core::{Error, Key, Origin, Result};
use serde::Serialize;
use serde_json::Value;

/// Identifies one dependency-carrying collection of a kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Slot {
    /// Shadow → primary ordering edge.
    Primary,
    Inheritance,
    ExternalRepos,
    Permission,
    BuildTag,
    DestTag,
    /// user → group membership
    Groups,
    Permissions,
    /// group → user membership
    Members,
    Channels,
    Hosts,
    Users,
}

/// Resolved read results for one entity, aligned with the order its
/// `enqueue_read` submitted probes. A faulted probe surfaces as
/// `Error::ChangeRead` carrying the original descriptor's method.
pub struct ReadSet<'a> {
    key: Key,
    promises: &'a [Promise],
}

impl<'a> ReadSet<'a> {
    pub fn new(key: Key, promises: &'a [Promise]) -> Self {
        Self { key, promises }
    }

    pub fn value(&self, idx: usize) -> Result<&'a Value> {
        let promise = self.promises.get(idx).ok_or_else(|| {
            Error::transport(format!("{}: read probe {} was never enqueued", self.key, idx))
        })?;
        promise.value().map_err(|fault| Error::ChangeRead {
            key: self.key.clone(),
            method: promise.method().to_string(),
            fault,
        })
    }
}

/// A declared object of any kind, or a deferred-update shadow.
#[derive(Clone, Debug)]
pub enum HubObject {
    Tag(Tag),
    Target(Target),
    ExternalRepo(ExternalRepo),
    User(User),
    Group(Group),
    Host(Host),
    Channel(Channel),
    Permission(Permission),
    BuildType(BuildType),
    ContentGenerator(ContentGenerator),
    ArchiveType(ArchiveType),
    Deferred(DeferredUpdate),
}

macro_rules! dispatch {
    ($self:expr, $obj:ident => $body:expr) => {
        match $self {
            HubObject::Tag($obj) => $body,
            HubObject::Target($obj) => $body,
            HubObject::ExternalRepo($obj) => $body,
            HubObject::User($obj) => $body,
            HubObject::Group($obj) => $body,
            HubObject::Host($obj) => $body,
            HubObject::Channel($obj) => $body,
            HubObject::Permission($obj) => $body,
            HubObject::BuildType($obj) => $body,
            HubObject::ContentGenerator($obj) => $body,
            HubObject::ArchiveType($obj) => $body,
            HubObject::Deferred($obj) => $body,
        }
    };
}

impl HubObject {
    pub fn key(&self) -> Key {
        dispatch!(self, o => o.key())
    }

    pub fn origin(&self) -> &Origin {
        dispatch!(self, o => o.origin())
    }

    /// Outgoing dependency edges: the targets that must exist before this
    /// object can be written, each labelled with the slot that needs it.
    pub fn dependency_keys(&self) -> Vec<(Key, Slot)> {
        dispatch!(self, o => o.dependency_keys())
    }

    /// Slots this object is willing to give up to break a cycle.
    pub fn deferrable_slots(&self) -> &'static [Slot] {
        match self {
            HubObject::Tag(_) => &[Slot::Inheritance, Slot::ExternalRepos],
            HubObject::User(_) => &[Slot::Groups],
            HubObject::Group(_) => &[Slot::Members],
            HubObject::Host(_) => &[Slot::Channels],
            HubObject::Channel(_) => &[Slot::Hosts],
            _ => &[],
        }
    }

    pub fn can_defer(&self, slot: Slot) -> bool {
        self.deferrable_slots().contains(&slot)
    }

    /// Split off the given slots: the primary copy drops them (and their
    /// edges), the shadow carries only them and is scheduled later. Slots
    /// this kind cannot defer are ignored; if none remain, no shadow is
    /// produced.
    pub fn split(&self, drop_slots: &[Slot]) -> (HubObject, Option<HubObject>) {
        let mut slots: Vec<Slot> = drop_slots
            .iter()
            .copied()
            .filter(|s| self.can_defer(*s))
            .collect();
        slots.sort();
        slots.dedup();
        if slots.is_empty() {
            return (self.clone(), None);
        }

        let mut primary = self.clone();
        primary.suppress(&slots);
        let shadow = DeferredUpdate::new(self.clone(), slots);
        (primary, Some(HubObject::Deferred(shadow)))
    }

    fn suppress(&mut self, slots: &[Slot]) {
        match self {
            HubObject::Tag(o) => o.suppressed.extend_from_slice(slots),
            HubObject::User(o) => o.suppressed.extend_from_slice(slots),
            HubObject::Group(o) => o.suppressed.extend_from_slice(slots),
            HubObject::Host(o) => o.suppressed.extend_from_slice(slots),
            HubObject::Channel(o) => o.suppressed.extend_from_slice(slots),
            _ => {}
        }
    }

    /// Enqueue this object's read probes on the open batch. The returned
    /// promises line up with the indices `diff` reads.
    pub fn enqueue_read(&self, batch: &mut Multicall) -> Vec<Promise> {
        dispatch!(self, o => o.enqueue_read(batch))
    }

    /// Compute the changes needed to bring observed state to desired state.
    /// Shadows diff only their deferred slots.
    pub fn diff(&self, reads: &ReadSet) -> Result<Vec<Change>> {
        dispatch!(self, o => o.diff_inner(reads, None, true))
    }

    /// Render the desired state back out as a configuration document.
    pub fn to_document(&self, include_defaults: bool) -> Document {
        dispatch!(self, o => o.to_document(include_defaults))
    }
}

// Desired-independent reads, used by `dump`: probe a key's observed state
// and render it back as a configuration document.

/// Enqueue the read probes `dump_document` expects for this key, in order.
/// `None` means the kind is unknown.
pub fn dump_probes(key: &Key, batch: &mut Multicall) -> Option<Vec<Promise>> {
    let name = key.name.as_str();
    let methods: Vec<CallDescriptor> = match key.kind.as_str() {
        crate::kinds::tag::KIND => vec![
            CallDescriptor::new("getTag").arg(name),
            CallDescriptor::new("getInheritanceData").arg(name),
            CallDescriptor::new("getTagExternalRepos").arg(name),
            CallDescriptor::new("getTagGroups").arg(name),
        ],
        crate::kinds::target::KIND => vec![CallDescriptor::new("getBuildTarget").arg(name)],
        crate::kinds::repo::KIND => vec![CallDescriptor::new("getExternalRepo").arg(name)],
        crate::kinds::user::KIND => vec![
            CallDescriptor::new("getUser").arg(name),
            CallDescriptor::new("getUserPerms").arg(name),
            CallDescriptor::new("getUserGroups").arg(name),
        ],
        crate::kinds::group::KIND => vec![
            CallDescriptor::new("getUser").arg(name),
            CallDescriptor::new("getUserPerms").arg(name),
            CallDescriptor::new("getGroupMembers").arg(name),
        ],
        crate::kinds::host::KIND => vec![
            CallDescriptor::new("getHost").arg(name),
            CallDescriptor::new("listHostChannels").arg(name),
        ],
        crate::kinds::channel::KIND => vec![
            CallDescriptor::new("getChannel").arg(name),
            CallDescriptor::new("listChannelHosts").arg(name),
        ],
        crate::kinds::perm::KIND => vec![CallDescriptor::new("getAllPerms")],
        crate::kinds::misc::BUILD_TYPE_KIND => vec![CallDescriptor::new("listBTypes")],
        crate::kinds::misc::CONTENT_GENERATOR_KIND => vec![CallDescriptor::new("listCGs")],
        crate::kinds::misc::ARCHIVE_TYPE_KIND => vec![CallDescriptor::new("getArchiveTypes")],
        _ => return None,
    };
    Some(methods.into_iter().map(|m| batch.call(m)).collect())
}

/// Render the observed state for a key as a document, with the same default
/// elision as desired-state rendering. `Ok(None)` means the object does not
/// exist remotely.
pub fn dump_document(
    key: &Key,
    reads: &ReadSet,
    include_defaults: bool,
) -> Result<Option<Document>> {
    let name = key.name.as_str();
    match key.kind.as_str() {
        crate::kinds::tag::KIND => Tag::observed_document(name, reads, include_defaults),
        crate::kinds::target::KIND => Target::observed_document(name, reads, include_defaults),
        crate::kinds::repo::KIND => ExternalRepo::observed_document(name, reads, include_defaults),
        crate::kinds::user::KIND => User::observed_document(name, reads, include_defaults),
        crate::kinds::group::KIND => Group::observed_document(name, reads, include_defaults),
        crate::kinds::host::KIND => Host::observed_document(name, reads, include_defaults),
        crate::kinds::channel::KIND => Channel::observed_document(name, reads, include_defaults),
        crate::kinds::perm::KIND => Permission::observed_document(name, reads, include_defaults),
        crate::kinds::misc::BUILD_TYPE_KIND => {
            let exists = observed_exists(key, reads.value(0)?);
            Ok(exists.then(|| {
                crate::kinds::render_document(
                    crate::kinds::misc::BUILD_TYPE_KIND,
                    name,
                    Origin::synthetic("remote"),
                    Vec::new(),
                )
            }))
        }
        crate::kinds::misc::CONTENT_GENERATOR_KIND => {
            let all = reads.value(0)?;
            let Some(entry) = all.get(name) else {
                return Ok(None);
            };
            let users: Vec<String> = entry["users"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|u| u.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            Ok(Some(crate::kinds::render_document(
                crate::kinds::misc::CONTENT_GENERATOR_KIND,
                name,
                Origin::synthetic("remote"),
                vec![("users", serde_json::json!(users))],
            )))
        }
        crate::kinds::misc::ARCHIVE_TYPE_KIND => {
            let all = reads.value(0)?;
            let entry = all
                .as_array()
                .and_then(|items| items.iter().find(|t| t["name"].as_str() == Some(name)));
            let Some(entry) = entry else {
                return Ok(None);
            };
            let extensions: Vec<String> = entry["extensions"]
                .as_str()
                .map(|s| s.split_whitespace().map(String::from).collect())
                .unwrap_or_default();
            let mut fields = vec![("extensions", serde_json::json!(extensions))];
            if let Some(desc) = entry["description"].as_str().filter(|d| !d.is_empty()) {
                fields.insert(0, ("description", serde_json::json!(desc)));
            }
            if let Some(compression) = entry["compression_type"].as_str() {
                fields.push(("compression", serde_json::json!(compression)));
            }
            Ok(Some(crate::kinds::render_document(
                crate::kinds::misc::ARCHIVE_TYPE_KIND,
                name,
                Origin::synthetic("remote"),
                fields,
            )))
        }
        other => Err(Error::Config(format!("cannot dump unknown kind `{}`", other))),
    }
}

// Per-kind existence probing, used when undeclared references are checked
// against the hub. Collection-valued kinds (permission, build-type, ...) are
// probed through their listing call and matched by name client-side.

/// The call that answers "does this key exist remotely", if the kind
/// supports probing.
pub fn existence_probe(key: &Key) -> Option<CallDescriptor> {
    let name = key.name.as_str();
    let call = match key.kind.as_str() {
        crate::kinds::tag::KIND => CallDescriptor::new("getTag").arg(name),
        crate::kinds::target::KIND => CallDescriptor::new("getBuildTarget").arg(name),
        crate::kinds::repo::KIND => CallDescriptor::new("getExternalRepo").arg(name),
        crate::kinds::user::KIND | crate::kinds::group::KIND => {
            CallDescriptor::new("getUser").arg(name)
        }
        crate::kinds::host::KIND => CallDescriptor::new("getHost").arg(name),
        crate::kinds::channel::KIND => CallDescriptor::new("getChannel").arg(name),
        crate::kinds::perm::KIND => CallDescriptor::new("getAllPerms"),
        crate::kinds::misc::BUILD_TYPE_KIND => CallDescriptor::new("listBTypes"),
        crate::kinds::misc::CONTENT_GENERATOR_KIND => CallDescriptor::new("listCGs"),
        crate::kinds::misc::ARCHIVE_TYPE_KIND => CallDescriptor::new("getArchiveTypes"),
        _ => return None,
    };
    Some(call)
}

/// Interpret an existence probe's answer for the given key.
pub fn observed_exists(key: &Key, value: &Value) -> bool {
    match key.kind.as_str() {
        crate::kinds::perm::KIND | crate::kinds::misc::BUILD_TYPE_KIND => value
            .as_array()
            .is_some_and(|items| {
                items
                    .iter()
                    .any(|item| item["name"].as_str() == Some(key.name.as_str()))
            }),
        crate::kinds::misc::CONTENT_GENERATOR_KIND => value
            .as_object()
            .is_some_and(|map| map.contains_key(&key.name)),
        crate::kinds::misc::ARCHIVE_TYPE_KIND => value.as_array().is_some_and(|items| {
            items
                .iter()
                .any(|item| item["name"].as_str() == Some(key.name.as_str()))
        }),
        _ => !value.is_null(),
    }
}
