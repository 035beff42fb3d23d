//! Channels: the host-side view of the host↔channel pairing.

use super::{additions, observed_names, removals, render_document, spec_from_doc};
use crate::change::{Change, ChangeOp};
use crate::object::{HubObject, ReadSet, Slot};
use crate::Document;
use forgesync_client::{CallDescriptor, Multicall, Promise};
use forgesync_core::{Key, Origin, Result};
use serde::Deserialize;
use serde_json::json;

pub const KIND: &str = "channel";

#[derive(Clone, Debug)]
pub struct Channel {
    pub name: String,
    pub origin: Origin,
    pub hosts: Vec<String>,
    pub exact_hosts: bool,
    pub(crate) suppressed: Vec<Slot>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ChannelSpec {
    name: String,
    #[serde(default)]
    hosts: Vec<String>,
    #[serde(default)]
    exact_hosts: bool,
}

pub fn build(doc: &Document) -> Result<HubObject> {
    let spec: ChannelSpec = spec_from_doc(doc)?;
    Ok(HubObject::Channel(Channel {
        name: spec.name,
        origin: doc.origin.clone(),
        hosts: spec.hosts,
        exact_hosts: spec.exact_hosts,
        suppressed: Vec::new(),
    }))
}

impl Channel {
    pub fn key(&self) -> Key {
        Key::new(KIND, &self.name)
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn dependency_keys(&self) -> Vec<(Key, Slot)> {
        if self.suppressed.contains(&Slot::Hosts) {
            return Vec::new();
        }
        self.hosts
            .iter()
            .map(|h| (Key::new(super::host::KIND, h), Slot::Hosts))
            .collect()
    }

    pub fn enqueue_read(&self, batch: &mut Multicall) -> Vec<Promise> {
        vec![
            batch.call(CallDescriptor::new("getChannel").arg(self.name.as_str())),
            batch.call(CallDescriptor::new("listChannelHosts").arg(self.name.as_str())),
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
                CallDescriptor::new("createChannel").arg(self.name.as_str()),
                format!("create channel {}", self.name),
            ));
        }

        if on(Slot::Hosts) {
            let observed = if missing {
                Vec::new()
            } else {
                observed_names(reads.value(1)?)
            };
            for host in additions(&self.hosts, &observed) {
                changes.push(Change::new(
                    ChangeOp::AddHost,
                    CallDescriptor::new("addHostToChannel")
                        .arg(host)
                        .arg(self.name.as_str()),
                    format!("add {} to channel {}", host, self.name),
                ));
            }
            if self.exact_hosts {
                for host in removals(&self.hosts, &observed) {
                    changes.push(Change::new(
                        ChangeOp::RemoveHost,
                        CallDescriptor::new("removeHostFromChannel")
                            .arg(host)
                            .arg(self.name.as_str()),
                        format!("remove {} from channel {}", host, self.name),
                    ));
                }
            }
        }

        Ok(changes)
    }

    pub fn to_document(&self, include_defaults: bool) -> Document {
        let mut fields = Vec::new();
        if include_defaults || !self.hosts.is_empty() {
            fields.push(("hosts", json!(self.hosts)));
        }
        if include_defaults || self.exact_hosts {
            fields.push(("exact-hosts", json!(self.exact_hosts)));
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
        let channel = Channel {
            name: name.to_string(),
            origin: Origin::synthetic("remote"),
            hosts: observed_names(reads.value(1)?),
            exact_hosts: false,
            suppressed: Vec::new(),
        };
        Ok(Some(channel.to_document(include_defaults)))
    }
}
