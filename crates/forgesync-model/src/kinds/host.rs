//! Build hosts: arches, capacity, enabled flag, and channel memberships.

use super::{
    additions, arches_equal, arches_from_observed, arches_to_string, observed_names, removals,
    render_document, spec_from_doc,
};
use crate::change::{Change, ChangeOp};
use crate::object::{HubObject, ReadSet, Slot};
use crate::Document;
use forgesync_client::{CallDescriptor, Multicall, Promise};
use forgesync_core::{Key, Origin, Result};
use serde::Deserialize;
use serde_json::json;

pub const KIND: &str = "host";

#[derive(Clone, Debug)]
pub struct Host {
    pub name: String,
    pub origin: Origin,
    pub arches: Vec<String>,
    pub capacity: Option<f64>,
    pub enabled: bool,
    pub channels: Vec<String>,
    pub exact_channels: bool,
    pub(crate) suppressed: Vec<Slot>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct HostSpec {
    name: String,
    #[serde(default)]
    arches: Vec<String>,
    #[serde(default)]
    capacity: Option<f64>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    channels: Vec<String>,
    #[serde(default)]
    exact_channels: bool,
}

fn default_true() -> bool {
    true
}

pub fn build(doc: &Document) -> Result<HubObject> {
    let spec: HostSpec = spec_from_doc(doc)?;
    Ok(HubObject::Host(Host {
        name: spec.name,
        origin: doc.origin.clone(),
        arches: spec.arches,
        capacity: spec.capacity,
        enabled: spec.enabled,
        channels: spec.channels,
        exact_channels: spec.exact_channels,
        suppressed: Vec::new(),
    }))
}

impl Host {
    pub fn key(&self) -> Key {
        Key::new(KIND, &self.name)
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn dependency_keys(&self) -> Vec<(Key, Slot)> {
        if self.suppressed.contains(&Slot::Channels) {
            return Vec::new();
        }
        self.channels
            .iter()
            .map(|c| (Key::new(super::channel::KIND, c), Slot::Channels))
            .collect()
    }

    pub fn enqueue_read(&self, batch: &mut Multicall) -> Vec<Promise> {
        vec![
            batch.call(CallDescriptor::new("getHost").arg(self.name.as_str())),
            batch.call(CallDescriptor::new("listHostChannels").arg(self.name.as_str())),
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
                CallDescriptor::new("addHost")
                    .arg(self.name.as_str())
                    .arg(json!(self.arches)),
                format!("create host {}", self.name),
            ));
            if let Some(capacity) = self.capacity {
                changes.push(self.capacity_change(capacity));
            }
            if !self.enabled {
                changes.push(self.enable_change(false));
            }
        } else if !missing && allow_create {
            let observed_arches = arches_from_observed(&info["arches"]);
            if !arches_equal(&self.arches, &observed_arches) {
                changes.push(Change::new(
                    ChangeOp::SetField,
                    CallDescriptor::new("editHost")
                        .arg(self.name.as_str())
                        .kwarg("arches", arches_to_string(&self.arches)),
                    format!("set arches = [{}] on {}", self.arches.join(", "), self.name),
                ));
            }
            if let Some(capacity) = self.capacity {
                if info["capacity"].as_f64() != Some(capacity) {
                    changes.push(self.capacity_change(capacity));
                }
            }
            let observed_enabled = info["enabled"].as_bool().unwrap_or(false);
            if observed_enabled != self.enabled {
                changes.push(self.enable_change(self.enabled));
            }
        }

        if on(Slot::Channels) {
            let observed = if missing {
                Vec::new()
            } else {
                observed_names(reads.value(1)?)
            };
            for channel in additions(&self.channels, &observed) {
                changes.push(Change::new(
                    ChangeOp::AddChannel,
                    CallDescriptor::new("addHostToChannel")
                        .arg(self.name.as_str())
                        .arg(channel),
                    format!("add {} to channel {}", self.name, channel),
                ));
            }
            if self.exact_channels {
                for channel in removals(&self.channels, &observed) {
                    changes.push(Change::new(
                        ChangeOp::RemoveChannel,
                        CallDescriptor::new("removeHostFromChannel")
                            .arg(self.name.as_str())
                            .arg(channel),
                        format!("remove {} from channel {}", self.name, channel),
                    ));
                }
            }
        }

        Ok(changes)
    }

    fn capacity_change(&self, capacity: f64) -> Change {
        Change::new(
            ChangeOp::SetField,
            CallDescriptor::new("editHost")
                .arg(self.name.as_str())
                .kwarg("capacity", capacity),
            format!("set capacity = {} on {}", capacity, self.name),
        )
    }

    fn enable_change(&self, enabled: bool) -> Change {
        let method = if enabled { "enableHost" } else { "disableHost" };
        Change::new(
            ChangeOp::SetField,
            CallDescriptor::new(method).arg(self.name.as_str()),
            format!("set enabled = {} on {}", enabled, self.name),
        )
    }

    pub fn to_document(&self, include_defaults: bool) -> Document {
        let mut fields = Vec::new();
        if include_defaults || !self.arches.is_empty() {
            fields.push(("arches", json!(self.arches)));
        }
        if include_defaults || self.capacity.is_some() {
            fields.push((
                "capacity",
                self.capacity.map(|c| json!(c)).unwrap_or(json!(null)),
            ));
        }
        if include_defaults || !self.enabled {
            fields.push(("enabled", json!(self.enabled)));
        }
        if include_defaults || !self.channels.is_empty() {
            fields.push(("channels", json!(self.channels)));
        }
        if include_defaults || self.exact_channels {
            fields.push(("exact-channels", json!(self.exact_channels)));
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
        let host = Host {
            name: name.to_string(),
            origin: Origin::synthetic("remote"),
            arches: arches_from_observed(&info["arches"]),
            capacity: info["capacity"].as_f64(),
            enabled: info["enabled"].as_bool().unwrap_or(false),
            channels: observed_names(reads.value(1)?),
            exact_channels: false,
            suppressed: Vec::new(),
        };
        Ok(Some(host.to_document(include_defaults)))
    }
}
