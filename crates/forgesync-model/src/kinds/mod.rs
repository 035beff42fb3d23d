//! The concrete object kinds.

pub mod channel;
pub mod group;
pub mod host;
pub mod misc;
pub mod perm;
pub mod repo;
pub mod tag;
pub mod target;
pub mod user;

use crate::Document;
use forgesync_core::{Error, Origin, Result};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Deserialize a document body into a kind's spec struct, turning serde's
/// message (which names the offending field) into a validation error.
pub(crate) fn spec_from_doc<T: DeserializeOwned>(doc: &Document) -> Result<T> {
    serde_json::from_value(Value::Object(doc.data.clone()))
        .map_err(|e| Error::validation(&doc.origin, &doc.doc_type, e.to_string()))
}

/// Names out of an observed list whose items are either strings or structs
/// with a `name` member.
pub(crate) fn observed_names(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    item.as_str()
                        .or_else(|| item["name"].as_str())
                        .map(String::from)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Entries of `desired` absent from `observed`, in declaration order.
pub(crate) fn additions<'a>(desired: &'a [String], observed: &[String]) -> Vec<&'a str> {
    desired
        .iter()
        .filter(|d| !observed.iter().any(|o| o == *d))
        .map(String::as_str)
        .collect()
}

/// Entries of `observed` absent from `desired`, in observed order.
pub(crate) fn removals<'a>(desired: &[String], observed: &'a [String]) -> Vec<&'a str> {
    observed
        .iter()
        .filter(|o| !desired.iter().any(|d| d == *o))
        .map(String::as_str)
        .collect()
}

/// Build a document for rendering: `name` first, then the given fields in
/// order, dropping nulls.
pub(crate) fn render_document(
    kind: &str,
    name: &str,
    origin: Origin,
    fields: Vec<(&str, Value)>,
) -> Document {
    let mut data = Map::new();
    data.insert("name".into(), Value::String(name.to_string()));
    for (key, value) in fields {
        if !value.is_null() {
            data.insert(key.to_string(), value);
        }
    }
    Document {
        doc_type: kind.to_string(),
        data,
        origin,
    }
}

/// Whitespace-separated arch string, the form the hub stores.
pub(crate) fn arches_to_string(arches: &[String]) -> String {
    arches.join(" ")
}

pub(crate) fn arches_from_observed(value: &Value) -> Vec<String> {
    value
        .as_str()
        .map(|s| s.split_whitespace().map(String::from).collect())
        .unwrap_or_default()
}

/// Arch lists compare as sets; the hub does not keep an order.
pub(crate) fn arches_equal(desired: &[String], observed: &[String]) -> bool {
    use std::collections::BTreeSet;
    desired.iter().collect::<BTreeSet<_>>() == observed.iter().collect::<BTreeSet<_>>()
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::object::ReadSet;
    use forgesync_client::{CallDescriptor, CallOutcome, Promise};
    use forgesync_core::Key;

    /// Fabricate a settled read set for diff tests. The promise slice is
    /// leaked; that is confined to tests and keeps signatures simple.
    pub fn read_set(key: &Key, outcomes: Vec<CallOutcome>) -> ReadSet<'static> {
        let promises: Vec<Promise> = outcomes
            .into_iter()
            .enumerate()
            .map(|(i, outcome)| {
                Promise::resolved(CallDescriptor::new(format!("probe{}", i)), outcome)
            })
            .collect();
        let leaked: &'static [Promise] = Box::leak(promises.into_boxed_slice());
        ReadSet::new(key.clone(), leaked)
    }
}
