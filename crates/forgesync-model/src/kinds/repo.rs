//! External repositories: a name and an http(s) url.

use super::{render_document, spec_from_doc};
use crate::change::{Change, ChangeOp};
use crate::object::{HubObject, ReadSet, Slot};
use crate::Document;
use forgesync_client::{CallDescriptor, Multicall, Promise};
use forgesync_core::{Error, Key, Origin, Result};
use serde::Deserialize;
use serde_json::json;

pub const KIND: &str = "external-repo";

#[derive(Clone, Debug)]
pub struct ExternalRepo {
    pub name: String,
    pub origin: Origin,
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RepoSpec {
    name: String,
    url: String,
}

pub fn build(doc: &Document) -> Result<HubObject> {
    let spec: RepoSpec = spec_from_doc(doc)?;
    if !spec.url.starts_with("http://") && !spec.url.starts_with("https://") {
        return Err(Error::validation(
            &doc.origin,
            "url",
            format!("`{}` is not an http(s) url", spec.url),
        ));
    }
    Ok(HubObject::ExternalRepo(ExternalRepo {
        name: spec.name,
        origin: doc.origin.clone(),
        url: spec.url,
    }))
}

impl ExternalRepo {
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
        vec![batch.call(CallDescriptor::new("getExternalRepo").arg(self.name.as_str()))]
    }

    pub fn diff_inner(
        &self,
        reads: &ReadSet,
        _only: Option<&[Slot]>,
        allow_create: bool,
    ) -> Result<Vec<Change>> {
        let info = reads.value(0)?;
        if info.is_null() {
            if !allow_create {
                return Ok(Vec::new());
            }
            return Ok(vec![Change::new(
                ChangeOp::CreateObject,
                CallDescriptor::new("createExternalRepo")
                    .arg(self.name.as_str())
                    .arg(self.url.as_str()),
                format!("create external repo {}", self.name),
            )]);
        }

        let mut changes = Vec::new();
        if info["url"].as_str() != Some(self.url.as_str()) {
            changes.push(Change::new(
                ChangeOp::SetField,
                CallDescriptor::new("editExternalRepo")
                    .arg(self.name.as_str())
                    .kwarg("url", self.url.as_str()),
                format!("set url = {} on {}", self.url, self.name),
            ));
        }
        Ok(changes)
    }

    pub fn to_document(&self, _include_defaults: bool) -> Document {
        render_document(
            KIND,
            &self.name,
            self.origin.clone(),
            vec![("url", json!(self.url))],
        )
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
        let repo = ExternalRepo {
            name: name.to_string(),
            origin: Origin::synthetic("remote"),
            url: info["url"].as_str().unwrap_or_default().to_string(),
        };
        Ok(Some(repo.to_document(include_defaults)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_documents;
    use crate::kinds::testutil::read_set;
    use std::path::Path;

    #[test]
    fn non_http_url_is_rejected() {
        let docs = parse_documents(
            "type: external-repo\nname: r\nurl: ftp://mirror.example.com\n",
            Path::new("repos.yaml"),
        )
        .unwrap();
        assert!(build(&docs[0]).is_err());
    }

    #[test]
    fn url_drift_is_a_field_edit() {
        let docs = parse_documents(
            "type: external-repo\nname: r\nurl: https://mirror.example.com/el9\n",
            Path::new("repos.yaml"),
        )
        .unwrap();
        let HubObject::ExternalRepo(repo) = build(&docs[0]).unwrap() else {
            panic!("expected repo");
        };
        let reads = read_set(
            &repo.key(),
            vec![Ok(json!({"name": "r", "url": "https://old.example.com"}))],
        );
        let changes = repo.diff_inner(&reads, None, true).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].op, ChangeOp::SetField);
    }
}
